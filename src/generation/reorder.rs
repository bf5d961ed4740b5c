//! Realign per-beam state after a search step.
//!
//! Models keep one slice of state (usually attention key/value caches) per beam
//! slot. After pruning, the beam now at rank `i` descends from slot
//! `origin_ids[i]`, so row `i` of the state must become a copy of the old row
//! `origin_ids[i]`.

use candle_core::{Device, Tensor};
use rayon::prelude::*;

use crate::core::{BeamSearchError, Result};

/// Copy row `origin_ids[i]` of `state` into row `i` of a new buffer.
///
/// `state` is split into `rows` equal rows, one per beam slot of the previous
/// step. The returned buffer has the same length as `state`; when fewer beams
/// survived than there were rows, the trailing rows are zeroed. The input is
/// left untouched.
///
/// ```
/// use beam_decoder::generation::reorder_rows;
///
/// let state = [0u8, 0, 1, 1, 2, 2];
/// let reordered = reorder_rows(&state, &[2, 2, 0], 3)?;
/// assert_eq!(reordered, vec![2, 2, 2, 2, 0, 0]);
/// # Ok::<(), beam_decoder::core::BeamSearchError>(())
/// ```
pub fn reorder_rows(state: &[u8], origin_ids: &[usize], rows: usize) -> Result<Vec<u8>> {
    if origin_ids.is_empty() {
        return Err(BeamSearchError::EmptyOrigins);
    }
    if rows == 0 || state.len() % rows != 0 || origin_ids.len() > rows {
        return Err(BeamSearchError::RaggedBuffer {
            len: state.len(),
            rows,
        });
    }
    if let Some(&origin) = origin_ids.iter().find(|&&origin| origin >= rows) {
        return Err(BeamSearchError::OriginOutOfRange { origin, rows });
    }

    let row_len = state.len() / rows;
    let _span = tracing::span!(tracing::Level::TRACE, "reorder_rows", rows, row_len).entered();

    let mut reordered = vec![0u8; state.len()];
    if row_len == 0 {
        return Ok(reordered);
    }
    reordered
        .par_chunks_mut(row_len)
        .zip(origin_ids.par_iter())
        .for_each(|(row, &origin)| {
            let start = origin * row_len;
            row.copy_from_slice(&state[start..start + row_len]);
        });
    Ok(reordered)
}

/// Select rows of `state` along dim 0 in `origin_ids` order.
///
/// Unlike [`reorder_rows`] the result has `origin_ids.len()` rows, so a tensor
/// cache shrinks with the beam set.
pub fn reorder_tensor(state: &Tensor, origin_ids: &[usize]) -> Result<Tensor> {
    if origin_ids.is_empty() {
        return Err(BeamSearchError::EmptyOrigins);
    }
    let rows = state.dim(0)?;
    if let Some(&origin) = origin_ids.iter().find(|&&origin| origin >= rows) {
        return Err(BeamSearchError::OriginOutOfRange { origin, rows });
    }

    let indices = origin_tensor(origin_ids, state.device())?;
    Ok(state.index_select(&indices, 0)?.contiguous()?)
}

/// Origin ids as a `u32` index tensor on `device`.
pub fn origin_tensor(origin_ids: &[usize], device: &Device) -> Result<Tensor> {
    let ids: Vec<u32> = origin_ids.iter().map(|&id| id as u32).collect();
    Ok(Tensor::new(ids.as_slice(), device)?)
}
