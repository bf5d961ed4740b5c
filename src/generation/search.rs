//! The beam-search engine.
//!
//! One [`BeamSearch`] owns the live beam set for a single decode. Each call to
//! [`BeamSearch::search`] consumes one row of logits per live beam, expands every
//! beam by its min-p candidates, drops duplicate sequences and keeps the
//! `beam_size` best. The caller then feeds [`BeamSearch::last_tokens`] back to
//! the model and realigns its per-beam state with [`BeamSearch::top_beam_ids`].

use std::collections::HashSet;

use candle_core::{DType, Tensor};
use rayon::prelude::*;

use super::beam::Beam;
use super::logits::{floored_ln, min_p_indices, penalize_repetition, softmax, top_k_indices};
use super::reorder::{reorder_rows, reorder_tensor};
use super::TokenId;
use crate::core::{BeamSearchConfig, BeamSearchError, Result};

#[derive(Debug)]
pub struct BeamSearch {
    config: BeamSearchConfig,
    beams: Vec<Beam>,
    /// Beams that fed the last step, i.e. rows in the caller's per-beam state.
    parents: usize,
    span: tracing::Span,
}

impl BeamSearch {
    /// Create an engine with `beam_size` identical beams holding only the pad token.
    pub fn new(config: BeamSearchConfig) -> Result<Self> {
        config.validate()?;
        let beams = initial_beams(&config);
        let span = tracing::span!(tracing::Level::TRACE, "beam_search");
        Ok(Self {
            parents: beams.len(),
            config,
            beams,
            span,
        })
    }

    pub fn config(&self) -> &BeamSearchConfig {
        &self.config
    }

    /// Live beams, best first.
    pub fn beams(&self) -> &[Beam] {
        &self.beams
    }

    /// Drop all progress and start again from the pad token.
    pub fn reset(&mut self) {
        self.beams = initial_beams(&self.config);
        self.parents = self.beams.len();
    }

    /// Advance every live beam by one token.
    ///
    /// `logits` is laid out `[beam][vocab]`, one contiguous row of `vocab_size`
    /// values per live beam.
    pub fn search(&mut self, logits: &[f32], vocab_size: usize) -> Result<()> {
        let _enter = self.span.enter();

        if vocab_size == 0 {
            return Err(BeamSearchError::EmptyVocabulary);
        }
        let expected = self.beams.len() * vocab_size;
        if logits.len() != expected {
            return Err(BeamSearchError::LogitsLength {
                expected,
                actual: logits.len(),
            });
        }
        if let Some(k) = self.config.top_k {
            if k > vocab_size {
                return Err(BeamSearchError::InvalidTopK {
                    k,
                    len: vocab_size,
                });
            }
        }

        let parents = self.beams.len();
        let candidates: Vec<Beam> = self
            .beams
            .par_iter()
            .zip(logits.par_chunks(vocab_size))
            .enumerate()
            .flat_map_iter(|(slot, (parent, row))| expand(&self.config, slot, parent, row))
            .collect();
        let pool = candidates.len();

        let mut survivors = deduplicate(candidates);
        let unique = survivors.len();
        survivors.truncate(self.config.beam_size);

        tracing::debug!(
            parents,
            candidates = pool,
            unique,
            survivors = survivors.len(),
            "beam search step"
        );
        if survivors.is_empty() && parents > 0 {
            tracing::warn!(
                min_p = self.config.min_p,
                "no candidate cleared the min-p threshold, every beam was dropped"
            );
        }

        self.parents = parents;
        self.beams = survivors;
        Ok(())
    }

    /// [`search`](Self::search) over a logits tensor.
    ///
    /// Accepts `[beams, vocab]` or `[beams, seq, vocab]`; for the latter only the
    /// last position is used. Any float dtype is converted to `f32`.
    pub fn search_tensor(&mut self, logits: &Tensor) -> Result<()> {
        let logits = match logits.dims() {
            [_, seq, _] if *seq > 0 => logits.narrow(1, seq - 1, 1)?,
            _ => logits.clone(),
        };
        let vocab_size = logits
            .dims()
            .last()
            .copied()
            .ok_or(BeamSearchError::EmptyVocabulary)?;
        let values = logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        self.search(&values, vocab_size)
    }

    /// Most recent token of every live beam, in rank order.
    pub fn last_tokens(&self) -> Vec<TokenId> {
        self.beams.iter().filter_map(Beam::last_token).collect()
    }

    /// Whether decoding should stop.
    ///
    /// True when the best beam ends in EOS, or when all of the top
    /// `ceil(beam_size / 2)` beams do.
    pub fn complete(&self) -> bool {
        let eos = self.config.eos_token_id;
        if self.beams.first().is_some_and(|beam| beam.ends_with(eos)) {
            return true;
        }

        let quorum = self.config.beam_size.div_ceil(2);
        let finished = self
            .beams
            .iter()
            .take(quorum)
            .filter(|beam| beam.ends_with(eos))
            .count();
        finished == quorum
    }

    /// Sequence of the best beam, or an empty slice when no beam survived.
    pub fn best(&self) -> &[TokenId] {
        self.beams
            .first()
            .map(|beam| beam.sequence.as_slice())
            .unwrap_or_default()
    }

    /// Parent slot of every live beam, in rank order.
    pub fn top_beam_ids(&self) -> Vec<usize> {
        self.beams
            .iter()
            .take(self.config.beam_size)
            .map(|beam| beam.origin_id)
            .collect()
    }

    /// Reorder a per-beam byte buffer so row `i` belongs to the beam now at rank `i`.
    ///
    /// `state` must hold exactly one equally sized row per beam that fed the last
    /// step, i.e. one row per entry `last_tokens` returned before it. The result
    /// keeps the input length, so after the beam set shrinks the caller must drop
    /// the zeroed trailing rows (keep `top_beam_ids().len()` rows) before the
    /// next reorder. A padded buffer whose length still divides evenly would be
    /// split with the wrong row size.
    pub fn reorder_state(&self, state: &[u8]) -> Result<Vec<u8>> {
        reorder_rows(state, &self.top_beam_ids(), self.parents)
    }

    /// Reorder dim 0 of a per-beam tensor so row `i` belongs to the beam now at rank `i`.
    pub fn reorder_state_tensor(&self, state: &Tensor) -> Result<Tensor> {
        reorder_tensor(state, &self.top_beam_ids())
    }
}

fn initial_beams(config: &BeamSearchConfig) -> Vec<Beam> {
    (0..config.beam_size)
        .map(|slot| Beam::start(slot, config.pad_token_id))
        .collect()
}

/// Children of `parent` for one row of logits.
fn expand(config: &BeamSearchConfig, slot: usize, parent: &Beam, logits: &[f32]) -> Vec<Beam> {
    let probabilities = softmax(logits);
    let mut tokens = min_p_indices(&probabilities, config.min_p);

    if let Some(k) = config.top_k {
        if tokens.len() > k {
            let kept: Vec<f32> = tokens.iter().map(|&t| probabilities[t]).collect();
            tokens = top_k_indices(&kept, k)
                .into_iter()
                .map(|i| tokens[i])
                .collect();
        }
    }

    tokens
        .into_iter()
        .map(|token| {
            let mut child = parent.child(slot, token as TokenId, 0.0);
            let score = parent.score + floored_ln(probabilities[token]);
            child.score = penalize_repetition(&child.sequence, score, config.repetition_penalty);
            child
        })
        .collect()
}

/// Sort by score descending and keep the best-scoring beam of each sequence.
///
/// The sort is stable, so equal scores stay in emission order.
pub(crate) fn deduplicate(mut candidates: Vec<Beam>) -> Vec<Beam> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let keep: Vec<bool> = {
        let mut seen = HashSet::with_capacity(candidates.len());
        candidates
            .iter()
            .map(|beam| seen.insert(beam.sequence.as_slice()))
            .collect()
    };
    let mut keep = keep.into_iter();
    candidates.retain(|_| keep.next().unwrap_or(false));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BeamSearchBuilder;
    use candle_core::Device;

    fn engine(beam_size: usize, eos: TokenId) -> BeamSearch {
        let config = BeamSearchBuilder::new(0, eos)
            .beam_size(beam_size)
            .min_p(0.0)
            .build()
            .unwrap();
        BeamSearch::new(config).unwrap()
    }

    fn with_beams(mut search: BeamSearch, sequences: &[&[TokenId]]) -> BeamSearch {
        search.beams = sequences
            .iter()
            .enumerate()
            .map(|(i, seq)| Beam::new(i, seq.to_vec(), -(i as f32)))
            .collect();
        search
    }

    #[test]
    fn starts_with_pad_beams() {
        let search = engine(3, 2);
        assert_eq!(search.beams().len(), 3);
        assert_eq!(search.last_tokens(), vec![0, 0, 0]);
        assert_eq!(search.top_beam_ids(), vec![0, 1, 2]);
        assert_eq!(search.best(), &[0]);
    }

    #[test]
    fn step_prunes_to_beam_size_and_sorts() {
        let mut search = engine(2, 3);
        let logits = [0.0, 1.0, 2.0, 3.0, 3.0, 2.0, 1.0, 0.0];
        search.search(&logits, 4).unwrap();

        let beams = search.beams();
        assert_eq!(beams.len(), 2);
        assert!(beams[0].score >= beams[1].score);
        assert!(beams.iter().all(|b| b.len() == 2));
    }

    #[test]
    fn identical_parents_collapse_to_unique_children() {
        // Both start beams are [pad] with the same score, so their children
        // coincide and must be merged.
        let logits = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let mut search = engine(2, 9);
        search.search(&logits, 4).unwrap();
        let beams = search.beams();
        assert_eq!(beams.len(), 2);
        assert_ne!(beams[0].sequence, beams[1].sequence);
        assert_eq!(beams[0].sequence, vec![0, 2]);
    }

    #[test]
    fn deduplicate_merges_equal_beams() {
        let pool = vec![
            Beam::new(0, vec![0, 1], -1.0),
            Beam::new(1, vec![0, 1], -1.0),
            Beam::new(1, vec![0, 4], -0.5),
        ];
        let unique = deduplicate(pool);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].sequence, vec![0, 4]);
        assert_eq!(unique[1].origin_id, 0);
    }

    #[test]
    fn deduplicate_keeps_best_score_per_sequence() {
        let pool = vec![
            Beam::new(0, vec![0, 1], -2.0),
            Beam::new(1, vec![0, 1], -1.0),
        ];
        let unique = deduplicate(pool);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].score, -1.0);
        assert_eq!(unique[0].origin_id, 1);
    }

    #[test]
    fn rejects_malformed_logits() {
        let mut search = engine(2, 3);
        assert!(matches!(
            search.search(&[0.0; 7], 4),
            Err(BeamSearchError::LogitsLength {
                expected: 8,
                actual: 7
            })
        ));
        assert!(matches!(
            search.search(&[], 0),
            Err(BeamSearchError::EmptyVocabulary)
        ));
        // A failed step leaves the beams untouched.
        assert_eq!(search.best(), &[0]);
    }

    #[test]
    fn top_k_larger_than_vocabulary_is_rejected() {
        let config = BeamSearchBuilder::new(0, 3)
            .beam_size(1)
            .min_p(0.0)
            .top_k(5)
            .build()
            .unwrap();
        let mut search = BeamSearch::new(config).unwrap();
        assert!(matches!(
            search.search(&[0.0; 4], 4),
            Err(BeamSearchError::InvalidTopK { k: 5, len: 4 })
        ));
    }

    #[test]
    fn top_k_caps_children_per_beam() {
        let config = BeamSearchBuilder::new(0, 3)
            .beam_size(4)
            .min_p(0.0)
            .top_k(1)
            .build()
            .unwrap();
        let mut search = BeamSearch::new(config).unwrap();
        search.search(&[0.0, 4.0, 1.0, 2.0].repeat(4), 4).unwrap();
        // Every parent offers only token 1, which then merges to one beam.
        assert_eq!(search.beams().len(), 1);
        assert_eq!(search.best(), &[0, 1]);
    }

    #[test]
    fn empty_candidate_sets_drop_the_beam() {
        let config = BeamSearchBuilder::new(0, 3)
            .beam_size(2)
            .min_p(0.9)
            .build()
            .unwrap();
        let mut search = BeamSearch::new(config).unwrap();
        search.search(&[0.0; 8], 4).unwrap();
        assert!(search.beams().is_empty());
        assert!(search.best().is_empty());
        assert!(!search.complete());

        // Zero live beams accept an empty logits buffer.
        search.search(&[], 4).unwrap();
        assert!(search.beams().is_empty());
    }

    #[test]
    fn repetition_penalty_lowers_repeated_children() {
        let config = BeamSearchBuilder::new(0, 3)
            .beam_size(2)
            .min_p(0.0)
            .repetition_penalty(10.0)
            .build()
            .unwrap();
        let mut search = BeamSearch::new(config).unwrap();
        // Token 0 (the pad) is the most likely, but repeating it costs 10.
        search.search(&[3.0, 2.0, 0.0, 0.0].repeat(2), 4).unwrap();
        assert_eq!(search.best(), &[0, 1]);
        assert_eq!(search.beams()[1].sequence, vec![0, 2]);
    }

    #[test]
    fn best_beam_ending_in_eos_completes() {
        let search = with_beams(engine(4, 2), &[&[0, 2], &[0, 1], &[0, 1], &[0, 1]]);
        assert!(search.complete());
    }

    #[test]
    fn odd_beam_size_needs_full_quorum() {
        let search = with_beams(
            engine(5, 2),
            &[&[0, 1], &[0, 2], &[0, 2], &[0, 2], &[0, 2]],
        );
        assert!(!search.complete());

        let search = with_beams(
            engine(5, 2),
            &[&[0, 1], &[0, 2], &[0, 1], &[0, 2], &[0, 2]],
        );
        assert!(!search.complete());
    }

    #[test]
    fn unfinished_best_beam_blocks_quorum() {
        // Beam 0 is always inside the quorum, so the others finishing is not enough.
        let mut search = with_beams(engine(4, 2), &[&[0, 1], &[0, 2], &[0, 2], &[0, 2]]);
        assert!(!search.complete());
        search.beams[0].sequence.push(2);
        assert!(search.complete());
    }

    #[test]
    fn short_beam_set_cannot_reach_quorum() {
        let search = with_beams(engine(6, 2), &[&[0, 1], &[0, 2]]);
        assert!(!search.complete());
    }

    #[test]
    fn reset_restores_pad_beams() {
        let mut search = engine(2, 3);
        search.search(&[0.0; 8], 4).unwrap();
        search.reset();
        assert_eq!(search.beams().len(), 2);
        assert_eq!(search.best(), &[0]);
    }

    #[test]
    fn search_tensor_uses_last_position() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let mut search = engine(2, 3);
        // [beams=2, seq=2, vocab=4]; the first position would favour token 0.
        let logits = Tensor::new(
            &[
                [[9.0f32, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 5.0]],
                [[9.0f32, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 5.0]],
            ],
            &device,
        )?;
        search.search_tensor(&logits)?;
        assert_eq!(search.best(), &[0, 3]);
        Ok(())
    }

    #[test]
    fn reorder_state_follows_origins() {
        let mut search = engine(2, 3);
        search.beams = vec![Beam::new(1, vec![0, 1], -0.1), Beam::new(0, vec![0, 2], -0.2)];
        let state = [1u8, 1, 2, 2];
        assert_eq!(search.reorder_state(&state).unwrap(), vec![2, 2, 1, 1]);
    }

    #[test]
    fn reorder_state_after_shrink_uses_surviving_rows() {
        let config = BeamSearchBuilder::new(0, 9)
            .beam_size(3)
            .min_p(0.5)
            .build()
            .unwrap();
        let mut search = BeamSearch::new(config).unwrap();

        // Three identical parents all pick token 2, which merges into one beam.
        search.search(&[0.0, 0.0, 9.0, 0.0].repeat(3), 4).unwrap();
        assert_eq!(search.beams().len(), 1);

        let state = [1u8, 1, 2, 2, 3, 3];
        let reordered = search.reorder_state(&state).unwrap();
        assert_eq!(reordered, vec![1, 1, 0, 0, 0, 0]);

        // One row per surviving beam goes into the next step.
        let row_len = state.len() / 3;
        let live = &reordered[..search.top_beam_ids().len() * row_len];
        search.search(&[0.0, 9.0, 0.0, 0.0], 4).unwrap();
        assert_eq!(search.reorder_state(live).unwrap(), vec![1, 1]);
    }
}
