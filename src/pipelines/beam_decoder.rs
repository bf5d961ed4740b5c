//! Drive a decoder model with beam search until the output is complete.

use std::time::Instant;

use anyhow::Context;
use async_stream::try_stream;
use candle_core::{Device, Tensor};

use super::decode_stream::DecodeStream;
use crate::core::BeamSearchConfig;
use crate::generation::{BeamSearch, TokenId};

/// The inference side of a beam-search decode.
///
/// Implementors own the model weights and whatever per-beam state the model
/// keeps between steps (typically attention key/value caches).
pub trait DecoderModel {
    /// Next-token logits for every beam slot.
    ///
    /// `input_ids` has shape `[beams, 1]` and holds the latest token of each
    /// beam. The result must be `[beams, vocab]` or `[beams, seq, vocab]`.
    fn forward(&mut self, input_ids: &Tensor) -> anyhow::Result<Tensor>;

    /// Rearrange per-beam state so slot `i` continues from old slot `origin_ids[i]`.
    fn reorder_cache(&mut self, origin_ids: &[usize]) -> anyhow::Result<()>;

    /// Forget all per-beam state before a new decode.
    fn reset(&mut self) {}

    fn device(&self) -> &Device;
}

/// Beam-search decoding loop over a [`DecoderModel`].
pub struct BeamDecoder<M: DecoderModel> {
    model: M,
    search: BeamSearch,
}

impl<M: DecoderModel> BeamDecoder<M> {
    pub fn new(model: M, config: BeamSearchConfig) -> anyhow::Result<Self> {
        let search = BeamSearch::new(config)?;
        Ok(Self { model, search })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn search(&self) -> &BeamSearch {
        &self.search
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Decode until the beams complete, every beam is dropped or `max_len`
    /// steps have run. Returns the best sequence, starting with the pad token.
    pub fn generate(&mut self) -> anyhow::Result<Vec<TokenId>> {
        self.begin();

        let max_len = self.search.config().max_len;
        let started = Instant::now();
        let mut steps = 0;
        while steps < max_len && self.step()? {
            steps += 1;
        }

        tracing::debug!(
            steps,
            complete = self.search.complete(),
            elapsed = ?started.elapsed(),
            "beam decode finished"
        );
        Ok(self.search.best().to_vec())
    }

    /// Like [`generate`](Self::generate), but yields the best sequence after
    /// every step.
    pub fn generate_stream(
        &mut self,
    ) -> DecodeStream<impl futures::Stream<Item = anyhow::Result<Vec<TokenId>>> + '_> {
        let stream = try_stream! {
            self.begin();
            let max_len = self.search.config().max_len;
            for _ in 0..max_len {
                if !self.step()? {
                    break;
                }
                yield self.search.best().to_vec();
            }
        };
        DecodeStream::new(stream)
    }

    fn begin(&mut self) {
        self.search.reset();
        self.model.reset();
    }

    /// Run one step. Returns `false` without touching the model when decoding
    /// is already finished.
    fn step(&mut self) -> anyhow::Result<bool> {
        if self.search.complete() || self.search.beams().is_empty() {
            return Ok(false);
        }

        let tokens = self.search.last_tokens();
        let rows = tokens.len();
        let input_ids = Tensor::from_vec(tokens, (rows, 1), self.model.device())?;

        let started = Instant::now();
        let logits = self
            .model
            .forward(&input_ids)
            .context("decoder forward pass failed")?;
        let forward_time = started.elapsed();

        self.search.search_tensor(&logits)?;

        let origin_ids = self.search.top_beam_ids();
        if !origin_ids.is_empty() {
            self.model
                .reorder_cache(&origin_ids)
                .context("failed to reorder decoder cache")?;
        }

        tracing::debug!(
            ?forward_time,
            beams = origin_ids.len(),
            best_score = self.search.beams().first().map(|b| b.score),
            "decode step"
        );
        Ok(true)
    }
}
