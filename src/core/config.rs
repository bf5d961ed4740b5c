use serde::{Deserialize, Serialize};

use super::error::{BeamSearchError, Result};
use crate::generation::TokenId;

fn default_beam_size() -> usize {
    crate::DEFAULT_BEAM_SIZE
}

fn default_min_p() -> f32 {
    crate::DEFAULT_MIN_P
}

fn default_repetition_penalty() -> f32 {
    crate::DEFAULT_REPETITION_PENALTY
}

fn default_max_len() -> usize {
    crate::DEFAULT_MAX_LEN
}

/// Construction parameters for a beam-search engine.
///
/// All values are fixed for the lifetime of the engine. Only the token ids are
/// mandatory when deserializing; every other knob falls back to the crate
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSearchConfig {
    /// Maximum number of beams kept after each step.
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,
    /// Candidates must have a probability strictly above this value.
    #[serde(default = "default_min_p")]
    pub min_p: f32,
    /// Score subtracted per extra occurrence of a token in a sequence.
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
    pub pad_token_id: TokenId,
    pub eos_token_id: TokenId,
    /// Optional cap on the number of children a single beam may spawn.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Step budget for the decode loop.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl BeamSearchConfig {
    pub fn new(pad_token_id: TokenId, eos_token_id: TokenId) -> Self {
        Self {
            beam_size: crate::DEFAULT_BEAM_SIZE,
            min_p: crate::DEFAULT_MIN_P,
            repetition_penalty: crate::DEFAULT_REPETITION_PENALTY,
            pad_token_id,
            eos_token_id,
            top_k: None,
            max_len: crate::DEFAULT_MAX_LEN,
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BeamSearchError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_size == 0 {
            return Err(BeamSearchError::InvalidConfig(
                "beam_size must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.min_p) {
            return Err(BeamSearchError::InvalidConfig(format!(
                "min_p must be in [0, 1), got {}",
                self.min_p
            )));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty < 0.0 {
            return Err(BeamSearchError::InvalidConfig(format!(
                "repetition_penalty must be a non-negative number, got {}",
                self.repetition_penalty
            )));
        }
        if self.top_k == Some(0) {
            return Err(BeamSearchError::InvalidConfig(
                "top_k must be at least 1 when set".into(),
            ));
        }
        if self.max_len == 0 {
            return Err(BeamSearchError::InvalidConfig(
                "max_len must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`BeamSearchConfig`].
///
/// Unset options resolve to the crate defaults in [`build`](Self::build).
///
/// ```rust
/// use beam_decoder::core::BeamSearchBuilder;
///
/// let config = BeamSearchBuilder::new(0, 2)
///     .beam_size(4)
///     .min_p(0.01)
///     .repetition_penalty(0.5)
///     .build()?;
/// assert_eq!(config.beam_size, 4);
/// # Ok::<(), beam_decoder::core::BeamSearchError>(())
/// ```
pub struct BeamSearchBuilder {
    pad_token_id: TokenId,
    eos_token_id: TokenId,
    beam_size: Option<usize>,
    min_p: Option<f32>,
    repetition_penalty: Option<f32>,
    top_k: Option<usize>,
    max_len: Option<usize>,
}

impl BeamSearchBuilder {
    pub fn new(pad_token_id: TokenId, eos_token_id: TokenId) -> Self {
        Self {
            pad_token_id,
            eos_token_id,
            beam_size: None,
            min_p: None,
            repetition_penalty: None,
            top_k: None,
            max_len: None,
        }
    }

    /// Set the number of beams kept per step (default: 6).
    pub fn beam_size(mut self, beam_size: usize) -> Self {
        self.beam_size = Some(beam_size);
        self
    }

    /// Set the min-p probability threshold (default: 0.01).
    pub fn min_p(mut self, min_p: f32) -> Self {
        self.min_p = Some(min_p);
        self
    }

    /// Set the additive repetition penalty (default: 0.0, disabled).
    pub fn repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }

    /// Cap the children of each beam to its `k` most probable tokens.
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Set the decode loop's step budget (default: 128).
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn build(self) -> Result<BeamSearchConfig> {
        let config = BeamSearchConfig {
            beam_size: self.beam_size.unwrap_or(crate::DEFAULT_BEAM_SIZE),
            min_p: self.min_p.unwrap_or(crate::DEFAULT_MIN_P),
            repetition_penalty: self
                .repetition_penalty
                .unwrap_or(crate::DEFAULT_REPETITION_PENALTY),
            pad_token_id: self.pad_token_id,
            eos_token_id: self.eos_token_id,
            top_k: self.top_k,
            max_len: self.max_len.unwrap_or(crate::DEFAULT_MAX_LEN),
        };
        config.validate()?;
        Ok(config)
    }
}
