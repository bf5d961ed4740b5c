pub mod core;
pub mod generation;
pub mod pipelines;

/// Number of beams kept per step when none is configured.
pub const DEFAULT_BEAM_SIZE: usize = 6;
/// Candidates at or below this probability are never expanded.
pub const DEFAULT_MIN_P: f32 = 0.01;
/// Repetition penalty is off unless asked for.
pub const DEFAULT_REPETITION_PENALTY: f32 = 0.0;
/// Step budget of a single decode.
pub const DEFAULT_MAX_LEN: usize = 128;

// Re-export core types
pub use crate::core::{
    global_registry, BeamSearchBuilder, BeamSearchConfig, BeamSearchError, BeamSearchHandle,
    BeamSearchRegistry,
};

// Re-export the engine and the decode loop for easier access
pub use crate::generation::{Beam, BeamSearch, TokenId};
pub use crate::pipelines::{BeamDecoder, DecodeStream, DecoderModel};
