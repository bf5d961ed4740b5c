use thiserror::Error;

/// Error type returned by the beam-search engine, its primitives and the
/// instance registry.
#[derive(Debug, Error)]
pub enum BeamSearchError {
    /// The flat logits buffer does not hold exactly one row per live beam.
    #[error("logits buffer holds {actual} values, expected {expected} (beams x vocabulary)")]
    LogitsLength { expected: usize, actual: usize },

    /// A step was requested with a vocabulary size of zero.
    #[error("vocabulary size must be greater than zero")]
    EmptyVocabulary,

    /// Top-k was asked for zero candidates or more candidates than exist.
    #[error("top-k of {k} is out of range for {len} candidates")]
    InvalidTopK { k: usize, len: usize },

    /// A state buffer cannot be split into equally sized beam rows.
    #[error("state buffer of {len} bytes cannot be split into {rows} equal rows")]
    RaggedBuffer { len: usize, rows: usize },

    /// A reorder was requested without any surviving beams.
    #[error("no origin ids to reorder by")]
    EmptyOrigins,

    /// An origin id points past the last row of the state buffer.
    #[error("origin id {origin} is out of range for {rows} rows")]
    OriginOutOfRange { origin: usize, rows: usize },

    /// Construction parameters failed validation.
    #[error("invalid beam search configuration: {0}")]
    InvalidConfig(String),

    /// No engine is registered under the given handle.
    #[error("no beam search instance registered for handle {0}")]
    UnknownHandle(u64),

    /// A tensor operation failed while reading logits or reordering state.
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, BeamSearchError>;
