pub mod beam;
pub mod logits;
pub mod reorder;
pub mod search;

/// Vocabulary index of a token.
pub type TokenId = u32;

pub use beam::{Beam, INITIAL_SCORE};
pub use logits::{
    floored_ln, min_p_indices, penalize_repetition, softmax, top_k_indices, PROBABILITY_FLOOR,
};
pub use reorder::{origin_tensor, reorder_rows, reorder_tensor};
pub use search::BeamSearch;
