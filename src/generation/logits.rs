//! Scoring primitives used by the beam-search step.
//!
//! These are plain functions over `f32` slices: the engine calls them once per
//! parent beam, and they carry no state of their own.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::TokenId;

/// Floor applied to probabilities before taking a logarithm.
pub const PROBABILITY_FLOOR: f32 = 1e-9;

/// Convert raw logits into a probability distribution.
///
/// Uses the "subtract max" form so large logits cannot overflow. Falls back to a
/// uniform distribution when every exponential underflows. The caller must
/// supply at least one logit.
///
/// ```
/// use beam_decoder::generation::softmax;
///
/// let probs = softmax(&[1.0, 2.0, 3.0]);
/// let sum: f32 = probs.iter().sum();
/// assert!((sum - 1.0).abs() < 1e-5);
/// assert!(probs[2] > probs[1] && probs[1] > probs[0]);
/// ```
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    if sum > 0.0 && sum.is_finite() {
        for e in exps.iter_mut() {
            *e /= sum;
        }
    } else {
        let uniform = 1.0 / exps.len() as f32;
        exps.iter_mut().for_each(|e| *e = uniform);
    }
    exps
}

/// Indices whose probability is strictly greater than `threshold`, ascending.
///
/// An empty result is valid: the beam that produced these probabilities simply
/// has no children this step.
pub fn min_p_indices(probabilities: &[f32], threshold: f32) -> Vec<usize> {
    probabilities
        .iter()
        .enumerate()
        .filter(|(_, &p)| p > threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Indices of the `k` largest values, ordered by value descending.
///
/// Returns an empty vector when `k == 0` or `k > values.len()`; `k` is not
/// clamped to the slice length. Ties are not guaranteed to keep index order.
///
/// ```
/// use beam_decoder::generation::top_k_indices;
///
/// assert_eq!(top_k_indices(&[0.1, 0.5, 0.2, 0.9], 2), vec![3, 1]);
/// assert!(top_k_indices(&[0.1, 0.5], 3).is_empty());
/// ```
pub fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    if k == 0 || k > values.len() {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..values.len()).collect();
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| descending(values[a], values[b]));
        indices.truncate(k);
    }
    indices.sort_unstable_by(|&a, &b| descending(values[a], values[b]));
    indices
}

/// Subtract `penalty * (count - 1)` from `score` for every token that occurs
/// more than once in `sequence`.
///
/// The result is a heuristic ranking score, no longer a log-probability.
pub fn penalize_repetition(sequence: &[TokenId], score: f32, penalty: f32) -> f32 {
    let mut frequencies: HashMap<TokenId, usize> = HashMap::with_capacity(sequence.len());
    for &token in sequence {
        *frequencies.entry(token).or_insert(0) += 1;
    }

    frequencies
        .values()
        .filter(|&&count| count > 1)
        .fold(score, |score, &count| score - penalty * (count - 1) as f32)
}

/// Natural log of `probability`, floored at [`PROBABILITY_FLOOR`].
#[inline]
pub fn floored_ln(probability: f32) -> f32 {
    probability.max(PROBABILITY_FLOOR).ln()
}

#[inline]
fn descending(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
