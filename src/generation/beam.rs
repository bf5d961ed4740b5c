use super::TokenId;

/// Score every beam starts with. Slightly below zero so a fresh beam is never
/// mistaken for a certain (log-probability 0) sequence.
pub const INITIAL_SCORE: f32 = -1e-9;

/// One candidate partial sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
    /// Slot of the parent beam in the previous step's beam set.
    pub origin_id: usize,
    /// Token ids generated so far, starting with the pad token.
    pub sequence: Vec<TokenId>,
    /// Cumulative log-probability minus repetition penalties.
    pub score: f32,
}

impl Beam {
    pub fn new(origin_id: usize, sequence: Vec<TokenId>, score: f32) -> Self {
        Self {
            origin_id,
            sequence,
            score,
        }
    }

    /// A fresh beam holding only the pad token.
    pub fn start(origin_id: usize, pad_token_id: TokenId) -> Self {
        Self::new(origin_id, vec![pad_token_id], INITIAL_SCORE)
    }

    /// Child of this beam with `token` appended, descending from slot `origin_id`.
    #[must_use]
    pub fn child(&self, origin_id: usize, token: TokenId, score: f32) -> Self {
        let mut sequence = Vec::with_capacity(self.sequence.len() + 1);
        sequence.extend_from_slice(&self.sequence);
        sequence.push(token);
        Self::new(origin_id, sequence, score)
    }

    /// The most recent token; `None` only for a beam built with an empty sequence.
    pub fn last_token(&self) -> Option<TokenId> {
        self.sequence.last().copied()
    }

    pub fn ends_with(&self, token: TokenId) -> bool {
        self.last_token() == Some(token)
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_beam_holds_pad() {
        let beam = Beam::start(3, 58100);
        assert_eq!(beam.origin_id, 3);
        assert_eq!(beam.sequence, vec![58100]);
        assert_eq!(beam.score, INITIAL_SCORE);
        assert_eq!(beam.last_token(), Some(58100));
    }

    #[test]
    fn child_appends_one_token() {
        let parent = Beam::start(0, 0);
        let child = parent.child(1, 42, -0.5);
        assert_eq!(child.sequence, vec![0, 42]);
        assert_eq!(child.origin_id, 1);
        assert_eq!(parent.len(), 1);
        assert!(child.ends_with(42));
    }
}
