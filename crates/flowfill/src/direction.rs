//! Flow direction tags and their frame-indexing rules.

use serde::{Deserialize, Serialize};

/// Number of non-local anchors per source frame.
pub const NUM_ANCHORS: usize = 3;

/// Anchor frame indices `[first, middle, last]` for a video of `n_frames`.
pub fn anchor_frames(n_frames: usize) -> [usize; NUM_ANCHORS] {
    [0, n_frames / 2, n_frames.saturating_sub(1)]
}

/// Direction of a flow volume.
///
/// Local directions index frame *pairs* `(i, i + 1)`; non-local directions
/// index `(source frame, anchor slot)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Frame `i` → frame `i + 1`.
    Forward,
    /// Frame `i + 1` → frame `i`.
    Backward,
    /// Frame `t` → anchor `k`.
    NonLocalForward,
    /// Anchor `k` → frame `t`.
    NonLocalBackward,
}

impl Direction {
    /// All directions in pipeline order.
    pub const ALL: [Direction; 4] = [
        Self::Forward,
        Self::Backward,
        Self::NonLocalForward,
        Self::NonLocalBackward,
    ];

    /// Returns `true` for the anchor-based directions.
    pub fn is_nonlocal(self) -> bool {
        matches!(self, Self::NonLocalForward | Self::NonLocalBackward)
    }

    /// Stable snake-case name, used for artifact directories and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::NonLocalForward => "nonlocal_forward",
            Self::NonLocalBackward => "nonlocal_backward",
        }
    }

    /// Number of fields a volume of this direction holds for `n_frames`.
    pub fn field_count(self, n_frames: usize) -> usize {
        if self.is_nonlocal() {
            n_frames * NUM_ANCHORS
        } else {
            n_frames.saturating_sub(1)
        }
    }

    /// `(from, to)` frame indices of field `index`.
    ///
    /// For non-local directions `index = frame * NUM_ANCHORS + slot`.
    pub fn frame_pair(self, index: usize, n_frames: usize) -> (usize, usize) {
        match self {
            Self::Forward => (index, index + 1),
            Self::Backward => (index + 1, index),
            Self::NonLocalForward => {
                let anchors = anchor_frames(n_frames);
                (index / NUM_ANCHORS, anchors[index % NUM_ANCHORS])
            }
            Self::NonLocalBackward => {
                let anchors = anchor_frames(n_frames);
                (anchors[index % NUM_ANCHORS], index / NUM_ANCHORS)
            }
        }
    }

    /// Frame whose mask decides which vectors of field `index` are trusted.
    ///
    /// This is always the field's source frame: flow is unreliable where the
    /// source pixels themselves are occluded.
    pub fn trust_frame(self, index: usize, n_frames: usize) -> usize {
        self.frame_pair(index, n_frames).0
    }

    /// Direction whose field at the same index maps back to the source.
    pub fn reverse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
            Self::NonLocalForward => Self::NonLocalBackward,
            Self::NonLocalBackward => Self::NonLocalForward,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_pairs_follow_time_order() {
        assert_eq!(Direction::Forward.frame_pair(2, 5), (2, 3));
        assert_eq!(Direction::Backward.frame_pair(2, 5), (3, 2));
        assert_eq!(Direction::Backward.trust_frame(2, 5), 3);
        assert_eq!(Direction::Forward.field_count(5), 4);
    }

    #[test]
    fn nonlocal_pairs_use_anchor_slots() {
        assert_eq!(anchor_frames(7), [0, 3, 6]);
        assert_eq!(Direction::NonLocalForward.frame_pair(4 * 3 + 1, 7), (4, 3));
        assert_eq!(Direction::NonLocalBackward.frame_pair(4 * 3 + 2, 7), (6, 4));
        assert_eq!(Direction::NonLocalBackward.trust_frame(4 * 3 + 2, 7), 6);
        assert_eq!(Direction::NonLocalForward.field_count(7), 21);
    }
}
