use serde::{Deserialize, Serialize};

/// Counts characters the way stream offsets do: Unicode scalar values, not bytes.
#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// One immutable fragment of streamed text plus the character offset it starts at.
///
/// Offsets within a session are contiguous: a frame begins exactly where the
/// previous one ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    /// Character offset of the first character of `text`.
    pub offset: usize,
    /// Fragment content, possibly containing line breaks.
    pub text: String,
}

impl Frame {
    /// A frame starting at `offset`.
    #[must_use]
    pub fn new(offset: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            text: text.into(),
        }
    }

    /// Length of the fragment in characters.
    #[must_use]
    pub fn len(&self) -> usize {
        char_len(&self.text)
    }

    /// Whether the fragment carries no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Offset one past the last character of this frame.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.len()
    }

    /// Returns the part of this frame at or after `from`, re-tagged with the
    /// offset it now starts at. `None` when the frame ends at or before `from`.
    #[must_use]
    pub fn slice_from(&self, from: usize) -> Option<Frame> {
        if from <= self.offset {
            return Some(self.clone());
        }

        let skip = from - self.offset;
        self.text
            .char_indices()
            .nth(skip)
            .map(|(byte_idx, _)| Frame::new(from, &self.text[byte_idx..]))
    }
}
