use shared::models::{Frame, char_len};

/// Append-only, offset-addressed sequence of frames for one session.
#[derive(Debug, Default)]
pub struct FrameLog {
    frames: Vec<Frame>,
    len: usize,
}

impl FrameLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total length of the log in characters; also the offset of the next frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of stored frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Every stored frame, in offset order.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Appends `text` at the current end. Empty text is ignored.
    pub fn push(&mut self, text: String) -> Option<&Frame> {
        if text.is_empty() {
            return None;
        }

        let len = char_len(&text);
        self.frames.push(Frame::new(self.len, text));
        self.len += len;
        self.frames.last()
    }

    /// Frames needed to rebuild the content from `from` onward. A frame that
    /// straddles `from` comes back trimmed to start exactly at `from`.
    #[must_use]
    pub fn backlog_from(&self, from: usize) -> Vec<Frame> {
        let start = self.frames.partition_point(|frame| frame.end() <= from);
        self.frames[start..]
            .iter()
            .filter_map(|frame| frame.slice_from(from))
            .collect()
    }

    /// Concatenation of every frame.
    #[must_use]
    pub fn content(&self) -> String {
        self.frames.iter().map(|frame| frame.text.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_world() -> FrameLog {
        let mut log = FrameLog::new();
        for text in ["Hel", "lo ", "world"] {
            log.push(text.to_string());
        }
        log
    }

    fn joined(frames: &[Frame]) -> String {
        frames.iter().map(|frame| frame.text.as_str()).collect()
    }

    #[test]
    fn offsets_are_contiguous() {
        let log = hello_world();
        let offsets: Vec<_> = log.frames().iter().map(|frame| frame.offset).collect();
        assert_eq!(offsets, [0, 3, 6]);
        assert_eq!(log.len(), 11);
        assert_eq!(log.content(), "Hello world");
    }

    #[test]
    fn empty_text_does_not_advance() {
        let mut log = hello_world();
        assert!(log.push(String::new()).is_none());
        assert_eq!(log.frame_count(), 3);
        assert_eq!(log.len(), 11);
    }

    #[test]
    fn backlog_on_frame_boundary_is_whole_frames() {
        let log = hello_world();
        let backlog = log.backlog_from(3);
        assert_eq!(backlog, vec![Frame::new(3, "lo "), Frame::new(6, "world")]);
    }

    #[test]
    fn backlog_inside_frame_trims_the_head() {
        let log = hello_world();
        assert_eq!(joined(&log.backlog_from(4)), "o world");
        assert_eq!(log.backlog_from(4)[0], Frame::new(4, "o "));
    }

    #[test]
    fn every_offset_yields_the_matching_suffix() {
        let log = hello_world();
        let content: Vec<char> = log.content().chars().collect();
        for k in 0..=content.len() {
            let expected: String = content[k..].iter().collect();
            assert_eq!(joined(&log.backlog_from(k)), expected, "from={k}");
        }
    }

    #[test]
    fn backlog_past_the_end_is_empty() {
        let log = hello_world();
        assert!(log.backlog_from(11).is_empty());
        assert!(log.backlog_from(400).is_empty());
    }

    #[test]
    fn multibyte_text_is_addressed_by_character() {
        let mut log = FrameLog::new();
        log.push("¡Hola ".to_string());
        log.push("señor!\n".to_string());
        assert_eq!(log.len(), 13);
        assert_eq!(joined(&log.backlog_from(8)), "ñor!\n");
    }
}
