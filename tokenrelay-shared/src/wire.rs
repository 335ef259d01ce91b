//! Text-stream wire format shared by the server encoder and client decoder.
//!
//! Every frame travels as one event:
//!
//! ```text
//! id:<offset>
//! event:token
//! data:<first line of the fragment>
//! data:<next line>
//!
//! ```
//!
//! Readers strip one space after `data:`, so a data line that starts with a
//! space is sent with that space doubled. Only `\n` terminates a line; a `\r`
//! inside a fragment is carried verbatim. The end of a stream is a regular
//! token event whose payload is [`END_OF_TEXT`].

use std::fmt::Write as _;

use crate::models::Frame;

/// Reserved out-of-band payload marking the end of a stream.
pub const END_OF_TEXT: &str = "\u{3}[[END_OF_TEXT]]\u{3}";

/// Event name carried by every frame and by the termination event.
pub const TOKEN_EVENT: &str = "token";

/// Comment line sent while a stream is idle. Decoders ignore it.
pub const KEEP_ALIVE: &str = ":keep-alive\n\n";

/// MIME type of the stream response.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Encodes one frame as a wire event.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    encode_event(frame.offset, &frame.text)
}

/// Encodes the termination event. `offset` is the total length of the stream,
/// which keeps the event id a valid resume position.
#[must_use]
pub fn encode_termination(offset: usize) -> String {
    encode_event(offset, END_OF_TEXT)
}

fn encode_event(id: usize, data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 32);
    let _ = write!(out, "id:{id}\nevent:{TOKEN_EVENT}\n");
    for line in data.split('\n') {
        out.push_str("data:");
        if line.starts_with(' ') {
            out.push(' ');
        }
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEvent {
    /// Last `id:` value, if the event carried one.
    pub id: Option<String>,
    /// Last `event:` value, if the event carried one.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

impl WireEvent {
    /// The event id read as a character offset.
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        self.id.as_deref().and_then(|id| id.trim().parse().ok())
    }

    /// Whether this is the end-of-stream event.
    #[must_use]
    pub fn is_termination(&self) -> bool {
        self.data.contains(END_OF_TEXT)
    }

    /// Payload with any termination marker removed.
    #[must_use]
    pub fn text(&self) -> String {
        self.data.replace(END_OF_TEXT, "")
    }
}

/// Incremental decoder: feed it arbitrary byte chunks, get back complete events.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    id: Option<String>,
    event: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    /// A decoder with nothing buffered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes `chunk` and returns every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<WireEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => self.id = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            other => tracing::trace!(field = other, "ignoring unknown stream field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<WireEvent> {
        let id = self.id.take();
        let event = self.event.take();
        self.data.take().map(|data| WireEvent { id, event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<WireEvent> {
        SseDecoder::new().feed(bytes)
    }

    #[test]
    fn encodes_plain_frame() {
        let encoded = encode_frame(&Frame::new(3, "lo"));
        assert_eq!(encoded, "id:3\nevent:token\ndata:lo\n\n");
    }

    #[test]
    fn splits_embedded_newlines_into_data_lines() {
        let encoded = encode_frame(&Frame::new(0, "a\nb\n"));
        assert_eq!(encoded, "id:0\nevent:token\ndata:a\ndata:b\ndata:\n\n");

        let decoded = decode_all(encoded.as_bytes());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].data, "a\nb\n");
    }

    #[test]
    fn lone_newline_survives_transport() {
        let encoded = encode_frame(&Frame::new(5, "\n"));
        let decoded = decode_all(encoded.as_bytes());
        assert_eq!(decoded[0].data, "\n");
        assert_eq!(decoded[0].offset(), Some(5));
    }

    #[test]
    fn doubles_leading_space_on_every_line() {
        let encoded = encode_frame(&Frame::new(0, " hi\n  there"));
        assert_eq!(encoded, "id:0\nevent:token\ndata:  hi\ndata:   there\n\n");

        let decoded = decode_all(encoded.as_bytes());
        assert_eq!(decoded[0].data, " hi\n  there");
    }

    #[test]
    fn carriage_returns_are_kept() {
        let encoded = encode_frame(&Frame::new(0, "a\r\nb\r"));
        let decoded = decode_all(encoded.as_bytes());
        assert_eq!(decoded[0].data, "a\r\nb\r");
    }

    #[test]
    fn termination_event_is_recognised_and_stripped() {
        let encoded = encode_termination(11);
        let decoded = decode_all(encoded.as_bytes());

        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].is_termination());
        assert_eq!(decoded[0].text(), "");
        assert_eq!(decoded[0].offset(), Some(11));
        assert_eq!(decoded[0].event.as_deref(), Some(TOKEN_EVENT));
    }

    #[test]
    fn decoder_handles_chunks_split_mid_character() {
        let encoded = encode_frame(&Frame::new(0, "✓ done"));
        let bytes = encoded.as_bytes();
        let split = encoded.find('✓').unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&bytes[..split]).is_empty());
        let events = decoder.feed(&bytes[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "✓ done");
    }

    #[test]
    fn decoder_ignores_comments_between_events() {
        let mut stream = String::new();
        stream.push_str(&encode_frame(&Frame::new(0, "Hel")));
        stream.push_str(KEEP_ALIVE);
        stream.push_str(&encode_frame(&Frame::new(3, "lo")));

        let events = decode_all(stream.as_bytes());
        let texts: Vec<_> = events.iter().map(|event| event.data.as_str()).collect();
        assert_eq!(texts, ["Hel", "lo"]);
    }

    #[test]
    fn blank_line_without_data_emits_nothing() {
        assert!(decode_all(b"id:4\n\n").is_empty());
    }

    #[test]
    fn byte_at_a_time_feeding_matches_bulk_decoding() {
        let mut stream = String::new();
        for (offset, text) in [(0, " a"), (2, "b\nc"), (5, "")] {
            stream.push_str(&encode_frame(&Frame::new(offset, text)));
        }
        stream.push_str(&encode_termination(5));

        let bulk = decode_all(stream.as_bytes());
        let mut decoder = SseDecoder::new();
        let trickled: Vec<_> = stream
            .as_bytes()
            .iter()
            .flat_map(|byte| decoder.feed(std::slice::from_ref(byte)))
            .collect();

        assert_eq!(bulk, trickled);
        assert_eq!(bulk.len(), 4);
    }
}
