//! Incremental Server-Sent Events decoding.

use super::{BackendError, RawEvent};

/// A dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    /// Decode the frame's data as JSON.
    pub fn into_raw_event(self) -> Result<RawEvent, BackendError> {
        match serde_json::from_str(&self.data) {
            Ok(data) => Ok(RawEvent::new(self.event, data)),
            Err(e) => Err(BackendError::MalformedEvent(format!(
                "{} event: {} ({})",
                self.event,
                e,
                self.data.chars().take(80).collect::<String>()
            ))),
        }
    }
}

/// Turns arbitrary byte chunks into SSE frames.
///
/// Chunk boundaries may fall anywhere, including inside a line or a UTF-8
/// sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let decoded = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line: &str = &decoded;
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Reset at end of stream.
    ///
    /// A frame is only dispatched on a blank line, so anything still pending
    /// is incomplete and gets dropped. Returns whether something was dropped.
    pub fn finish(&mut self) -> bool {
        let partial = !self.buffer.is_empty() || self.event.is_some() || !self.data.is_empty();
        self.buffer.clear();
        self.event = None;
        self.data.clear();
        partial
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
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
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry carry nothing the orchestrator uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: processing\ndata: {\"progress\": 50}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "processing");
        assert_eq!(frames[0].data, "{\"progress\": 50}");
    }

    #[test]
    fn test_split_across_chunks_with_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: comp").is_empty());
        assert!(decoder.feed(b"lete\r\ndata: {\"persistentId\":").is_empty());
        let frames = decoder.feed(b"\"X\"}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "complete");

        let event = frames[0].clone().into_raw_event().unwrap();
        assert_eq!(event.str_field("persistentId"), Some("X"));
    }

    #[test]
    fn test_comments_and_default_event_name() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keep-alive\n\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"a\":\ndata: 1}\n\n");
        assert_eq!(frames[0].data, "{\"a\":\n1}");
        assert!(frames[0].clone().into_raw_event().is_ok());
    }

    #[test]
    fn test_malformed_payload() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: processing\ndata: not json\n\n");
        let err = frames[0].clone().into_raw_event().unwrap_err();
        assert!(err.is_malformed_event());
    }

    #[test]
    fn test_finish_discards_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: complete\ndata: {\"status\":\"completed\"}").is_empty());
        assert!(decoder.finish());
        assert!(!decoder.finish());

        // Lines without the closing blank line are dropped too
        assert!(decoder.feed(b"event: complete\ndata: {}\n").is_empty());
        assert!(decoder.finish());
        let frames = decoder.feed(b"data: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: {\"message\":\"café\"}\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xc3).unwrap() + 1;
        assert!(decoder.feed(&bytes[..split]).is_empty());
        let frames = decoder.feed(&bytes[split..]);
        let event = frames[0].clone().into_raw_event().unwrap();
        assert_eq!(event.str_field("message"), Some("café"));
    }
}
