//! Incremental decoder for `text/event-stream` bodies.

use super::client::StreamError;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
  /// Event name, `message` when the server did not name it
  pub event: String,
  pub data: String,
  pub id: Option<String>,
}

impl SseFrame {
  pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
    Self {
      event: event.into(),
      data: data.into(),
      id: None,
    }
  }

  pub fn message(data: impl Into<String>) -> Self {
    Self::new(DEFAULT_EVENT, data)
  }
}

const DEFAULT_EVENT: &str = "message";

/// Longest unterminated line or pending event body accepted from the server
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Turns arbitrary byte chunks into frames. Chunks may split lines or even
/// UTF-8 sequences; partial input is kept until the rest arrives, up to
/// [`MAX_EVENT_BYTES`].
#[derive(Debug)]
pub struct SseDecoder {
  buffer: Vec<u8>,
  event: Option<String>,
  data: Vec<String>,
  data_len: usize,
  id: Option<String>,
  limit: usize,
}

impl Default for SseDecoder {
  fn default() -> Self {
    Self::with_limit(MAX_EVENT_BYTES)
  }
}

impl SseDecoder {
  pub fn with_limit(limit: usize) -> Self {
    Self {
      buffer: Vec::new(),
      event: None,
      data: Vec::new(),
      data_len: 0,
      id: None,
      limit,
    }
  }

  /// Decode a chunk. Fails once a line or an event body outgrows the limit;
  /// the decoder is reset and the connection should be dropped.
  pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, StreamError> {
    self.buffer.extend_from_slice(chunk);

    let mut frames = Vec::new();
    while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
      let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
      line.pop();
      if line.last() == Some(&b'\r') {
        line.pop();
      }
      let line = String::from_utf8_lossy(&line);
      if let Some(frame) = self.process_line(&line) {
        frames.push(frame);
      }
    }

    if self.buffer.len() > self.limit || self.data_len > self.limit {
      let size = self.buffer.len().max(self.data_len);
      *self = Self::with_limit(self.limit);
      return Err(StreamError::Read(format!(
        "event exceeds {} bytes (got {})",
        self.limit, size
      )));
    }
    Ok(frames)
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
      "data" => {
        self.data_len += value.len();
        self.data.push(value.to_string());
      }
      "id" => self.id = Some(value.to_string()),
      // "retry" is ignored, reconnect timing is ours
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
    self.data_len = 0;
    Some(SseFrame {
      event: event
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
      data,
      id: self.id.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unnamed_event_defaults_to_message() {
    let mut decoder = SseDecoder::default();
    let frames = decoder.feed(b"data: {\"type\":\"ping\"}\n\n").unwrap();
    assert_eq!(frames, vec![SseFrame::message("{\"type\":\"ping\"}")]);
  }

  #[test]
  fn test_named_event_with_id_and_crlf() {
    let mut decoder = SseDecoder::default();
    let frames = decoder.feed(b"event: progress\r\nid: 7\r\ndata: {\"current\":3}\r\n\r\n").unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "progress");
    assert_eq!(frames[0].data, "{\"current\":3}");
    assert_eq!(frames[0].id.as_deref(), Some("7"));
  }

  #[test]
  fn test_chunks_split_anywhere() {
    let mut decoder = SseDecoder::default();
    assert!(decoder.feed(b"event: lo").unwrap().is_empty());
    assert!(decoder.feed(b"g\ndata: Sync sta").unwrap().is_empty());
    assert!(decoder.feed(b"rted\n").unwrap().is_empty());
    let frames = decoder.feed(b"\ndata: next\n\n").unwrap();
    assert_eq!(
      frames,
      vec![
        SseFrame::new("log", "Sync started"),
        SseFrame::message("next")
      ]
    );
  }

  #[test]
  fn test_multiline_data_and_comments() {
    let mut decoder = SseDecoder::default();
    let frames = decoder.feed(b": keep-alive\ndata: first\ndata:second\n\n").unwrap();
    assert_eq!(frames, vec![SseFrame::message("first\nsecond")]);
  }

  #[test]
  fn test_blank_lines_without_data_dispatch_nothing() {
    let mut decoder = SseDecoder::default();
    assert!(decoder.feed(b"\n\n: comment\n\nevent: log\n\n").unwrap().is_empty());
    // The dangling event name does not leak into the next frame
    let frames = decoder.feed(b"data: x\n\n").unwrap();
    assert_eq!(frames[0].event, "message");
  }

  #[test]
  fn test_split_utf8_sequence() {
    let mut decoder = SseDecoder::default();
    let bytes = "data: Amélie\n\n".as_bytes();
    let (head, tail) = bytes.split_at(9);
    assert!(decoder.feed(head).unwrap().is_empty());
    let frames = decoder.feed(tail).unwrap();
    assert_eq!(frames[0].data, "Amélie");
  }

  #[test]
  fn test_unterminated_line_is_capped() {
    let mut decoder = SseDecoder::with_limit(16);
    assert!(decoder.feed(b"data: 0123456789").unwrap().is_empty());
    let err = decoder.feed(b"abcdef").unwrap_err();
    assert!(matches!(err, StreamError::Read(_)));

    // Reset afterwards, so a new connection can reuse it
    let frames = decoder.feed(b"data: ok\n\n").unwrap();
    assert_eq!(frames, vec![SseFrame::message("ok")]);
  }

  #[test]
  fn test_event_body_is_capped() {
    let mut decoder = SseDecoder::with_limit(16);
    assert!(decoder.feed(b"data: 0123456789\n").unwrap().is_empty());
    assert!(decoder.feed(b"data: 0123456789\n").is_err());
  }
}
