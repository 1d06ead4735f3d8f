use serde::Deserialize;
use serde_json::Value;

use crate::api::LiveStatus;

use super::sse::SseFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
  #[default]
  Disconnected,
  Connecting,
  Connected,
  Error,
}

impl StreamStatus {
  pub fn label(&self) -> &'static str {
    match self {
      StreamStatus::Disconnected => "disconnected",
      StreamStatus::Connecting => "connecting",
      StreamStatus::Connected => "connected",
      StreamStatus::Error => "error",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
  pub status: StreamStatus,
  /// Error-driven retries since the last successful connect
  pub reconnect_attempts: u32,
  pub max_reconnect_attempts: u32,
  pub last_error: Option<String>,
}

impl ConnectionState {
  /// Retries are exhausted; only an explicit connect starts over.
  pub fn is_terminal(&self) -> bool {
    self.status == StreamStatus::Error && self.reconnect_attempts >= self.max_reconnect_attempts
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogEntry {
  #[serde(default = "default_level")]
  pub level: String,
  pub message: String,
  #[serde(default)]
  pub timestamp: Option<String>,
}

fn default_level() -> String {
  "info".to_string()
}

impl LogEntry {
  /// A log line the server sent as plain text.
  pub fn from_text(text: &str) -> Self {
    Self {
      level: default_level(),
      message: text.to_string(),
      timestamp: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Progress {
  #[serde(default)]
  pub current: u64,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub message: Option<String>,
}

impl Progress {
  /// Completed fraction in `0.0..=1.0`; zero while the total is unknown.
  pub fn ratio(&self) -> f64 {
    if self.total == 0 {
      return 0.0;
    }
    (self.current as f64 / self.total as f64).clamp(0.0, 1.0)
  }
}

/// A decoded stream message. Every frame yields exactly one event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
  Status(LiveStatus),
  Log(LogEntry),
  Progress(Progress),
  /// A generic envelope of a type this client has no dedicated handling for
  Message { kind: String, data: Value },
  /// Payload that could not be parsed, kept verbatim
  Raw { event: String, text: String },
}

#[derive(Deserialize)]
struct Envelope {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  data: Value,
}

impl StreamEvent {
  pub fn parse(frame: &SseFrame) -> Self {
    let parsed = match frame.event.as_str() {
      "log" => Some(
        serde_json::from_str(&frame.data)
          .map(StreamEvent::Log)
          .unwrap_or_else(|_| StreamEvent::Log(LogEntry::from_text(&frame.data))),
      ),
      "progress" => serde_json::from_str(&frame.data)
        .ok()
        .map(StreamEvent::Progress),
      "status" => serde_json::from_str(&frame.data).ok().map(StreamEvent::Status),
      _ => serde_json::from_str::<Envelope>(&frame.data)
        .ok()
        .and_then(Self::from_envelope),
    };

    parsed.unwrap_or_else(|| StreamEvent::Raw {
      event: frame.event.clone(),
      text: frame.data.clone(),
    })
  }

  fn from_envelope(envelope: Envelope) -> Option<Self> {
    let event = match envelope.kind.as_str() {
      "status" => StreamEvent::Status(serde_json::from_value(envelope.data).ok()?),
      "log" => StreamEvent::Log(serde_json::from_value(envelope.data).ok()?),
      "progress" => StreamEvent::Progress(serde_json::from_value(envelope.data).ok()?),
      _ => StreamEvent::Message {
        kind: envelope.kind,
        data: envelope.data,
      },
    };
    Some(event)
  }
}
