//! The record delivered to listeners.

use crate::error::HandlerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message received from the broker.
///
/// Handlers only look at the payload text, but the delivery coordinates are
/// kept for logging and failure reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
  /// Topic name.
  pub topic: String,
  /// Partition number.
  pub partition: i32,
  /// Offset.
  pub offset: i64,
  /// Message key (if any).
  pub key: Option<Vec<u8>>,
  /// Message payload, `None` for tombstones.
  pub payload: Option<Vec<u8>>,
  /// Message timestamp in milliseconds since the epoch.
  pub timestamp: Option<i64>,
  /// Message headers.
  pub headers: HashMap<String, Vec<u8>>,
}

impl InboundMessage {
  /// Creates a message with a text payload and no key, timestamp or headers.
  pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: impl Into<String>) -> Self {
    Self {
      topic: topic.into(),
      partition,
      offset,
      key: None,
      payload: Some(value.into().into_bytes()),
      timestamp: None,
      headers: HashMap::new(),
    }
  }

  /// Creates a message from raw payload bytes.
  pub fn from_bytes(topic: impl Into<String>, partition: i32, offset: i64, payload: Option<Vec<u8>>) -> Self {
    Self {
      topic: topic.into(),
      partition,
      offset,
      key: None,
      payload,
      timestamp: None,
      headers: HashMap::new(),
    }
  }

  /// Sets the message key.
  #[must_use]
  pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
    self.key = Some(key.into());
    self
  }

  /// Sets the message timestamp.
  #[must_use]
  pub fn with_timestamp(mut self, millis: i64) -> Self {
    self.timestamp = Some(millis);
    self
  }

  /// Adds a header.
  #[must_use]
  pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
    self.headers.insert(key.into(), value.into());
    self
  }

  /// Returns the payload decoded as UTF-8 text.
  pub fn value(&self) -> Result<&str, HandlerError> {
    let payload = self.payload.as_deref().ok_or(HandlerError::MissingPayload)?;
    std::str::from_utf8(payload).map_err(|e| HandlerError::InvalidPayload(e.to_string()))
  }
}
