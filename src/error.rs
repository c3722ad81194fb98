//! # Error Handling
//!
//! Error taxonomy for the listener and the policy applied when a handler fails.
//!
//! Startup errors (`Config`, `Connection`, `Subscribe`) are fatal: the runner
//! returns them from `start` before any message is delivered and the binary
//! exits non-zero. Errors that happen once the listener is running are either
//! transient receive errors (logged, the loop keeps polling) or handler errors,
//! which are routed through an [`ErrorStrategy`].
//!
//! ## Error Strategies
//!
//! - **Skip** (default): log the failure, treat the message as delivered, continue
//! - **Stop**: end the subscription with [`ListenerError::Handler`]
//! - **Retry(n)**: invoke the handler up to `n` more times, then skip

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Errors raised by a message handler, or while preparing a message for one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
  /// The payload is not valid UTF-8 and cannot be handed over as text.
  #[error("payload is not valid UTF-8: {0}")]
  InvalidPayload(String),
  /// The record carries no payload at all (tombstone).
  #[error("record has no payload")]
  MissingPayload,
  /// The handler itself reported a failure.
  #[error("handler failed: {0}")]
  Failed(String),
}

impl HandlerError {
  /// Convenience constructor for handler-reported failures.
  pub fn failed(msg: impl Into<String>) -> Self {
    HandlerError::Failed(msg.into())
  }

  /// Returns true when the message was rejected before reaching the handler.
  pub fn is_rejected(&self) -> bool {
    matches!(
      self,
      HandlerError::InvalidPayload(_) | HandlerError::MissingPayload
    )
  }
}

/// Errors produced by the listener and its message sources.
#[derive(Debug, Error)]
pub enum ListenerError {
  /// The listener configuration is invalid.
  #[error("invalid configuration: {0}")]
  Config(String),
  /// The broker could not be reached or the client could not be created.
  #[error("cannot connect to broker: {0}")]
  Connection(String),
  /// The broker refused the subscription.
  #[error("cannot subscribe: {0}")]
  Subscribe(String),
  /// A receive call failed after the subscription was established.
  #[error("receive failed: {0}")]
  Receive(String),
  /// A handler failed and the strategy decided to stop.
  #[error(transparent)]
  Handler(#[from] HandlerError),
  /// The source has no more messages to deliver.
  #[error("message source closed")]
  Closed,
  /// The listener task ended abnormally.
  #[error("listener task failed: {0}")]
  Task(String),
}

impl ListenerError {
  /// Returns true for errors that can only happen while starting up.
  pub fn is_startup(&self) -> bool {
    matches!(
      self,
      ListenerError::Config(_) | ListenerError::Connection(_) | ListenerError::Subscribe(_)
    )
  }
}

impl From<rdkafka::error::KafkaError> for ListenerError {
  fn from(err: rdkafka::error::KafkaError) -> Self {
    ListenerError::Receive(err.to_string())
  }
}

/// Action to take after a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
  /// Stop the subscription.
  Stop,
  /// Consider the message delivered and move on to the next one.
  Skip,
  /// Invoke the handler again with the same message.
  Retry,
}

/// Strategy for handling handler failures.
///
/// # Example
///
/// ```rust
/// use ssl_listener::error::ErrorStrategy;
///
/// // Log and move on (default)
/// let strategy = ErrorStrategy::Skip;
///
/// // Give each message three extra attempts
/// let strategy = ErrorStrategy::Retry(3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
  /// End the subscription on the first failure.
  Stop,
  /// Log the failure and continue with the next message.
  #[default]
  Skip,
  /// Retry the handler up to the given number of times, then skip.
  Retry(usize),
}

impl ErrorStrategy {
  /// Decides what to do with a failure that has already been retried
  /// `failure.retries` times.
  pub fn action_for(&self, failure: &HandlerFailure) -> ErrorAction {
    match self {
      ErrorStrategy::Stop => ErrorAction::Stop,
      ErrorStrategy::Skip => ErrorAction::Skip,
      // A payload that cannot be decoded will not decode on the next attempt.
      ErrorStrategy::Retry(_) if failure.error.is_rejected() => ErrorAction::Skip,
      ErrorStrategy::Retry(n) if failure.retries < *n => ErrorAction::Retry,
      ErrorStrategy::Retry(_) => ErrorAction::Skip,
    }
  }
}

/// A handler failure together with where and when it happened.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
  /// The underlying error.
  pub error: HandlerError,
  /// When the failure was observed.
  pub timestamp: DateTime<Utc>,
  /// Topic of the message being handled.
  pub topic: String,
  /// Partition of the message being handled.
  pub partition: i32,
  /// Offset of the message being handled.
  pub offset: i64,
  /// Number of retries already performed for this message.
  pub retries: usize,
}

impl HandlerFailure {
  /// Creates a failure record with no retries performed.
  pub fn new(error: HandlerError, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
    Self {
      error,
      timestamp: Utc::now(),
      topic: topic.into(),
      partition,
      offset,
      retries: 0,
    }
  }
}

impl fmt::Display for HandlerFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} at {}/{}@{} (retries: {})",
      self.error, self.topic, self.partition, self.offset, self.retries
    )
  }
}
