//! # Message Handlers
//!
//! A handler is the application-side callback bound to a topic. The runner
//! calls it synchronously on the listener task, once per delivered message,
//! with the payload decoded as text.
//!
//! Handlers are bound to topics explicitly through a [`ListenerRegistry`].
//!
//! ```rust
//! use ssl_listener::handler::{ListenerRegistry, LogHandler};
//!
//! let registry = ListenerRegistry::new().with_listener("ssl", LogHandler::new());
//! assert_eq!(registry.topics(), vec!["ssl".to_string()]);
//! ```

use crate::error::{HandlerError, ListenerError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Callback invoked for every message received on a topic.
///
/// Implementations must not block indefinitely: the next message is not
/// received until `handle` returns.
pub trait MessageHandler: Send + Sync {
  /// Handles one message payload.
  fn handle(&self, value: &str) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
  F: Fn(&str) -> Result<(), HandlerError> + Send + Sync,
{
  fn handle(&self, value: &str) -> Result<(), HandlerError> {
    self(value)
  }
}

/// Adapter for closures that cannot fail.
pub struct FnHandler<F>(F);

impl<F> MessageHandler for FnHandler<F>
where
  F: Fn(&str) + Send + Sync,
{
  fn handle(&self, value: &str) -> Result<(), HandlerError> {
    (self.0)(value);
    Ok(())
  }
}

/// Wraps an infallible closure as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
  F: Fn(&str) + Send + Sync,
{
  FnHandler(f)
}

/// Writes every payload to the log sink as one `INFO` line.
#[derive(Debug, Clone, Default)]
pub struct LogHandler;

impl LogHandler {
  /// Creates a log handler.
  pub fn new() -> Self {
    Self
  }
}

impl MessageHandler for LogHandler {
  fn handle(&self, value: &str) -> Result<(), HandlerError> {
    info!("{}", value);
    Ok(())
  }
}

/// Mapping from topic name to the handler bound to it.
///
/// Every topic must be non-empty and bound at most once. [`register`]
/// reports a bad binding immediately; the [`with_listener`] builder keeps it
/// and [`validate`] reports it, which the runner does before subscribing.
///
/// [`register`]: Self::register
/// [`with_listener`]: Self::with_listener
/// [`validate`]: Self::validate
#[derive(Clone, Default)]
pub struct ListenerRegistry {
  handlers: BTreeMap<String, Arc<dyn MessageHandler>>,
  rejected: Vec<String>,
}

impl ListenerRegistry {
  /// Creates an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Binds `handler` to `topic`.
  ///
  /// Fails when the topic is empty or already has a handler.
  pub fn register<H>(&mut self, topic: impl Into<String>, handler: H) -> Result<(), ListenerError>
  where
    H: MessageHandler + 'static,
  {
    self.register_arc(topic, Arc::new(handler))
  }

  /// Binds an already shared handler to `topic`.
  pub fn register_arc(
    &mut self,
    topic: impl Into<String>,
    handler: Arc<dyn MessageHandler>,
  ) -> Result<(), ListenerError> {
    let topic = topic.into();
    self.check(&topic).map_err(ListenerError::Config)?;
    self.handlers.insert(topic, handler);
    Ok(())
  }

  /// Builder form of [`register`](Self::register). A bad binding is not
  /// inserted; it is reported by [`validate`](Self::validate).
  #[must_use]
  pub fn with_listener<H>(mut self, topic: impl Into<String>, handler: H) -> Self
  where
    H: MessageHandler + 'static,
  {
    let topic = topic.into();
    match self.check(&topic) {
      Ok(()) => {
        self.handlers.insert(topic, Arc::new(handler));
      }
      Err(reason) => self.rejected.push(reason),
    }
    self
  }

  /// Fails on the first rejected binding, or when no topic is registered.
  pub fn validate(&self) -> Result<(), ListenerError> {
    if let Some(reason) = self.rejected.first() {
      return Err(ListenerError::Config(reason.clone()));
    }
    if self.handlers.is_empty() {
      return Err(ListenerError::Config(
        "at least one topic listener is required".to_string(),
      ));
    }
    Ok(())
  }

  fn check(&self, topic: &str) -> Result<(), String> {
    if topic.trim().is_empty() {
      return Err("topic must not be empty".to_string());
    }
    if self.handlers.contains_key(topic) {
      return Err(format!("topic '{}' already has a listener", topic));
    }
    Ok(())
  }

  /// Returns the handler bound to `topic`.
  pub fn get(&self, topic: &str) -> Option<&Arc<dyn MessageHandler>> {
    self.handlers.get(topic)
  }

  /// Returns the registered topics in sorted order.
  pub fn topics(&self) -> Vec<String> {
    self.handlers.keys().cloned().collect()
  }

  /// Number of registered topics.
  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  /// Returns true when no topic is registered.
  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }
}

impl fmt::Debug for ListenerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenerRegistry")
      .field("topics", &self.topics())
      .finish()
  }
}
