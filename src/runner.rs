//! # Listener Runner
//!
//! Owns the subscription of one consumer group to its topics and delivers each
//! received message to the handler bound to the message's topic.
//!
//! ## Delivery
//!
//! A single task per listener pulls messages from the source one at a time,
//! decodes the payload, and calls the handler synchronously on that task. The
//! next message is not received until the handler has returned, so messages of
//! one partition reach the handler in broker order. There is no batching and
//! no deduplication; offsets are committed by the client.
//!
//! ## Lifecycle
//!
//! `Stopped -> Running` when [`ListenerRunner::start`] succeeds, and back to
//! `Stopped` when the subscription is shut down, the source closes, or a
//! handler failure is met with [`ErrorStrategy::Stop`].
//!
//! ```rust,no_run
//! use ssl_listener::handler::LogHandler;
//! use ssl_listener::runner::ListenerRunner;
//! use ssl_listener::source::ChannelSource;
//!
//! # async fn example() -> Result<(), ssl_listener::error::ListenerError> {
//! let (source, publisher) = ChannelSource::new();
//! let subscription = ListenerRunner::new(source)
//!   .start("ssl", "client", LogHandler::new())
//!   .await?;
//! publisher.publish("ssl", "hello")?;
//! subscription.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ErrorAction, ErrorStrategy, HandlerError, HandlerFailure, ListenerError};
use crate::handler::{ListenerRegistry, MessageHandler};
use crate::message::InboundMessage;
use crate::source::{MessageSource, SubscribeRequest};
use chrono::Utc;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed receive before polling again.
const DEFAULT_RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
  /// Not receiving messages.
  Stopped,
  /// Subscribed and receiving messages.
  Running,
}

impl fmt::Display for RunnerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunnerState::Stopped => write!(f, "stopped"),
      RunnerState::Running => write!(f, "running"),
    }
  }
}

#[derive(Debug, Default)]
struct Counters {
  delivered: AtomicU64,
  failed: AtomicU64,
}

enum Outcome {
  Handled,
  Skipped,
  Unrouted,
}

/// Starts listeners on a message source.
pub struct ListenerRunner<S: MessageSource> {
  source: S,
  error_strategy: ErrorStrategy,
  name: String,
  receive_backoff: Duration,
}

impl<S: MessageSource> ListenerRunner<S> {
  /// Creates a runner that will listen on `source`.
  pub fn new(source: S) -> Self {
    Self {
      source,
      error_strategy: ErrorStrategy::default(),
      name: "listener".to_string(),
      receive_backoff: DEFAULT_RECEIVE_BACKOFF,
    }
  }

  /// Sets the policy applied when a handler fails.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
    self.error_strategy = strategy;
    self
  }

  /// Sets the name used in log lines.
  #[must_use]
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Sets the pause after a failed receive.
  #[must_use]
  pub fn with_receive_backoff(mut self, backoff: Duration) -> Self {
    self.receive_backoff = backoff;
    self
  }

  /// Subscribes to `topic` as part of `group_id` and delivers every message
  /// to `handler`.
  ///
  /// Returns once the subscription is established. Startup failures are
  /// returned before any message is handled.
  pub async fn start<H>(
    self,
    topic: impl Into<String>,
    group_id: impl Into<String>,
    handler: H,
  ) -> Result<RunningSubscription, ListenerError>
  where
    H: MessageHandler + 'static,
  {
    let mut registry = ListenerRegistry::new();
    registry.register(topic, handler)?;
    self.start_registry(group_id, registry).await
  }

  /// Subscribes to every topic of `registry` as part of `group_id` and
  /// delivers each message to the handler of its topic.
  pub async fn start_registry(
    mut self,
    group_id: impl Into<String>,
    registry: ListenerRegistry,
  ) -> Result<RunningSubscription, ListenerError> {
    let group_id = group_id.into();
    if group_id.trim().is_empty() {
      return Err(ListenerError::Config(
        "consumer group id must not be empty".to_string(),
      ));
    }
    registry.validate()?;

    let request = SubscribeRequest::new(group_id, registry.topics());
    info!(
      component = %self.name,
      group_id = %request.group_id,
      topics = ?request.topics,
      "Subscribing"
    );
    if let Err(e) = self.source.subscribe(&request).await {
      error!(
        component = %self.name,
        group_id = %request.group_id,
        error = %e,
        "Failed to start listener"
      );
      return Err(e);
    }

    let (state_tx, state_rx) = watch::channel(RunnerState::Running);
    let counters = Arc::new(Counters::default());
    let token = CancellationToken::new();

    let listener = Listener {
      source: self.source,
      registry,
      error_strategy: self.error_strategy,
      name: self.name,
      receive_backoff: self.receive_backoff,
      counters: counters.clone(),
      token: token.clone(),
    };
    let handle = tokio::spawn(async move {
      let result = listener.run().await;
      state_tx.send_replace(RunnerState::Stopped);
      result
    });

    Ok(RunningSubscription {
      group_id: request.group_id,
      topics: request.topics,
      state: state_rx,
      counters,
      token,
      handle,
    })
  }
}

/// Handle to a running listener.
///
/// Dropping the handle leaves the listener running until the process exits.
pub struct RunningSubscription {
  group_id: String,
  topics: Vec<String>,
  state: watch::Receiver<RunnerState>,
  counters: Arc<Counters>,
  token: CancellationToken,
  handle: JoinHandle<Result<(), ListenerError>>,
}

impl RunningSubscription {
  /// Consumer group of the subscription.
  pub fn group_id(&self) -> &str {
    &self.group_id
  }

  /// Subscribed topics.
  pub fn topics(&self) -> &[String] {
    &self.topics
  }

  /// Current lifecycle state.
  pub fn state(&self) -> RunnerState {
    *self.state.borrow()
  }

  /// Number of messages handled successfully.
  pub fn delivered(&self) -> u64 {
    self.counters.delivered.load(Ordering::Relaxed)
  }

  /// Number of messages whose handling failed and was skipped.
  pub fn failed(&self) -> u64 {
    self.counters.failed.load(Ordering::Relaxed)
  }

  /// Waits until the listener has stopped on its own or been shut down.
  pub async fn stopped(&mut self) {
    // An error means the task is gone, which also means stopped.
    let _ = self
      .state
      .wait_for(|state| *state == RunnerState::Stopped)
      .await;
  }

  /// Blocks for the lifetime of the listener and returns how it ended.
  pub async fn wait(self) -> Result<(), ListenerError> {
    match self.handle.await {
      Ok(result) => result,
      Err(e) => Err(ListenerError::Task(e.to_string())),
    }
  }

  /// Stops receiving, closes the source and waits for the listener to end.
  pub async fn shutdown(self) -> Result<(), ListenerError> {
    self.token.cancel();
    self.wait().await
  }
}

impl fmt::Debug for RunningSubscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunningSubscription")
      .field("group_id", &self.group_id)
      .field("topics", &self.topics)
      .field("state", &self.state())
      .field("delivered", &self.delivered())
      .field("failed", &self.failed())
      .finish()
  }
}

struct Listener<S> {
  source: S,
  registry: ListenerRegistry,
  error_strategy: ErrorStrategy,
  name: String,
  receive_backoff: Duration,
  counters: Arc<Counters>,
  token: CancellationToken,
}

impl<S: MessageSource> Listener<S> {
  async fn run(mut self) -> Result<(), ListenerError> {
    let result = self.poll().await;
    self.source.close().await;
    match &result {
      Ok(()) => info!(
        component = %self.name,
        delivered = self.counters.delivered.load(Ordering::Relaxed),
        "Listener stopped"
      ),
      Err(e) => error!(component = %self.name, error = %e, "Listener stopped on error"),
    }
    result
  }

  async fn poll(&mut self) -> Result<(), ListenerError> {
    loop {
      let received = tokio::select! {
        biased;
        _ = self.token.cancelled() => return Ok(()),
        received = self.source.recv() => received,
      };

      match received {
        Ok(message) => match self.dispatch(&message)? {
          Outcome::Handled => {
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
          }
          Outcome::Skipped => {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
          }
          Outcome::Unrouted => {}
        },
        Err(ListenerError::Closed) => {
          info!(component = %self.name, "Message source closed");
          return Ok(());
        }
        Err(e) => {
          warn!(
            component = %self.name,
            error = %e,
            "Receive failed, continuing to poll"
          );
          tokio::select! {
            _ = self.token.cancelled() => return Ok(()),
            _ = sleep(self.receive_backoff) => {}
          }
        }
      }
    }
  }

  fn dispatch(&self, message: &InboundMessage) -> Result<Outcome, HandlerError> {
    let Some(handler) = self.registry.get(&message.topic) else {
      warn!(
        component = %self.name,
        topic = %message.topic,
        "No listener registered for topic, dropping message"
      );
      return Ok(Outcome::Unrouted);
    };

    let mut failure: Option<HandlerFailure> = None;
    loop {
      let error = match invoke(handler.as_ref(), message) {
        Ok(()) => return Ok(Outcome::Handled),
        Err(e) => e,
      };

      let current = match failure.take() {
        None => HandlerFailure::new(error, &message.topic, message.partition, message.offset),
        Some(mut previous) => {
          previous.error = error;
          previous.retries += 1;
          previous.timestamp = Utc::now();
          previous
        }
      };

      match self.error_strategy.action_for(&current) {
        ErrorAction::Stop => {
          error!(
            component = %self.name,
            topic = %current.topic,
            partition = current.partition,
            offset = current.offset,
            error = %current.error,
            "Stopping due to handler error"
          );
          return Err(current.error);
        }
        ErrorAction::Skip => {
          warn!(
            component = %self.name,
            topic = %current.topic,
            partition = current.partition,
            offset = current.offset,
            retries = current.retries,
            error = %current.error,
            "Skipping message after handler error"
          );
          return Ok(Outcome::Skipped);
        }
        ErrorAction::Retry => {
          debug!(
            component = %self.name,
            offset = current.offset,
            retries = current.retries,
            error = %current.error,
            "Retrying handler"
          );
          failure = Some(current);
        }
      }
    }
  }
}

/// Decodes the payload and runs the handler, turning a panic into a
/// handler error so one bad message cannot take the listener down.
fn invoke(handler: &dyn MessageHandler, message: &InboundMessage) -> Result<(), HandlerError> {
  let value = message.value()?;
  catch_unwind(AssertUnwindSafe(|| handler.handle(value)))
    .unwrap_or_else(|panic| Err(HandlerError::Failed(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(msg) = panic.downcast_ref::<&str>() {
    format!("handler panicked: {}", msg)
  } else if let Some(msg) = panic.downcast_ref::<String>() {
    format!("handler panicked: {}", msg)
  } else {
    "handler panicked".to_string()
  }
}
