//! Message sources.
//!
//! A source owns the broker connection of one listener. The runner subscribes
//! it once and then pulls messages from it one at a time until shutdown.

use crate::error::ListenerError;
use crate::message::InboundMessage;
use async_trait::async_trait;

/// In-process source fed through a channel.
pub mod channel;
/// Kafka source backed by rdkafka.
pub mod kafka;

pub use channel::{ChannelPublisher, ChannelSource, SubscriptionLog};
pub use kafka::KafkaSource;

/// A subscribe request: which consumer group joins which topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
  /// Consumer group identifier.
  pub group_id: String,
  /// Topics to subscribe to.
  pub topics: Vec<String>,
}

impl SubscribeRequest {
  /// Creates a request for `topics` under `group_id`.
  pub fn new(group_id: impl Into<String>, topics: Vec<String>) -> Self {
    Self {
      group_id: group_id.into(),
      topics,
    }
  }

  /// Returns true when `topic` is part of the request.
  pub fn includes(&self, topic: &str) -> bool {
    self.topics.iter().any(|t| t == topic)
  }
}

/// The broker side of a listener.
#[async_trait]
pub trait MessageSource: Send + 'static {
  /// Connects to the broker and subscribes. Called once, before any `recv`.
  ///
  /// Fails with [`ListenerError::Connection`] when the broker cannot be
  /// reached and [`ListenerError::Subscribe`] when the subscription is refused.
  async fn subscribe(&mut self, request: &SubscribeRequest) -> Result<(), ListenerError>;

  /// Waits for the next message, without a timeout.
  ///
  /// Returns [`ListenerError::Closed`] once no more messages can arrive.
  /// Must be cancel safe: the runner drops the future on shutdown.
  async fn recv(&mut self) -> Result<InboundMessage, ListenerError>;

  /// Releases the broker connection.
  async fn close(&mut self) {}
}
