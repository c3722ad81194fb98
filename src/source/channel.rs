use super::{MessageSource, SubscribeRequest};
use crate::error::ListenerError;
use crate::message::InboundMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

/// Subscribe requests seen by a [`ChannelSource`], shared with the test or
/// embedder that created it.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionLog {
  requests: Arc<Mutex<Vec<SubscribeRequest>>>,
}

impl SubscriptionLog {
  /// Returns every subscribe request received so far.
  pub fn requests(&self) -> Vec<SubscribeRequest> {
    self
      .requests
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn record(&self, request: &SubscribeRequest) {
    self
      .requests
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(request.clone());
  }
}

/// An in-process broker: messages published through a [`ChannelPublisher`]
/// are delivered by this source in publish order.
///
/// Only messages on subscribed topics are delivered; others are dropped the
/// way a broker would never route them to this consumer.
///
/// ```rust
/// use ssl_listener::source::ChannelSource;
///
/// let (source, publisher) = ChannelSource::new();
/// publisher.publish("ssl", "hello").unwrap();
/// ```
pub struct ChannelSource {
  receiver: UnboundedReceiver<InboundMessage>,
  subscription: Option<SubscribeRequest>,
  log: SubscriptionLog,
  refuse_with: Option<String>,
}

impl ChannelSource {
  /// Creates a source and the publisher feeding it.
  pub fn new() -> (Self, ChannelPublisher) {
    let (sender, receiver) = unbounded_channel();
    let source = Self {
      receiver,
      subscription: None,
      log: SubscriptionLog::default(),
      refuse_with: None,
    };
    let publisher = ChannelPublisher {
      sender,
      offsets: Arc::new(Mutex::new(HashMap::new())),
    };
    (source, publisher)
  }

  /// Makes `subscribe` fail with [`ListenerError::Connection`], as if the
  /// broker could not be reached.
  #[must_use]
  pub fn unreachable(mut self, reason: impl Into<String>) -> Self {
    self.refuse_with = Some(reason.into());
    self
  }

  /// Returns a handle to the subscribe requests this source receives.
  pub fn subscription_log(&self) -> SubscriptionLog {
    self.log.clone()
  }
}

#[async_trait]
impl MessageSource for ChannelSource {
  async fn subscribe(&mut self, request: &SubscribeRequest) -> Result<(), ListenerError> {
    self.log.record(request);
    if let Some(ref reason) = self.refuse_with {
      return Err(ListenerError::Connection(reason.clone()));
    }
    debug!(group_id = %request.group_id, topics = ?request.topics, "Channel source subscribed");
    self.subscription = Some(request.clone());
    Ok(())
  }

  async fn recv(&mut self) -> Result<InboundMessage, ListenerError> {
    let Some(ref subscription) = self.subscription else {
      return Err(ListenerError::Receive("not subscribed".to_string()));
    };
    loop {
      match self.receiver.recv().await {
        Some(message) if subscription.includes(&message.topic) => return Ok(message),
        Some(_) => continue,
        None => return Err(ListenerError::Closed),
      }
    }
  }

  async fn close(&mut self) {
    self.subscription = None;
    self.receiver.close();
  }
}

/// Publishes messages to a [`ChannelSource`], assigning offsets per
/// topic partition.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
  sender: UnboundedSender<InboundMessage>,
  offsets: Arc<Mutex<HashMap<(String, i32), i64>>>,
}

impl ChannelPublisher {
  /// Publishes a text value to partition 0 of `topic`.
  pub fn publish(&self, topic: &str, value: impl Into<String>) -> Result<i64, ListenerError> {
    self.publish_bytes(topic, 0, Some(value.into().into_bytes()))
  }

  /// Publishes raw bytes (or a tombstone) to a partition of `topic`.
  pub fn publish_bytes(
    &self,
    topic: &str,
    partition: i32,
    payload: Option<Vec<u8>>,
  ) -> Result<i64, ListenerError> {
    let offset = self.next_offset(topic, partition);
    self.send(InboundMessage::from_bytes(topic, partition, offset, payload))?;
    Ok(offset)
  }

  /// Publishes a fully built message as is.
  pub fn send(&self, message: InboundMessage) -> Result<(), ListenerError> {
    self.sender.send(message).map_err(|_| ListenerError::Closed)
  }

  fn next_offset(&self, topic: &str, partition: i32) -> i64 {
    let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
    let next = offsets.entry((topic.to_string(), partition)).or_insert(0);
    let offset = *next;
    *next += 1;
    offset
  }
}
