use super::{MessageSource, SubscribeRequest};
use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::message::InboundMessage;
use async_trait::async_trait;
use rdkafka::{
  ClientContext, TopicPartitionList,
  consumer::stream_consumer::StreamConsumer,
  consumer::{Consumer, ConsumerContext, Rebalance},
  error::{KafkaError, KafkaResult},
  message::{BorrowedMessage, Headers, Message},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Routes client callbacks into the log sink.
struct ListenerContext;

impl ClientContext for ListenerContext {
  fn error(&self, error: KafkaError, reason: &str) {
    error!(error = %error, reason, "Kafka client error");
  }
}

impl ConsumerContext for ListenerContext {
  fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
    match rebalance {
      Rebalance::Revoke(partitions) => info!(
        count = partitions.count(),
        partitions = %describe_partitions(partitions),
        "Partitions revoked"
      ),
      Rebalance::Assign(partitions) => debug!(count = partitions.count(), "Rebalance starting"),
      Rebalance::Error(e) => warn!(error = %e, "Rebalance failed"),
    }
  }

  fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
    if let Rebalance::Assign(partitions) = rebalance {
      info!(
        count = partitions.count(),
        partitions = %describe_partitions(partitions),
        "Partitions assigned"
      );
    }
  }

  fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
    match result {
      Ok(()) => debug!(partitions = offsets.count(), "Committed offsets"),
      Err(e) => warn!(error = %e, "Offset commit failed"),
    }
  }
}

/// A source that consumes from Kafka topics as a member of a consumer group.
///
/// The consumer is created on `subscribe`. Before subscribing, the source
/// fetches cluster metadata so that an unreachable broker fails startup
/// instead of leaving the listener polling forever.
///
/// # Example
///
/// ```no_run
/// use ssl_listener::config::{ListenerConfig, SecurityConfig};
/// use ssl_listener::source::KafkaSource;
///
/// let source = KafkaSource::new(
///   ListenerConfig::default()
///     .with_bootstrap_servers("kafka:9093")
///     .with_security(SecurityConfig::ssl("/etc/kafka/ca.pem")),
/// );
/// ```
pub struct KafkaSource {
  config: ListenerConfig,
  consumer: Option<Arc<StreamConsumer<ListenerContext>>>,
}

impl KafkaSource {
  /// Creates a source with the given configuration. Nothing is connected yet.
  pub fn new(config: ListenerConfig) -> Self {
    Self {
      config,
      consumer: None,
    }
  }

  /// Returns the connection configuration.
  pub fn config(&self) -> &ListenerConfig {
    &self.config
  }
}

#[async_trait]
impl MessageSource for KafkaSource {
  async fn subscribe(&mut self, request: &SubscribeRequest) -> Result<(), ListenerError> {
    self.config.validate()?;

    let consumer: StreamConsumer<ListenerContext> = self
      .config
      .client_config(&request.group_id)
      .create_with_context(ListenerContext)
      .map_err(|e| ListenerError::Connection(e.to_string()))?;
    let consumer = Arc::new(consumer);

    // Metadata requests block, keep them off the runtime threads.
    let probe = consumer.clone();
    let timeout = self.config.connect_timeout;
    let (brokers, known_topics) = tokio::task::spawn_blocking(move || {
      probe.fetch_metadata(None, timeout).map(|metadata| {
        let topics: Vec<String> = metadata
          .topics()
          .iter()
          .map(|t| t.name().to_string())
          .collect();
        (metadata.brokers().len(), topics)
      })
    })
    .await
    .map_err(|e| ListenerError::Connection(e.to_string()))?
    .map_err(|e| ListenerError::Connection(e.to_string()))?;
    info!(
      brokers,
      bootstrap_servers = %self.config.bootstrap_servers,
      security_protocol = %self.config.security.protocol,
      "Connected to Kafka"
    );

    for topic in &request.topics {
      if !known_topics.contains(topic) {
        warn!(topic = %topic, "Topic does not exist yet, waiting for it to be created");
      }
    }

    let topics: Vec<&str> = request.topics.iter().map(String::as_str).collect();
    consumer
      .subscribe(&topics)
      .map_err(|e| ListenerError::Subscribe(e.to_string()))?;

    self.consumer = Some(consumer);
    Ok(())
  }

  async fn recv(&mut self) -> Result<InboundMessage, ListenerError> {
    let consumer = self
      .consumer
      .as_ref()
      .ok_or_else(|| ListenerError::Receive("not subscribed".to_string()))?;
    let message = consumer.recv().await?;
    Ok(convert_message(&message))
  }

  async fn close(&mut self) {
    if let Some(consumer) = self.consumer.take() {
      consumer.unsubscribe();
      debug!("Kafka consumer unsubscribed");
    }
  }
}

/// Renders a partition list as `topic/partition` pairs, e.g. `ssl/0,ssl/1`.
fn describe_partitions(partitions: &TopicPartitionList) -> String {
  partitions
    .elements()
    .iter()
    .map(|elem| format!("{}/{}", elem.topic(), elem.partition()))
    .collect::<Vec<_>>()
    .join(",")
}

fn convert_message(message: &BorrowedMessage<'_>) -> InboundMessage {
  let mut headers = HashMap::new();
  if let Some(message_headers) = message.headers() {
    for header in message_headers.iter() {
      if let Some(value) = header.value {
        headers.insert(header.key.to_string(), value.to_vec());
      }
    }
  }

  InboundMessage {
    topic: message.topic().to_string(),
    partition: message.partition(),
    offset: message.offset(),
    key: message.key().map(|k| k.to_vec()),
    payload: message.payload().map(|p| p.to_vec()),
    timestamp: message.timestamp().to_millis(),
    headers,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_recv_before_subscribe_fails() {
    let mut source = KafkaSource::new(ListenerConfig::default());
    let err = source.recv().await.unwrap_err();
    assert!(matches!(err, ListenerError::Receive(_)));
  }

  #[tokio::test]
  async fn test_invalid_config_fails_before_connecting() {
    let mut source =
      KafkaSource::new(ListenerConfig::default().with_auto_offset_reset("sometimes"));
    let request = SubscribeRequest::new("client", vec!["ssl".to_string()]);
    let err = source.subscribe(&request).await.unwrap_err();
    assert!(matches!(err, ListenerError::Config(_)));
  }

  #[test]
  fn test_describe_partitions() {
    let mut partitions = TopicPartitionList::new();
    assert_eq!(describe_partitions(&partitions), "");

    partitions.add_partition("ssl", 0);
    partitions.add_partition("ssl", 2);
    assert_eq!(describe_partitions(&partitions), "ssl/0,ssl/2");
  }

  #[tokio::test]
  async fn test_close_without_consumer_is_noop() {
    let mut source = KafkaSource::new(ListenerConfig::default());
    source.close().await;
    assert_eq!(source.config().bootstrap_servers, "localhost:9092");
  }
}
