use ssl_listener::config::{ENV_BOOTSTRAP_SERVERS, ENV_CONNECT_TIMEOUT_MS, ENV_SECURITY_PROTOCOL};
use ssl_listener::{
  ChannelSource, HandlerError, KafkaSource, ListenerConfig, ListenerError, ListenerRegistry,
  ListenerRunner, MessageHandler, RunnerState, SubscribeRequest,
};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// A handler that keeps what it sees
#[derive(Clone, Default)]
struct Collect {
  seen: Arc<Mutex<Vec<String>>>,
}

impl MessageHandler for Collect {
  fn handle(&self, value: &str) -> Result<(), HandlerError> {
    self.seen.lock().unwrap().push(value.to_string());
    Ok(())
  }
}

impl Collect {
  fn seen(&self) -> Vec<String> {
    self.seen.lock().unwrap().clone()
  }
}

#[tokio::test]
async fn test_listener_end_to_end_over_channel() {
  let collect = Collect::default();
  let registry = ListenerRegistry::new().with_listener("ssl", collect.clone());

  let (source, publisher) = ChannelSource::new();
  let log = source.subscription_log();
  let mut subscription = assert_ok!(
    ListenerRunner::new(source)
      .with_name("ssl-listener")
      .start_registry("client", registry)
      .await
  );

  assert_eq!(
    log.requests(),
    vec![SubscribeRequest::new("client", vec!["ssl".to_string()])]
  );

  for i in 0..10 {
    assert_ok!(publisher.publish("ssl", format!("record {}", i)));
  }
  drop(publisher);

  subscription.stopped().await;
  assert_eq!(subscription.state(), RunnerState::Stopped);
  assert_eq!(subscription.delivered(), 10);
  assert_ok!(subscription.wait().await);

  let expected: Vec<String> = (0..10).map(|i| format!("record {}", i)).collect();
  assert_eq!(collect.seen(), expected);
}

#[tokio::test]
async fn test_partitions_keep_their_own_order() {
  let collect = Collect::default();
  let (source, publisher) = ChannelSource::new();
  let subscription = assert_ok!(
    ListenerRunner::new(source)
      .start("ssl", "client", collect.clone())
      .await
  );

  for (partition, value) in [(0, "p0-a"), (1, "p1-a"), (0, "p0-b"), (1, "p1-b")] {
    assert_ok!(publisher.publish_bytes("ssl", partition, Some(value.as_bytes().to_vec())));
  }
  drop(publisher);
  assert_ok!(subscription.wait().await);

  let seen = collect.seen();
  let p0: Vec<&String> = seen.iter().filter(|v| v.starts_with("p0")).collect();
  let p1: Vec<&String> = seen.iter().filter(|v| v.starts_with("p1")).collect();
  assert_eq!(p0, vec!["p0-a", "p0-b"]);
  assert_eq!(p1, vec!["p1-a", "p1-b"]);
}

#[tokio::test]
async fn test_kafka_source_unreachable_broker_fails_startup() {
  let config = ListenerConfig::default()
    .with_bootstrap_servers("127.0.0.1:1")
    .with_connect_timeout(Duration::from_millis(500));

  let result = ListenerRunner::new(KafkaSource::new(config))
    .start("ssl", "client", Collect::default())
    .await;

  let err = assert_err!(result);
  assert!(matches!(err, ListenerError::Connection(_)), "got {:?}", err);
}

// The binary with none of the caller's KAFKA_* settings leaking in
fn listener_binary() -> Command {
  let mut command = Command::new(env!("CARGO_BIN_EXE_ssl-listener"));
  command.env_clear();
  if let Some(path) = std::env::var_os("PATH") {
    command.env("PATH", path);
  }
  command
}

#[test]
fn test_binary_exits_non_zero_when_broker_unreachable() {
  let output = listener_binary()
    .env(ENV_BOOTSTRAP_SERVERS, "127.0.0.1:1")
    .env(ENV_CONNECT_TIMEOUT_MS, "500")
    .env("RUST_LOG", "info")
    .output()
    .unwrap();

  assert!(!output.status.success());
  assert_eq!(output.status.code(), Some(1));
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("Listener failed"), "stdout: {}", stdout);
}

#[test]
fn test_binary_rejects_invalid_security_protocol() {
  let output = listener_binary()
    .env(ENV_SECURITY_PROTOCOL, "carrier-pigeon")
    .env(ENV_CONNECT_TIMEOUT_MS, "500")
    .output()
    .unwrap();

  assert_eq!(output.status.code(), Some(1));
}
