//! # Listener Configuration
//!
//! Broker connection settings for a listener: where the broker is, how the
//! consumer behaves, and how the connection is secured. The consumer group and
//! topics are not part of this configuration; they are given to the runner when
//! a subscription is started.
//!
//! Configuration is either built explicitly with the `with_*` methods or loaded
//! from environment variables with [`ListenerConfig::from_env`]:
//!
//! - `KAFKA_BOOTSTRAP_SERVERS` - broker addresses (default: `localhost:9092`)
//! - `KAFKA_AUTO_OFFSET_RESET` - `earliest` or `latest` (default: `latest`)
//! - `KAFKA_CONNECT_TIMEOUT_MS` - how long startup waits for the broker (default: 10000)
//! - `KAFKA_SECURITY_PROTOCOL` - `plaintext` (default) or `ssl`
//! - `KAFKA_SSL_CA_LOCATION` - CA bundle used to authenticate the broker
//! - `KAFKA_SSL_CERTIFICATE_LOCATION` / `KAFKA_SSL_KEY_LOCATION` - client identity
//! - `KAFKA_SSL_KEY_PASSWORD` - password for the client key
//! - `KAFKA_SSL_ENDPOINT_IDENTIFICATION_ALGORITHM` - `https` (default) or `none`

use crate::error::ListenerError;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the broker addresses.
pub const ENV_BOOTSTRAP_SERVERS: &str = "KAFKA_BOOTSTRAP_SERVERS";
/// Environment variable holding the auto offset reset policy.
pub const ENV_AUTO_OFFSET_RESET: &str = "KAFKA_AUTO_OFFSET_RESET";
/// Environment variable holding the startup connect timeout in milliseconds.
pub const ENV_CONNECT_TIMEOUT_MS: &str = "KAFKA_CONNECT_TIMEOUT_MS";
/// Environment variable holding the security protocol.
pub const ENV_SECURITY_PROTOCOL: &str = "KAFKA_SECURITY_PROTOCOL";
/// Environment variable holding the CA bundle path.
pub const ENV_SSL_CA_LOCATION: &str = "KAFKA_SSL_CA_LOCATION";
/// Environment variable holding the client certificate path.
pub const ENV_SSL_CERTIFICATE_LOCATION: &str = "KAFKA_SSL_CERTIFICATE_LOCATION";
/// Environment variable holding the client key path.
pub const ENV_SSL_KEY_LOCATION: &str = "KAFKA_SSL_KEY_LOCATION";
/// Environment variable holding the client key password.
pub const ENV_SSL_KEY_PASSWORD: &str = "KAFKA_SSL_KEY_PASSWORD";
/// Environment variable holding the endpoint identification algorithm.
pub const ENV_SSL_ENDPOINT_IDENTIFICATION: &str = "KAFKA_SSL_ENDPOINT_IDENTIFICATION_ALGORITHM";

/// Transport security between the listener and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityProtocol {
  /// Unencrypted connection.
  #[default]
  Plaintext,
  /// TLS connection; the broker certificate is verified against the CA bundle.
  Ssl,
}

impl SecurityProtocol {
  /// Value of the `security.protocol` client property.
  pub fn as_str(&self) -> &'static str {
    match self {
      SecurityProtocol::Plaintext => "plaintext",
      SecurityProtocol::Ssl => "ssl",
    }
  }
}

impl fmt::Display for SecurityProtocol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SecurityProtocol {
  type Err = ListenerError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "plaintext" => Ok(SecurityProtocol::Plaintext),
      "ssl" => Ok(SecurityProtocol::Ssl),
      other => Err(ListenerError::Config(format!(
        "unsupported security protocol '{}'",
        other
      ))),
    }
  }
}

/// TLS settings used when the protocol is [`SecurityProtocol::Ssl`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecurityConfig {
  /// Transport protocol.
  pub protocol: SecurityProtocol,
  /// CA bundle used to verify the broker certificate. System roots when unset.
  pub ca_location: Option<String>,
  /// Client certificate, for brokers that also authenticate clients.
  pub certificate_location: Option<String>,
  /// Client private key.
  pub key_location: Option<String>,
  /// Password protecting the client private key.
  pub key_password: Option<String>,
  /// Verify that the broker certificate matches its host name.
  pub verify_hostname: bool,
}

// Hand-written so the key password never reaches the logs.
impl fmt::Debug for SecurityConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SecurityConfig")
      .field("protocol", &self.protocol)
      .field("ca_location", &self.ca_location)
      .field("certificate_location", &self.certificate_location)
      .field("key_location", &self.key_location)
      .field("key_password", &self.key_password.as_ref().map(|_| "***"))
      .field("verify_hostname", &self.verify_hostname)
      .finish()
  }
}

impl SecurityConfig {
  /// A plaintext connection.
  pub fn plaintext() -> Self {
    Self {
      verify_hostname: true,
      ..Default::default()
    }
  }

  /// A TLS connection verifying the broker against `ca_location`.
  pub fn ssl(ca_location: impl Into<String>) -> Self {
    Self {
      protocol: SecurityProtocol::Ssl,
      ca_location: Some(ca_location.into()),
      verify_hostname: true,
      ..Default::default()
    }
  }

  /// Adds a client certificate and key.
  #[must_use]
  pub fn with_client_identity(
    mut self,
    certificate_location: impl Into<String>,
    key_location: impl Into<String>,
  ) -> Self {
    self.certificate_location = Some(certificate_location.into());
    self.key_location = Some(key_location.into());
    self
  }

  /// Sets the client key password.
  #[must_use]
  pub fn with_key_password(mut self, password: impl Into<String>) -> Self {
    self.key_password = Some(password.into());
    self
  }

  /// Enables or disables broker host name verification.
  #[must_use]
  pub fn with_verify_hostname(mut self, verify: bool) -> Self {
    self.verify_hostname = verify;
    self
  }

  fn validate(&self) -> Result<(), ListenerError> {
    if self.certificate_location.is_some() ^ self.key_location.is_some() {
      return Err(ListenerError::Config(
        "ssl certificate and key locations must be set together".to_string(),
      ));
    }
    if self.protocol == SecurityProtocol::Plaintext
      && (self.ca_location.is_some() || self.certificate_location.is_some())
    {
      return Err(ListenerError::Config(
        "ssl files are configured but the security protocol is plaintext".to_string(),
      ));
    }
    Ok(())
  }

  fn apply(&self, client_config: &mut ClientConfig) {
    client_config.set("security.protocol", self.protocol.as_str());
    if self.protocol != SecurityProtocol::Ssl {
      return;
    }
    if let Some(ref ca_location) = self.ca_location {
      client_config.set("ssl.ca.location", ca_location);
    }
    if let Some(ref certificate_location) = self.certificate_location {
      client_config.set("ssl.certificate.location", certificate_location);
    }
    if let Some(ref key_location) = self.key_location {
      client_config.set("ssl.key.location", key_location);
    }
    if let Some(ref key_password) = self.key_password {
      client_config.set("ssl.key.password", key_password);
    }
    client_config.set(
      "ssl.endpoint.identification.algorithm",
      if self.verify_hostname { "https" } else { "none" },
    );
  }
}

/// Configuration for the broker connection of a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
  /// Bootstrap servers (comma-separated list of broker addresses).
  pub bootstrap_servers: String,
  /// Auto offset reset strategy ("earliest" or "latest").
  pub auto_offset_reset: String,
  /// Enable auto commit of offsets.
  pub enable_auto_commit: bool,
  /// Auto commit interval in milliseconds.
  pub auto_commit_interval_ms: u64,
  /// Session timeout in milliseconds.
  pub session_timeout_ms: u64,
  /// Maximum poll interval in milliseconds.
  pub max_poll_interval_ms: u64,
  /// Maximum number of bytes to fetch per request.
  pub fetch_max_bytes: usize,
  /// Maximum wait time for fetch requests in milliseconds.
  pub fetch_wait_max_ms: u64,
  /// How long startup waits for the broker before giving up.
  pub connect_timeout: Duration,
  /// Connection security.
  pub security: SecurityConfig,
  /// Additional custom configuration properties.
  pub custom_properties: HashMap<String, String>,
}

impl Default for ListenerConfig {
  fn default() -> Self {
    Self {
      bootstrap_servers: "localhost:9092".to_string(),
      auto_offset_reset: "latest".to_string(),
      enable_auto_commit: true,
      auto_commit_interval_ms: 5000,
      session_timeout_ms: 45000,
      max_poll_interval_ms: 300000,
      fetch_max_bytes: 52428800, // 50MB
      fetch_wait_max_ms: 500,
      connect_timeout: Duration::from_secs(10),
      security: SecurityConfig::plaintext(),
      custom_properties: HashMap::new(),
    }
  }
}

impl ListenerConfig {
  /// Loads the configuration from the process environment.
  pub fn from_env() -> Result<Self, ListenerError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Loads the configuration through `lookup`, which maps a variable name to
  /// its value. Unset and blank variables fall back to the defaults.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ListenerError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let mut config = Self::default();
    if let Some(servers) = get(ENV_BOOTSTRAP_SERVERS) {
      config.bootstrap_servers = servers;
    }
    if let Some(reset) = get(ENV_AUTO_OFFSET_RESET) {
      config.auto_offset_reset = reset;
    }
    if let Some(timeout) = get(ENV_CONNECT_TIMEOUT_MS) {
      let millis: u64 = timeout.parse().map_err(|_| {
        ListenerError::Config(format!("invalid connect timeout '{}'", timeout))
      })?;
      config.connect_timeout = Duration::from_millis(millis);
    }

    let mut security = SecurityConfig::plaintext();
    if let Some(protocol) = get(ENV_SECURITY_PROTOCOL) {
      security.protocol = protocol.parse()?;
    }
    security.ca_location = get(ENV_SSL_CA_LOCATION);
    security.certificate_location = get(ENV_SSL_CERTIFICATE_LOCATION);
    security.key_location = get(ENV_SSL_KEY_LOCATION);
    security.key_password = get(ENV_SSL_KEY_PASSWORD);
    if let Some(algorithm) = get(ENV_SSL_ENDPOINT_IDENTIFICATION) {
      security.verify_hostname = match algorithm.to_ascii_lowercase().as_str() {
        "https" => true,
        "none" => false,
        other => {
          return Err(ListenerError::Config(format!(
            "unsupported endpoint identification algorithm '{}'",
            other
          )));
        }
      };
    }
    config.security = security;

    config.validate()?;
    Ok(config)
  }

  /// Sets the bootstrap servers.
  #[must_use]
  pub fn with_bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
    self.bootstrap_servers = servers.into();
    self
  }

  /// Sets the auto offset reset strategy.
  #[must_use]
  pub fn with_auto_offset_reset(mut self, reset: impl Into<String>) -> Self {
    self.auto_offset_reset = reset.into();
    self
  }

  /// Sets whether to enable auto commit.
  #[must_use]
  pub fn with_enable_auto_commit(mut self, enable: bool) -> Self {
    self.enable_auto_commit = enable;
    self
  }

  /// Sets the auto commit interval in milliseconds.
  #[must_use]
  pub fn with_auto_commit_interval_ms(mut self, interval_ms: u64) -> Self {
    self.auto_commit_interval_ms = interval_ms;
    self
  }

  /// Sets how long startup waits for the broker.
  #[must_use]
  pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
    self.connect_timeout = timeout;
    self
  }

  /// Sets the connection security.
  #[must_use]
  pub fn with_security(mut self, security: SecurityConfig) -> Self {
    self.security = security;
    self
  }

  /// Sets a custom property.
  #[must_use]
  pub fn with_custom_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.custom_properties.insert(key.into(), value.into());
    self
  }

  /// Checks the configuration for values the client would reject.
  pub fn validate(&self) -> Result<(), ListenerError> {
    if self.bootstrap_servers.split(',').all(|s| s.trim().is_empty()) {
      return Err(ListenerError::Config(
        "bootstrap servers must not be empty".to_string(),
      ));
    }
    match self.auto_offset_reset.as_str() {
      "earliest" | "latest" => {}
      other => {
        return Err(ListenerError::Config(format!(
          "unsupported auto offset reset '{}'",
          other
        )));
      }
    }
    self.security.validate()
  }

  /// Builds the client configuration for a consumer in `group_id`.
  pub fn client_config(&self, group_id: &str) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &self.bootstrap_servers);
    client_config.set("group.id", group_id);
    client_config.set("enable.partition.eof", "false");
    client_config.set_log_level(RDKafkaLogLevel::Warning);

    client_config.set("auto.offset.reset", &self.auto_offset_reset);
    client_config.set(
      "enable.auto.commit",
      if self.enable_auto_commit { "true" } else { "false" },
    );
    client_config.set(
      "auto.commit.interval.ms",
      self.auto_commit_interval_ms.to_string(),
    );

    client_config.set("session.timeout.ms", self.session_timeout_ms.to_string());
    client_config.set("max.poll.interval.ms", self.max_poll_interval_ms.to_string());
    client_config.set("fetch.max.bytes", self.fetch_max_bytes.to_string());
    client_config.set("fetch.wait.max.ms", self.fetch_wait_max_ms.to_string());

    self.security.apply(&mut client_config);

    // Custom properties win over everything above.
    for (key, value) in &self.custom_properties {
      client_config.set(key, value);
    }
    client_config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| vars.get(key).cloned()
  }

  #[test]
  fn test_listener_config_default() {
    let config = ListenerConfig::default();
    assert_eq!(config.bootstrap_servers, "localhost:9092");
    assert_eq!(config.auto_offset_reset, "latest");
    assert!(config.enable_auto_commit);
    assert_eq!(config.security.protocol, SecurityProtocol::Plaintext);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_listener_config_builder() {
    let config = ListenerConfig::default()
      .with_bootstrap_servers("kafka:9093")
      .with_auto_offset_reset("earliest")
      .with_enable_auto_commit(false)
      .with_connect_timeout(Duration::from_secs(2))
      .with_custom_property("client.id", "listener-1");

    assert_eq!(config.bootstrap_servers, "kafka:9093");
    assert_eq!(config.auto_offset_reset, "earliest");
    assert!(!config.enable_auto_commit);
    assert_eq!(config.connect_timeout, Duration::from_secs(2));
    assert_eq!(config.custom_properties.get("client.id").unwrap(), "listener-1");
  }

  #[test]
  fn test_client_config_carries_group_and_servers() {
    let client = ListenerConfig::default()
      .with_bootstrap_servers("broker-1:9092,broker-2:9092")
      .client_config("client");
    assert_eq!(client.get("group.id"), Some("client"));
    assert_eq!(client.get("bootstrap.servers"), Some("broker-1:9092,broker-2:9092"));
    assert_eq!(client.get("enable.auto.commit"), Some("true"));
    assert_eq!(client.get("security.protocol"), Some("plaintext"));
    assert_eq!(client.get("ssl.ca.location"), None);
  }

  #[test]
  fn test_client_config_ssl_settings() {
    let security = SecurityConfig::ssl("/etc/kafka/ca.pem")
      .with_client_identity("/etc/kafka/client.pem", "/etc/kafka/client.key")
      .with_key_password("secret")
      .with_verify_hostname(false);
    let client = ListenerConfig::default()
      .with_security(security)
      .client_config("client");

    assert_eq!(client.get("security.protocol"), Some("ssl"));
    assert_eq!(client.get("ssl.ca.location"), Some("/etc/kafka/ca.pem"));
    assert_eq!(client.get("ssl.certificate.location"), Some("/etc/kafka/client.pem"));
    assert_eq!(client.get("ssl.key.location"), Some("/etc/kafka/client.key"));
    assert_eq!(client.get("ssl.key.password"), Some("secret"));
    assert_eq!(client.get("ssl.endpoint.identification.algorithm"), Some("none"));
  }

  #[test]
  fn test_custom_properties_override() {
    let client = ListenerConfig::default()
      .with_custom_property("auto.offset.reset", "earliest")
      .client_config("client");
    assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
  }

  #[test]
  fn test_from_lookup_defaults() {
    let config = ListenerConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config.bootstrap_servers, "localhost:9092");
    assert_eq!(config.security, SecurityConfig::plaintext());
  }

  #[test]
  fn test_from_lookup_ssl() {
    let config = ListenerConfig::from_lookup(lookup(&[
      (ENV_BOOTSTRAP_SERVERS, "kafka.internal:9093"),
      (ENV_SECURITY_PROTOCOL, "SSL"),
      (ENV_SSL_CA_LOCATION, "/certs/ca.pem"),
      (ENV_SSL_ENDPOINT_IDENTIFICATION, "none"),
      (ENV_AUTO_OFFSET_RESET, " "),
    ]))
    .unwrap();

    assert_eq!(config.bootstrap_servers, "kafka.internal:9093");
    assert_eq!(config.auto_offset_reset, "latest");
    assert_eq!(config.security.protocol, SecurityProtocol::Ssl);
    assert_eq!(config.security.ca_location.as_deref(), Some("/certs/ca.pem"));
    assert!(!config.security.verify_hostname);
  }

  #[test]
  fn test_from_lookup_connect_timeout() {
    let config = ListenerConfig::from_lookup(lookup(&[(ENV_CONNECT_TIMEOUT_MS, "750")])).unwrap();
    assert_eq!(config.connect_timeout, Duration::from_millis(750));

    let err = ListenerConfig::from_lookup(lookup(&[(ENV_CONNECT_TIMEOUT_MS, "soon")])).unwrap_err();
    assert!(matches!(err, ListenerError::Config(_)));
  }

  #[test]
  fn test_from_lookup_rejects_unknown_protocol() {
    let err = ListenerConfig::from_lookup(lookup(&[(ENV_SECURITY_PROTOCOL, "sasl_ssl")]))
      .unwrap_err();
    assert!(matches!(err, ListenerError::Config(_)));
  }

  #[test]
  fn test_from_lookup_rejects_unpaired_identity() {
    let err = ListenerConfig::from_lookup(lookup(&[
      (ENV_SECURITY_PROTOCOL, "ssl"),
      (ENV_SSL_CERTIFICATE_LOCATION, "/certs/client.pem"),
    ]))
    .unwrap_err();
    assert!(matches!(err, ListenerError::Config(_)));
  }

  #[test]
  fn test_ssl_files_require_ssl_protocol() {
    let mut security = SecurityConfig::ssl("/certs/ca.pem");
    security.protocol = SecurityProtocol::Plaintext;
    let config = ListenerConfig::default().with_security(security);
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_validate_rejects_empty_servers_and_bad_reset() {
    assert!(ListenerConfig::default().with_bootstrap_servers(" , ").validate().is_err());
    assert!(ListenerConfig::default().with_auto_offset_reset("smallest").validate().is_err());
  }

  #[test]
  fn test_debug_hides_key_password() {
    let security = SecurityConfig::ssl("/ca.pem").with_key_password("hunter2");
    let debug = format!("{:?}", security);
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("***"));
  }
}
