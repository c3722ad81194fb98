//! # ssl-listener
//!
//! A Kafka consumer-group listener: it subscribes to a topic and hands every
//! message it receives to a handler, which by default writes the payload to
//! the log.
//!
//! The pieces are composed explicitly:
//!
//! - [`config::ListenerConfig`] describes the broker connection, including TLS
//! - [`source::KafkaSource`] owns the broker connection
//! - [`handler::ListenerRegistry`] binds handlers to topics
//! - [`runner::ListenerRunner`] subscribes and runs the delivery loop
//!
//! ```rust,no_run
//! use ssl_listener::config::ListenerConfig;
//! use ssl_listener::handler::LogHandler;
//! use ssl_listener::runner::ListenerRunner;
//! use ssl_listener::source::KafkaSource;
//!
//! # async fn example() -> Result<(), ssl_listener::error::ListenerError> {
//! let source = KafkaSource::new(ListenerConfig::from_env()?);
//! let subscription = ListenerRunner::new(source)
//!   .start("ssl", "client", LogHandler::new())
//!   .await?;
//! subscription.wait().await
//! # }
//! ```

#![deny(missing_docs)]

/// Broker connection configuration.
pub mod config;
/// Error types and handler failure policy.
pub mod error;
/// Message handlers and the topic registry.
pub mod handler;
/// Log sink initialisation.
pub mod logging;
/// The record delivered to handlers.
pub mod message;
/// The listener runner and its subscription handle.
pub mod runner;
/// Broker connections.
pub mod source;


pub use config::{ListenerConfig, SecurityConfig, SecurityProtocol};
pub use error::{ErrorStrategy, HandlerError, ListenerError};
pub use handler::{ListenerRegistry, LogHandler, MessageHandler, handler_fn};
pub use message::InboundMessage;
pub use runner::{ListenerRunner, RunnerState, RunningSubscription};
pub use source::{ChannelSource, KafkaSource, MessageSource, SubscribeRequest};
