use ssl_listener::{
  ListenerConfig, ListenerError, ListenerRegistry, ListenerRunner, LogHandler, logging,
  source::KafkaSource,
};
use std::process::ExitCode;
use tracing::{error, info};

const TOPIC: &str = "ssl";
const GROUP_ID: &str = "client";

#[tokio::main]
async fn main() -> ExitCode {
  if let Err(e) = logging::init() {
    eprintln!("failed to initialise logging: {}", e);
    return ExitCode::FAILURE;
  }

  match run().await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!(error = %e, "Listener failed");
      ExitCode::FAILURE
    }
  }
}

async fn run() -> Result<(), ListenerError> {
  let config = ListenerConfig::from_env()?;
  info!(
    bootstrap_servers = %config.bootstrap_servers,
    security_protocol = %config.security.protocol,
    "Starting listener"
  );

  let registry = ListenerRegistry::new().with_listener(TOPIC, LogHandler::new());
  let mut subscription = ListenerRunner::new(KafkaSource::new(config))
    .start_registry(GROUP_ID, registry)
    .await?;

  tokio::select! {
    _ = shutdown_signal() => info!("Shutdown signal received"),
    _ = subscription.stopped() => {}
  }
  subscription.shutdown().await
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      error!(error = %e, "Failed to listen for Ctrl+C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        error!(error = %e, "Failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
}
