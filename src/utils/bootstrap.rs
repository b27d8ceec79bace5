//! Bootstrap utilities for the thistle binary.
//!
//! Shared initialization code run once before any component starts.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig, LOG_ENV_VAR};

/// Initialize tracing from the logging configuration.
///
/// `THISTLE_LOG` takes precedence over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Config file path from `--config <path>` / `-c <path>`.
pub fn parse_config_path() -> Option<PathBuf> {
    config_path_from(std::env::args().skip(1))
}

fn config_path_from(mut args: impl Iterator<Item = String>) -> Option<PathBuf> {
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Connect to a startup dependency with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "store")
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error after max retries.
pub async fn connect_with_retry<T, E, F, Fut>(service_name: &str, connect: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY: Duration = Duration::from_millis(500);
    const MAX_DELAY: Duration = Duration::from_secs(10);

    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(connection) => {
                tracing::info!(service = service_name, attempt, "Connected");
                return Ok(connection);
            }
            Err(e) if attempt < MAX_RETRIES => {
                warn!(
                    "Failed to connect to {} (attempt {}/{}): {}. Retrying in {:?}...",
                    service_name, attempt, MAX_RETRIES, e, delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
            Err(e) => {
                tracing::error!(
                    "Failed to connect to {} after {} attempts: {}",
                    service_name,
                    MAX_RETRIES,
                    e
                );
                return Err(e);
            }
        }
    }
}

/// Wait for Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_config_path_flags() {
        assert_eq!(
            config_path_from(args(&["--config", "a.yaml"])),
            Some(PathBuf::from("a.yaml"))
        );
        assert_eq!(
            config_path_from(args(&["-v", "-c", "b.yaml"])),
            Some(PathBuf::from("b.yaml"))
        );
        assert_eq!(
            config_path_from(args(&["--config=c.yaml"])),
            Some(PathBuf::from("c.yaml"))
        );
        assert_eq!(config_path_from(args(&["--config"])), None);
        assert_eq!(config_path_from(args(&[])), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_eventually_succeeds() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = connect_with_retry("store", || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("attempt {}", n))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_gives_up() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = connect_with_retry("store", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 10);
    }
}
