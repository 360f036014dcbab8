//! Structured logging setup.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the logging subscriber installed for the current invocation.
///
/// Dropping the guard restores whatever subscriber was active before.
pub struct LogGuard {
    _guard: DefaultGuard,
}

/// Initialize structured logging for one invocation.
///
/// Events go to the console; when `log_file` is given they are also
/// appended to that file as JSON lines.
///
/// # Arguments
/// * `log_level` - Optional filter override (e.g., "info", "dropout_ingestion=debug")
/// * `log_file` - Optional path of the JSON log file
pub fn init_logging(log_level: Option<&str>, log_file: Option<&Path>) -> anyhow::Result<LogGuard> {
    let filter = if let Some(level) = log_level {
        EnvFilter::try_new(level)?
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let guard = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .set_default();

    Ok(LogGuard { _guard: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_filter() {
        assert!(init_logging(Some("info,[="), None).is_err());
    }

    #[test]
    fn test_file_layer_writes_json() {
        let path = std::env::temp_dir().join(format!("dropout-log-{}.jsonl", std::process::id()));
        {
            let _guard = init_logging(Some("info"), Some(&path)).unwrap();
            tracing::info!(code = 3550308, "entity processed");
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(contents.contains("\"code\":3550308"));
    }
}
