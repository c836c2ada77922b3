use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;
use crate::error::{CicdError, Result};

const LOG_FILE_PREFIX: &str = "cicd_hooks";
const DEFAULT_FILTER: &str = "info";

pub fn parse_rotation(value: Option<&str>) -> Result<Rotation> {
    match value.unwrap_or("daily") {
        "daily" => Ok(Rotation::DAILY),
        "hourly" => Ok(Rotation::HOURLY),
        "never" => Ok(Rotation::NEVER),
        other => Err(CicdError::ConfigError(format!(
            "unknown log rotation '{}'",
            other
        ))),
    }
}

/// Non-blocking writer to rolling files under `directory`
pub fn setup_file_logging(
    directory: &Path,
    rotation: Rotation,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(directory)?;
    let file_appender = RollingFileAppender::new(rotation, directory, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(file_appender))
}

/// Installs the global subscriber: console output filtered by `RUST_LOG`
/// (default `info`), plus rolling files when a log directory is configured.
///
/// The returned guard flushes the file writer and must live as long as the
/// process logs.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let rotation = parse_rotation(config.rotation.as_deref())?;
            let (writer, guard) = setup_file_logging(Path::new(directory), rotation)?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| CicdError::ConfigError(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_values() {
        assert_eq!(parse_rotation(None).unwrap(), Rotation::DAILY);
        assert_eq!(parse_rotation(Some("hourly")).unwrap(), Rotation::HOURLY);
        assert_eq!(parse_rotation(Some("never")).unwrap(), Rotation::NEVER);
        assert!(parse_rotation(Some("weekly")).is_err());
    }
}
