//! Logging configuration
//!
//! Structured logging with a console layer on stderr and an optional JSON
//! file layer with rotation. Progress output for humans stays on stdout;
//! diagnostics go through `tracing`.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use homestead_common::{Error, Result};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is not set
    pub level: String,
    /// Directory to write rotated log files into; console-only when unset
    pub file_path: Option<PathBuf>,
    /// Rotation policy for the file layer
    pub rotation: LogRotation,
    /// Emit JSON on the console instead of human-readable lines
    pub json_format: bool,
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            rotation: LogRotation::Daily,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    const LOG_FILE: &'static str = "homestead.log";

    /// Initialize the global subscriber. The returned guard must be held
    /// for the lifetime of the process, or buffered file output is lost.
    pub fn init(&self) -> Result<Option<WorkerGuard>> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let console_layer = if self.json_format {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_writer(io::stderr)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .with_writer(io::stderr)
                .boxed()
        };

        if let Some(dir) = &self.file_path {
            let file_appender = match self.rotation {
                LogRotation::Hourly => rolling::hourly(dir, Self::LOG_FILE),
                LogRotation::Daily => rolling::daily(dir, Self::LOG_FILE),
                LogRotation::Never => rolling::never(dir, Self::LOG_FILE),
            };
            let (writer, guard) = non_blocking(file_appender);

            let file_layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| Error::config(format!("failed to initialize logging: {e}")))?;

            Ok(Some(guard))
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()
                .map_err(|e| Error::config(format!("failed to initialize logging: {e}")))?;

            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_console_only_info() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.file_path.is_none());
        assert!(!config.json_format);
    }

    #[test]
    fn test_rotation_deserializes_lowercase() {
        let config: LoggingConfig =
            toml::from_str("level = \"debug\"\nrotation = \"hourly\"").unwrap();
        assert_eq!(config.level, "debug");
        assert!(matches!(config.rotation, LogRotation::Hourly));
    }
}
