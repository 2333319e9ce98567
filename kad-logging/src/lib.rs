//! Tracing setup for kad-dht nodes: destination, format, and filtering.
//!
//! Every component in `kad-net` logs through the `tracing` macros; this
//! crate is only responsible for wiring a subscriber once at startup.

mod error;

use std::path::PathBuf;

use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

pub use error::{Error, Result};
pub use tracing_appender::non_blocking::WorkerGuard;
pub use tracing_core::Level;

/// Where log output should be written.
#[derive(Debug, Clone)]
pub enum LogOutputDest {
    Stdout,
    DataDir,
    Path(PathBuf),
}

impl LogOutputDest {
    pub fn parse_from_str(val: &str) -> Result<Self> {
        match val {
            "stdout" => Ok(LogOutputDest::Stdout),
            "data-dir" => Ok(LogOutputDest::DataDir),
            // The path does not need to exist yet; callers create it.
            value => Ok(LogOutputDest::Path(PathBuf::from(value))),
        }
    }

    fn resolve(&self) -> Result<Option<PathBuf>> {
        match self {
            LogOutputDest::Stdout => Ok(None),
            LogOutputDest::Path(p) => Ok(Some(p.clone())),
            LogOutputDest::DataDir => {
                let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
                let dir = dirs_next::data_dir()
                    .ok_or_else(|| {
                        Error::LoggingConfiguration("could not obtain data directory path".into())
                    })?
                    .join("kad-dht")
                    .join("node")
                    .join("logs")
                    .join(format!("log_{timestamp}"));
                Ok(Some(dir))
            }
        }
    }
}

impl std::fmt::Display for LogOutputDest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LogOutputDest::Stdout => write!(f, "stdout"),
            LogOutputDest::DataDir => write!(f, "data-dir"),
            LogOutputDest::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// The on-the-wire shape of emitted log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Default,
    Json,
}

impl LogFormat {
    pub fn parse_from_str(val: &str) -> Result<Self> {
        match val {
            "default" => Ok(LogFormat::Default),
            "json" => Ok(LogFormat::Json),
            _ => Err(Error::LoggingConfiguration(
                "valid values are \"default\" or \"json\"".to_string(),
            )),
        }
    }
}

/// Maximum number of uncompressed log files to retain before rotating.
const DEFAULT_MAX_LOG_FILES: usize = 10;

/// Builds and installs the global tracing subscriber.
///
/// Returns a [`WorkerGuard`] that must be held for the lifetime of the
/// process — dropping it flushes and stops the non-blocking writer.
pub struct LogBuilder {
    output_dest: LogOutputDest,
    format: LogFormat,
    max_log_files: usize,
    default_filter: String,
}

impl LogBuilder {
    /// `default_filter` is used when the `KAD_LOG` environment variable is
    /// not set, e.g. `"kad_net=debug,kad_node=info"`.
    pub fn new(default_filter: impl Into<String>) -> Self {
        Self {
            output_dest: LogOutputDest::Stdout,
            format: LogFormat::Default,
            max_log_files: DEFAULT_MAX_LOG_FILES,
            default_filter: default_filter.into(),
        }
    }

    pub fn output_dest(mut self, dest: LogOutputDest) -> Self {
        self.output_dest = dest;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn max_log_files(mut self, files: usize) -> Self {
        self.max_log_files = files;
        self
    }

    pub fn init(self) -> Result<WorkerGuard> {
        let filter = EnvFilter::try_from_env("KAD_LOG")
            .unwrap_or_else(|_| EnvFilter::new(&self.default_filter));

        let dir = self.output_dest.resolve()?;
        let (non_blocking, guard) = match dir {
            None => tracing_appender::non_blocking(std::io::stdout()),
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                let rotating = FileRotate::new(
                    dir.join("kad_node.log"),
                    AppendCount::new(self.max_log_files),
                    ContentLimit::BytesSurpassed(10 * 1024 * 1024),
                    Compression::OnRotate(0),
                    #[cfg(unix)]
                    None,
                );
                tracing_appender::non_blocking(rotating)
            }
        };

        let registry = tracing_subscriber::registry().with(filter);
        match self.format {
            LogFormat::Default => {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false),
                    )
                    .try_init()
                    .map_err(|e| Error::LoggingConfiguration(e.to_string()))?;
            }
            LogFormat::Json => {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(non_blocking),
                    )
                    .try_init()
                    .map_err(|e| Error::LoggingConfiguration(e.to_string()))?;
            }
        }

        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_output_dests() {
        assert!(matches!(
            LogOutputDest::parse_from_str("stdout").unwrap(),
            LogOutputDest::Stdout
        ));
        assert!(matches!(
            LogOutputDest::parse_from_str("data-dir").unwrap(),
            LogOutputDest::DataDir
        ));
        assert!(matches!(
            LogOutputDest::parse_from_str("/tmp/logs").unwrap(),
            LogOutputDest::Path(_)
        ));
    }

    #[test]
    fn parses_known_formats() {
        assert_eq!(LogFormat::parse_from_str("default").unwrap(), LogFormat::Default);
        assert_eq!(LogFormat::parse_from_str("json").unwrap(), LogFormat::Json);
        assert!(LogFormat::parse_from_str("yaml").is_err());
    }
}
