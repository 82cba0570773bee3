//! Structured logging setup.
//!
//! `tracing` with a `tracing-subscriber` formatter, JSON for production and
//! pretty-printed for development. When a log file is configured, events go
//! through a [`BufferedLog`], which the dispatcher flushes after every request.

use std::env;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::collaborators::FlushLog;
use crate::config::LoggingSection;

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    /// Write to this file through a [`BufferedLog`] instead of stdout.
    pub file: Option<PathBuf>,
    /// Extra `EnvFilter` directives, comma-separated
    pub target_filter: Option<String>,
    /// Include file:line location (dev only)
    pub include_location: bool,
}

impl LogConfig {
    /// Parse configuration from `RAILYARD_LOG_*` environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("RAILYARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: LogFormat::parse(
                &env::var("RAILYARD_LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
            ),
            file: env::var("RAILYARD_LOG_FILE").ok().map(PathBuf::from),
            target_filter: env::var("RAILYARD_LOG_TARGET_FILTER").ok(),
            include_location: env::var("RAILYARD_LOG_INCLUDE_LOCATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            file: None,
            target_filter: None,
            include_location: true,
        }
    }

    pub fn default_prod() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            file: None,
            target_filter: None,
            include_location: false,
        }
    }

    /// Values set in the config file win over the environment.
    #[must_use]
    pub fn with_section(mut self, section: &LoggingSection) -> Self {
        if let Some(level) = &section.level {
            self.log_level.clone_from(level);
        }
        if let Some(format) = &section.format {
            self.format = LogFormat::parse(format);
        }
        if section.file.is_some() {
            self.file.clone_from(&section.file);
        }
        self
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));
        if let Some(target_filter) = &self.target_filter {
            for filter in target_filter.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                match filter.parse() {
                    Ok(directive) => env_filter = env_filter.add_directive(directive),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {filter}"),
                }
            }
        }
        env_filter
    }
}

/// A log file behind a write buffer that is only drained on [`FlushLog::flush`]
/// or when the buffer fills up.
#[derive(Clone)]
pub struct BufferedLog {
    inner: Arc<Mutex<BufWriter<RollingFileAppender>>>,
    path: PathBuf,
}

impl std::fmt::Debug for BufferedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedLog").field("path", &self.path).finish_non_exhaustive()
    }
}

impl BufferedLog {
    pub const DEFAULT_CAPACITY: usize = 8192;

    pub fn open(path: &Path) -> Result<Self> {
        Self::with_capacity(path, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(path: &Path, capacity: usize) -> Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("log file path {} has no file name", path.display()))?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(capacity, appender))),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for BufferedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        FlushLog::flush(self)
    }
}

impl<'a> MakeWriter<'a> for BufferedLog {
    type Writer = BufferedLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl FlushLog for BufferedLog {
    fn flush(&self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

/// Install the global subscriber.
///
/// Returns the [`BufferedLog`] when `config.file` is set, so it can be handed
/// to the dispatcher pool as its flushable logger.
pub fn init_logging(config: &LogConfig) -> Result<Option<BufferedLog>> {
    let buffered = config.file.as_deref().map(BufferedLog::open).transpose()?;

    let fmt_layer = match (&buffered, config.format) {
        (Some(file), LogFormat::Json) => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(file.clone())
            .boxed(),
        (Some(file), LogFormat::Pretty) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(false)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(file.clone())
            .boxed(),
        (None, LogFormat::Json) => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        (None, LogFormat::Pretty) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("failed to install the global tracing subscriber")?;

    tracing::info!(
        level = %config.log_level,
        format = ?config.format,
        file = ?config.file,
        "Logging initialized"
    );
    Ok(buffered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }

    #[test]
    fn test_section_overrides() {
        let section = LoggingSection {
            level: Some("warn".to_string()),
            format: Some("pretty".to_string()),
            file: Some(PathBuf::from("log/app.log")),
        };
        let config = LogConfig::default_prod().with_section(&section);
        assert_eq!(config.level(), Level::WARN);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.file, Some(PathBuf::from("log/app.log")));
    }

    #[test]
    fn test_buffered_log_only_reaches_disk_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let log = BufferedLog::open(&path).unwrap();
        let mut writer = log.make_writer();
        writer.write_all(b"first line\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap_or_default(), "");
        FlushLog::flush(&log).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first line\n");
    }
}
