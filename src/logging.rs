// src/logging.rs
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::{Span, Subscriber};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const SERVICE_LOG_DIR: &str = "SERVICE_LOG_DIR";
pub const ENVIRONMENT: &str = "Environment";

const DEFAULT_LOG_DIR: &str = "/var/log/service_logs";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialised,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub service: String,
    pub log_dir: PathBuf,
    /// Production services only log warnings and above.
    pub production: bool,
}

impl LogSettings {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            production: false,
        }
    }

    pub fn from_env(service: impl Into<String>) -> Self {
        Self::from_lookup(service, |name| env::var(name).ok())
    }

    pub fn from_lookup<F>(service: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            log_dir: lookup(SERVICE_LOG_DIR)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            production: lookup(ENVIRONMENT).as_deref() == Some("Production"),
            ..Self::new(service)
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.service))
    }

    pub fn default_level(&self) -> LevelFilter {
        if self.production {
            LevelFilter::WARN
        } else {
            LevelFilter::INFO
        }
    }
}

/// Sends JSON logs to `<log_dir>/<service>.log` and returns a span tagged
/// with the service name. `RUST_LOG` overrides the default level.
pub fn init_logging(settings: &LogSettings) -> Result<Span, LoggingError> {
    let path = settings.log_path();
    let io_error = |source| LoggingError::Io {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(&settings.log_dir).map_err(io_error)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_error)?;

    subscriber(settings, file)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialised)?;

    Ok(service_span(settings))
}

fn subscriber(settings: &LogSettings, file: File) -> impl Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::builder()
        .with_default_directive(settings.default_level().into())
        .from_env_lossy();

    tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_writer(Mutex::new(file)),
    )
}

/// Error level so that even a warn-only filter keeps the span, and with it the
/// `service` field on every line logged inside.
fn service_span(settings: &LogSettings) -> Span {
    tracing::error_span!("service", service = %settings.service)
}
