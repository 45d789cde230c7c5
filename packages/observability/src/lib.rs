//! # Observability
//!
//! Logging setup shared by the storefront tracking binaries.
//!
//! Services call [`init_with_config`] once at startup and use the
//! `tracing` macros everywhere else. Output options:
//!
//! - compact human-readable lines on stdout (local development)
//! - JSON lines on stdout with Cloud Logging key names (`json: true`)
//! - an additional append-only JSONL file (`log_path`, see [`default_log_path`])
//! - a compact copy on stderr (`also_stderr`)
//!
//! `RUST_LOG` overrides `default_level` when set.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "event-forwarder".into(),
//!     json: true,
//!     ..Default::default()
//! })?;
//! tracing::info!("ready");
//! ```

mod file;
mod json_layer;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use file::{default_log_path, FileLogWriter};
pub use json_layer::{severity, JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Included in every JSON line as `service`.
    pub service_name: String,

    /// Default filter (e.g. "info", "event_forwarder=debug").
    pub default_level: String,

    /// Emit JSON lines on stdout instead of compact text.
    pub json: bool,

    /// Also append JSON lines to this file.
    pub log_path: Option<PathBuf>,

    /// Also emit compact lines on stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            json: false,
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with custom configuration.
///
/// Fails only if the log file cannot be opened. Calling it a second time in
/// one process leaves the first subscriber in place.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let file_layer = match &config.log_path {
        Some(path) => Some(JsonLayer::new(
            config.service_name.clone(),
            FileLogWriter::open(path)?,
        )),
        None => None,
    };

    let json_layer = config
        .json
        .then(|| JsonLayer::new(config.service_name.clone(), io::stdout));

    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
    });

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            json = config.json,
            log_path = ?config.log_path,
            "observability initialized"
        );
    }

    Ok(())
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};
