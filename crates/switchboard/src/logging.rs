//! Tracing setup driven by the `[logging]` configuration section
//!
//! The switchboard only emits `tracing` events. A host that has no subscriber
//! of its own can install one from the same configuration file it loads the
//! switchboard from:
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! `RUST_LOG`, when set, takes precedence over `level`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, SwitchboardError};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `[logging]` section of the switchboard configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive, e.g. `info` or `rvoip_switchboard=debug`
    pub level: String,

    pub format: LogFormat,

    /// Include source file and line in every event
    pub file_info: bool,

    /// Write through libtest's capturing writer instead of stdout
    #[serde(skip)]
    pub test_writer: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_info: false,
            test_writer: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_test_writer(mut self) -> Self {
        self.test_writer = true;
        self
    }

    /// Filter built from `RUST_LOG`, or from `level` when it is unset
    pub fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level)
            .map_err(|e| SwitchboardError::config(format!("invalid logging level '{}': {}", self.level, e)))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        // Bare levels are checked strictly so that typos such as "inf" fail
        let bare = !self.level.contains(['=', ',', '[']);
        if bare && LevelFilter::from_str(&self.level).is_err() {
            return Err(SwitchboardError::config(format!("invalid logging level '{}'", self.level)));
        }
        EnvFilter::try_new(&self.level)
            .map(|_| ())
            .map_err(|e| SwitchboardError::config(format!("invalid logging level '{}': {}", self.level, e)))
    }
}

/// Install a global `fmt` subscriber for `config`.
///
/// Returns `false` when the process already has a global subscriber, which
/// is left in place.
pub fn setup_logging(config: &LoggingConfig) -> Result<bool> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter()?)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = match (config.format, config.test_writer) {
        (LogFormat::Pretty, false) => builder.try_init(),
        (LogFormat::Pretty, true) => builder.with_test_writer().try_init(),
        (LogFormat::Json, false) => builder.json().try_init(),
        (LogFormat::Json, true) => builder.json().with_test_writer().try_init(),
    };
    if installed.is_err() {
        return Ok(false);
    }

    info!("Logging initialised for rvoip-switchboard v{}", env!("CARGO_PKG_VERSION"));
    Ok(true)
}
