//! Error types for the switchboard
//!
//! Most failures inside the switchboard are not errors in the `Result` sense:
//! a provider refusing a call is an ordinary attempt outcome and a late
//! selector response is logged and dropped. [`SwitchboardError`] covers the
//! remaining cases: bad configuration, remote transport failures reported by
//! the [`crate::remote`] traits, and requests made against a switchboard that
//! has already shut down.

use thiserror::Error;

/// Switchboard errors
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O errors (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A remote endpoint failed at the transport level
    #[error("Remote endpoint error: {0}")]
    Remote(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The switchboard event loop is no longer running
    #[error("Switchboard is shut down")]
    Shutdown,
}

impl SwitchboardError {
    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Remote error
    pub fn remote<S: Into<String>>(msg: S) -> Self {
        Self::Remote(msg.into())
    }

    /// Create a new NotFound error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Result type for switchboard operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;
