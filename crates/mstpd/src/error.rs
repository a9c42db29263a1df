//! Error types for mstpd.

use sonic_mstp::MstpError;
use thiserror::Error;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, MstpdError>;

#[derive(Debug, Error)]
pub enum MstpdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Daemon configuration file could not be parsed or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A config-store entry carried a value that does not parse.
    #[error("Invalid field {field}='{value}' in {table}|{key}")]
    InvalidField {
        table: String,
        key: String,
        field: String,
        value: String,
    },

    #[error(transparent)]
    Engine(#[from] MstpError),

    /// The bridge worker stopped and no longer accepts commands.
    #[error("bridge worker is not running")]
    WorkerGone,
}

impl MstpdError {
    pub fn invalid_field(table: &str, key: &str, field: &str, value: &str) -> Self {
        Self::InvalidField {
            table: table.to_string(),
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
