//! Error types for the MSTP engine.
//!
//! Per-BPDU and per-timer errors are handled inside the bridge (logged and
//! counted) and only surface to callers for observability. The single fatal
//! variant is [`MstpError::Internal`], which halts the affected bridge.

use thiserror::Error;

use crate::types::GuardKind;

/// Result type alias for engine operations.
pub type MstpResult<T> = Result<T, MstpError>;

/// A malformed BPDU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("BPDU truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("unknown protocol identifier 0x{0:04x}")]
    BadProtocolId(u16),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("BPDU type 0x{kind:02x} not valid for version {version}")]
    BadBpduType { version: u8, kind: u8 },

    #[error("version 1 length must be 0, got {0}")]
    BadVersion1Length(u8),

    #[error("version 3 length {0} is not a valid MST length")]
    BadVersion3Length(u16),

    #[error("MSTI record carries invalid instance id {0}")]
    InvalidInstance(u16),

    #[error("MSTI record for instance {0} appears twice")]
    DuplicateInstance(u16),

    #[error("configuration name is not valid UTF-8")]
    InvalidConfigName,
}

/// Errors that can occur during engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MstpError {
    /// Malformed BPDU. Dropped and counted.
    #[error("malformed BPDU: {0}")]
    Decode(#[from] DecodeError),

    /// BPDU from another region; CIST information processed, MSTI records dropped.
    #[error("BPDU on port {port} is from a different region")]
    RegionMismatch {
        /// Receiving port number.
        port: u16,
    },

    /// A guard forced the port into its fail-safe sub-state.
    #[error("{kind} violation on port {port}")]
    GuardViolation {
        /// Port number.
        port: u16,
        /// The guard that fired.
        kind: GuardKind,
    },

    /// Configuration rejected because it contradicts itself or current state.
    #[error("configuration conflict: {message}")]
    ConfigurationConflict {
        /// Error message.
        message: String,
    },

    /// A parameter out of its allowed range.
    #[error("invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    #[error("port {0} not found")]
    PortNotFound(u16),

    #[error("instance {0} not found")]
    InstanceNotFound(u16),

    /// Corrupted engine state. Halts the bridge.
    #[error("internal fault: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl MstpError {
    /// Creates a configuration conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConfigurationConflict {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal fault.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the error halts the bridge.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the error was caused by a rejected configuration intent.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationConflict { .. }
                | Self::InvalidConfig { .. }
                | Self::PortNotFound(_)
                | Self::InstanceNotFound(_)
        )
    }
}
