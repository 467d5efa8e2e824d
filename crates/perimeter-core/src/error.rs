//! Unified error types for the perimeter core library.
//!
//! This module provides a unified error type [`PerimeterError`] that covers every
//! failure mode that can surface from the core. Each module also has its own
//! specific error type (`ConfigError`, `RuleValidationError`, `IdentityParseError`,
//! `EngineError`) for internal use.
//!
//! Rule evaluation itself never fails: degraded sensor data, missing location
//! fixes and dangling beacon references are all resolved to "not blocking"
//! inside the strategies. Errors only come from construction-time validation
//! and from the engine runtime's command channel.
//!
//! # Example
//!
//! ```rust
//! use perimeter_core::error::{PerimeterError, Result};
//! use std::path::PathBuf;
//!
//! fn load(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(PerimeterError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// The unified error type for all perimeter operations.
#[derive(Debug, Error)]
pub enum PerimeterError {
    // =========================================================================
    // BEACON ERRORS
    // =========================================================================
    /// A beacon identity string could not be parsed.
    #[error("Invalid beacon identity '{0}'. Expected 'UUID:major:minor'.")]
    InvalidBeaconIdentity(String),

    /// The beacon is not known to the registry.
    #[error("Beacon not registered: {0}")]
    BeaconNotRegistered(String),

    // =========================================================================
    // RULE ERRORS
    // =========================================================================
    /// A rule failed validation.
    #[error("Rule {rule_id} is invalid: {message}")]
    InvalidRule {
        /// Identifier of the offending rule.
        rule_id: String,
        /// What is wrong with it.
        message: String,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // ENGINE ERRORS
    // =========================================================================
    /// The engine runtime has shut down and no longer accepts commands.
    #[error("Engine runtime is stopped")]
    EngineStopped,

    /// The engine's event queue is full; the caller should retry.
    #[error("Engine event queue is full")]
    EngineQueueFull,

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for perimeter operations.
pub type Result<T> = std::result::Result<T, PerimeterError>;

impl PerimeterError {
    /// Returns `true` if this error is related to beacon identities or registration.
    #[inline]
    #[must_use]
    pub const fn is_beacon_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidBeaconIdentity(_) | Self::BeaconNotRegistered(_)
        )
    }

    /// Returns `true` if this error is related to rule validation.
    #[inline]
    #[must_use]
    pub const fn is_rule_error(&self) -> bool {
        matches!(self, Self::InvalidRule { .. })
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error comes from the engine runtime.
    #[inline]
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        matches!(self, Self::EngineStopped | Self::EngineQueueFull)
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if retrying later may succeed without user intervention.
    ///
    /// An unregistered beacon is expected while the sensor layer races the
    /// device list at startup.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::BeaconNotRegistered(_) | Self::EngineQueueFull)
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidBeaconIdentity(_) | Self::InvalidRule { .. } => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::BeaconNotRegistered(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - engine no longer running
            Self::EngineStopped | Self::EngineQueueFull => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBeaconIdentity(_) => "INVALID_BEACON_IDENTITY",
            Self::BeaconNotRegistered(_) => "BEACON_NOT_REGISTERED",
            Self::InvalidRule { .. } => "INVALID_RULE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::EngineStopped => "ENGINE_STOPPED",
            Self::EngineQueueFull => "ENGINE_QUEUE_FULL",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for PerimeterError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {source}", path.display()))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            ConfigError::NoConfigDirectory => {
                Self::PersistenceError("Cannot determine configuration directory".into())
            }
            ConfigError::ParseError(message) => Self::ConfigParseError(message),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::rules::RuleValidationError> for PerimeterError {
    fn from(err: crate::rules::RuleValidationError) -> Self {
        Self::InvalidRule {
            rule_id: err.rule_id.to_string(),
            message: err.message,
        }
    }
}

impl From<crate::beacon::IdentityParseError> for PerimeterError {
    fn from(err: crate::beacon::IdentityParseError) -> Self {
        Self::InvalidBeaconIdentity(err.input().to_string())
    }
}

impl From<crate::engine::EngineError> for PerimeterError {
    fn from(err: crate::engine::EngineError) -> Self {
        match err {
            crate::engine::EngineError::Stopped => Self::EngineStopped,
            crate::engine::EngineError::QueueFull => Self::EngineQueueFull,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_error_classification() {
        assert!(PerimeterError::InvalidBeaconIdentity("x".into()).is_beacon_error());
        assert!(PerimeterError::BeaconNotRegistered("x".into()).is_beacon_error());
        assert!(PerimeterError::InvalidRule {
            rule_id: "r".into(),
            message: "bad".into()
        }
        .is_rule_error());
        assert!(PerimeterError::ConfigNotFound(PathBuf::from("/x")).is_config_error());
        assert!(PerimeterError::ConfigValidationError("bad".into()).is_config_error());
        assert!(PerimeterError::EngineStopped.is_engine_error());
        assert!(PerimeterError::PersistenceError("disk".into()).is_io_error());

        assert!(!PerimeterError::EngineStopped.is_config_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(PerimeterError::BeaconNotRegistered("x".into()).is_recoverable());
        assert!(PerimeterError::EngineQueueFull.is_recoverable());
        assert!(!PerimeterError::EngineStopped.is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            PerimeterError::InvalidBeaconIdentity("x".into()).http_status_code(),
            400
        );
        assert_eq!(
            PerimeterError::BeaconNotRegistered("x".into()).http_status_code(),
            404
        );
        assert_eq!(
            PerimeterError::ConfigValidationError("x".into()).http_status_code(),
            422
        );
        assert_eq!(PerimeterError::EngineStopped.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(PerimeterError::EngineStopped.error_code(), "ENGINE_STOPPED");
        assert_eq!(
            PerimeterError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_io_error() {
        let err: PerimeterError = IoErr::new(ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, PerimeterError::IoError(_)));
        assert!(err.is_io_error());
    }

    #[test]
    fn test_from_config_validation_errors() {
        use crate::config::ConfigError;

        let err: PerimeterError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "proximity.near_threshold".into(),
                message: "must be negative".into(),
            },
            ConfigError::ValidationError {
                field: "engine.timezone".into(),
                message: "unknown timezone".into(),
            },
        ])
        .into();

        let message = err.to_string();
        assert!(message.contains("proximity.near_threshold"));
        assert!(message.contains("engine.timezone"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PerimeterError>();
        assert_sync::<PerimeterError>();
    }
}
