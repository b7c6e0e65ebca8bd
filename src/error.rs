//! Error types and handling for Heliotrack
//!
//! This module defines the error types used throughout the crate,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Heliotrack operations
pub type Result<T> = std::result::Result<T, HeliotrackError>;

/// Main error type for Heliotrack
#[derive(Debug, Error)]
pub enum HeliotrackError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// SMU transport or instrument errors
    #[error("SMU driver error: {message}")]
    Driver { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HeliotrackError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HeliotrackError::Config {
            message: message.into(),
        }
    }

    /// Create a new SMU driver error
    pub fn driver<S: Into<String>>(message: S) -> Self {
        HeliotrackError::Driver {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HeliotrackError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HeliotrackError::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HeliotrackError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for HeliotrackError {
    fn from(err: std::io::Error) -> Self {
        HeliotrackError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HeliotrackError {
    fn from(err: serde_yaml::Error) -> Self {
        HeliotrackError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HeliotrackError {
    fn from(err: serde_json::Error) -> Self {
        HeliotrackError::Serialization {
            message: err.to_string(),
        }
    }
}
