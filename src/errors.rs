//! Error handling with structured error types and codes
//! Provides detailed error information for callers and for the transport layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Additional error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Hypercube error types with proper categorization
#[derive(Debug)]
pub enum HypercubeError {
    /// Bad input shape or value. Never corrupts state.
    Validation { field: String, reason: String },

    /// Import data does not match the expected schema or version.
    Format(String),

    /// Reserved for lookups whose contract is "must exist".
    NotFound(String),

    /// File access during export/import.
    Io(String),

    /// JSON encoding or decoding failure outside of import validation.
    Serialization(String),
}

impl HypercubeError {
    /// Shorthand for a validation error on a named field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Format(_) => "FORMAT_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether correcting the input is enough to recover
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Format(_) | Self::NotFound(_))
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::Validation { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::Format(msg) => format!("Format error: {msg}"),
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::Io(msg) => format!("I/O error: {msg}"),
            Self::Serialization(msg) => format!("Serialization error: {msg}"),
        }
    }

    /// Convert to structured error response
    pub fn to_response(&self) -> ErrorResponse {
        let details = match self {
            Self::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
            details,
        }
    }
}

impl fmt::Display for HypercubeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for HypercubeError {}

impl From<std::io::Error> for HypercubeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HypercubeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Helper trait to convert validation errors
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| HypercubeError::Validation {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using HypercubeError
pub type Result<T> = std::result::Result<T, HypercubeError>;
