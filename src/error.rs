//! Structured error type shared by every layer below the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for library operations
pub type StudyResult<T> = Result<T, StudyError>;

/// Machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigError,
    ApiError,
    ValidationError,
    ParsingError,
    LibraryNotFound,
    DocumentationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::ApiError => "API_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ParsingError => "PARSING_ERROR",
            ErrorCode::LibraryNotFound => "LIBRARY_NOT_FOUND",
            ErrorCode::DocumentationError => "DOCUMENTATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carrying a code, a human message and optional structured context
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct StudyError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl StudyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParsingError, message)
    }

    pub fn library_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LibraryNotFound, message)
    }

    pub fn documentation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DocumentationError, message)
    }

    /// Attach structured context (the original cause, offending input, ...)
    pub fn with_details(mut self, details: impl Into<serde_json::Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}
