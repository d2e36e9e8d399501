//! Error types shared by the enumeration and resource-management layers.
//!
//! Listing failures are categorized so retry decisions stay local to the
//! enumerator that hit them:
//! - Retryable: transient failures that may succeed on another attempt
//! - Fatal: permanent failures (permission denied, missing root)
//! - NoRetry: the attempt budget is already spent
//!
//! Conditions a caller has to tell apart (a stuck pipeline, a rejected
//! configuration) are concrete types so they survive a trip through
//! `eyre::Report` and can be recovered with `downcast_ref`.

use std::io;
use std::time::Duration;

/// Category of a listing error for retry decision-making.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - retry may succeed (timeout, connection reset, etc.)
    Retryable,
    /// Permanent error - retry will never succeed (permission denied, not found, etc.)
    Fatal,
    /// Retries were exhausted or are not meaningful for this failure.
    NoRetry,
}

/// A listing failure carried by an error entry.
#[derive(Debug, Clone)]
pub struct ListingError {
    /// The underlying error message.
    pub message: String,
    /// The location or item path that failed (if applicable).
    pub path: Option<String>,
    /// The error category for retry decisions.
    pub category: ErrorCategory,
    /// Number of attempts made before the failure surfaced.
    pub attempts: u8,
}

impl ListingError {
    pub fn fatal(message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            message: message.into(),
            path,
            category: ErrorCategory::Fatal,
            attempts: 0,
        }
    }

    /// Build a listing error from an io failure, classifying it on the way.
    pub fn from_io(err: &io::Error, path: Option<String>) -> Self {
        Self {
            message: err.to_string(),
            path,
            category: categorize_io_error(err),
            attempts: 0,
        }
    }

    /// Build a listing error from a collaborator failure. Backend errors are
    /// treated as transient unless they wrap an io error that says otherwise.
    pub fn from_report(err: &eyre::Report, path: Option<String>) -> Self {
        let category = err
            .downcast_ref::<io::Error>()
            .map(categorize_io_error)
            .unwrap_or(ErrorCategory::Retryable);
        Self {
            message: format!("{err:#}"),
            path,
            category,
            attempts: 0,
        }
    }

    /// Check if another attempt is allowed under `max_attempts`.
    pub fn should_retry(&self, max_attempts: u8) -> bool {
        self.category == ErrorCategory::Retryable && self.attempts < max_attempts
    }

    /// Record how many attempts were made before this failure.
    pub fn after_attempts(mut self, attempts: u8) -> Self {
        self.attempts = attempts;
        self
    }

    /// Mark the error as terminal once the attempt budget is spent.
    pub fn exhausted(mut self) -> Self {
        if self.category == ErrorCategory::Retryable {
            self.category = ErrorCategory::NoRetry;
        }
        self
    }
}

impl std::fmt::Display for ListingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref path) = self.path {
            write!(f, "{}: {}", path, self.message)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        if self.attempts > 1 {
            write!(f, " (after {} attempts)", self.attempts)?;
        }
        Ok(())
    }
}

impl std::error::Error for ListingError {}

/// Categorize an IO error for retry decisions.
pub fn categorize_io_error(err: &io::Error) -> ErrorCategory {
    match err.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::WouldBlock => ErrorCategory::Retryable,

        io::ErrorKind::PermissionDenied
        | io::ErrorKind::NotFound
        | io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput => ErrorCategory::Fatal,

        // Unknown errors - default to fatal so nothing loops forever
        _ => ErrorCategory::Fatal,
    }
}

/// Raised when enumeration has been paused longer than the configured stuck
/// timeout without the transfer side freeing any capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckTransferError {
    pub waited: Duration,
    pub outstanding: usize,
    pub limit: usize,
    pub buffers_in_use: usize,
    pub buffers_total: usize,
}

impl std::fmt::Display for StuckTransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "transfer appears stuck: {} outstanding tasks (limit {}) with no progress for {:?}; {}/{} buffers in use",
            self.outstanding, self.limit, self.waited, self.buffers_in_use, self.buffers_total
        )
    }
}

impl std::error::Error for StuckTransferError {}

/// Configuration rejected before any listing or work begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidSearchPattern { pattern: String, reason: String },
    InvalidCapacity(usize),
    InvalidBufferSize(usize),
    NameTooLong { name: String, max: usize },
    PathTooLong { path: String, max: usize },
    TokenKindMismatch { expected: &'static str, found: &'static str },
    InvalidStreamRange { offset: usize, length: usize, available: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidSearchPattern { pattern, reason } => {
                write!(f, "invalid search pattern '{pattern}': {reason}")
            }
            ConfigError::InvalidCapacity(capacity) => {
                write!(f, "capacity must be positive (got {capacity})")
            }
            ConfigError::InvalidBufferSize(size) => {
                write!(f, "buffer size must be positive (got {size})")
            }
            ConfigError::NameTooLong { name, max } => {
                write!(f, "name '{name}' exceeds the {max} character limit")
            }
            ConfigError::PathTooLong { path, max } => {
                write!(f, "path '{path}' exceeds the {max} character limit")
            }
            ConfigError::TokenKindMismatch { expected, found } => {
                write!(f, "continuation token for {found} cannot resume a {expected} location")
            }
            ConfigError::InvalidStreamRange {
                offset,
                length,
                available,
            } => write!(
                f,
                "stream range {offset}+{length} exceeds {available} bytes of buffer space"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
