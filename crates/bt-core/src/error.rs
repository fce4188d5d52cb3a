//! Error types shared by the foundational types in this crate.
//!
//! This module defines the error types for `Date` and `Universe`
//! construction. Errors specific to the tree's update protocol (a
//! negative root value, an orphaned security, ...) belong to
//! `bt-engine::error::TreeError` instead, since they are about the
//! engine's domain, not about dates or panels.

use thiserror::Error;

/// A specialized Result type for `bt-core` operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by `bt-core`'s own types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The date string or components could not form a valid calendar date.
    #[error("Invalid date: {message}")]
    InvalidDate {
        /// Description of the date error.
        message: String,
    },

    /// The supplied price panel was malformed (non-increasing dates,
    /// ragged columns, an unknown date written to, etc).
    #[error("malformed universe: {reason}")]
    MalformedUniverse {
        /// Description of what was wrong with the panel.
        reason: String,
    },
}

impl EngineError {
    /// Creates an invalid date error.
    #[must_use]
    pub fn invalid_date(message: impl Into<String>) -> Self {
        Self::InvalidDate {
            message: message.into(),
        }
    }

    /// Creates a malformed universe error.
    #[must_use]
    pub fn malformed_universe(reason: impl Into<String>) -> Self {
        Self::MalformedUniverse {
            reason: reason.into(),
        }
    }
}
