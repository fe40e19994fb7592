//! Crate-level error for worker jobs
//!
//! A job touches the lock, the pipeline, the store and the bus. Each layer
//! keeps its own error type in [`crate::utils::error`]; [`Error`] wraps them
//! so the runner can decide per failure whether the URL is worth handing out
//! again.
//!
//! ```rust,ignore
//! use siteaudit::error::{AuditErrorTrait, Error};
//!
//! fn report(url: &str, err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(url, category = %err.category(), "Requeue: {err}");
//!     } else {
//!         tracing::error!(url, "Giving up: {err}");
//!     }
//! }
//! ```

use std::fmt;
use thiserror::Error;

pub use crate::utils::error::{BusError, FetchError, LockError, ReviewError, StoreError};

/// Classification shared by every job error
pub trait AuditErrorTrait: std::error::Error {
    /// Whether retrying the same URL later can succeed
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Which layer a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP client construction or transport
    Network,
    /// Lock and pub/sub transports
    Coordination,
    /// Plugin registry and pipeline defects
    Review,
    /// Review persistence
    Storage,
}

impl ErrorCategory {
    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Coordination => "coordination",
            Self::Review => "review",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure of a worker job
#[derive(Error, Debug)]
pub enum Error {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Review error: {0}")]
    Review(#[from] ReviewError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AuditErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(_) | Self::Lock(_) | Self::Bus(_) => true,
            // Plugin defects repeat on every attempt.
            Self::Review(_) => false,
            Self::Store(StoreError::Unavailable(_)) => true,
            Self::Store(StoreError::Serialize(_)) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Lock(_) | Self::Bus(_) => ErrorCategory::Coordination,
            Self::Review(_) => ErrorCategory::Review,
            Self::Store(_) => ErrorCategory::Storage,
        }
    }
}

/// Result type alias using the crate-level [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
