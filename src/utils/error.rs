//! Error types for the siteaudit worker
//!
//! This module defines the domain error types used throughout the application.
//! Fetch failures never leave the fetch layer as errors during a review; they are
//! converted into error-shaped responses. The types below cover the remaining
//! failure modes.

use thiserror::Error;

use crate::models::ReviewStatus;

/// Errors that can occur while building or driving the HTTP transport
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,
}

/// Errors raised by the key-value transport behind the distributed lock
///
/// Contention is not an error: a lost race is reported as `Ok(false)`.
#[derive(Error, Debug)]
pub enum LockError {
    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Could not check out a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(String),
}

impl From<deadpool_redis::PoolError> for LockError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Errors raised by the event bus transport
#[derive(Error, Debug)]
pub enum BusError {
    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Could not check out a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Message could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<deadpool_redis::PoolError> for BusError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Configuration defects and internal invariant violations in the review pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    /// A fact or violation was emitted under a key nobody registered
    #[error("Unregistered {kind} key: {key}")]
    UnregisteredKey { kind: &'static str, key: String },

    /// Two plugins declared the same definition key
    #[error("Duplicate {kind} definition: {key}")]
    DuplicateDefinition { kind: &'static str, key: String },

    /// A configured plugin name has no constructor
    #[error("Unknown {kind}: {name}")]
    UnknownPlugin { kind: &'static str, name: String },

    /// Review status machine was asked for an impossible move
    #[error("Illegal review transition: {from:?} -> {to:?}")]
    IllegalTransition { from: ReviewStatus, to: ReviewStatus },
}

/// Errors raised by review stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Backend rejected the write
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
