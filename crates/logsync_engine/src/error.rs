//! Error types for the sync engine.

use logsync_protocol::{BucketId, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during log synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The record store is full and its overflow policy is `Reject`.
    #[error("record store capacity of {capacity} records exceeded")]
    CapacityExceeded {
        /// Configured capacity.
        capacity: usize,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A response referenced a bucket that is not in flight.
    ///
    /// Only reported to logs; applying a response never fails with it.
    #[error("stale response for bucket {bucket_id}")]
    StaleResponse {
        /// The unexpected bucket.
        bucket_id: BucketId,
    },

    /// A processor was bound while the current one has buckets in flight.
    #[error("cannot rebind processor while {in_flight} bucket(s) are in flight")]
    RebindWhileInFlight {
        /// Number of in-flight buckets.
        in_flight: usize,
    },

    /// The transport has no processor bound.
    #[error("no delivery processor bound to transport")]
    NotBound,

    /// A record id is not in the expected store partition.
    #[error("record {record_id} is not in the expected store partition")]
    UnknownRecord {
        /// The offending record id.
        record_id: u64,
    },

    /// Wire encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The channel failed to carry an exchange.
    #[error("channel error: {message}")]
    Channel {
        /// Error message.
        message: String,
        /// Whether another attempt may succeed.
        retryable: bool,
    },

    /// Endpoint status could not be read or written.
    #[error("status error: {0}")]
    Status(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Creates a retryable channel error.
    pub fn channel_retryable(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable channel error.
    pub fn channel_fatal(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Channel { retryable, .. } => *retryable,
            SyncError::Io(_) => true,
            _ => false,
        }
    }
}
