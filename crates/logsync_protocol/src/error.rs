//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a message to CBOR.
    #[error("encoding failed: {message}")]
    Encoding {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    Decoding {
        /// Description of the decoding error.
        message: String,
    },

    /// The CBOR is well formed but does not have the expected shape.
    #[error("invalid message structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// A numeric code does not map to a known variant.
    #[error("unknown {kind} code {code}")]
    UnknownCode {
        /// What the code was supposed to identify.
        kind: &'static str,
        /// The offending code.
        code: i128,
    },

    /// The same bucket appears twice in one message.
    #[error("bucket {bucket_id} appears more than once")]
    DuplicateBucket {
        /// The repeated bucket id.
        bucket_id: u64,
    },

    /// The same data family appears twice in one frame.
    #[error("data family {family} appears more than once in frame")]
    DuplicateSection {
        /// Name of the repeated family.
        family: &'static str,
    },
}

impl ProtocolError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::Decoding {
            message: message.into(),
        }
    }

    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
