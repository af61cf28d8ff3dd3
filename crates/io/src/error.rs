//! Error types for serialization and deserialization.

use thiserror::Error;

/// Result type for IO operations.
pub type IoResult<T> = std::result::Result<T, IoError>;

/// Errors raised while encoding or decoding canonical binary data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// The reader ran out of bytes before the value was complete.
    #[error("unexpected end of stream at position {position}")]
    EndOfStream {
        /// Reader position when the shortage was detected.
        position: usize,
    },

    /// A length prefix or variable integer exceeded the caller's bound.
    #[error("value {value} exceeds the permitted maximum {max}")]
    ExceedsLimit {
        /// Decoded value.
        value: u64,
        /// Maximum the caller allowed.
        max: u64,
    },

    /// The bytes do not form a valid value of the expected type.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A field was outside the domain the format defines for it.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

impl IoError {
    /// Convenience constructor for [`IoError::InvalidData`].
    pub fn invalid_data(message: impl Into<String>) -> Self {
        IoError::InvalidData(message.into())
    }

    /// Convenience constructor for [`IoError::InvalidFormat`].
    pub fn invalid_format(message: impl Into<String>) -> Self {
        IoError::InvalidFormat(message.into())
    }
}
