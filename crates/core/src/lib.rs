//! Core primitives for the palisade blockchain.
//!
//! Hash identities, validator key material, transactions, and blocks: the
//! value types every other crate builds on. Nothing here owns I/O or state;
//! these are plain data with canonical encodings.

pub mod block;
pub mod hash;
pub mod keys;
pub mod transaction;
pub mod uint256;

pub use block::{Block, BlockHeader, BlockSignature};
pub use hash::{hash256, merkle_root, sha256};
pub use keys::{KeyPair, PublicKey, Signature};
pub use transaction::Transaction;
pub use uint256::UInt256;

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the core primitive types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A byte slice had the wrong length for the target type.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// Key material did not decode to a valid curve point or scalar.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A signature was structurally invalid (distinct from failing to verify).
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A hexadecimal string could not be parsed.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Canonical encoding or decoding failed.
    #[error("serialization error: {0}")]
    Io(#[from] palisade_io::IoError),
}
