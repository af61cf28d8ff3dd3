//! Protocol constants shared across the palisade crates.

/// Target wall-clock duration of one block round.
pub const SECONDS_PER_BLOCK: u64 = 15;

/// Target block time in milliseconds.
pub const MILLISECONDS_PER_BLOCK: u64 = SECONDS_PER_BLOCK * 1000;

/// Hard cap on the serialized size of a block.
pub const MAX_BLOCK_SIZE: usize = 1_048_576; // 1 MiB

/// Hard cap on the serialized size of a single transaction.
pub const MAX_TRANSACTION_SIZE: usize = 102_400; // 100 KiB

/// Maximum number of transactions a proposal may reference.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 512;

/// Maximum cumulative system fee of the transactions in one block,
/// in the smallest fee unit.
pub const MAX_BLOCK_SYSTEM_FEE: i64 = 900_000_000_000;

/// Byte length of a protocol hash.
pub const HASH_SIZE: usize = 32;

/// Byte length of a compressed validator public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Byte length of a raw ECDSA signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Maximum number of validators an epoch may seat. Validator indices travel
/// as `u16` on the wire; block headers record the proposer in a single byte.
pub const MAX_VALIDATORS: usize = 255;
