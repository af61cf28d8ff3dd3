//! Canonical binary serialization for the palisade blockchain.
//!
//! Every byte that crosses the wire or lands in stable storage goes through
//! this crate: a little-endian [`BinaryWriter`], a bounds-checked
//! [`MemoryReader`], and the [`Serializable`] trait that ties the two
//! together. Encodings are deterministic: the same value always produces the
//! same bytes.

pub mod binary_writer;
pub mod error;
pub mod memory_reader;
pub mod serializable;

pub use binary_writer::BinaryWriter;
pub use error::{IoError, IoResult};
pub use memory_reader::MemoryReader;
pub use serializable::{helper, Serializable, SerializableExt};
