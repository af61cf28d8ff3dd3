//! The trait tying writers and readers together.

use crate::{BinaryWriter, IoResult, MemoryReader};

/// Objects with a canonical binary form.
///
/// Implementations must be deterministic: `serialize` of equal values yields
/// identical bytes, and `deserialize(serialize(x)) == x`.
pub trait Serializable {
    /// Exact size of the encoded form in bytes.
    fn size(&self) -> usize;

    /// Writes the canonical encoding.
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()>;

    /// Reads a value back from its canonical encoding.
    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self>
    where
        Self: Sized;
}

/// Blanket conveniences over [`Serializable`].
pub trait SerializableExt: Serializable {
    /// Encodes the value into a fresh byte vector.
    fn to_array(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.size());
        self.serialize(&mut writer)
            .unwrap_or_else(|_| unreachable!("in-memory serialization cannot fail"));
        writer.into_bytes()
    }

    /// Decodes a value from a byte slice, requiring all bytes be consumed.
    fn from_array(data: &[u8]) -> IoResult<Self>
    where
        Self: Sized,
    {
        let mut reader = MemoryReader::new(data);
        let value = Self::deserialize(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(crate::IoError::invalid_format(format!(
                "{} trailing bytes after value",
                reader.remaining()
            )));
        }
        Ok(value)
    }
}

impl<T: Serializable> SerializableExt for T {}

/// Helpers for encoded-size computation and homogeneous collections.
pub mod helper {
    use super::Serializable;
    use crate::{BinaryWriter, IoResult, MemoryReader};

    /// Size of a compact var-int for `value`.
    pub fn var_int_size(value: u64) -> usize {
        match value {
            0..=0xFC => 1,
            0xFD..=0xFFFF => 3,
            0x1_0000..=0xFFFF_FFFF => 5,
            _ => 9,
        }
    }

    /// Size of a length-prefixed byte string.
    pub fn var_bytes_size(bytes: &[u8]) -> usize {
        var_int_size(bytes.len() as u64) + bytes.len()
    }

    /// Size of a count-prefixed list.
    pub fn list_size<T: Serializable>(items: &[T]) -> usize {
        var_int_size(items.len() as u64) + items.iter().map(Serializable::size).sum::<usize>()
    }

    /// Writes a count-prefixed list.
    pub fn serialize_list<T: Serializable>(items: &[T], writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_serializable_list(items)
    }

    /// Reads a count-prefixed list of at most `max` items.
    pub fn deserialize_list<T: Serializable>(
        reader: &mut MemoryReader,
        max: usize,
    ) -> IoResult<Vec<T>> {
        let count = reader.read_var_int(max as u64)? as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::deserialize(reader)?);
        }
        Ok(items)
    }
}
