//! Transactions as the consensus core sees them.

use crate::{hash256, UInt256};
use palisade_config::{MAX_TRANSACTIONS_PER_BLOCK, MAX_TRANSACTION_SIZE};
use palisade_io::{helper, BinaryWriter, IoResult, MemoryReader, Serializable, SerializableExt};

/// A transaction with the fields the consensus core inspects: fees for
/// proposal ordering and a declared-conflicts list honored during batch
/// verification. Execution semantics live elsewhere; the script is opaque
/// bytes here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Format version.
    pub version: u8,
    /// Sender-chosen entropy distinguishing otherwise equal transactions.
    pub nonce: u32,
    /// Execution cost, in the smallest fee unit.
    pub system_fee: i64,
    /// Priority fee, in the smallest fee unit.
    pub network_fee: i64,
    /// Last block height at which this transaction may be included.
    pub valid_until_block: u32,
    /// Hashes of transactions this one declares itself in conflict with;
    /// the two sides can never land in the same block.
    pub conflicts: Vec<UInt256>,
    /// Opaque execution script.
    pub script: Vec<u8>,
}

impl Transaction {
    /// Builds a transaction with the given entropy and fees and an empty
    /// conflict list.
    pub fn new(nonce: u32, system_fee: i64, network_fee: i64, script: Vec<u8>) -> Self {
        Self {
            version: 0,
            nonce,
            system_fee,
            network_fee,
            valid_until_block: u32::MAX,
            conflicts: Vec::new(),
            script,
        }
    }

    /// Adds declared conflicts, returning the transaction for chaining.
    pub fn with_conflicts(mut self, conflicts: Vec<UInt256>) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// The transaction identity: double SHA-256 of the canonical encoding.
    pub fn hash(&self) -> UInt256 {
        hash256(&self.to_array())
    }
}

impl Serializable for Transaction {
    fn size(&self) -> usize {
        1 + 4 + 8 + 8 + 4 + helper::list_size(&self.conflicts) + helper::var_bytes_size(&self.script)
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.version)?;
        writer.write_u32(self.nonce)?;
        writer.write_i64(self.system_fee)?;
        writer.write_i64(self.network_fee)?;
        writer.write_u32(self.valid_until_block)?;
        writer.write_serializable_list(&self.conflicts)?;
        writer.write_var_bytes(&self.script)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            version: reader.read_u8()?,
            nonce: reader.read_u32()?,
            system_fee: reader.read_i64()?,
            network_fee: reader.read_i64()?,
            valid_until_block: reader.read_u32()?,
            conflicts: helper::deserialize_list(reader, MAX_TRANSACTIONS_PER_BLOCK)?,
            script: reader.read_var_bytes(MAX_TRANSACTION_SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_every_field() {
        let base = Transaction::new(1, 100, 10, vec![0x51]);
        let mut other = base.clone();
        other.nonce = 2;
        assert_ne!(base.hash(), other.hash());

        let conflicted = base.clone().with_conflicts(vec![UInt256::from_array([3; 32])]);
        assert_ne!(base.hash(), conflicted.hash());
    }

    #[test]
    fn encoding_round_trip() {
        let tx = Transaction::new(7, 500, 25, vec![0x01, 0x02, 0x03])
            .with_conflicts(vec![UInt256::from_array([9; 32])]);
        let decoded = Transaction::from_array(&tx.to_array()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(tx.to_array().len(), tx.size());
    }

    #[test]
    fn oversized_script_is_rejected() {
        let mut writer = BinaryWriter::new();
        let tx = Transaction::new(1, 0, 0, vec![]);
        tx.serialize(&mut writer).unwrap();
        let mut bytes = writer.into_bytes();
        // Rewrite the script length prefix to something enormous.
        let prefix_at = bytes.len() - 1;
        bytes[prefix_at] = 0xFE;
        bytes.extend_from_slice(&(MAX_TRANSACTION_SIZE as u32 + 1).to_le_bytes());
        assert!(Transaction::from_array(&bytes).is_err());
    }
}
