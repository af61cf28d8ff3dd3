//! Blocks and block headers.

use crate::{hash256, Signature, Transaction, UInt256};
use palisade_config::{MAX_TRANSACTIONS_PER_BLOCK, MAX_VALIDATORS};
use palisade_io::{helper, BinaryWriter, IoResult, MemoryReader, Serializable, SerializableExt};

/// The deterministic header a round's primary commits the validator set to.
///
/// Every field is fixed once the prepare request is accepted, which is what
/// makes commit signatures from different validators comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Format version.
    pub version: u8,
    /// Hash of the previous block.
    pub prev_hash: UInt256,
    /// Merkle root over the ordered transaction hashes.
    pub merkle_root: UInt256,
    /// Proposal timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Proposer-chosen entropy.
    pub nonce: u64,
    /// Block height.
    pub index: u32,
    /// Validator index of the proposer whose slot produced this block.
    pub primary_index: u8,
}

impl BlockHeader {
    /// The header identity: double SHA-256 of the canonical encoding.
    pub fn hash(&self) -> UInt256 {
        hash256(&self.to_array())
    }
}

impl Serializable for BlockHeader {
    fn size(&self) -> usize {
        1 + 32 + 32 + 8 + 8 + 4 + 1
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.version)?;
        writer.write_serializable(&self.prev_hash)?;
        writer.write_serializable(&self.merkle_root)?;
        writer.write_u64(self.timestamp)?;
        writer.write_u64(self.nonce)?;
        writer.write_u32(self.index)?;
        writer.write_u8(self.primary_index)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            version: reader.read_u8()?,
            prev_hash: UInt256::deserialize(reader)?,
            merkle_root: UInt256::deserialize(reader)?,
            timestamp: reader.read_u64()?,
            nonce: reader.read_u64()?,
            index: reader.read_u32()?,
            primary_index: reader.read_u8()?,
        })
    }
}

/// One validator's commit signature inside a finalized block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSignature {
    /// Index of the signing validator in the epoch's validator set.
    pub validator_index: u16,
    /// Signature over the header hash.
    pub signature: Signature,
}

impl Serializable for BlockSignature {
    fn size(&self) -> usize {
        2 + self.signature.size()
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u16(self.validator_index)?;
        writer.write_serializable(&self.signature)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            validator_index: reader.read_u16()?,
            signature: Signature::deserialize(reader)?,
        })
    }
}

/// A finalized block: the header, the commit-quorum signatures in
/// validator-index order, and the transactions in proposal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The committed header.
    pub header: BlockHeader,
    /// Commit signatures, ascending by validator index.
    pub signatures: Vec<BlockSignature>,
    /// Transactions in the order the proposal listed them.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block identity (the header's hash).
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    /// Block height shorthand.
    pub fn index(&self) -> u32 {
        self.header.index
    }
}

impl Serializable for Block {
    fn size(&self) -> usize {
        self.header.size()
            + helper::list_size(&self.signatures)
            + helper::list_size(&self.transactions)
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_serializable(&self.header)?;
        writer.write_serializable_list(&self.signatures)?;
        writer.write_serializable_list(&self.transactions)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            header: BlockHeader::deserialize(reader)?,
            signatures: helper::deserialize_list(reader, MAX_VALIDATORS)?,
            transactions: helper::deserialize_list(reader, MAX_TRANSACTIONS_PER_BLOCK)?,
        })
    }
}
