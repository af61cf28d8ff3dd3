//! Seams to the collaborators the consensus core consumes.
//!
//! Transport, mempool, ledger, wallet, and clock run on their own threads.
//! They talk to the consensus service exclusively by posting events through a
//! [`ConsensusHandle`]; the service talks back through these traits. Every
//! trait method is synchronous and must not block: outbound work is queued by
//! the implementation, which is what keeps consensus handlers
//! run-to-completion.

use crate::messages::ConsensusPayload;
use crate::service::ConsensusEvent;
use palisade_core::{Block, KeyPair, PublicKey, Signature, Transaction, UInt256};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Signs consensus data with the local validator key.
pub trait Signer: Send + Sync {
    /// The public half of the signing key.
    fn public_key(&self) -> &PublicKey;

    /// Signs `data`, returning the raw 64-byte signature.
    fn sign(&self, data: &[u8]) -> Signature;
}

impl Signer for KeyPair {
    fn public_key(&self) -> &PublicKey {
        KeyPair::public_key(self)
    }

    fn sign(&self, data: &[u8]) -> Signature {
        KeyPair::sign(self, data)
    }
}

/// Outcome of verifying a transaction against the current ledger snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxVerdict {
    /// Valid and admissible.
    Ok,
    /// Structurally valid but rejected by local policy (fees, attributes).
    RejectedByPolicy,
    /// Invalid: bad signature, conflicts, or unexecutable.
    Invalid,
}

/// Outbound message path to the peer-to-peer layer.
pub trait Transport: Send + Sync {
    /// Queues a payload for delivery to every peer.
    fn broadcast(&self, payload: ConsensusPayload);

    /// Queues a payload for delivery to one validator.
    fn send_to(&self, validator_index: u16, payload: ConsensusPayload);
}

/// Read access to the shared transaction pool.
pub trait MempoolAccess: Send + Sync {
    /// Verified transactions under the pool's proposal ordering
    /// (fee-descending, then hash-ascending), at most `limit` of them.
    fn ordered_transactions(&self, limit: usize) -> Vec<Transaction>;

    /// Looks up a pooled transaction by hash.
    fn lookup(&self, hash: &UInt256) -> Option<Transaction>;

    /// Asks the network layer to fetch transactions the pool is missing.
    /// Once obtained they arrive as [`ConsensusEvent::Transaction`].
    fn request_missing(&self, hashes: &[UInt256]);
}

/// Read/submit access to the ledger.
pub trait LedgerAccess: Send + Sync {
    /// Height of the best persisted block.
    fn current_height(&self) -> u32;

    /// Hash of the best persisted block.
    fn current_hash(&self) -> UInt256;

    /// Timestamp of the best persisted block, in milliseconds.
    fn current_timestamp_ms(&self) -> u64;

    /// Median timestamp of recent blocks, in milliseconds. Proposal
    /// timestamps must exceed this.
    fn median_time_ms(&self) -> u64;

    /// Verifies a transaction against the current snapshot.
    fn verify_transaction(&self, tx: &Transaction) -> TxVerdict;

    /// Hands a fully signed block to the ledger for persistence. Completion
    /// is reported asynchronously via [`ConsensusEvent::PersistCompleted`].
    fn submit_block(&self, block: Block) -> std::result::Result<(), String>;
}

/// Wall-clock source, overridable for deterministic tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Event-posting adapter handed to collaborators. Cloneable and thread-safe;
/// posting never blocks. Events posted after the service stops are dropped.
#[derive(Debug, Clone)]
pub struct ConsensusHandle {
    events: mpsc::UnboundedSender<ConsensusEvent>,
}

impl ConsensusHandle {
    pub(crate) fn new(events: mpsc::UnboundedSender<ConsensusEvent>) -> Self {
        Self { events }
    }

    /// Delivers an inbound, signature-verified consensus payload.
    pub fn submit_payload(&self, payload: ConsensusPayload) {
        let _ = self.events.send(ConsensusEvent::Payload(payload));
    }

    /// Delivers a transaction that appeared in the pool.
    pub fn submit_transaction(&self, tx: Transaction) {
        let _ = self.events.send(ConsensusEvent::Transaction(tx));
    }

    /// Reports that the ledger finished persisting a block.
    pub fn block_persisted(&self, block: Block) {
        let _ = self.events.send(ConsensusEvent::PersistCompleted(block));
    }

    /// Reports a late verification verdict for a relayed transaction.
    pub fn relay_result(&self, hash: UInt256, verdict: TxVerdict) {
        let _ = self
            .events
            .send(ConsensusEvent::RelayResult { hash, verdict });
    }
}
