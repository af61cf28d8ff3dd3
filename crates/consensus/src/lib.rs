//! Byzantine-fault-tolerant block production for palisade.
//!
//! This crate drives a fixed validator set through successive rounds that each
//! commit exactly one block, tolerating up to `f = (n - 1) / 3` Byzantine
//! participants. Within a single view two validators may propose: a priority
//! primary and a fallback that starts later. A slow primary thus delays a round
//! without forcing a view change. Validators that crash or fall behind catch
//! up through the recovery protocol and a crash-safe round log.
//!
//! ## Components
//!
//! - **Messages**: the six signed payload kinds and their canonical wire form
//! - **Context**: per-round state (proposal slots, tallies, flags)
//! - **Timer**: the single cancellable tick source
//! - **Recovery**: bundle assembly and verified replay for lagging peers
//! - **Store**: the recovery log that makes rounds survive restarts
//! - **Service**: the event-driven state machine tying it all together
//! - **External**: the thin trait seams to transport, mempool, ledger, wallet

pub mod config;
pub mod context;
pub mod external;
pub mod messages;
pub mod recovery;
pub mod service;
pub mod store;
pub mod timer;
pub mod validators;

pub use config::ConsensusConfig;
pub use context::{ConsensusContext, ProposalSlot};
pub use external::{
    Clock, ConsensusHandle, LedgerAccess, MempoolAccess, Signer, SystemClock, Transport, TxVerdict,
};
pub use messages::{
    ChangeView, ChangeViewReason, Commit, ConsensusPayload, PayloadBody, PayloadKind,
    PrepareRequest, PrepareResponse, RecoveryMessage, RecoveryRequest, PAYLOAD_CATEGORY,
};
pub use service::{ConsensusEvent, ConsensusService, ConsensusStatus};
pub use store::{FileRecoveryStore, MemoryRecoveryStore, RecoveryStore};
pub use timer::ConsensusTimer;
pub use validators::{Role, ValidatorSet, SLOT_FALLBACK, SLOT_PRIORITY};

use thiserror::Error;

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Consensus-specific error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A payload violated the wire format or a field domain.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An envelope signature did not verify against the claimed validator.
    #[error("bad signature from validator {0}")]
    BadSignature(u16),

    /// The local node is not seated in the current validator set.
    #[error("node is not a validator in the current epoch")]
    NotAValidator,

    /// An operation needs round state that is not present yet.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The validator set cannot seat a functioning quorum.
    #[error("invalid validator set: {0}")]
    InvalidValidatorSet(String),

    /// The recovery log could not be read or written.
    #[error("recovery store error: {0}")]
    Store(String),

    /// A condition the protocol cannot recover from; the service halts.
    #[error("irrecoverable: {0}")]
    Irrecoverable(String),

    /// Canonical encoding or decoding failed.
    #[error("serialization error: {0}")]
    Io(#[from] palisade_io::IoError),

    /// A core primitive operation failed.
    #[error("core error: {0}")]
    Core(#[from] palisade_core::CoreError),
}
