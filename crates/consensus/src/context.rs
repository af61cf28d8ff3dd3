//! Per-round consensus state.
//!
//! A [`ConsensusContext`] tracks one `(height, view)` round: the two proposal
//! slots, the prepare/commit/change-view tallies, and the flags the service
//! branches on. The service owns the context exclusively; nothing here is
//! shared or locked.

use crate::config::ConsensusConfig;
use crate::external::Signer;
use crate::messages::{
    ChangeView, ChangeViewReason, Commit, ConsensusPayload, PayloadBody, PrepareRequest,
    PrepareResponse, RecoveryRequest,
};
use crate::validators::{Role, ValidatorSet};
use crate::{Error, Result};
use palisade_core::{merkle_root, Block, BlockHeader, BlockSignature, Transaction, UInt256};
use palisade_io::{BinaryWriter, MemoryReader, Serializable};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Version byte of the persisted round snapshot.
const SNAPSHOT_VERSION: u8 = 1;

/// Running batch-verification state of one proposal slot: conflict
/// accumulators and the cumulative resource totals of admitted transactions.
#[derive(Debug, Default, Clone)]
pub struct VerificationState {
    installed: HashSet<UInt256>,
    declared_conflicts: HashSet<UInt256>,
    total_system_fee: i64,
    total_size: usize,
}

impl VerificationState {
    /// Checks a candidate against what is already admitted. Returns the
    /// change-view reason the violation maps to.
    fn check(&self, tx: &Transaction, config: &ConsensusConfig) -> std::result::Result<(), ChangeViewReason> {
        let hash = tx.hash();
        if self.declared_conflicts.contains(&hash) {
            return Err(ChangeViewReason::TxInvalid);
        }
        if tx.conflicts.iter().any(|c| self.installed.contains(c)) {
            return Err(ChangeViewReason::TxInvalid);
        }
        if self.total_system_fee.saturating_add(tx.system_fee) > config.max_block_system_fee {
            return Err(ChangeViewReason::TxRejectedByPolicy);
        }
        if self.total_size + tx.size() > config.max_block_size {
            return Err(ChangeViewReason::TxRejectedByPolicy);
        }
        Ok(())
    }

    fn admit(&mut self, tx: &Transaction) {
        self.installed.insert(tx.hash());
        for conflict in &tx.conflicts {
            self.declared_conflicts.insert(*conflict);
        }
        self.total_system_fee = self.total_system_fee.saturating_add(tx.system_fee);
        self.total_size += tx.size();
    }

    fn clear(&mut self) {
        self.installed.clear();
        self.declared_conflicts.clear();
        self.total_system_fee = 0;
        self.total_size = 0;
    }
}

/// State of one proposal track within the round.
#[derive(Debug, Default)]
pub struct ProposalSlot {
    /// The prepare-request payload, once observed or authored.
    pub prepare_request: Option<ConsensusPayload>,
    /// Ordered transaction hashes the request committed to.
    pub transaction_hashes: Vec<UInt256>,
    /// Transactions resolved so far.
    pub transactions: HashMap<UInt256, Transaction>,
    /// Batch-verification accumulators.
    pub verification: VerificationState,
    header: Option<BlockHeader>,
}

impl ProposalSlot {
    fn clear(&mut self) {
        self.prepare_request = None;
        self.transaction_hashes.clear();
        self.transactions.clear();
        self.verification.clear();
        self.header = None;
    }

    /// Whether the request is present and every referenced transaction
    /// has been resolved.
    pub fn is_complete(&self) -> bool {
        self.prepare_request.is_some()
            && self.transactions.len() == self.transaction_hashes.len()
    }

    /// Whether `hash` is referenced by this slot and still unresolved.
    pub fn wants(&self, hash: &UInt256) -> bool {
        self.prepare_request.is_some()
            && self.transaction_hashes.contains(hash)
            && !self.transactions.contains_key(hash)
    }

    fn request_body(&self) -> Option<&PrepareRequest> {
        match self.prepare_request.as_ref().map(|p| &p.body) {
            Some(PayloadBody::PrepareRequest(body)) => Some(body),
            _ => None,
        }
    }
}

/// The state of one consensus round, owned by the service.
pub struct ConsensusContext {
    config: ConsensusConfig,
    validators: ValidatorSet,
    signer: Option<Arc<dyn Signer>>,
    my_index: Option<u16>,

    /// Height this round is producing.
    pub height: u32,
    /// Current view number; 0 at a fresh height.
    pub view: u8,
    /// Hash of the previous block.
    pub prev_hash: UInt256,
    /// Timestamp of the previous block, in milliseconds.
    pub prev_timestamp: u64,

    slots: [ProposalSlot; 2],
    prepare_responses: [HashMap<u16, ConsensusPayload>; 2],
    commits: HashMap<u16, ConsensusPayload>,
    change_views: HashMap<u16, ConsensusPayload>,
    last_seen_height: HashMap<u16, u32>,

    block_sent: bool,
}

impl ConsensusContext {
    /// Creates a context for the given epoch. The signer, when present and
    /// seated in the set, determines `my_index`; otherwise the node observes
    /// as watch-only.
    pub fn new(
        config: ConsensusConfig,
        validators: ValidatorSet,
        signer: Option<Arc<dyn Signer>>,
    ) -> Self {
        let my_index = signer
            .as_ref()
            .and_then(|s| validators.index_of(s.public_key()));
        Self {
            config,
            validators,
            signer,
            my_index,
            height: 0,
            view: 0,
            prev_hash: UInt256::zero(),
            prev_timestamp: 0,
            slots: [ProposalSlot::default(), ProposalSlot::default()],
            prepare_responses: [HashMap::new(), HashMap::new()],
            commits: HashMap::new(),
            change_views: HashMap::new(),
            last_seen_height: HashMap::new(),
            block_sent: false,
        }
    }

    /// Enters a new height. Round state resets fully; the liveness tracker
    /// assumes every validator alive as of the previous height.
    pub fn begin_height(&mut self, height: u32, prev_hash: UInt256, prev_timestamp: u64) {
        self.height = height;
        self.prev_hash = prev_hash;
        self.prev_timestamp = prev_timestamp;
        for index in 0..self.validators.len() as u16 {
            let seen = self.last_seen_height.entry(index).or_insert(0);
            *seen = (*seen).max(height.saturating_sub(1));
        }
        self.reset(0);
    }

    /// Rebuilds slot state for `(height, new_view)`. A reset to view 0 clears
    /// everything; a view change retains commits (they are never rescinded
    /// within a height) and the change-view evidence that got us here.
    pub fn reset(&mut self, new_view: u8) {
        if new_view == 0 {
            self.commits.clear();
            self.change_views.clear();
            self.block_sent = false;
        }
        for slot in &mut self.slots {
            slot.clear();
        }
        self.prepare_responses = [HashMap::new(), HashMap::new()];
        self.view = new_view;
    }

    // --- identity and role ---------------------------------------------------

    /// The validator set of the current epoch.
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Our index in the set, or `None` when watch-only.
    pub fn my_index(&self) -> Option<u16> {
        self.my_index
    }

    /// Our role in the current `(height, view)`.
    pub fn role(&self) -> Role {
        self.validators.role_of(self.my_index, self.height, self.view)
    }

    /// Quorum size `M = n - f`.
    pub fn m(&self) -> usize {
        self.validators.m()
    }

    /// Byzantine tolerance `f`.
    pub fn f(&self) -> usize {
        self.validators.f()
    }

    /// Primary of the given proposal slot at the current `(height, view)`.
    pub fn primary_for_slot(&self, slot: u8) -> u16 {
        self.validators.primary_for_slot(self.height, self.view, slot)
    }

    // --- flags ---------------------------------------------------------------

    /// Whether any proposal has been sent or received this view.
    pub fn request_sent_or_received(&self) -> bool {
        self.slots.iter().any(|s| s.prepare_request.is_some())
    }

    /// Whether we responded to the request on `slot`.
    pub fn response_sent(&self, slot: u8) -> bool {
        self.my_index
            .map(|me| self.prepare_responses[slot as usize].contains_key(&me))
            .unwrap_or(false)
    }

    /// Whether our commit for this height is out. Survives view changes.
    pub fn commit_sent(&self) -> bool {
        self.my_index
            .map(|me| self.commits.contains_key(&me))
            .unwrap_or(false)
    }

    /// Whether the assembled block went to the ledger. Terminal for the round.
    pub fn block_sent(&self) -> bool {
        self.block_sent
    }

    pub(crate) fn mark_block_sent(&mut self) {
        self.block_sent = true;
    }

    /// Whether we have asked to leave the current view.
    pub fn view_changing(&self) -> bool {
        let Some(me) = self.my_index else {
            return false;
        };
        self.change_views
            .get(&me)
            .and_then(|p| match &p.body {
                PayloadBody::ChangeView(cv) => Some(cv.new_view > self.view),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// While changing view, proposals are not accepted, unless so many
    /// validators have committed or gone silent that the view change can no
    /// longer complete.
    pub fn not_accepting_payloads_due_to_view_changing(&self) -> bool {
        self.view_changing() && !self.more_than_f_committed_or_lost()
    }

    // --- counters ------------------------------------------------------------

    /// Validators whose commit for this height we hold.
    pub fn count_committed(&self) -> usize {
        self.commits.len()
    }

    /// Validators not heard from since before the previous block.
    pub fn count_failed(&self) -> usize {
        (0..self.validators.len() as u16)
            .filter(|i| {
                self.last_seen_height.get(i).copied().unwrap_or(0) + 1 < self.height
            })
            .count()
    }

    /// When more than `f` validators have committed or gone silent, the
    /// remainder cannot assemble a change-view quorum; recovery is the only
    /// way forward.
    pub fn more_than_f_committed_or_lost(&self) -> bool {
        self.count_committed() + self.count_failed() > self.f()
    }

    /// Records that `validator` was heard from at `height`.
    pub fn note_seen(&mut self, validator: u16, height: u32) {
        let seen = self.last_seen_height.entry(validator).or_insert(0);
        *seen = (*seen).max(height);
    }

    // --- tally access --------------------------------------------------------

    /// Read access to a proposal slot.
    pub fn slot(&self, slot: u8) -> &ProposalSlot {
        &self.slots[slot as usize]
    }

    /// Hash of the stored prepare-request payload on `slot`, if any.
    pub fn slot_request_hash(&self, slot: u8) -> Option<UInt256> {
        self.slots[slot as usize]
            .prepare_request
            .as_ref()
            .map(|p| p.hash())
    }

    /// Number of prepare responses collected for `slot`.
    pub fn prepare_response_count(&self, slot: u8) -> usize {
        self.prepare_responses[slot as usize].len()
    }

    /// Number of commits collected (any slot, any view of this height).
    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    /// Our own commit payload, if one was ever produced at this height.
    pub fn my_commit(&self) -> Option<&ConsensusPayload> {
        self.my_index.and_then(|me| self.commits.get(&me))
    }

    /// Whether we hold a commit from `validator` at this height.
    pub fn has_commit_from(&self, validator: u16) -> bool {
        self.commits.contains_key(&validator)
    }

    /// Validators asking for a view at least `new_view`, our own vote
    /// included.
    pub fn change_view_quorum(&self, new_view: u8) -> usize {
        self.change_views
            .values()
            .filter(|p| match &p.body {
                PayloadBody::ChangeView(cv) => cv.new_view >= new_view,
                _ => false,
            })
            .count()
    }

    /// Whether any slot is still waiting for `hash`.
    pub fn any_slot_wants(&self, hash: &UInt256) -> bool {
        self.slots.iter().any(|s| s.wants(hash))
    }

    // --- tally mutation ------------------------------------------------------

    /// Installs an observed prepare request into its slot. The caller has
    /// already validated origin, view, timestamp, and the hash list.
    pub fn store_prepare_request(&mut self, payload: ConsensusPayload) -> Result<()> {
        let body = match &payload.body {
            PayloadBody::PrepareRequest(body) => body.clone(),
            _ => return Err(Error::InvalidState("payload is not a prepare request".into())),
        };
        let slot = &mut self.slots[body.slot as usize];
        if slot.prepare_request.is_some() {
            return Err(Error::InvalidState("slot already holds a request".into()));
        }
        slot.transaction_hashes = body.transaction_hashes;
        slot.transactions.clear();
        slot.verification.clear();
        slot.header = None;
        slot.prepare_request = Some(payload);
        Ok(())
    }

    /// Records a prepare response. Returns false on duplicates.
    pub fn store_prepare_response(&mut self, payload: ConsensusPayload) -> bool {
        let slot = match &payload.body {
            PayloadBody::PrepareResponse(body) => body.slot,
            _ => return false,
        };
        let tally = &mut self.prepare_responses[slot as usize];
        if tally.contains_key(&payload.validator_index) {
            return false;
        }
        tally.insert(payload.validator_index, payload);
        true
    }

    /// Records a commit. First write wins; a commit is never replaced or
    /// rescinded within a height.
    pub fn store_commit(&mut self, payload: ConsensusPayload) -> bool {
        if self.commits.contains_key(&payload.validator_index) {
            return false;
        }
        self.commits.insert(payload.validator_index, payload);
        true
    }

    /// Records a change-view vote, keeping only the highest target per
    /// validator. Returns false when the stored vote already supersedes it.
    pub fn store_change_view(&mut self, payload: ConsensusPayload) -> bool {
        let new_view = match &payload.body {
            PayloadBody::ChangeView(cv) => cv.new_view,
            _ => return false,
        };
        let existing = self.change_views.get(&payload.validator_index).and_then(|p| {
            match &p.body {
                PayloadBody::ChangeView(cv) => Some(cv.new_view),
                _ => None,
            }
        });
        if existing.map(|v| v >= new_view).unwrap_or(false) {
            return false;
        }
        self.change_views.insert(payload.validator_index, payload);
        true
    }

    // --- transaction admission ----------------------------------------------

    /// Checks `tx` against a slot's accumulated verification state.
    pub fn verification_check(
        &self,
        slot: u8,
        tx: &Transaction,
    ) -> std::result::Result<(), ChangeViewReason> {
        self.slots[slot as usize].verification.check(tx, &self.config)
    }

    /// Admits a resolved transaction into a slot.
    pub fn install_transaction(&mut self, slot: u8, tx: Transaction) {
        let slot = &mut self.slots[slot as usize];
        slot.verification.admit(&tx);
        slot.transactions.insert(tx.hash(), tx);
    }

    // --- payload construction ------------------------------------------------

    fn signer(&self) -> Result<(&dyn Signer, u16)> {
        let signer = self.signer.as_deref().ok_or(Error::NotAValidator)?;
        let index = self.my_index.ok_or(Error::NotAValidator)?;
        Ok((signer, index))
    }

    pub(crate) fn make_signed(&self, body: PayloadBody) -> Result<ConsensusPayload> {
        let (signer, index) = self.signer()?;
        Ok(ConsensusPayload::signed(
            self.height,
            index,
            self.view,
            body,
            signer,
        ))
    }

    /// Builds, signs, and installs our prepare request for `slot`. The
    /// candidate list is taken in order and trimmed to the configured count,
    /// size, and fee budgets. Idempotent: a request already installed is
    /// returned as-is.
    pub fn make_prepare_request(
        &mut self,
        slot: u8,
        candidates: Vec<Transaction>,
        timestamp: u64,
    ) -> Result<ConsensusPayload> {
        if self.role().proposal_slot() != Some(slot) {
            return Err(Error::InvalidState(format!(
                "role {} may not propose on slot {slot}",
                self.role()
            )));
        }
        if let Some(existing) = &self.slots[slot as usize].prepare_request {
            return Ok(existing.clone());
        }

        let mut verification = VerificationState::default();
        let mut selected = Vec::new();
        for tx in candidates {
            if selected.len() == self.config.max_tx_per_block {
                break;
            }
            if verification.check(&tx, &self.config).is_err() {
                break;
            }
            verification.admit(&tx);
            selected.push(tx);
        }

        let timestamp = timestamp.max(self.prev_timestamp + 1);
        let body = PrepareRequest {
            slot,
            timestamp,
            nonce: rand::random(),
            transaction_hashes: selected.iter().map(Transaction::hash).collect(),
        };
        let payload = self.make_signed(PayloadBody::PrepareRequest(body.clone()))?;

        let slot_state = &mut self.slots[slot as usize];
        slot_state.transaction_hashes = body.transaction_hashes;
        slot_state.transactions = selected.into_iter().map(|tx| (tx.hash(), tx)).collect();
        slot_state.verification = verification;
        slot_state.header = None;
        slot_state.prepare_request = Some(payload.clone());
        Ok(payload)
    }

    /// Builds, signs, and records our response to the request on `slot`.
    pub fn make_prepare_response(&mut self, slot: u8) -> Result<ConsensusPayload> {
        let (_, me) = self.signer()?;
        if let Some(existing) = self.prepare_responses[slot as usize].get(&me) {
            return Ok(existing.clone());
        }
        let preparation_hash = self
            .slot_request_hash(slot)
            .ok_or_else(|| Error::InvalidState("no prepare request to acknowledge".into()))?;
        let payload = self.make_signed(PayloadBody::PrepareResponse(PrepareResponse {
            slot,
            preparation_hash,
        }))?;
        self.prepare_responses[slot as usize].insert(me, payload.clone());
        Ok(payload)
    }

    /// Builds, signs, and records our commit for `slot`. A commit already
    /// produced at this height (any slot, any view) is returned unchanged;
    /// a node never signs a second header per height.
    pub fn make_commit(&mut self, slot: u8) -> Result<ConsensusPayload> {
        let (_, me) = self.signer()?;
        if let Some(existing) = self.commits.get(&me) {
            return Ok(existing.clone());
        }
        let header = self
            .ensure_header(slot)
            .ok_or_else(|| Error::InvalidState("slot has no complete header".into()))?;
        let signature = {
            let (signer, _) = self.signer()?;
            signer.sign(header.hash().as_bytes())
        };
        let payload = self.make_signed(PayloadBody::Commit(Commit { slot, signature }))?;
        self.commits.insert(me, payload.clone());
        Ok(payload)
    }

    /// Builds, signs, and records our vote to move to `view + 1`.
    pub fn make_change_view(
        &mut self,
        reason: ChangeViewReason,
        timestamp: u64,
    ) -> Result<ConsensusPayload> {
        let payload = self.make_signed(PayloadBody::ChangeView(ChangeView {
            reason,
            new_view: self.view + 1,
            timestamp,
        }))?;
        self.store_change_view(payload.clone());
        Ok(payload)
    }

    /// Builds and signs a plea for peers to replay the round.
    pub fn make_recovery_request(&self, timestamp: u64) -> Result<ConsensusPayload> {
        self.make_signed(PayloadBody::RecoveryRequest(RecoveryRequest { timestamp }))
    }

    /// Bundles everything observed this round into a recovery message.
    pub fn make_recovery_message(&self) -> Result<ConsensusPayload> {
        crate::recovery::assemble(self)
    }

    // --- observed-payload access (recovery bundle sources) -------------------

    /// The change-view payloads collected this round, unordered.
    pub fn observed_change_views(&self) -> Vec<ConsensusPayload> {
        self.change_views.values().cloned().collect()
    }

    /// The prepare requests observed this view, at most one per slot.
    pub fn observed_prepare_requests(&self) -> Vec<ConsensusPayload> {
        self.slots
            .iter()
            .filter_map(|s| s.prepare_request.clone())
            .collect()
    }

    /// The prepare responses collected this view, both slots, unordered.
    pub fn observed_prepare_responses(&self) -> Vec<ConsensusPayload> {
        self.prepare_responses
            .iter()
            .flat_map(|tally| tally.values().cloned())
            .collect()
    }

    /// The commits collected this height, unordered.
    pub fn observed_commits(&self) -> Vec<ConsensusPayload> {
        self.commits.values().cloned().collect()
    }

    // --- header and block assembly -------------------------------------------

    /// Builds (and caches) the deterministic block header of `slot`. Returns
    /// `None` while the slot's prepare request is missing.
    pub fn ensure_header(&mut self, slot: u8) -> Option<BlockHeader> {
        let primary_index = self.primary_for_slot(slot) as u8;
        let prev_hash = self.prev_hash;
        let height = self.height;
        let slot_state = &mut self.slots[slot as usize];
        if let Some(header) = &slot_state.header {
            return Some(header.clone());
        }
        let body = slot_state.request_body()?.clone();
        let header = BlockHeader {
            version: 0,
            prev_hash,
            merkle_root: merkle_root(&body.transaction_hashes),
            timestamp: body.timestamp,
            nonce: body.nonce,
            index: height,
            primary_index,
        };
        slot_state.header = Some(header.clone());
        Some(header)
    }

    /// Assembles the finalized block for `slot` once at least `M` commits
    /// agree on its exact header hash. Agreement is checked by verifying each
    /// commit signature against the header: a commit produced in an earlier
    /// view still counts if it covers the same header, and a commit on a
    /// divergent header can never count.
    pub fn create_block(&mut self, slot: u8) -> Option<Block> {
        let header = self.ensure_header(slot)?;
        if !self.slots[slot as usize].is_complete() {
            return None;
        }
        let header_hash = header.hash();

        let mut signatures: Vec<BlockSignature> = self
            .commits
            .iter()
            .filter_map(|(&index, payload)| {
                let commit = match &payload.body {
                    PayloadBody::Commit(c) if c.slot == slot => c,
                    _ => return None,
                };
                let key = self.validators.get(index)?;
                if !key.verify(header_hash.as_bytes(), &commit.signature) {
                    debug!(validator = index, "commit signature does not cover this header");
                    return None;
                }
                Some(BlockSignature {
                    validator_index: index,
                    signature: commit.signature,
                })
            })
            .collect();

        if signatures.len() < self.m() {
            return None;
        }
        signatures.sort_by_key(|s| s.validator_index);

        let slot_state = &self.slots[slot as usize];
        let transactions = slot_state
            .transaction_hashes
            .iter()
            .map(|h| slot_state.transactions.get(h).cloned())
            .collect::<Option<Vec<_>>>()?;

        Some(Block {
            header,
            signatures,
            transactions,
        })
    }

    // --- persistence ---------------------------------------------------------

    /// Encodes the round state into the versioned snapshot blob.
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        let write = (|| -> palisade_io::IoResult<()> {
            let w = &mut writer;
            w.write_u8(SNAPSHOT_VERSION)?;
            w.write_u32(self.height)?;
            w.write_u8(self.view)?;
            w.write_serializable(&self.prev_hash)?;
            w.write_u64(self.prev_timestamp)?;
            w.write_bool(self.block_sent)?;

            for slot in &self.slots {
                match &slot.prepare_request {
                    Some(payload) => {
                        w.write_bool(true)?;
                        w.write_serializable(payload)?;
                    }
                    None => w.write_bool(false)?,
                }
                w.write_serializable_list(&slot.transaction_hashes)?;
                let resolved: Vec<Transaction> = slot
                    .transaction_hashes
                    .iter()
                    .filter_map(|h| slot.transactions.get(h).cloned())
                    .collect();
                w.write_serializable_list(&resolved)?;
            }

            for tally in &self.prepare_responses {
                let mut payloads: Vec<_> = tally.values().cloned().collect();
                payloads.sort_by_key(|p| p.validator_index);
                w.write_serializable_list(&payloads)?;
            }

            let mut commits: Vec<_> = self.commits.values().cloned().collect();
            commits.sort_by_key(|p| p.validator_index);
            w.write_serializable_list(&commits)?;

            let mut change_views: Vec<_> = self.change_views.values().cloned().collect();
            change_views.sort_by_key(|p| p.validator_index);
            w.write_serializable_list(&change_views)?;

            let mut seen: Vec<(u16, u32)> = self
                .last_seen_height
                .iter()
                .map(|(&i, &h)| (i, h))
                .collect();
            seen.sort_by_key(|(i, _)| *i);
            w.write_var_int(seen.len() as u64)?;
            for (index, height) in seen {
                w.write_u16(index)?;
                w.write_u32(height)?;
            }
            Ok(())
        })();
        write.unwrap_or_else(|_| unreachable!("in-memory serialization cannot fail"));
        writer.into_bytes()
    }

    /// Restores round state from a snapshot blob. Fails when the blob is for
    /// a different height or a format version this build does not know.
    pub fn restore_snapshot(&mut self, blob: &[u8]) -> Result<()> {
        let mut reader = MemoryReader::new(blob);
        let r = &mut reader;

        let version = r.read_u8()?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::InvalidState(format!(
                "unknown snapshot version {version}"
            )));
        }
        let height = r.read_u32()?;
        if height != self.height {
            return Err(Error::InvalidState(format!(
                "snapshot is for height {height}, current height is {}",
                self.height
            )));
        }
        let view = r.read_u8()?;
        let prev_hash = UInt256::deserialize(r)?;
        let prev_timestamp = r.read_u64()?;
        let block_sent = r.read_bool()?;

        let n = self.validators.len();
        let mut slots = [ProposalSlot::default(), ProposalSlot::default()];
        for slot in &mut slots {
            if r.read_bool()? {
                slot.prepare_request = Some(ConsensusPayload::deserialize(r)?);
            }
            slot.transaction_hashes = palisade_io::helper::deserialize_list(
                r,
                palisade_config::MAX_TRANSACTIONS_PER_BLOCK,
            )?;
            let resolved: Vec<Transaction> = palisade_io::helper::deserialize_list(
                r,
                palisade_config::MAX_TRANSACTIONS_PER_BLOCK,
            )?;
            for tx in resolved {
                slot.verification.admit(&tx);
                slot.transactions.insert(tx.hash(), tx);
            }
        }

        let mut prepare_responses = [HashMap::new(), HashMap::new()];
        for tally in &mut prepare_responses {
            let payloads: Vec<ConsensusPayload> =
                palisade_io::helper::deserialize_list(r, n)?;
            for payload in payloads {
                tally.insert(payload.validator_index, payload);
            }
        }

        let commits: Vec<ConsensusPayload> = palisade_io::helper::deserialize_list(r, n)?;
        let change_views: Vec<ConsensusPayload> = palisade_io::helper::deserialize_list(r, n)?;

        let seen_count = r.read_var_int(palisade_config::MAX_VALIDATORS as u64)? as usize;
        let mut last_seen_height = HashMap::new();
        for _ in 0..seen_count {
            let index = r.read_u16()?;
            let height = r.read_u32()?;
            last_seen_height.insert(index, height);
        }

        self.view = view;
        self.prev_hash = prev_hash;
        self.prev_timestamp = prev_timestamp;
        self.block_sent = block_sent;
        self.slots = slots;
        self.prepare_responses = prepare_responses;
        self.commits = commits
            .into_iter()
            .map(|p| (p.validator_index, p))
            .collect();
        self.change_views = change_views
            .into_iter()
            .map(|p| (p.validator_index, p))
            .collect();
        self.last_seen_height = last_seen_height;
        Ok(())
    }
}
