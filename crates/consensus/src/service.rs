//! The consensus service: an event-driven state machine over one queue.
//!
//! All consensus state lives in the [`ConsensusContext`] the service owns
//! exclusively. Events (inbound payloads, transactions, timer ticks,
//! persist notifications) are drained one at a time and every handler runs
//! to completion, which is what re-establishes the round invariants at each
//! handler boundary. Collaborators never share state with the service; they
//! post events through a [`ConsensusHandle`] and receive fire-and-forget
//! sends through the [`Transport`] trait.

use crate::config::ConsensusConfig;
use crate::context::ConsensusContext;
use crate::external::{
    Clock, ConsensusHandle, LedgerAccess, MempoolAccess, Signer, Transport, TxVerdict,
};
use crate::messages::{
    ChangeView, ChangeViewReason, Commit, ConsensusPayload, PayloadBody, PrepareRequest,
    PrepareResponse, RecoveryMessage,
};
use crate::recovery;
use crate::store::RecoveryStore;
use crate::timer::ConsensusTimer;
use crate::validators::{Role, ValidatorSet, SLOT_FALLBACK, SLOT_PRIORITY};
use crate::Result;
use palisade_core::{Block, Transaction, UInt256};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Events the service consumes, in the order they were posted.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// The armed timer fired for `(height, view)`.
    Timer {
        /// Height the tick was armed for.
        height: u32,
        /// View the tick was armed for.
        view: u8,
    },
    /// An inbound payload, envelope signature already verified by the
    /// transport layer.
    Payload(ConsensusPayload),
    /// A transaction appeared in the pool.
    Transaction(Transaction),
    /// The ledger finished persisting a block.
    PersistCompleted(Block),
    /// Late verification verdict for a relayed transaction.
    RelayResult {
        /// Hash of the verified transaction.
        hash: UInt256,
        /// The verdict.
        verdict: TxVerdict,
    },
}

/// Read-only snapshot of the machine for operators and tests.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusStatus {
    /// Height the round is producing.
    pub height: u32,
    /// Current view number.
    pub view: u8,
    /// Our role this round.
    pub role: Role,
    /// Whether any proposal has been sent or received.
    pub request_sent_or_received: bool,
    /// Whether we acknowledged a proposal this view.
    pub response_sent: bool,
    /// Whether our commit for this height is out.
    pub commit_sent: bool,
    /// Whether the assembled block went to the ledger.
    pub block_sent: bool,
    /// Whether we are asking to leave the current view.
    pub view_changing: bool,
    /// Prepare responses collected per proposal slot.
    pub prepare_response_counts: [usize; 2],
    /// Commits collected this height.
    pub commit_count: usize,
    /// Validators voting for at least the next view.
    pub change_view_votes: usize,
    /// Whether a recovery bundle is being replayed.
    pub is_recovering: bool,
    /// Whether the service hit an irrecoverable fault and stopped emitting.
    pub halted: bool,
}

/// The consensus state machine.
pub struct ConsensusService {
    config: ConsensusConfig,
    context: ConsensusContext,
    timer: ConsensusTimer,
    store: Box<dyn RecoveryStore>,
    transport: Arc<dyn Transport>,
    mempool: Arc<dyn MempoolAccess>,
    ledger: Arc<dyn LedgerAccess>,
    clock: Arc<dyn Clock>,
    events_tx: mpsc::UnboundedSender<ConsensusEvent>,
    events_rx: mpsc::UnboundedReceiver<ConsensusEvent>,
    known_hashes: HashSet<UInt256>,
    block_received_time: u64,
    is_recovering: bool,
    halted: bool,
}

impl ConsensusService {
    /// Creates a service for the given epoch. The signer, when seated in the
    /// validator set, makes this node an active participant; otherwise it
    /// observes as watch-only.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsensusConfig,
        validators: ValidatorSet,
        signer: Option<Arc<dyn Signer>>,
        transport: Arc<dyn Transport>,
        mempool: Arc<dyn MempoolAccess>,
        ledger: Arc<dyn LedgerAccess>,
        clock: Arc<dyn Clock>,
        store: Box<dyn RecoveryStore>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let context = ConsensusContext::new(config.clone(), validators, signer);
        let timer = ConsensusTimer::new(events_tx.clone());
        Self {
            config,
            context,
            timer,
            store,
            transport,
            mempool,
            ledger,
            clock,
            events_tx,
            events_rx,
            known_hashes: HashSet::new(),
            block_received_time: 0,
            is_recovering: false,
            halted: false,
        }
    }

    /// The event-posting handle collaborators use to reach this service.
    pub fn handle(&self) -> ConsensusHandle {
        ConsensusHandle::new(self.events_tx.clone())
    }

    /// Read access to the round context.
    pub fn context(&self) -> &ConsensusContext {
        &self.context
    }

    /// Snapshot of the machine.
    pub fn status(&self) -> ConsensusStatus {
        ConsensusStatus {
            height: self.context.height,
            view: self.context.view,
            role: self.context.role(),
            request_sent_or_received: self.context.request_sent_or_received(),
            response_sent: self.context.response_sent(SLOT_PRIORITY)
                || self.context.response_sent(SLOT_FALLBACK),
            commit_sent: self.context.commit_sent(),
            block_sent: self.context.block_sent(),
            view_changing: self.context.view_changing(),
            prepare_response_counts: [
                self.context.prepare_response_count(SLOT_PRIORITY),
                self.context.prepare_response_count(SLOT_FALLBACK),
            ],
            commit_count: self.context.commit_count(),
            change_view_votes: self
                .context
                .change_view_quorum(self.context.view.saturating_add(1)),
            is_recovering: self.is_recovering,
            halted: self.halted,
        }
    }

    /// Brings the machine up at the height after the ledger's best block,
    /// reloading the recovery log when one is present.
    pub fn start(&mut self) -> Result<()> {
        self.config.validate()?;

        let height = self.ledger.current_height() + 1;
        self.block_received_time = self.clock.now_ms();
        self.context.begin_height(
            height,
            self.ledger.current_hash(),
            self.ledger.current_timestamp_ms(),
        );

        let mut restored = false;
        if !self.config.ignore_recovery_logs {
            match self.store.load(height) {
                Ok(Some(blob)) => match self.context.restore_snapshot(&blob) {
                    Ok(()) => {
                        restored = true;
                        info!(
                            height,
                            view = self.context.view,
                            commit_sent = self.context.commit_sent(),
                            "restored round state from recovery log"
                        );
                    }
                    Err(e) => warn!(height, error = %e, "ignoring unusable recovery snapshot"),
                },
                Ok(None) => {}
                Err(e) => warn!(height, error = %e, "failed to read recovery log"),
            }
        }

        info!(
            height,
            validators = self.context.validators().len(),
            role = %self.context.role(),
            "consensus service started"
        );

        if restored && self.context.commit_sent() {
            // A committed node never regresses: re-enter the commit-sent
            // state, retransmit the original commit, and try to finish the
            // block immediately from what the log preserved.
            if let Some(commit) = self.context.my_commit().cloned() {
                info!(height, "re-entering commit-sent state after restart");
                self.broadcast(commit.clone());
                if let PayloadBody::Commit(body) = &commit.body {
                    self.check_commits(body.slot);
                }
            }
            self.timer.schedule(
                Duration::from_millis(self.config.milliseconds_per_block * 2),
                self.context.height,
                self.context.view,
            );
            return Ok(());
        }

        let view = self.context.view;
        self.initialize_consensus(view);
        if self.context.role() != Role::WatchOnly {
            match self.context.make_recovery_request(self.clock.now_ms()) {
                Ok(request) => self.broadcast(request),
                Err(e) => warn!(error = %e, "could not build startup recovery request"),
            }
        }
        Ok(())
    }

    /// Runs the event loop until the queue closes or the service halts.
    /// A halt is surfaced as [`crate::Error::Irrecoverable`] so the embedder
    /// can alert an operator.
    pub async fn run(mut self) -> Result<()> {
        self.start()?;
        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
            if self.halted {
                break;
            }
        }
        self.timer.cancel();
        if self.halted {
            return Err(crate::Error::Irrecoverable(
                "consensus halted after a round-state persistence failure".into(),
            ));
        }
        info!("consensus service stopped");
        Ok(())
    }

    /// Dispatches one event. Public so embedders and tests can drive the
    /// machine deterministically without the async loop.
    pub fn handle_event(&mut self, event: ConsensusEvent) {
        if self.halted {
            return;
        }
        match event {
            ConsensusEvent::Timer { height, view } => self.on_timer(height, view),
            ConsensusEvent::Payload(payload) => self.on_payload(payload),
            ConsensusEvent::Transaction(tx) => self.on_transaction(tx),
            ConsensusEvent::PersistCompleted(block) => self.on_persist_completed(block),
            ConsensusEvent::RelayResult { hash, verdict } => self.on_relay_result(hash, verdict),
        }
    }

    // --- round setup ---------------------------------------------------------

    fn scaled_delay(&self, exponent: u8) -> u64 {
        self.config
            .milliseconds_per_block
            .saturating_mul(1u64 << exponent.min(24))
    }

    fn initialize_consensus(&mut self, view: u8) {
        self.context.reset(view);
        let role = self.context.role();
        let height = self.context.height;
        info!(height, view, role = %role, "initializing consensus round");

        if role == Role::WatchOnly {
            self.timer.cancel();
            return;
        }

        let mut delay = match role {
            Role::PriorityPrimary | Role::FallbackPrimary => {
                let multiplier = if role == Role::PriorityPrimary {
                    1
                } else {
                    u64::from(self.config.fallback_timer_multiplier)
                };
                let base = if view == 0 {
                    self.config.milliseconds_per_block
                } else {
                    self.scaled_delay(view.saturating_add(1))
                };
                base.saturating_mul(multiplier)
            }
            Role::Backup => self.scaled_delay(view.saturating_add(1)),
            Role::WatchOnly => unreachable!("watch-only returned above"),
        };

        if self.is_recovering {
            // Replay is in flight; do not race it.
            delay = delay.saturating_mul(2);
        } else if view == 0 {
            // A fresh height starts counting from the moment the previous
            // block landed, not from service wake-up.
            let elapsed = self.clock.now_ms().saturating_sub(self.block_received_time);
            delay = delay.saturating_sub(elapsed);
        }

        self.timer
            .schedule(Duration::from_millis(delay), height, view);
    }

    // --- timer ---------------------------------------------------------------

    fn on_timer(&mut self, height: u32, view: u8) {
        if self.context.role() == Role::WatchOnly || self.context.block_sent() {
            return;
        }
        if height != self.context.height || view != self.context.view {
            debug!(height, view, "dropping stale timer tick");
            return;
        }
        debug!(height, view, role = %self.context.role(), "round timer fired");

        if let Some(slot) = self.context.role().proposal_slot() {
            if !self.context.request_sent_or_received() {
                self.send_prepare_request(slot);
                return;
            }
        }

        if self.context.commit_sent() {
            // Committed and waiting on the rest of the quorum: prod peers
            // with everything we hold, then keep waiting.
            match self.context.make_recovery_message() {
                Ok(message) => self.broadcast(message),
                Err(e) => warn!(error = %e, "could not build recovery message"),
            }
            self.timer.schedule(
                Duration::from_millis(self.config.milliseconds_per_block * 2),
                height,
                view,
            );
        } else {
            // A request whose transactions never arrived is a different
            // failure than silence.
            let waiting_on_txs = [SLOT_PRIORITY, SLOT_FALLBACK].iter().any(|&slot| {
                self.context.slot(slot).prepare_request.is_some()
                    && !self.context.slot(slot).is_complete()
            });
            let any_complete = [SLOT_PRIORITY, SLOT_FALLBACK]
                .iter()
                .any(|&slot| self.context.slot(slot).is_complete());
            let reason = if waiting_on_txs && !any_complete {
                ChangeViewReason::TxNotFound
            } else {
                ChangeViewReason::Timeout
            };
            self.request_change_view(reason);
        }
    }

    // --- proposal path -------------------------------------------------------

    fn send_prepare_request(&mut self, slot: u8) {
        let candidates = self.mempool.ordered_transactions(self.config.max_tx_per_block);
        let timestamp = self.clock.now_ms().max(self.ledger.median_time_ms() + 1);
        let payload = match self.context.make_prepare_request(slot, candidates, timestamp) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(slot, error = %e, "could not build prepare request");
                return;
            }
        };
        info!(
            height = self.context.height,
            view = self.context.view,
            slot,
            txs = self.context.slot(slot).transaction_hashes.len(),
            "prepare request sent"
        );
        if !self.persist() {
            return;
        }
        self.broadcast(payload);
        let view = self.context.view;
        self.timer.schedule(
            Duration::from_millis(self.scaled_delay(view.saturating_add(1))),
            self.context.height,
            view,
        );
        self.check_preparations(slot);
    }

    // --- payload dispatch ----------------------------------------------------

    fn on_payload(&mut self, payload: ConsensusPayload) {
        if self.context.block_sent() {
            return;
        }
        // Idempotence: replays are dropped on their payload hash.
        if !self.known_hashes.insert(payload.hash()) {
            return;
        }
        if usize::from(payload.validator_index) >= self.context.validators().len() {
            debug!(
                validator = payload.validator_index,
                "payload from out-of-range validator index"
            );
            return;
        }
        if payload.valid_height != self.context.height {
            debug!(
                payload_height = payload.valid_height,
                height = self.context.height,
                kind = %payload.kind(),
                "payload for a different height"
            );
            return;
        }
        self.context
            .note_seen(payload.validator_index, payload.valid_height);
        debug!(
            kind = %payload.kind(),
            validator = payload.validator_index,
            view = payload.view,
            "payload received"
        );

        match payload.body.clone() {
            PayloadBody::PrepareRequest(body) => self.on_prepare_request(payload, body),
            PayloadBody::PrepareResponse(body) => self.on_prepare_response(payload, body),
            PayloadBody::ChangeView(body) => self.on_change_view(payload, body),
            PayloadBody::Commit(body) => self.on_commit(payload, body),
            PayloadBody::RecoveryRequest(_) => self.on_recovery_request(payload),
            PayloadBody::RecoveryMessage(body) => self.on_recovery_message(payload, body),
        }
    }

    fn on_prepare_request(&mut self, payload: ConsensusPayload, body: PrepareRequest) {
        let slot = body.slot;
        if payload.view != self.context.view {
            debug!(view = payload.view, "prepare request for a different view");
            return;
        }
        if self.context.slot(slot).prepare_request.is_some() {
            return;
        }
        if self.context.not_accepting_payloads_due_to_view_changing() {
            return;
        }
        let expected = self.context.primary_for_slot(slot);
        if payload.validator_index != expected {
            warn!(
                validator = payload.validator_index,
                expected, slot, "prepare request from wrong origin"
            );
            return;
        }
        let now = self.clock.now_ms();
        if body.timestamp <= self.context.prev_timestamp
            || body.timestamp > now + self.config.milliseconds_per_block
        {
            warn!(
                timestamp = body.timestamp,
                "prepare request timestamp out of window"
            );
            return;
        }
        if body.transaction_hashes.len() > self.config.max_tx_per_block {
            warn!(
                txs = body.transaction_hashes.len(),
                "prepare request exceeds transaction limit"
            );
            return;
        }
        let mut unique = HashSet::new();
        if !body.transaction_hashes.iter().all(|h| unique.insert(*h)) {
            warn!("prepare request lists duplicate transactions");
            return;
        }

        info!(
            height = self.context.height,
            view = self.context.view,
            slot,
            validator = payload.validator_index,
            txs = body.transaction_hashes.len(),
            "prepare request received"
        );
        if let Err(e) = self.context.store_prepare_request(payload) {
            warn!(error = %e, "could not install prepare request");
            return;
        }
        if !self.persist() {
            return;
        }

        // Resolve referenced transactions from the pool; fetch the rest.
        let mut missing = Vec::new();
        for hash in &body.transaction_hashes {
            if !self.context.slot(slot).wants(hash) {
                continue;
            }
            match self.mempool.lookup(hash) {
                Some(tx) => {
                    if !self.add_transaction(tx, true) {
                        return;
                    }
                }
                None => missing.push(*hash),
            }
        }
        if !missing.is_empty() {
            debug!(count = missing.len(), "requesting missing transactions");
            self.mempool.request_missing(&missing);
        }
        self.check_prepare_response(slot);
    }

    fn on_prepare_response(&mut self, payload: ConsensusPayload, body: PrepareResponse) {
        let slot = body.slot;
        if payload.view != self.context.view {
            return;
        }
        if self.context.not_accepting_payloads_due_to_view_changing() {
            return;
        }
        match self.context.slot_request_hash(slot) {
            Some(hash) if hash == body.preparation_hash => {}
            Some(_) => {
                warn!(
                    validator = payload.validator_index,
                    slot, "prepare response references a different request"
                );
                return;
            }
            None => {
                debug!(slot, "prepare response before any request; dropped");
                return;
            }
        }
        if !self.context.store_prepare_response(payload) {
            return;
        }
        debug!(
            slot,
            count = self.context.prepare_response_count(slot),
            "prepare response recorded"
        );
        self.check_preparations(slot);
    }

    fn check_prepare_response(&mut self, slot: u8) {
        if !self.context.slot(slot).is_complete() {
            return;
        }
        let me = self.context.my_index();
        let authored = me == Some(self.context.primary_for_slot(slot));
        if me.is_some()
            && !authored
            && !self.context.response_sent(slot)
            && !self.context.commit_sent()
        {
            match self.context.make_prepare_response(slot) {
                Ok(response) => {
                    info!(
                        height = self.context.height,
                        view = self.context.view,
                        slot,
                        "prepare response sent"
                    );
                    if !self.persist() {
                        return;
                    }
                    self.broadcast(response);
                }
                Err(e) => warn!(slot, error = %e, "could not build prepare response"),
            }
        }
        self.check_preparations(slot);
    }

    fn check_preparations(&mut self, slot: u8) {
        if self.context.commit_sent() || self.context.block_sent() {
            return;
        }
        if self.context.my_index().is_none() {
            return;
        }
        if !self.context.slot(slot).is_complete() {
            return;
        }
        if self.context.prepare_response_count(slot) < self.context.m() - 1 {
            return;
        }
        self.send_commit(slot);
    }

    fn send_commit(&mut self, slot: u8) {
        let payload = match self.context.make_commit(slot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(slot, error = %e, "could not build commit");
                return;
            }
        };
        info!(
            height = self.context.height,
            view = self.context.view,
            slot,
            "commit sent"
        );
        if !self.persist() {
            return;
        }
        self.broadcast(payload);
        self.check_commits(slot);
    }

    fn on_commit(&mut self, payload: ConsensusPayload, body: Commit) {
        // Commits are tallied regardless of the view they were produced in;
        // agreement with a slot's header is checked at assembly time.
        let slot = body.slot;
        if !self.context.store_commit(payload) {
            return;
        }
        debug!(
            slot,
            count = self.context.commit_count(),
            "commit recorded"
        );
        self.check_commits(slot);
    }

    fn check_commits(&mut self, slot: u8) {
        let Some(block) = self.context.create_block(slot) else {
            return;
        };
        let hash = block.hash();
        info!(
            height = self.context.height,
            slot,
            block = %hash,
            txs = block.transactions.len(),
            signatures = block.signatures.len(),
            "commit quorum reached, submitting block"
        );
        match self.ledger.submit_block(block) {
            Ok(()) => {
                self.context.mark_block_sent();
                self.timer.cancel();
            }
            Err(reason) => {
                // The quorum signed this block; local rejection means a bug
                // on our side. Stop trusting local state and ask peers.
                error!(
                    height = self.context.height,
                    block = %hash,
                    %reason,
                    "ledger rejected the assembled block"
                );
                match self.context.make_recovery_request(self.clock.now_ms()) {
                    Ok(request) => self.broadcast(request),
                    Err(e) => warn!(error = %e, "could not build recovery request"),
                }
            }
        }
    }

    // --- view change ---------------------------------------------------------

    fn on_change_view(&mut self, payload: ConsensusPayload, body: ChangeView) {
        if body.new_view <= self.context.view {
            debug!(
                validator = payload.validator_index,
                new_view = body.new_view,
                "stale change view"
            );
            return;
        }
        if self.context.has_commit_from(payload.validator_index) {
            debug!(
                validator = payload.validator_index,
                "ignoring change view from a committed validator"
            );
            return;
        }
        if !self.context.store_change_view(payload.clone()) {
            return;
        }
        info!(
            height = self.context.height,
            view = self.context.view,
            validator = payload.validator_index,
            new_view = body.new_view,
            reason = %body.reason,
            "change view received"
        );

        // Once f + 1 peers demand a higher view, the current view cannot
        // produce a block anymore; join them instead of waiting out our own
        // timer.
        let next = self.context.view.saturating_add(1);
        if !self.context.view_changing()
            && self.context.role() != Role::WatchOnly
            && !self.context.commit_sent()
            && self.context.change_view_quorum(next) > self.context.f()
        {
            self.request_change_view(ChangeViewReason::ChangeAgreement);
        }
        self.check_expected_view(body.new_view);
    }

    fn check_expected_view(&mut self, new_view: u8) {
        if new_view <= self.context.view {
            return;
        }
        let votes = self.context.change_view_quorum(new_view);
        if votes >= self.context.m() {
            info!(
                height = self.context.height,
                from_view = self.context.view,
                new_view,
                votes,
                "view change quorum reached"
            );
            self.initialize_consensus(new_view);
        }
    }

    fn request_change_view(&mut self, reason: ChangeViewReason) {
        if self.context.role() == Role::WatchOnly
            || self.context.block_sent()
            || self.context.commit_sent()
        {
            return;
        }
        let expected = self.context.view.saturating_add(1);
        self.timer.schedule(
            Duration::from_millis(self.scaled_delay(expected.saturating_add(1))),
            self.context.height,
            self.context.view,
        );

        if self.context.more_than_f_committed_or_lost() {
            // Enough peers committed or vanished that a change-view quorum
            // can no longer assemble; only recovery can move us forward.
            info!(
                height = self.context.height,
                view = self.context.view,
                committed = self.context.count_committed(),
                failed = self.context.count_failed(),
                "requesting recovery instead of view change"
            );
            match self.context.make_recovery_request(self.clock.now_ms()) {
                Ok(request) => self.broadcast(request),
                Err(e) => warn!(error = %e, "could not build recovery request"),
            }
            return;
        }

        let payload = match self.context.make_change_view(reason, self.clock.now_ms()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "could not build change view");
                return;
            }
        };
        info!(
            height = self.context.height,
            view = self.context.view,
            new_view = expected,
            reason = %reason,
            "change view requested"
        );
        self.broadcast(payload);
        self.check_expected_view(expected);
    }

    // --- transactions --------------------------------------------------------

    fn on_transaction(&mut self, tx: Transaction) {
        if self.context.block_sent() {
            return;
        }
        if !self.context.any_slot_wants(&tx.hash()) {
            return;
        }
        self.add_transaction(tx, true);
    }

    /// Installs a resolved transaction into every slot waiting for it.
    /// Returns false when a verification failure aborted the round into a
    /// view change.
    fn add_transaction(&mut self, tx: Transaction, verify: bool) -> bool {
        let hash = tx.hash();
        let wanting: Vec<u8> = [SLOT_PRIORITY, SLOT_FALLBACK]
            .into_iter()
            .filter(|&slot| self.context.slot(slot).wants(&hash))
            .collect();
        if wanting.is_empty() {
            return true;
        }

        for &slot in &wanting {
            if let Err(reason) = self.context.verification_check(slot, &tx) {
                warn!(
                    tx = %hash,
                    slot,
                    reason = %reason,
                    "transaction failed batch verification"
                );
                self.request_change_view(reason);
                return false;
            }
        }

        if verify {
            match self.ledger.verify_transaction(&tx) {
                TxVerdict::Ok => {}
                TxVerdict::RejectedByPolicy => {
                    warn!(tx = %hash, "transaction rejected by policy");
                    self.request_change_view(ChangeViewReason::TxRejectedByPolicy);
                    return false;
                }
                TxVerdict::Invalid => {
                    warn!(tx = %hash, "transaction failed verification");
                    self.request_change_view(ChangeViewReason::TxInvalid);
                    return false;
                }
            }
        }

        for &slot in &wanting {
            self.context.install_transaction(slot, tx.clone());
        }
        for &slot in &wanting {
            self.check_prepare_response(slot);
        }
        true
    }

    fn on_relay_result(&mut self, hash: UInt256, verdict: TxVerdict) {
        let reason = match verdict {
            TxVerdict::Ok => return,
            TxVerdict::RejectedByPolicy => ChangeViewReason::TxRejectedByPolicy,
            TxVerdict::Invalid => ChangeViewReason::TxInvalid,
        };
        if !self.context.any_slot_wants(&hash) {
            return;
        }
        warn!(tx = %hash, verdict = ?verdict, "relayed transaction failed late verification");
        self.request_change_view(reason);
    }

    // --- recovery ------------------------------------------------------------

    fn on_recovery_request(&mut self, payload: ConsensusPayload) {
        let Some(me) = self.context.my_index() else {
            return;
        };
        if !recovery::should_answer(
            self.context.validators(),
            me,
            payload.validator_index,
            self.context.commit_sent(),
        ) {
            return;
        }
        match self.context.make_recovery_message() {
            Ok(message) => {
                debug!(
                    to = payload.validator_index,
                    "answering recovery request"
                );
                self.send_to(payload.validator_index, message);
            }
            Err(e) => warn!(error = %e, "could not build recovery message"),
        }
    }

    fn on_recovery_message(&mut self, payload: ConsensusPayload, body: RecoveryMessage) {
        info!(
            height = self.context.height,
            from = payload.validator_index,
            "replaying recovery message"
        );
        self.is_recovering = true;
        let nested =
            recovery::verified_payloads(&body, self.context.height, self.context.validators());
        for item in nested {
            self.on_payload(item);
            if self.halted {
                return;
            }
        }
        self.is_recovering = false;
    }

    // --- height transitions --------------------------------------------------

    fn on_persist_completed(&mut self, block: Block) {
        info!(
            height = block.index(),
            block = %block.hash(),
            "block persisted, moving to next height"
        );
        self.known_hashes.clear();
        self.block_received_time = self.clock.now_ms();
        self.is_recovering = false;
        self.context.begin_height(
            block.index() + 1,
            block.hash(),
            block.header.timestamp,
        );
        self.initialize_consensus(0);
    }

    // --- plumbing ------------------------------------------------------------

    /// Writes the round snapshot. On failure the service halts before the
    /// message whose transition was being logged can be transmitted.
    fn persist(&mut self) -> bool {
        let blob = self.context.encode_snapshot();
        match self.store.save(self.context.height, &blob) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    height = self.context.height,
                    error = %e,
                    "failed to persist round state; halting consensus"
                );
                self.halted = true;
                self.timer.cancel();
                false
            }
        }
    }

    fn broadcast(&self, payload: ConsensusPayload) {
        if self.halted {
            return;
        }
        debug!(kind = %payload.kind(), "broadcasting payload");
        self.transport.broadcast(payload);
    }

    fn send_to(&self, validator_index: u16, payload: ConsensusPayload) {
        if self.halted {
            return;
        }
        self.transport.send_to(validator_index, payload);
    }
}

