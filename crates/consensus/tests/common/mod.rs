#![allow(dead_code)] // not every test binary uses every helper

//! Shared harness for multi-validator integration tests.
//!
//! Builds a small in-process network: every node runs a real
//! `ConsensusService` wired to loopback test doubles, and tests drive the
//! machines deterministically by firing timer events and pumping captured
//! traffic between nodes.

use palisade_consensus::{
    Clock, ConsensusConfig, ConsensusEvent, ConsensusPayload, ConsensusService, LedgerAccess,
    MempoolAccess, MemoryRecoveryStore, PayloadKind, Signer, Transport, TxVerdict, ValidatorSet,
};
use palisade_core::{Block, KeyPair, Transaction, UInt256};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Block time used by every harness node, in milliseconds.
pub const TEST_BLOCK_MS: u64 = 1_000;

/// Harness-wide consensus configuration.
pub fn test_config() -> ConsensusConfig {
    ConsensusConfig {
        milliseconds_per_block: TEST_BLOCK_MS,
        ..Default::default()
    }
}

/// Captured outbound traffic of one node: `(direct_target, payload)`.
#[derive(Default)]
pub struct Outbox {
    pub messages: Mutex<Vec<(Option<u16>, ConsensusPayload)>>,
}

pub struct LoopbackTransport(pub Arc<Outbox>);

impl Transport for LoopbackTransport {
    fn broadcast(&self, payload: ConsensusPayload) {
        self.0.messages.lock().push((None, payload));
    }

    fn send_to(&self, validator_index: u16, payload: ConsensusPayload) {
        self.0.messages.lock().push((Some(validator_index), payload));
    }
}

/// Shared, settable test clock.
pub struct TestClock(pub Arc<AtomicU64>);

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mempool double shared by every node in the net.
pub struct TestMempool {
    pub pool: Arc<Mutex<Vec<Transaction>>>,
    pub requested: Arc<Mutex<Vec<UInt256>>>,
}

impl MempoolAccess for TestMempool {
    fn ordered_transactions(&self, limit: usize) -> Vec<Transaction> {
        let mut txs = self.pool.lock().clone();
        txs.sort_by(|a, b| {
            b.network_fee
                .cmp(&a.network_fee)
                .then_with(|| a.hash().cmp(&b.hash()))
        });
        txs.truncate(limit);
        txs
    }

    fn lookup(&self, hash: &UInt256) -> Option<Transaction> {
        self.pool.lock().iter().find(|tx| tx.hash() == *hash).cloned()
    }

    fn request_missing(&self, hashes: &[UInt256]) {
        self.requested.lock().extend_from_slice(hashes);
    }
}

/// Ledger double: fixed best block, programmable verdicts, captured
/// submissions.
pub struct TestLedger {
    pub height: u32,
    pub best_hash: UInt256,
    pub best_timestamp: u64,
    pub submitted: Mutex<Vec<Block>>,
    pub verdicts: Mutex<HashMap<UInt256, TxVerdict>>,
    pub reject_submissions: Mutex<Option<String>>,
}

impl TestLedger {
    pub fn new(height: u32) -> Self {
        Self {
            height,
            best_hash: UInt256::from_array([0xBB; 32]),
            best_timestamp: 1_000,
            submitted: Mutex::new(Vec::new()),
            verdicts: Mutex::new(HashMap::new()),
            reject_submissions: Mutex::new(None),
        }
    }
}

impl LedgerAccess for TestLedger {
    fn current_height(&self) -> u32 {
        self.height
    }

    fn current_hash(&self) -> UInt256 {
        self.best_hash
    }

    fn current_timestamp_ms(&self) -> u64 {
        self.best_timestamp
    }

    fn median_time_ms(&self) -> u64 {
        self.best_timestamp
    }

    fn verify_transaction(&self, tx: &Transaction) -> TxVerdict {
        self.verdicts
            .lock()
            .get(&tx.hash())
            .copied()
            .unwrap_or(TxVerdict::Ok)
    }

    fn submit_block(&self, block: Block) -> Result<(), String> {
        if let Some(reason) = self.reject_submissions.lock().clone() {
            return Err(reason);
        }
        self.submitted.lock().push(block);
        Ok(())
    }
}

pub struct TestNode {
    pub index: u16,
    pub keypair: Arc<KeyPair>,
    pub service: ConsensusService,
    pub outbox: Arc<Outbox>,
    pub ledger: Arc<TestLedger>,
    pub store: MemoryRecoveryStore,
}

pub struct TestNet {
    pub nodes: Vec<TestNode>,
    pub keypairs: Vec<Arc<KeyPair>>,
    pub validators: ValidatorSet,
    pub clock: Arc<AtomicU64>,
    pub pool: Arc<Mutex<Vec<Transaction>>>,
    pub ledger_height: u32,
    /// Every payload any node emitted, as `(origin, payload)`.
    pub trace: Vec<(u16, ConsensusPayload)>,
}

impl TestNet {
    /// Builds an `n`-validator net whose ledgers sit at `ledger_height`
    /// (so consensus produces `ledger_height + 1`).
    pub fn new(n: u8, ledger_height: u32) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let keypairs: Vec<Arc<KeyPair>> = (0..n)
            .map(|i| Arc::new(KeyPair::from_secret_bytes(&[i + 1; 32]).unwrap()))
            .collect();
        let validators =
            ValidatorSet::new(keypairs.iter().map(|k| k.public_key().clone()).collect())
                .unwrap();
        let clock = Arc::new(AtomicU64::new(50_000));
        let pool = Arc::new(Mutex::new(Vec::new()));

        let mut net = Self {
            nodes: Vec::new(),
            keypairs,
            validators,
            clock,
            pool,
            ledger_height,
            trace: Vec::new(),
        };
        for index in 0..n as u16 {
            let node = net.build_node(index, MemoryRecoveryStore::new());
            net.nodes.push(node);
        }
        net
    }

    fn build_node(&self, index: u16, store: MemoryRecoveryStore) -> TestNode {
        let keypair = self.keypairs[index as usize].clone();
        let outbox = Arc::new(Outbox::default());
        let ledger = Arc::new(TestLedger::new(self.ledger_height));
        let mempool = TestMempool {
            pool: self.pool.clone(),
            requested: Arc::new(Mutex::new(Vec::new())),
        };
        let service = ConsensusService::new(
            test_config(),
            self.validators.clone(),
            Some(keypair.clone() as Arc<dyn Signer>),
            Arc::new(LoopbackTransport(outbox.clone())),
            Arc::new(mempool),
            ledger.clone(),
            Arc::new(TestClock(self.clock.clone())),
            Box::new(store.clone()),
        );
        TestNode {
            index,
            keypair,
            service,
            outbox,
            ledger,
            store,
        }
    }

    /// Starts every node and discards the startup recovery chatter so tests
    /// observe only the traffic they cause.
    pub fn start_all(&mut self) {
        for node in &mut self.nodes {
            node.service.start().unwrap();
        }
        for node in &self.nodes {
            node.outbox.messages.lock().clear();
        }
    }

    pub fn node(&self, index: u16) -> &TestNode {
        &self.nodes[index as usize]
    }

    /// Fires the round timer of one node at its current `(height, view)`.
    pub fn fire_timer(&mut self, index: u16) {
        let node = &mut self.nodes[index as usize];
        let (height, view) = {
            let ctx = node.service.context();
            (ctx.height, ctx.view)
        };
        node.service
            .handle_event(ConsensusEvent::Timer { height, view });
    }

    /// Delivers a payload to a single node, as if it arrived off the wire.
    pub fn deliver_to(&mut self, to: u16, payload: ConsensusPayload) {
        self.nodes[to as usize]
            .service
            .handle_event(ConsensusEvent::Payload(payload));
    }

    /// Pumps captured traffic between nodes until the net goes quiet.
    pub fn pump(&mut self) {
        self.pump_filtered(|_, _, _| true);
    }

    /// Pumps traffic, delivering a payload from `from` to `to` only when the
    /// filter allows it. Emitted payloads enter the trace either way.
    pub fn pump_filtered<F>(&mut self, deliver: F)
    where
        F: Fn(u16, u16, &ConsensusPayload) -> bool,
    {
        loop {
            let mut batch: Vec<(u16, Option<u16>, ConsensusPayload)> = Vec::new();
            for node in &self.nodes {
                for (target, payload) in node.outbox.messages.lock().drain(..) {
                    batch.push((node.index, target, payload));
                }
            }
            if batch.is_empty() {
                break;
            }
            for (from, target, payload) in batch {
                self.trace.push((from, payload.clone()));
                match target {
                    Some(to) => {
                        if to != from && deliver(from, to, &payload) {
                            self.deliver_to(to, payload);
                        }
                    }
                    None => {
                        for to in 0..self.nodes.len() as u16 {
                            if to != from && deliver(from, to, &payload) {
                                self.deliver_to(to, payload.clone());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Replaces a node with a freshly constructed service sharing the same
    /// recovery store and ledger state, as after a crash and restart.
    pub fn restart_node(&mut self, index: u16) {
        let store = self.nodes[index as usize].store.clone();
        let node = self.build_node(index, store);
        self.nodes[index as usize] = node;
    }

    /// All traced payloads of one kind, with their origins.
    pub fn trace_of_kind(&self, kind: PayloadKind) -> Vec<(u16, &ConsensusPayload)> {
        self.trace
            .iter()
            .filter(|(_, p)| p.kind() == kind)
            .map(|(from, p)| (*from, p))
            .collect()
    }
}

/// A signed payload forged from an arbitrary keypair, for Byzantine-behavior
/// tests.
pub fn forge_payload(
    keypair: &KeyPair,
    height: u32,
    validator_index: u16,
    view: u8,
    body: palisade_consensus::PayloadBody,
) -> ConsensusPayload {
    ConsensusPayload::signed(height, validator_index, view, body, keypair)
}
