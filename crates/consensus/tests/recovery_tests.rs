//! Crash-recovery, replay, and failure-path behavior.

mod common;

use common::{forge_payload, LoopbackTransport, Outbox, TestClock, TestLedger, TestMempool, TestNet};
use palisade_consensus::{
    ConsensusEvent, ConsensusService, PayloadBody, PayloadKind, PrepareRequest, RecoveryStore,
    Signer, SLOT_PRIORITY,
};
use parking_lot::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

const PRIORITY: u16 = 2;

/// Drives the net to the point where every validator has sent its commit but
/// none has seen another's: all commit deliveries are lost.
fn run_until_committed(net: &mut TestNet) {
    net.fire_timer(PRIORITY);
    net.pump_filtered(|_, _, payload| payload.kind() != PayloadKind::Commit);
    for node in &net.nodes {
        let status = node.service.status();
        assert!(status.commit_sent, "validator {} did not commit", node.index);
        assert!(!status.block_sent);
    }
}

#[tokio::test]
async fn restart_after_commit_rebroadcasts_the_same_signature() {
    let mut net = TestNet::new(4, 9);
    net.start_all();
    run_until_committed(&mut net);

    let original = net
        .node(0)
        .service
        .context()
        .my_commit()
        .cloned()
        .expect("commit missing before restart");

    // Crash and restart validator 0 on the same recovery store.
    net.restart_node(0);
    net.nodes[0].service.start().unwrap();

    let status = net.node(0).service.status();
    assert_eq!(status.height, 10);
    assert_eq!(status.view, 0);
    assert!(status.commit_sent, "restart must re-enter the commit-sent state");

    // The retransmitted commit is byte-identical to the original.
    let sent = net.node(0).outbox.messages.lock().clone();
    let rebroadcast = sent
        .iter()
        .find(|(_, p)| p.kind() == PayloadKind::Commit)
        .expect("restarted validator did not retransmit its commit");
    assert_eq!(rebroadcast.1, original);
    match (&rebroadcast.1.body, &original.body) {
        (PayloadBody::Commit(a), PayloadBody::Commit(b)) => {
            assert_eq!(a.signature, b.signature);
        }
        other => panic!("unexpected bodies {other:?}"),
    }
}

#[tokio::test]
async fn recovery_message_bootstraps_a_partitioned_validator() {
    let mut net = TestNet::new(4, 9);
    net.start_all();

    // Validator 3 is partitioned away; commits are lost so the round stays
    // open. Validators 0..2 reach the commit-sent state without it.
    net.fire_timer(PRIORITY);
    net.pump_filtered(|from, to, payload| {
        from != 3 && to != 3 && payload.kind() != PayloadKind::Commit
    });
    for index in [0u16, 1, PRIORITY] {
        assert!(net.node(index).service.status().commit_sent);
    }
    let fresh = net.node(3).service.status();
    assert!(!fresh.request_sent_or_received);

    // One recovery message from a caught-up validator replays the round.
    let bundle = net
        .node(0)
        .service
        .context()
        .make_recovery_message()
        .unwrap();
    net.deliver_to(3, bundle);

    let status = net.node(3).service.status();
    assert_eq!(status.view, 0);
    assert!(status.request_sent_or_received);
    assert!(status.prepare_response_counts[SLOT_PRIORITY as usize] >= 2);
    assert!(
        status.commit_sent,
        "replayed preparations must carry the fresh validator to commit"
    );
}

#[tokio::test]
async fn replaying_observed_payloads_changes_nothing() {
    let mut net = TestNet::new(4, 9);
    net.start_all();
    net.fire_timer(PRIORITY);
    net.pump();

    let snapshot = |net: &TestNet| {
        let status = net.node(0).service.status();
        (
            status.height,
            status.view,
            status.commit_sent,
            status.block_sent,
            status.prepare_response_counts,
            status.commit_count,
        )
    };
    let before = snapshot(&net);

    let replayed: Vec<_> = net.trace.iter().map(|(_, p)| p.clone()).collect();
    for payload in replayed {
        net.deliver_to(0, payload);
    }
    assert_eq!(snapshot(&net), before);
}

#[tokio::test]
async fn duplicate_prepare_request_produces_one_response() {
    let mut net = TestNet::new(4, 9);
    net.start_all();

    let request = forge_payload(
        &net.keypairs[PRIORITY as usize],
        10,
        PRIORITY,
        0,
        PayloadBody::PrepareRequest(PrepareRequest {
            slot: SLOT_PRIORITY,
            timestamp: 50_000,
            nonce: 5,
            transaction_hashes: vec![],
        }),
    );
    net.deliver_to(0, request.clone());
    net.deliver_to(0, request);

    let responses = net
        .node(0)
        .outbox
        .messages
        .lock()
        .iter()
        .filter(|(_, p)| p.kind() == PayloadKind::PrepareResponse)
        .count();
    assert_eq!(responses, 1);
}

#[tokio::test]
async fn ledger_rejection_asks_peers_for_recovery() {
    let mut net = TestNet::new(4, 9);
    net.start_all();
    *net.node(0).ledger.reject_submissions.lock() = Some("storage fault".into());

    net.fire_timer(PRIORITY);
    net.pump();

    // Everyone else finished; validator 0 could not submit and fell back to
    // asking the network for recovery.
    for index in [1u16, PRIORITY, 3] {
        assert!(net.node(index).service.status().block_sent);
    }
    let status = net.node(0).service.status();
    assert!(!status.block_sent);
    assert!(net
        .trace_of_kind(PayloadKind::RecoveryRequest)
        .iter()
        .any(|(from, _)| *from == 0));
}

/// A store whose writes always fail, for exercising the halt path.
struct BrokenStore;

impl RecoveryStore for BrokenStore {
    fn save(&mut self, _height: u32, _blob: &[u8]) -> palisade_consensus::Result<()> {
        Err(palisade_consensus::Error::Store("disk full".into()))
    }

    fn load(&mut self, _height: u32) -> palisade_consensus::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[tokio::test]
async fn persistence_failure_halts_before_any_message_leaves() {
    let net = TestNet::new(4, 9);
    let outbox = Arc::new(Outbox::default());
    let ledger = Arc::new(TestLedger::new(9));
    let mempool = TestMempool {
        pool: net.pool.clone(),
        requested: Arc::new(Mutex::new(Vec::new())),
    };
    let mut service = ConsensusService::new(
        common::test_config(),
        net.validators.clone(),
        Some(net.keypairs[0].clone() as Arc<dyn Signer>),
        Arc::new(LoopbackTransport(outbox.clone())),
        Arc::new(mempool),
        ledger,
        Arc::new(TestClock(Arc::new(AtomicU64::new(50_000)))),
        Box::new(BrokenStore),
    );
    service.start().unwrap();
    outbox.messages.lock().clear();

    // Receiving a valid prepare request forces a snapshot write, which fails:
    // the service halts without acknowledging.
    let request = forge_payload(
        &net.keypairs[PRIORITY as usize],
        10,
        PRIORITY,
        0,
        PayloadBody::PrepareRequest(PrepareRequest {
            slot: SLOT_PRIORITY,
            timestamp: 50_000,
            nonce: 5,
            transaction_hashes: vec![],
        }),
    );
    service.handle_event(ConsensusEvent::Payload(request));

    let status = service.status();
    assert!(status.halted);
    assert!(outbox.messages.lock().is_empty());

    // A halted service emits nothing further, whatever arrives.
    let (height, view) = (status.height, status.view);
    service.handle_event(ConsensusEvent::Timer { height, view });
    assert!(outbox.messages.lock().is_empty());
}
