//! End-to-end rounds over a four-validator net (f = 1, M = 3).
//!
//! Height 10 with four validators seats validator 2 as the priority primary
//! and validator 3 as the fallback.

mod common;

use common::{forge_payload, TestNet};
use palisade_consensus::{
    ChangeViewReason, PayloadBody, PayloadKind, PrepareRequest, Role, SLOT_FALLBACK, SLOT_PRIORITY,
};
use palisade_core::Transaction;
use std::collections::HashSet;

const PRIORITY: u16 = 2;
const FALLBACK: u16 = 3;

#[tokio::test]
async fn happy_path_commits_one_block() {
    let mut net = TestNet::new(4, 9);
    net.start_all();
    assert_eq!(net.node(PRIORITY).service.status().role, Role::PriorityPrimary);

    net.fire_timer(PRIORITY);
    net.pump();

    // Every validator emitted exactly one commit.
    let commits = net.trace_of_kind(PayloadKind::Commit);
    let origins: HashSet<u16> = commits.iter().map(|(from, _)| *from).collect();
    assert_eq!(commits.len(), 4);
    assert_eq!(origins.len(), 4);

    // Every ledger received the same block at height 10, proposed by the
    // priority primary, carrying a commit quorum in validator-index order.
    let mut block_hashes = HashSet::new();
    for node in &net.nodes {
        let status = node.service.status();
        assert!(status.block_sent, "validator {} did not finish", node.index);
        assert!(status.commit_sent);

        let submitted = node.ledger.submitted.lock();
        assert_eq!(submitted.len(), 1);
        let block = &submitted[0];
        assert_eq!(block.header.index, 10);
        assert_eq!(block.header.primary_index, PRIORITY as u8);
        assert!(block.signatures.len() >= 3);
        let indices: Vec<u16> = block.signatures.iter().map(|s| s.validator_index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
        block_hashes.insert(block.hash());
    }
    assert_eq!(block_hashes.len(), 1, "validators disagree on the block");
}

#[tokio::test]
async fn fallback_primary_rescues_a_silent_priority() {
    let mut net = TestNet::new(4, 9);
    net.start_all();
    assert_eq!(net.node(FALLBACK).service.status().role, Role::FallbackPrimary);

    // The priority primary never proposes; the fallback's longer timer fires.
    net.fire_timer(FALLBACK);
    net.pump();

    // No commit ever targeted the priority slot.
    for (_, commit) in net.trace_of_kind(PayloadKind::Commit) {
        match &commit.body {
            PayloadBody::Commit(body) => assert_eq!(body.slot, SLOT_FALLBACK),
            other => panic!("unexpected body {other:?}"),
        }
    }

    // The block landed and names the fallback as proposer.
    for node in &net.nodes {
        assert!(node.service.status().block_sent);
        let submitted = node.ledger.submitted.lock();
        assert_eq!(submitted[0].header.primary_index, FALLBACK as u8);
    }
}

#[tokio::test]
async fn timeouts_assemble_a_view_change_quorum() {
    let mut net = TestNet::new(4, 9);
    net.start_all();

    // Both primaries stay silent: nothing is proposed this view. The two
    // backups time out and vote to leave view 0; on seeing f + 1 demands the
    // fallback joins without waiting out its own timer, completing the
    // quorum of three.
    net.fire_timer(0);
    net.fire_timer(1);
    net.pump_filtered(|from, to, _| from != PRIORITY && to != PRIORITY);

    let change_views = net.trace_of_kind(PayloadKind::ChangeView);
    let origins: HashSet<u16> = change_views.iter().map(|(from, _)| *from).collect();
    assert_eq!(origins, HashSet::from([0, 1, FALLBACK]));
    let joined = change_views
        .iter()
        .find(|(from, _)| *from == FALLBACK)
        .unwrap();
    match &joined.1.body {
        PayloadBody::ChangeView(body) => {
            assert_eq!(body.reason, ChangeViewReason::ChangeAgreement);
        }
        other => panic!("unexpected body {other:?}"),
    }

    for index in [0, 1, FALLBACK] {
        let status = net.node(index).service.status();
        assert_eq!(status.view, 1, "validator {index} did not change view");
        assert!(!status.request_sent_or_received, "slot state was not reset");
        assert_eq!(status.commit_count, 0, "no commits were ever sent");
    }

    // The new view's priority primary is (height - view) mod n = 1.
    assert_eq!(net.node(1).service.status().role, Role::PriorityPrimary);
}

#[tokio::test]
async fn byzantine_double_prepare_never_commits() {
    let mut net = TestNet::new(4, 9);
    net.start_all();

    // The primary equivocates: two different proposals for slot 0, each
    // shown to a different backup, nothing to the third.
    let now = 50_000;
    let forge = |nonce: u64| {
        forge_payload(
            &net.keypairs[PRIORITY as usize],
            10,
            PRIORITY,
            0,
            PayloadBody::PrepareRequest(PrepareRequest {
                slot: SLOT_PRIORITY,
                timestamp: now,
                nonce,
                transaction_hashes: vec![],
            }),
        )
    };
    let first = forge(1);
    let second = forge(2);
    assert_ne!(first.hash(), second.hash());

    net.deliver_to(0, first);
    net.deliver_to(1, second);
    net.pump();

    // Each backup acknowledged the request it saw, but the responses
    // reference different request hashes, so no preparation quorum forms.
    assert!(net.trace_of_kind(PayloadKind::Commit).is_empty());
    for node in &net.nodes {
        assert!(!node.service.status().commit_sent);
    }

    // The deceived backups time out, and the fallback joins their view
    // change once f + 1 demands are on the table.
    net.fire_timer(0);
    net.fire_timer(1);
    net.pump_filtered(|from, to, _| from != PRIORITY && to != PRIORITY);

    assert!(net.trace_of_kind(PayloadKind::Commit).is_empty());
    for index in [0, 1, FALLBACK] {
        assert_eq!(net.node(index).service.status().view, 1);
    }
}

#[tokio::test]
async fn conflicting_transactions_trigger_a_view_change() {
    let mut net = TestNet::new(4, 9);
    net.start_all();

    let tx_x = Transaction::new(1, 10, 5, vec![0x51]);
    let tx_y = Transaction::new(2, 10, 5, vec![0x52]).with_conflicts(vec![tx_x.hash()]);
    net.pool.lock().extend([tx_x.clone(), tx_y.clone()]);

    // A proposal referencing both conflicting transactions.
    let request = forge_payload(
        &net.keypairs[PRIORITY as usize],
        10,
        PRIORITY,
        0,
        PayloadBody::PrepareRequest(PrepareRequest {
            slot: SLOT_PRIORITY,
            timestamp: 50_000,
            nonce: 7,
            transaction_hashes: vec![tx_x.hash(), tx_y.hash()],
        }),
    );
    net.deliver_to(0, request);

    // Resolving Y against the already-installed X fails batch verification:
    // no acknowledgement goes out, a change view does.
    let status = net.node(0).service.status();
    assert!(!status.response_sent);
    assert!(status.view_changing);

    let sent = net.node(0).outbox.messages.lock().clone();
    assert!(sent
        .iter()
        .all(|(_, p)| p.kind() != PayloadKind::PrepareResponse));
    let change_view = sent
        .iter()
        .find(|(_, p)| p.kind() == PayloadKind::ChangeView)
        .expect("no change view was sent");
    match &change_view.1.body {
        PayloadBody::ChangeView(body) => {
            assert_eq!(body.reason, ChangeViewReason::TxInvalid);
            assert_eq!(body.new_view, 1);
        }
        other => panic!("unexpected body {other:?}"),
    }
}
