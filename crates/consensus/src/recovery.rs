//! Recovery bundle assembly and replay.
//!
//! A lagging or restarted validator catches up by asking peers to replay what
//! they have seen. The answer is a [`RecoveryMessage`] carrying the original
//! signed payloads, which the receiver pushes back through its ordinary
//! handlers; replay therefore exercises the same code path and the same
//! invariants as live traffic. This module owns the three recovery concerns:
//! who answers a request, how a bundle is assembled, and which bundle items
//! are fit to replay.

use crate::context::ConsensusContext;
use crate::messages::{ConsensusPayload, PayloadBody, RecoveryMessage};
use crate::validators::ValidatorSet;
use crate::Result;
use tracing::warn;

/// Whether `responder` should answer a recovery request from `requester`.
///
/// Every committed node answers: its commit exists nowhere else. Beyond
/// those, only the `f + 1` validators ring-wise after the requester reply,
/// which bounds amplification while guaranteeing at least one honest
/// responder in the set.
pub fn should_answer(
    validators: &ValidatorSet,
    responder: u16,
    requester: u16,
    has_committed: bool,
) -> bool {
    if has_committed {
        return true;
    }
    let n = validators.len() as u16;
    let distance = (responder + n - requester) % n;
    distance >= 1 && distance <= validators.f() as u16 + 1
}

/// Bundles everything the context has observed this round into a signed
/// recovery message. Sections are sorted by slot and validator index so two
/// nodes in the same state produce identical bundles.
pub fn assemble(context: &ConsensusContext) -> Result<ConsensusPayload> {
    let mut change_views = context.observed_change_views();
    change_views.sort_by_key(|p| p.validator_index);

    let prepare_requests = context.observed_prepare_requests();

    let mut prepare_responses = context.observed_prepare_responses();
    prepare_responses.sort_by_key(|p| {
        let slot = match &p.body {
            PayloadBody::PrepareResponse(body) => body.slot,
            _ => 0,
        };
        (slot, p.validator_index)
    });

    let mut commits = context.observed_commits();
    commits.sort_by_key(|p| p.validator_index);

    context.make_signed(PayloadBody::RecoveryMessage(RecoveryMessage {
        change_views,
        prepare_requests,
        prepare_responses,
        commits,
    }))
}

/// Filters a received bundle down to the payloads safe to replay at `height`,
/// in replay order: change views, then requests, then responses, then
/// commits.
///
/// The transport only vouched for the outer envelope, so every nested payload
/// must prove its own signature against the claimed originator before it may
/// touch round state. Items for other heights or from unknown validators are
/// dropped.
pub fn verified_payloads(
    bundle: &RecoveryMessage,
    height: u32,
    validators: &ValidatorSet,
) -> Vec<ConsensusPayload> {
    bundle
        .payloads_in_replay_order()
        .filter(|item| {
            if item.valid_height != height {
                return false;
            }
            let Some(key) = validators.get(item.validator_index) else {
                return false;
            };
            if !item.verify_signature(key) {
                warn!(
                    validator = item.validator_index,
                    kind = %item.kind(),
                    "recovery bundle item failed signature check"
                );
                return false;
            }
            true
        })
        .cloned()
        .collect()
}
