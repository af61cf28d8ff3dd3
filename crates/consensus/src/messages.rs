//! Consensus payload kinds and their canonical wire form.
//!
//! Six payload kinds share one signed envelope. The encoding is deterministic
//! and bit-exact: category tag, valid height, validator index, payload kind,
//! view number, the kind-specific body, then a fixed-length signature over
//! everything before it.

use crate::external::Signer;
use palisade_config::{MAX_TRANSACTIONS_PER_BLOCK, MAX_VALIDATORS};
use palisade_core::{hash256, PublicKey, Signature, UInt256};
use palisade_io::{
    helper, BinaryWriter, IoError, IoResult, MemoryReader, Serializable, SerializableExt,
};
use std::fmt;

/// Category tag opening every consensus payload on the wire.
pub const PAYLOAD_CATEGORY: &str = "dBFT";

/// Payload kind discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    /// Proposal from one of the two primaries of the round.
    PrepareRequest = 0x00,
    /// Acknowledgement of a specific prepare request.
    PrepareResponse = 0x01,
    /// Request to move to a higher view.
    ChangeView = 0x02,
    /// Signature over a fully determined block header.
    Commit = 0x03,
    /// Plea for peers to replay what they have seen.
    RecoveryRequest = 0x04,
    /// Bundle of observed payloads sufficient to bootstrap a lagging peer.
    RecoveryMessage = 0x05,
}

impl PayloadKind {
    /// Decodes a kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::PrepareRequest),
            0x01 => Some(Self::PrepareResponse),
            0x02 => Some(Self::ChangeView),
            0x03 => Some(Self::Commit),
            0x04 => Some(Self::RecoveryRequest),
            0x05 => Some(Self::RecoveryMessage),
            _ => None,
        }
    }

    /// The wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this kind belongs to the recovery protocol. Recovery payloads
    /// may not appear nested inside a recovery bundle.
    pub fn is_recovery(self) -> bool {
        matches!(self, Self::RecoveryRequest | Self::RecoveryMessage)
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PrepareRequest => "PrepareRequest",
            Self::PrepareResponse => "PrepareResponse",
            Self::ChangeView => "ChangeView",
            Self::Commit => "Commit",
            Self::RecoveryRequest => "RecoveryRequest",
            Self::RecoveryMessage => "RecoveryMessage",
        };
        write!(f, "{name}")
    }
}

/// Reason attached to a change-view request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ChangeViewReason {
    /// The round timed out without progress.
    Timeout = 0x00,
    /// Joining a view change the rest of the quorum already agreed on.
    ChangeAgreement = 0x01,
    /// A referenced transaction could not be obtained.
    TxNotFound = 0x02,
    /// A referenced transaction violates local policy.
    TxRejectedByPolicy = 0x03,
    /// A referenced transaction is invalid or conflicts with another.
    TxInvalid = 0x04,
    /// The assembled block violates local policy.
    BlockRejectedByPolicy = 0x05,
}

impl ChangeViewReason {
    /// Decodes a reason byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Timeout),
            0x01 => Some(Self::ChangeAgreement),
            0x02 => Some(Self::TxNotFound),
            0x03 => Some(Self::TxRejectedByPolicy),
            0x04 => Some(Self::TxInvalid),
            0x05 => Some(Self::BlockRejectedByPolicy),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeViewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "Timeout",
            Self::ChangeAgreement => "ChangeAgreement",
            Self::TxNotFound => "TxNotFound",
            Self::TxRejectedByPolicy => "TxRejectedByPolicy",
            Self::TxInvalid => "TxInvalid",
            Self::BlockRejectedByPolicy => "BlockRejectedByPolicy",
        };
        write!(f, "{name}")
    }
}

fn check_slot(slot: u8) -> IoResult<u8> {
    if slot > 1 {
        return Err(IoError::invalid_format(format!(
            "proposal slot must be 0 or 1, got {slot}"
        )));
    }
    Ok(slot)
}

/// Proposal from the primary of one slot: the ordered transaction hash list
/// and the header entropy the draft commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    /// Proposal slot: 0 for the priority primary, 1 for the fallback.
    pub slot: u8,
    /// Proposal timestamp in milliseconds.
    pub timestamp: u64,
    /// Proposer-chosen header entropy.
    pub nonce: u64,
    /// Ordered hashes of the proposed transactions.
    pub transaction_hashes: Vec<UInt256>,
}

impl Serializable for PrepareRequest {
    fn size(&self) -> usize {
        1 + 8 + 8 + helper::list_size(&self.transaction_hashes)
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.slot)?;
        writer.write_u64(self.timestamp)?;
        writer.write_u64(self.nonce)?;
        writer.write_serializable_list(&self.transaction_hashes)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            slot: check_slot(reader.read_u8()?)?,
            timestamp: reader.read_u64()?,
            nonce: reader.read_u64()?,
            transaction_hashes: helper::deserialize_list(reader, MAX_TRANSACTIONS_PER_BLOCK)?,
        })
    }
}

/// Acknowledgement that a backup accepts the prepare request it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareResponse {
    /// Slot the acknowledged request was proposed on.
    pub slot: u8,
    /// Hash of the acknowledged prepare-request payload.
    pub preparation_hash: UInt256,
}

impl Serializable for PrepareResponse {
    fn size(&self) -> usize {
        1 + 32
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.slot)?;
        writer.write_serializable(&self.preparation_hash)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            slot: check_slot(reader.read_u8()?)?,
            preparation_hash: UInt256::deserialize(reader)?,
        })
    }
}

/// Request to abandon the current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeView {
    /// Why the sender wants out.
    pub reason: ChangeViewReason,
    /// The view the sender wants to move to.
    pub new_view: u8,
    /// Sender wall clock in milliseconds.
    pub timestamp: u64,
}

impl Serializable for ChangeView {
    fn size(&self) -> usize {
        1 + 1 + 8
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.reason as u8)?;
        writer.write_u8(self.new_view)?;
        writer.write_u64(self.timestamp)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let reason_byte = reader.read_u8()?;
        let reason = ChangeViewReason::from_byte(reason_byte).ok_or_else(|| {
            IoError::invalid_format(format!("unknown change-view reason {reason_byte:#04x}"))
        })?;
        Ok(Self {
            reason,
            new_view: reader.read_u8()?,
            timestamp: reader.read_u64()?,
        })
    }
}

/// Irrevocable signature over the block header of one proposal slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Slot whose header the signature covers.
    pub slot: u8,
    /// Signature over the header hash.
    pub signature: Signature,
}

impl Serializable for Commit {
    fn size(&self) -> usize {
        1 + self.signature.size()
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.slot)?;
        writer.write_serializable(&self.signature)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            slot: check_slot(reader.read_u8()?)?,
            signature: Signature::deserialize(reader)?,
        })
    }
}

/// Plea for peers to replay their view of the round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    /// Sender wall clock in milliseconds.
    pub timestamp: u64,
}

impl Serializable for RecoveryRequest {
    fn size(&self) -> usize {
        8
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u64(self.timestamp)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            timestamp: reader.read_u64()?,
        })
    }
}

/// Everything the sender has observed this round, replayable through the
/// ordinary handlers. Nested payloads carry their original envelopes and
/// signatures; recovery kinds may not nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryMessage {
    /// Change-view payloads collected so far.
    pub change_views: Vec<ConsensusPayload>,
    /// Prepare requests observed (at most one per slot).
    pub prepare_requests: Vec<ConsensusPayload>,
    /// Prepare responses collected so far.
    pub prepare_responses: Vec<ConsensusPayload>,
    /// Commits collected so far.
    pub commits: Vec<ConsensusPayload>,
}

impl RecoveryMessage {
    /// The nested payloads in replay order: change views, then requests,
    /// then responses, then commits.
    pub fn payloads_in_replay_order(&self) -> impl Iterator<Item = &ConsensusPayload> {
        self.change_views
            .iter()
            .chain(self.prepare_requests.iter())
            .chain(self.prepare_responses.iter())
            .chain(self.commits.iter())
    }

    fn read_section(
        reader: &mut MemoryReader,
        max: usize,
        expected: PayloadKind,
    ) -> IoResult<Vec<ConsensusPayload>> {
        let count = reader.read_var_int(max as u64)? as usize;
        let mut payloads = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let payload = ConsensusPayload::deserialize_nested(reader)?;
            if payload.kind() != expected {
                return Err(IoError::invalid_format(format!(
                    "recovery section for {expected} contains a {} payload",
                    payload.kind()
                )));
            }
            payloads.push(payload);
        }
        Ok(payloads)
    }
}

impl Serializable for RecoveryMessage {
    fn size(&self) -> usize {
        helper::list_size(&self.change_views)
            + helper::list_size(&self.prepare_requests)
            + helper::list_size(&self.prepare_responses)
            + helper::list_size(&self.commits)
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_serializable_list(&self.change_views)?;
        writer.write_serializable_list(&self.prepare_requests)?;
        writer.write_serializable_list(&self.prepare_responses)?;
        writer.write_serializable_list(&self.commits)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            change_views: Self::read_section(reader, MAX_VALIDATORS, PayloadKind::ChangeView)?,
            prepare_requests: Self::read_section(reader, 2, PayloadKind::PrepareRequest)?,
            prepare_responses: Self::read_section(
                reader,
                MAX_VALIDATORS * 2,
                PayloadKind::PrepareResponse,
            )?,
            commits: Self::read_section(reader, MAX_VALIDATORS, PayloadKind::Commit)?,
        })
    }
}

/// Kind-specific body of a consensus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadBody {
    /// Proposal.
    PrepareRequest(PrepareRequest),
    /// Proposal acknowledgement.
    PrepareResponse(PrepareResponse),
    /// View-change request.
    ChangeView(ChangeView),
    /// Header signature.
    Commit(Commit),
    /// Replay plea.
    RecoveryRequest(RecoveryRequest),
    /// Replay bundle.
    RecoveryMessage(RecoveryMessage),
}

impl PayloadBody {
    /// The kind tag of this body.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::PrepareRequest(_) => PayloadKind::PrepareRequest,
            Self::PrepareResponse(_) => PayloadKind::PrepareResponse,
            Self::ChangeView(_) => PayloadKind::ChangeView,
            Self::Commit(_) => PayloadKind::Commit,
            Self::RecoveryRequest(_) => PayloadKind::RecoveryRequest,
            Self::RecoveryMessage(_) => PayloadKind::RecoveryMessage,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::PrepareRequest(body) => body.size(),
            Self::PrepareResponse(body) => body.size(),
            Self::ChangeView(body) => body.size(),
            Self::Commit(body) => body.size(),
            Self::RecoveryRequest(body) => body.size(),
            Self::RecoveryMessage(body) => body.size(),
        }
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        match self {
            Self::PrepareRequest(body) => body.serialize(writer),
            Self::PrepareResponse(body) => body.serialize(writer),
            Self::ChangeView(body) => body.serialize(writer),
            Self::Commit(body) => body.serialize(writer),
            Self::RecoveryRequest(body) => body.serialize(writer),
            Self::RecoveryMessage(body) => body.serialize(writer),
        }
    }

    fn deserialize_with_kind(reader: &mut MemoryReader, kind: PayloadKind) -> IoResult<Self> {
        Ok(match kind {
            PayloadKind::PrepareRequest => Self::PrepareRequest(PrepareRequest::deserialize(reader)?),
            PayloadKind::PrepareResponse => {
                Self::PrepareResponse(PrepareResponse::deserialize(reader)?)
            }
            PayloadKind::ChangeView => Self::ChangeView(ChangeView::deserialize(reader)?),
            PayloadKind::Commit => Self::Commit(Commit::deserialize(reader)?),
            PayloadKind::RecoveryRequest => {
                Self::RecoveryRequest(RecoveryRequest::deserialize(reader)?)
            }
            PayloadKind::RecoveryMessage => {
                Self::RecoveryMessage(RecoveryMessage::deserialize(reader)?)
            }
        })
    }
}

/// The signed envelope every consensus message travels in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusPayload {
    /// Height this payload is valid at.
    pub valid_height: u32,
    /// Index of the originating validator in the epoch's set.
    pub validator_index: u16,
    /// View number the payload was produced in.
    pub view: u8,
    /// Kind-specific body.
    pub body: PayloadBody,
    /// Signature over everything above, by `validators[validator_index]`.
    pub signature: Signature,
}

impl ConsensusPayload {
    /// Decodes a wire payload, mapping length and field-domain violations to
    /// [`crate::Error::MalformedPayload`]. This is the entry point transport
    /// bindings use before signature verification.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        Self::from_array(bytes).map_err(|e| crate::Error::MalformedPayload(e.to_string()))
    }

    /// Verifies the envelope signature against the originating validator's
    /// key in `validators`. Transport bindings call this once per inbound
    /// payload; the service trusts payloads it is handed.
    pub fn authenticate(&self, validators: &crate::ValidatorSet) -> crate::Result<()> {
        let key = validators.get(self.validator_index).ok_or_else(|| {
            crate::Error::MalformedPayload(format!(
                "validator index {} outside the current set",
                self.validator_index
            ))
        })?;
        if !self.verify_signature(key) {
            return Err(crate::Error::BadSignature(self.validator_index));
        }
        Ok(())
    }

    /// Builds and signs a payload in one step.
    pub fn signed(
        valid_height: u32,
        validator_index: u16,
        view: u8,
        body: PayloadBody,
        signer: &dyn Signer,
    ) -> Self {
        let mut payload = Self {
            valid_height,
            validator_index,
            view,
            body,
            signature: Signature::from_array([0u8; 64]),
        };
        payload.signature = signer.sign(&payload.unsigned_bytes());
        payload
    }

    /// The kind tag of the body.
    pub fn kind(&self) -> PayloadKind {
        self.body.kind()
    }

    /// Canonical bytes of every field the signature covers.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.size() - self.signature.size());
        self.serialize_unsigned(&mut writer)
            .unwrap_or_else(|_| unreachable!("in-memory serialization cannot fail"));
        writer.into_bytes()
    }

    /// The payload identity used for deduplication.
    pub fn hash(&self) -> UInt256 {
        hash256(&self.to_array())
    }

    /// Verifies the envelope signature against the claimed originator's key.
    pub fn verify_signature(&self, key: &PublicKey) -> bool {
        key.verify(&self.unsigned_bytes(), &self.signature)
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_var_string(PAYLOAD_CATEGORY)?;
        writer.write_u32(self.valid_height)?;
        writer.write_u16(self.validator_index)?;
        writer.write_u8(self.kind().to_byte())?;
        writer.write_u8(self.view)?;
        self.body.serialize(writer)
    }

    fn deserialize_inner(reader: &mut MemoryReader, allow_recovery: bool) -> IoResult<Self> {
        let category = reader.read_var_string(16)?;
        if category != PAYLOAD_CATEGORY {
            return Err(IoError::invalid_format(format!(
                "unknown payload category {category:?}"
            )));
        }
        let valid_height = reader.read_u32()?;
        let validator_index = reader.read_u16()?;
        let kind_byte = reader.read_u8()?;
        let kind = PayloadKind::from_byte(kind_byte).ok_or_else(|| {
            IoError::invalid_format(format!("unknown payload kind {kind_byte:#04x}"))
        })?;
        if !allow_recovery && kind.is_recovery() {
            return Err(IoError::invalid_format(
                "recovery payloads may not nest inside a recovery bundle".to_string(),
            ));
        }
        let view = reader.read_u8()?;
        let body = PayloadBody::deserialize_with_kind(reader, kind)?;
        let signature = Signature::deserialize(reader)?;
        Ok(Self {
            valid_height,
            validator_index,
            view,
            body,
            signature,
        })
    }

    fn deserialize_nested(reader: &mut MemoryReader) -> IoResult<Self> {
        Self::deserialize_inner(reader, false)
    }
}

impl Serializable for ConsensusPayload {
    fn size(&self) -> usize {
        helper::var_bytes_size(PAYLOAD_CATEGORY.as_bytes())
            + 4 // valid_height
            + 2 // validator_index
            + 1 // kind
            + 1 // view
            + self.body.size()
            + self.signature.size()
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.serialize_unsigned(writer)?;
        writer.write_serializable(&self.signature)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Self::deserialize_inner(reader, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::KeyPair;

    fn signer() -> KeyPair {
        KeyPair::from_secret_bytes(&[0x42; 32]).unwrap()
    }

    fn sample_request() -> ConsensusPayload {
        ConsensusPayload::signed(
            10,
            2,
            0,
            PayloadBody::PrepareRequest(PrepareRequest {
                slot: 0,
                timestamp: 1_700_000_000_123,
                nonce: 0xDEAD_BEEF,
                transaction_hashes: vec![UInt256::from_array([1; 32])],
            }),
            &signer(),
        )
    }

    #[test]
    fn envelope_layout_is_bit_exact() {
        let payload = sample_request();
        let bytes = payload.to_array();

        // Category tag: length-prefixed ASCII "dBFT".
        assert_eq!(&bytes[..5], &[0x04, b'd', b'B', b'F', b'T']);
        // validHeight = 10, little-endian u32.
        assert_eq!(&bytes[5..9], &[10, 0, 0, 0]);
        // validatorIndex = 2, little-endian u16.
        assert_eq!(&bytes[9..11], &[2, 0]);
        // kind, then view.
        assert_eq!(bytes[11], PayloadKind::PrepareRequest.to_byte());
        assert_eq!(bytes[12], 0);
        // The signature occupies the trailing 64 bytes.
        assert_eq!(bytes.len(), payload.size());
        assert_eq!(&bytes[bytes.len() - 64..], payload.signature.as_bytes());
    }

    #[test]
    fn every_kind_round_trips() {
        let signer = signer();
        let bodies = vec![
            PayloadBody::PrepareRequest(PrepareRequest {
                slot: 1,
                timestamp: 5,
                nonce: 6,
                transaction_hashes: vec![],
            }),
            PayloadBody::PrepareResponse(PrepareResponse {
                slot: 0,
                preparation_hash: UInt256::from_array([8; 32]),
            }),
            PayloadBody::ChangeView(ChangeView {
                reason: ChangeViewReason::Timeout,
                new_view: 1,
                timestamp: 9,
            }),
            PayloadBody::Commit(Commit {
                slot: 0,
                signature: Signature::from_array([3; 64]),
            }),
            PayloadBody::RecoveryRequest(RecoveryRequest { timestamp: 11 }),
            PayloadBody::RecoveryMessage(RecoveryMessage {
                change_views: vec![],
                prepare_requests: vec![],
                prepare_responses: vec![],
                commits: vec![],
            }),
        ];

        for body in bodies {
            let payload = ConsensusPayload::signed(7, 1, 2, body, &signer);
            let decoded = ConsensusPayload::from_array(&payload.to_array()).unwrap();
            assert_eq!(decoded, payload);
            assert_eq!(decoded.hash(), payload.hash());
        }
    }

    #[test]
    fn signature_verifies_and_binds_fields() {
        let signer = signer();
        let payload = sample_request();
        assert!(payload.verify_signature(signer.public_key()));

        let mut tampered = payload.clone();
        tampered.valid_height += 1;
        assert!(!tampered.verify_signature(signer.public_key()));

        let other = KeyPair::from_secret_bytes(&[0x43; 32]).unwrap();
        assert!(!payload.verify_signature(other.public_key()));
    }

    #[test]
    fn decode_and_authenticate_classify_failures() {
        use crate::ValidatorSet;

        let signer = signer();
        let validators = ValidatorSet::new(vec![
            KeyPair::from_secret_bytes(&[0x41; 32]).unwrap().public_key().clone(),
            KeyPair::from_secret_bytes(&[0x42; 32]).unwrap().public_key().clone(),
            KeyPair::from_secret_bytes(&[0x43; 32]).unwrap().public_key().clone(),
        ])
        .unwrap();

        // Authentic payload from validator 1 (secret 0x42).
        let payload = ConsensusPayload::signed(
            10,
            1,
            0,
            PayloadBody::RecoveryRequest(RecoveryRequest { timestamp: 4 }),
            &signer,
        );
        let decoded = ConsensusPayload::decode(&payload.to_array()).unwrap();
        assert!(decoded.authenticate(&validators).is_ok());

        // Truncated bytes are malformed.
        let bytes = payload.to_array();
        assert!(matches!(
            ConsensusPayload::decode(&bytes[..bytes.len() - 3]),
            Err(crate::Error::MalformedPayload(_))
        ));

        // A claimed origin whose key did not sign is a bad signature.
        let mut stolen = payload.clone();
        stolen.validator_index = 2;
        assert!(matches!(
            stolen.authenticate(&validators),
            Err(crate::Error::BadSignature(2))
        ));

        // An origin outside the set is malformed, not unsigned.
        let mut outside = payload;
        outside.validator_index = 7;
        assert!(matches!(
            outside.authenticate(&validators),
            Err(crate::Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn wrong_category_is_rejected() {
        let mut bytes = sample_request().to_array();
        bytes[1] = b'x';
        assert!(ConsensusPayload::from_array(&bytes).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut bytes = sample_request().to_array();
        bytes[11] = 0x77;
        assert!(ConsensusPayload::from_array(&bytes).is_err());
    }

    #[test]
    fn slot_domain_is_checked() {
        let mut bytes = sample_request().to_array();
        bytes[13] = 2; // slot byte of the prepare request body
        assert!(ConsensusPayload::from_array(&bytes).is_err());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = sample_request().to_array();
        assert!(ConsensusPayload::from_array(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn recovery_bundle_round_trips_and_rejects_nesting() {
        let signer = signer();
        let commit = ConsensusPayload::signed(
            7,
            0,
            0,
            PayloadBody::Commit(Commit {
                slot: 0,
                signature: Signature::from_array([9; 64]),
            }),
            &signer,
        );
        let bundle = ConsensusPayload::signed(
            7,
            0,
            0,
            PayloadBody::RecoveryMessage(RecoveryMessage {
                change_views: vec![],
                prepare_requests: vec![],
                prepare_responses: vec![],
                commits: vec![commit.clone()],
            }),
            &signer,
        );
        let decoded = ConsensusPayload::from_array(&bundle.to_array()).unwrap();
        assert_eq!(decoded, bundle);

        // A recovery message nested inside a recovery message must not decode.
        let inner_recovery = ConsensusPayload::signed(
            7,
            0,
            0,
            PayloadBody::RecoveryRequest(RecoveryRequest { timestamp: 1 }),
            &signer,
        );
        let bad = ConsensusPayload::signed(
            7,
            0,
            0,
            PayloadBody::RecoveryMessage(RecoveryMessage {
                change_views: vec![inner_recovery],
                prepare_requests: vec![],
                prepare_responses: vec![],
                commits: vec![],
            }),
            &signer,
        );
        assert!(ConsensusPayload::from_array(&bad.to_array()).is_err());
    }

    #[test]
    fn recovery_section_kind_mismatch_is_rejected() {
        let signer = signer();
        let response = ConsensusPayload::signed(
            7,
            0,
            0,
            PayloadBody::PrepareResponse(PrepareResponse {
                slot: 0,
                preparation_hash: UInt256::zero(),
            }),
            &signer,
        );
        // A response smuggled into the commits section.
        let bad = ConsensusPayload::signed(
            7,
            0,
            0,
            PayloadBody::RecoveryMessage(RecoveryMessage {
                change_views: vec![],
                prepare_requests: vec![],
                prepare_responses: vec![],
                commits: vec![response],
            }),
            &signer,
        );
        assert!(ConsensusPayload::from_array(&bad.to_array()).is_err());
    }

    #[test]
    fn oversized_hash_list_is_rejected() {
        // Hand-craft a prepare request claiming more hashes than permitted.
        let mut writer = BinaryWriter::new();
        writer.write_var_string(PAYLOAD_CATEGORY).unwrap();
        writer.write_u32(10).unwrap();
        writer.write_u16(0).unwrap();
        writer.write_u8(PayloadKind::PrepareRequest.to_byte()).unwrap();
        writer.write_u8(0).unwrap();
        writer.write_u8(0).unwrap(); // slot
        writer.write_u64(1).unwrap(); // timestamp
        writer.write_u64(2).unwrap(); // nonce
        writer
            .write_var_int(MAX_TRANSACTIONS_PER_BLOCK as u64 + 1)
            .unwrap();
        let bytes = writer.into_bytes();
        assert!(ConsensusPayload::from_array(&bytes).is_err());
    }
}
