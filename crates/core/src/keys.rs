//! Validator key material: ECDSA over secp256r1.
//!
//! Signatures are the raw 64-byte `r || s` form; public keys travel as
//! 33-byte SEC1 compressed points. Signing is deterministic (RFC 6979), so
//! signing the same bytes twice yields identical signatures.

use crate::CoreError;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use palisade_config::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use palisade_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use rand::rngs::OsRng;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A raw 64-byte ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Wraps raw `r || s` bytes.
    pub fn from_array(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copies a slice of exactly [`SIGNATURE_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CoreError::InvalidLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buf = [0u8; SIGNATURE_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serializable for Signature {
    fn size(&self) -> usize {
        SIGNATURE_SIZE
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_bytes(&self.0)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self(reader.read_array::<SIGNATURE_SIZE>()?))
    }
}

/// A validator's public identity.
///
/// Equality, ordering, and hashing all go through the compressed encoding,
/// so validator sets have one canonical order.
#[derive(Clone)]
pub struct PublicKey {
    point: VerifyingKey,
    encoded: [u8; PUBLIC_KEY_SIZE],
}

impl PublicKey {
    /// Decodes a 33-byte SEC1 compressed point.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CoreError::InvalidLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let point = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        let mut encoded = [0u8; PUBLIC_KEY_SIZE];
        encoded.copy_from_slice(bytes);
        Ok(Self { point, encoded })
    }

    /// The compressed encoding.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.encoded
    }

    /// Verifies a raw signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match EcdsaSignature::from_slice(signature.as_bytes()) {
            Ok(sig) => self.point.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for PublicKey {}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoded.cmp(&other.encoded)
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.encoded))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.encoded))
    }
}

impl Serializable for PublicKey {
    fn size(&self) -> usize {
        PUBLIC_KEY_SIZE
    }

    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_bytes(&self.encoded)
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let bytes = reader.read_array::<PUBLIC_KEY_SIZE>()?;
        PublicKey::from_bytes(&bytes)
            .map_err(|e| palisade_io::IoError::invalid_data(e.to_string()))
    }
}

/// A validator's signing identity.
pub struct KeyPair {
    signing: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        Self::from_signing_key(signing)
    }

    /// Loads a key pair from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let signing =
            SigningKey::from_slice(bytes).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signing_key(signing))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let verifying = VerifyingKey::from(&signing);
        let encoded_point = verifying.to_encoded_point(true);
        let mut encoded = [0u8; PUBLIC_KEY_SIZE];
        encoded.copy_from_slice(encoded_point.as_bytes());
        let public = PublicKey {
            point: verifying,
            encoded,
        };
        Self { signing, public }
    }

    /// The public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Signs `message`, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.signing.sign(message);
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes.copy_from_slice(&sig.to_bytes());
        Signature(bytes)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(public: {})", self.public)
    }
}
