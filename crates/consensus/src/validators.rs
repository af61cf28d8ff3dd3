//! The epoch's validator set and per-round role computation.

use crate::{Error, Result};
use palisade_config::MAX_VALIDATORS;
use palisade_core::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proposal slot of the priority primary.
pub const SLOT_PRIORITY: u8 = 0;
/// Proposal slot of the fallback primary.
pub const SLOT_FALLBACK: u8 = 1;

/// A validator's role within one `(height, view)` round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// First proposer of the round (slot 0).
    PriorityPrimary,
    /// Second proposer, armed with a longer timer (slot 1).
    FallbackPrimary,
    /// Seated validator that is not proposing this round.
    Backup,
    /// Not seated in the current epoch; observes without signing.
    WatchOnly,
}

impl Role {
    /// The proposal slot this role is entitled to, if any.
    pub fn proposal_slot(&self) -> Option<u8> {
        match self {
            Role::PriorityPrimary => Some(SLOT_PRIORITY),
            Role::FallbackPrimary => Some(SLOT_FALLBACK),
            Role::Backup | Role::WatchOnly => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::PriorityPrimary => "PriorityPrimary",
            Role::FallbackPrimary => "FallbackPrimary",
            Role::Backup => "Backup",
            Role::WatchOnly => "WatchOnly",
        };
        write!(f, "{name}")
    }
}

/// The ordered public identities of the current epoch's validators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    keys: Vec<PublicKey>,
}

impl ValidatorSet {
    /// Creates a validator set from an ordered key list.
    pub fn new(keys: Vec<PublicKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::InvalidValidatorSet(
                "validator set cannot be empty".into(),
            ));
        }
        if keys.len() > MAX_VALIDATORS {
            return Err(Error::InvalidValidatorSet(format!(
                "validator set of {} exceeds the maximum of {MAX_VALIDATORS}",
                keys.len()
            )));
        }
        Ok(Self { keys })
    }

    /// Number of seated validators.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; sets are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Byzantine tolerance: `f = (n - 1) / 3`.
    pub fn f(&self) -> usize {
        (self.keys.len() - 1) / 3
    }

    /// Quorum size: `M = n - f`.
    pub fn m(&self) -> usize {
        self.keys.len() - self.f()
    }

    /// Key of the validator at `index`.
    pub fn get(&self, index: u16) -> Option<&PublicKey> {
        self.keys.get(index as usize)
    }

    /// Index of `key` within the set.
    pub fn index_of(&self, key: &PublicKey) -> Option<u16> {
        self.keys.iter().position(|k| k == key).map(|i| i as u16)
    }

    /// All keys in set order.
    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// Priority primary of `(height, view)`: `(height - view) mod n`.
    pub fn primary_index(&self, height: u32, view: u8) -> u16 {
        let n = self.keys.len() as i64;
        (i64::from(height) - i64::from(view)).rem_euclid(n) as u16
    }

    /// Fallback primary of `(height, view)`: the validator after the primary.
    pub fn fallback_index(&self, height: u32, view: u8) -> u16 {
        (self.primary_index(height, view) + 1) % self.keys.len() as u16
    }

    /// Primary of a given proposal slot.
    pub fn primary_for_slot(&self, height: u32, view: u8, slot: u8) -> u16 {
        if slot == SLOT_PRIORITY {
            self.primary_index(height, view)
        } else {
            self.fallback_index(height, view)
        }
    }

    /// Role of the validator at `my_index` (or `None` for a non-validator)
    /// within `(height, view)`.
    pub fn role_of(&self, my_index: Option<u16>, height: u32, view: u8) -> Role {
        match my_index {
            None => Role::WatchOnly,
            Some(index) => {
                if index == self.primary_index(height, view) {
                    Role::PriorityPrimary
                } else if index == self.fallback_index(height, view) {
                    Role::FallbackPrimary
                } else {
                    Role::Backup
                }
            }
        }
    }
}
