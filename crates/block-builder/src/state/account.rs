//! Account representation.

use alloy_primitives::{Bytes, U256};
use std::collections::BTreeMap;

/// A single account: balance, nonce, code and storage, plus the flags the
/// block builder cares about. Storage keeps only non-zero slots; writing
/// zero removes the slot so that a set-then-clear round trip is
/// indistinguishable from never writing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    /// Immutable once set.
    pub code: Bytes,
    pub storage: BTreeMap<U256, U256>,
    /// Marked by SELFDESTRUCT; the account is dropped from the state
    /// commitment but stays in the map until the enclosing scope settles.
    pub self_destructed: bool,
    /// Whether any mutation has touched this account.
    pub touched: bool,
}

impl Account {
    /// An account that carries no value, no history and no code.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code.is_empty()
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    pub fn storage_slot(&self, slot: U256) -> U256 {
        self.storage.get(&slot).copied().unwrap_or_default()
    }
}
