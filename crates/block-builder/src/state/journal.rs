//! Snapshot journals.
//!
//! A journal records, per `(account, field)` key, the value that field had
//! the first time it was written after the snapshot was opened. Reverting
//! replays the entries in reverse insertion order; committing merges a
//! journal into the one beneath it, keeping the *older* prior value
//! wherever both layers logged the same key, so that reverting the lower
//! snapshot still restores its own pre-push state.

use crate::state::account::Account;
use alloy_primitives::{Address, Bytes, U256};
use std::collections::{BTreeMap, HashSet};

/// Identity of a journaled field. First-touch-wins deduplication happens
/// on this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum JournalKey {
    Created(Address),
    Balance(Address),
    Nonce(Address),
    Storage(Address, U256),
    Code(Address),
    SelfDestructed(Address),
    Touched(Address),
    Refund,
}

/// The prior value of one field. Restoring an entry is total: it needs no
/// context beyond the account map itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalEntry {
    /// The account did not exist before this snapshot.
    AccountCreated { address: Address },
    BalanceChange { address: Address, prev: U256 },
    NonceChange { address: Address, prev: u64 },
    /// `prev == None` means the slot was unset.
    StorageChange {
        address: Address,
        slot: U256,
        prev: Option<U256>,
    },
    CodeChange { address: Address, prev: Bytes },
    SelfDestructChange { address: Address, prev: bool },
    TouchChange { address: Address, prev: bool },
    RefundChange { prev: u64 },
}

impl JournalEntry {
    pub(crate) fn key(&self) -> JournalKey {
        match self {
            JournalEntry::AccountCreated { address } => JournalKey::Created(*address),
            JournalEntry::BalanceChange { address, .. } => JournalKey::Balance(*address),
            JournalEntry::NonceChange { address, .. } => JournalKey::Nonce(*address),
            JournalEntry::StorageChange { address, slot, .. } => {
                JournalKey::Storage(*address, *slot)
            }
            JournalEntry::CodeChange { address, .. } => JournalKey::Code(*address),
            JournalEntry::SelfDestructChange { address, .. } => {
                JournalKey::SelfDestructed(*address)
            }
            JournalEntry::TouchChange { address, .. } => JournalKey::Touched(*address),
            JournalEntry::RefundChange { .. } => JournalKey::Refund,
        }
    }
}

/// One snapshot's worth of prior values.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal {
    entries: Vec<JournalEntry>,
    seen: HashSet<JournalKey>,
}

impl Journal {
    /// Logs an entry unless this key was already touched in this layer.
    pub(crate) fn record(&mut self, entry: JournalEntry) {
        if self.seen.insert(entry.key()) {
            self.entries.push(entry);
        }
    }

    /// Folds `top` into `self`. Keys already present keep this layer's
    /// (older) prior value; keys only `top` saw move down unchanged.
    pub(crate) fn absorb(&mut self, top: Journal) {
        for entry in top.entries {
            self.record(entry);
        }
    }

    /// Restores all prior values onto the account map, newest entry first.
    pub(crate) fn revert(self, accounts: &mut BTreeMap<Address, Account>, refund: &mut u64) {
        for entry in self.entries.into_iter().rev() {
            match entry {
                JournalEntry::AccountCreated { address } => {
                    accounts.remove(&address);
                }
                JournalEntry::BalanceChange { address, prev } => {
                    if let Some(account) = accounts.get_mut(&address) {
                        account.balance = prev;
                    }
                }
                JournalEntry::NonceChange { address, prev } => {
                    if let Some(account) = accounts.get_mut(&address) {
                        account.nonce = prev;
                    }
                }
                JournalEntry::StorageChange {
                    address,
                    slot,
                    prev,
                } => {
                    if let Some(account) = accounts.get_mut(&address) {
                        match prev {
                            Some(value) => {
                                account.storage.insert(slot, value);
                            }
                            None => {
                                account.storage.remove(&slot);
                            }
                        }
                    }
                }
                JournalEntry::CodeChange { address, prev } => {
                    if let Some(account) = accounts.get_mut(&address) {
                        account.code = prev;
                    }
                }
                JournalEntry::SelfDestructChange { address, prev } => {
                    if let Some(account) = accounts.get_mut(&address) {
                        account.self_destructed = prev;
                    }
                }
                JournalEntry::TouchChange { address, prev } => {
                    if let Some(account) = accounts.get_mut(&address) {
                        account.touched = prev;
                    }
                }
                JournalEntry::RefundChange { prev } => {
                    *refund = prev;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
