//! Account/storage store with a stack of revertible snapshots.
//!
//! The store is exclusively owned by one block-building task. Snapshots
//! nest strictly: opening one pushes a fresh journal, every mutator logs
//! the prior value of a field the first time it touches it, and the stack
//! can either revert (restore the exact pre-push map) or commit (squash
//! the journal into the layer beneath). Reverting or committing with an
//! empty stack is a caller bug and panics.

mod account;
mod journal;
mod root;

pub use account::Account;

use alloy_primitives::{Address, Bytes, B256, U256};
use journal::{Journal, JournalEntry};
use std::collections::BTreeMap;

/// Upper bound on snapshot nesting. Deep enough for any sane commit
/// pipeline; shallow enough to catch a leaked-snapshot loop early.
pub const MAX_SNAPSHOT_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("snapshot depth limit reached ({0})")]
    SnapshotLimitReached(usize),
}

/// The mutable account map plus its snapshot stack.
#[derive(Debug, Clone, Default)]
pub struct StateDb {
    accounts: BTreeMap<Address, Account>,
    refund: u64,
    snapshots: Vec<Journal>,
}

impl StateDb {
    pub fn new() -> Self {
        Self::default()
    }

    // --- reads; absent accounts read as zero ---

    pub fn exists(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    pub fn nonce(&self, address: Address) -> u64 {
        self.accounts
            .get(&address)
            .map(|a| a.nonce)
            .unwrap_or_default()
    }

    pub fn code(&self, address: Address) -> Bytes {
        self.accounts
            .get(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default()
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.accounts
            .get(&address)
            .map(|a| a.has_code())
            .unwrap_or(false)
    }

    pub fn storage(&self, address: Address, slot: U256) -> U256 {
        self.accounts
            .get(&address)
            .map(|a| a.storage_slot(slot))
            .unwrap_or_default()
    }

    pub fn has_self_destructed(&self, address: Address) -> bool {
        self.accounts
            .get(&address)
            .map(|a| a.self_destructed)
            .unwrap_or(false)
    }

    pub fn refund(&self) -> u64 {
        self.refund
    }

    // --- mutators; each logs the prior value before writing ---

    /// Creates the account if absent, journaling its prior non-existence.
    /// Creating over an existing account only marks it touched; the
    /// builder never re-creates live accounts.
    pub fn create_account(&mut self, address: Address) {
        self.touch(address);
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.touch(address);
        let prev = self.balance(address);
        self.log(JournalEntry::BalanceChange { address, prev });
        if let Some(account) = self.accounts.get_mut(&address) {
            account.balance = balance;
        }
    }

    pub fn add_balance(&mut self, address: Address, amount: U256) {
        let balance = self.balance(address).saturating_add(amount);
        self.set_balance(address, balance);
    }

    /// Caller guarantees sufficiency; the write saturates rather than
    /// wrapping if that guarantee is broken.
    pub fn sub_balance(&mut self, address: Address, amount: U256) {
        let prev = self.balance(address);
        debug_assert!(prev >= amount, "balance underflow on {address}");
        self.set_balance(address, prev.saturating_sub(amount));
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.touch(address);
        let prev = self.nonce(address);
        self.log(JournalEntry::NonceChange { address, prev });
        if let Some(account) = self.accounts.get_mut(&address) {
            account.nonce = nonce;
        }
    }

    pub fn set_code(&mut self, address: Address, code: Bytes) {
        self.touch(address);
        let prev = self.code(address);
        debug_assert!(prev.is_empty(), "code rewrite on {address}");
        self.log(JournalEntry::CodeChange { address, prev });
        if let Some(account) = self.accounts.get_mut(&address) {
            account.code = code;
        }
    }

    /// Writes a storage slot. A zero value clears the slot so that
    /// set-then-clear leaves no trace in the commitment.
    pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) {
        self.touch(address);
        let prev = self
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&slot).copied());
        self.log(JournalEntry::StorageChange {
            address,
            slot,
            prev,
        });
        if let Some(account) = self.accounts.get_mut(&address) {
            if value.is_zero() {
                account.storage.remove(&slot);
            } else {
                account.storage.insert(slot, value);
            }
        }
    }

    /// Marks the account self-destructed. Balance movement is the
    /// executor's job; the mark alone removes the account from the
    /// commitment.
    pub fn self_destruct(&mut self, address: Address) {
        self.touch(address);
        let prev = self.has_self_destructed(address);
        self.log(JournalEntry::SelfDestructChange { address, prev });
        if let Some(account) = self.accounts.get_mut(&address) {
            account.self_destructed = true;
        }
    }

    pub fn add_refund(&mut self, amount: u64) {
        let prev = self.refund;
        self.log(JournalEntry::RefundChange { prev });
        self.refund = prev.saturating_add(amount);
    }

    pub fn sub_refund(&mut self, amount: u64) {
        let prev = self.refund;
        debug_assert!(prev >= amount, "refund underflow");
        self.log(JournalEntry::RefundChange { prev });
        self.refund = prev.saturating_sub(amount);
    }

    // --- snapshots ---

    /// Pushes a fresh journal onto the stack.
    pub fn multi_tx_snapshot(&mut self) -> Result<(), StateError> {
        if self.snapshots.len() >= MAX_SNAPSHOT_DEPTH {
            return Err(StateError::SnapshotLimitReached(MAX_SNAPSHOT_DEPTH));
        }
        self.snapshots.push(Journal::default());
        Ok(())
    }

    /// Pops the top journal and restores every prior value, newest entry
    /// first. The account map afterwards is byte-exact what it was when
    /// the snapshot was opened.
    ///
    /// Panics when the stack is empty; a double revert is a caller bug.
    pub fn multi_tx_snapshot_revert(&mut self) {
        let journal = self
            .snapshots
            .pop()
            .expect("snapshot revert with empty stack");
        journal.revert(&mut self.accounts, &mut self.refund);
    }

    /// Pops the top journal and squashes it into the layer beneath. Keys
    /// both layers logged keep the lower layer's (older) prior value, so
    /// reverting the lower snapshot afterwards still restores its own
    /// pre-push state. Committing the bottom journal finalizes it.
    ///
    /// Panics when the stack is empty.
    pub fn multi_tx_snapshot_commit(&mut self) {
        let top = self
            .snapshots
            .pop()
            .expect("snapshot commit with empty stack");
        if let Some(below) = self.snapshots.last_mut() {
            below.absorb(top);
        }
    }

    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }

    /// Deterministic commitment over the current account map.
    /// Self-destructed accounts never contribute; empty accounts are
    /// excluded when `delete_empty_accounts` is set.
    pub fn intermediate_root(&self, delete_empty_accounts: bool) -> B256 {
        root::state_root(&self.accounts, delete_empty_accounts)
    }

    fn touch(&mut self, address: Address) {
        if !self.accounts.contains_key(&address) {
            self.log(JournalEntry::AccountCreated { address });
            self.accounts.insert(address, Account::default());
        }
        let touched = self
            .accounts
            .get(&address)
            .map(|a| a.touched)
            .unwrap_or(false);
        if !touched {
            self.log(JournalEntry::TouchChange {
                address,
                prev: touched,
            });
            if let Some(account) = self.accounts.get_mut(&address) {
                account.touched = true;
            }
        }
    }

    fn log(&mut self, entry: JournalEntry) {
        if let Some(journal) = self.snapshots.last_mut() {
            journal.record(entry);
        }
    }
}
