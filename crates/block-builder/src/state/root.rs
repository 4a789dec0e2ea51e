//! Deterministic state commitment.
//!
//! Two-level keccak over the sorted account map: each account hashes its
//! sorted storage to a storage root, then its fields into a leaf; the
//! state root hashes the concatenated leaves. `BTreeMap` iteration order
//! makes the whole computation a pure function of the map.

use crate::state::account::Account;
use alloy_primitives::{keccak256, Address, B256, U256};
use std::collections::BTreeMap;

fn storage_root(storage: &BTreeMap<U256, U256>) -> B256 {
    let mut buf = Vec::with_capacity(storage.len() * 64);
    for (slot, value) in storage {
        if value.is_zero() {
            continue;
        }
        buf.extend_from_slice(&slot.to_be_bytes::<32>());
        buf.extend_from_slice(&value.to_be_bytes::<32>());
    }
    keccak256(&buf)
}

fn account_leaf(address: &Address, account: &Account) -> B256 {
    let mut buf = Vec::with_capacity(20 + 8 + 32 + 32 + 32);
    buf.extend_from_slice(address.as_slice());
    buf.extend_from_slice(&account.nonce.to_be_bytes());
    buf.extend_from_slice(&account.balance.to_be_bytes::<32>());
    buf.extend_from_slice(storage_root(&account.storage).as_slice());
    buf.extend_from_slice(keccak256(&account.code).as_slice());
    keccak256(&buf)
}

pub(crate) fn state_root(
    accounts: &BTreeMap<Address, Account>,
    delete_empty_accounts: bool,
) -> B256 {
    let mut buf = Vec::with_capacity(accounts.len() * 32);
    for (address, account) in accounts {
        if account.self_destructed {
            continue;
        }
        if delete_empty_accounts && account.is_empty() {
            continue;
        }
        buf.extend_from_slice(account_leaf(address, account).as_slice());
    }
    keccak256(&buf)
}
