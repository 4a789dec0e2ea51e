//! Bundle types: atomic groups of transactions and their simulation
//! metadata.

use crate::primitives::transaction::SignedTransaction;
use alloy_primitives::{keccak256, Address, B256, U256};

/// An ordered group of transactions that must land together. Transactions
/// whose hash is listed in `reverting_tx_hashes` are allowed to fail
/// without sinking the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MevBundle {
    pub txs: Vec<SignedTransaction>,
    pub reverting_tx_hashes: Vec<B256>,
    /// Block this bundle was simulated against.
    pub block_number: u64,
}

impl MevBundle {
    pub fn new(txs: Vec<SignedTransaction>, block_number: u64) -> Self {
        Self {
            txs,
            reverting_tx_hashes: Vec::new(),
            block_number,
        }
    }

    pub fn with_reverting_tx_hashes(mut self, hashes: Vec<B256>) -> Self {
        self.reverting_tx_hashes = hashes;
        self
    }

    /// Identity of the bundle: hash over the ordered tx hashes.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.txs.len() * 32);
        for tx in &self.txs {
            buf.extend_from_slice(tx.hash().as_slice());
        }
        keccak256(&buf)
    }

    pub fn can_revert(&self, tx_hash: B256) -> bool {
        self.reverting_tx_hashes.contains(&tx_hash)
    }
}

/// A bundle plus the metadata the simulation pre-pass derived for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedBundle {
    pub bundle: MevBundle,
    /// Coinbase value earned per unit of gas; `None` when the bundle
    /// burned no gas and the price is undefined.
    pub mev_gas_price: Option<U256>,
    /// Total value received by the coinbase, fees included.
    pub total_eth: U256,
    pub total_gas_used: u64,
    pub profit: U256,
}

/// How a share-bundle transaction may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertBehavior {
    /// Failure sinks the whole bundle.
    NotAllowed,
    /// A reverted execution is kept in the block.
    AllowedIncluded,
    /// A failed or reverted transaction is dropped and iteration continues.
    AllowedExcluded,
}

impl RevertBehavior {
    pub fn can_revert(&self) -> bool {
        !matches!(self, RevertBehavior::NotAllowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareBundleTx {
    pub tx: SignedTransaction,
    pub revert: RevertBehavior,
}

/// Portion of a share bundle's coinbase profit owed back to its originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refund {
    /// Index into the bundle body the refund is attributed to.
    pub body_idx: usize,
    /// Percent of the measured profit to pay back.
    pub percent: u64,
}

/// A bundle whose originator is refunded a share of the profit it
/// produced, via a builder-signed payout transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareBundle {
    pub txs: Vec<ShareBundleTx>,
    pub refunds: Vec<Refund>,
    pub refund_recipient: Address,
    pub block_number: u64,
}

impl ShareBundle {
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.txs.len() * 32);
        for body in &self.txs {
            buf.extend_from_slice(body.tx.hash().as_slice());
        }
        keccak256(&buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedShareBundle {
    pub bundle: ShareBundle,
    pub mev_gas_price: Option<U256>,
    pub total_gas_used: u64,
    pub profit: U256,
}

/// Record of a share-bundle inclusion attempt, failures included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedShareBundle {
    pub bundle_hash: B256,
    pub success: bool,
}
