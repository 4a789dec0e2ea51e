//! Block assembly: the environment accumulator, the two commit units and
//! the greedy merge algorithms.
//!
//! An [`Environment`] is the block under construction. Orders are
//! committed into it through one of two interchangeable units:
//! [`EnvironmentDiff`](env_diff::EnvironmentDiff), a shadow buffer that
//! writes state directly and buffers only environment-level fields, and
//! [`EnvChanges`](env_changes::EnvChanges), which additionally scopes all
//! state writes under a snapshot. Both must produce bit-identical results
//! for the same order sequence.

mod env_changes;
mod env_diff;
mod greedy;
mod ordering;
mod simulate;

pub use env_changes::EnvChanges;
pub use env_diff::EnvironmentDiff;
pub use greedy::{BuildOutcome, GreedyBuilder};
pub use ordering::{Order, OrdersByPriceAndNonce};
pub use simulate::{simulate_bundle, simulate_share_bundle, BundleSimError};

use crate::evm::{Evm, ExecutionError};
use crate::primitives::{
    BlockHeader, ChainSigner, Receipt, Recovered, RecoveryError, Refund, RevertBehavior,
    SignedTransaction, SimulatedBundle, SimulatedShareBundle, Transaction,
};
use crate::state::{StateDb, StateError};
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Gas limit of the payout transfer appended after a share bundle.
const PAYOUT_TX_GAS: u64 = 21_000;
/// A bundle may burn up to a tenth more gas than its simulation said.
const BUNDLE_GAS_TOLERANCE_QUOTIENT: u64 = 10;

/// Remaining gas budget of the block under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPool(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gas pool exhausted: have {have}, want {want}")]
pub struct GasPoolError {
    pub have: u64,
    pub want: u64,
}

impl GasPool {
    pub fn new(gas: u64) -> Self {
        Self(gas)
    }

    pub fn gas(&self) -> u64 {
        self.0
    }

    pub fn sub_gas(&mut self, amount: u64) -> Result<(), GasPoolError> {
        if amount > self.0 {
            return Err(GasPoolError {
                have: self.0,
                want: amount,
            });
        }
        self.0 -= amount;
        Ok(())
    }

    pub fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }
}

/// Chain-level inputs shared read-only across building tasks.
#[derive(Debug, Clone, Default)]
pub struct ChainData {
    pub chain_id: u64,
    pub blacklist: Arc<HashSet<Address>>,
}

impl ChainData {
    pub fn new(chain_id: u64, blacklist: HashSet<Address>) -> Self {
        Self {
            chain_id,
            blacklist: Arc::new(blacklist),
        }
    }

    pub fn is_blacklisted(&self, address: Address) -> bool {
        self.blacklist.contains(&address)
    }
}

/// Which merge loop the builder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeAlgorithm {
    /// Drain the heap in strict price order.
    StrictPrice,
    /// Treat orders within a price band as tied and reorder them by
    /// profit.
    PriceBuckets,
}

/// Which commit unit the builder drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitMode {
    /// Shadow-buffer diff; state writes land directly.
    Direct,
    /// Snapshot-backed changes; every commit is state-atomic.
    Snapshots,
}

/// Knobs of the merge algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AlgorithmConfig {
    /// Reject bundles whose measured profit falls below the simulated
    /// profit scaled by `profit_threshold_percent`.
    pub enforce_profit: bool,
    pub profit_threshold_percent: u64,
    /// Price-bucket floor factor: orders above `best × cutoff / 100` are
    /// considered tied with the best.
    pub price_cutoff_percent: u64,
    pub merge_algorithm: MergeAlgorithm,
    pub commit_mode: CommitMode,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            enforce_profit: false,
            profit_threshold_percent: 70,
            price_cutoff_percent: 90,
            merge_algorithm: MergeAlgorithm::StrictPrice,
            commit_mode: CommitMode::Direct,
        }
    }
}

/// Steers the order heap after a tx commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCode {
    /// Advance to the sender's next-nonce transaction.
    ShiftTx,
    /// Drop this sender's head entirely.
    PopTx,
    /// Leave the heap alone: the attempt failed for environmental
    /// reasons (snapshot capacity) before the transaction itself was
    /// ever judged.
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxCommitError {
    #[error("tx gas limit {gas} exceeds remaining gas pool {remaining}")]
    GasLimitExceeded { gas: u64, remaining: u64 },
    #[error("blacklisted address {0}")]
    BlacklistedAddress(Address),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundleCommitError {
    #[error("bundle mev gas price is not set")]
    MevGasPriceNotSet,
    #[error("bundle targets block {target}, building {block}")]
    TargetBlockMismatch { target: u64, block: u64 },
    #[error("bundle tx {tx} failed: {source}")]
    TxFailed {
        tx: B256,
        #[source]
        source: TxCommitError,
    },
    #[error("bundle tx {0} reverted")]
    TxReverted(B256),
    #[error("bundle used {actual} gas, simulated {simulated}")]
    GasUsedAboveSimulated { actual: u64, simulated: u64 },
    #[error("bundle profit {actual} below required share of expected {expected}")]
    LowProfit { expected: U256, actual: U256 },
    #[error("refund {available} cannot cover payout gas cost {required}")]
    NotEnoughRefundForGas { available: U256, required: U256 },
    #[error("payout of {value} to {to} failed")]
    PayoutFailed { to: Address, value: U256 },
    #[error("no payout signer configured")]
    NoPayoutSigner,
    #[error("bundle commit interrupted")]
    Interrupted,
    #[error(transparent)]
    State(#[from] StateError),
}

impl BundleCommitError {
    /// Failures that are part of normal operation; the merge loop skips
    /// them without noise.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            BundleCommitError::LowProfit { .. } | BundleCommitError::MevGasPriceNotSet
        )
    }
}

/// The block under construction: header, gas budget, accumulated profit
/// and the committed tx/receipt sequences. Mutated only by a commit
/// unit's `apply`.
#[derive(Debug, Clone)]
pub struct Environment {
    pub(crate) header: BlockHeader,
    pub(crate) signer: ChainSigner,
    pub(crate) state: StateDb,
    pub(crate) gas_pool: GasPool,
    pub(crate) profit: U256,
    pub(crate) tcount: usize,
    pub(crate) txs: Vec<Recovered<SignedTransaction>>,
    pub(crate) receipts: Vec<Receipt>,
}

impl Environment {
    pub fn new(header: BlockHeader, chain_id: u64, state: StateDb) -> Self {
        let gas_pool = GasPool::new(header.gas_limit);
        Self {
            signer: ChainSigner::new(chain_id),
            header,
            state,
            gas_pool,
            profit: U256::ZERO,
            tcount: 0,
            txs: Vec::new(),
            receipts: Vec::new(),
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn signer(&self) -> &ChainSigner {
        &self.signer
    }

    pub fn state(&self) -> &StateDb {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateDb {
        &mut self.state
    }

    pub fn gas_pool(&self) -> &GasPool {
        &self.gas_pool
    }

    pub fn profit(&self) -> U256 {
        self.profit
    }

    pub fn tcount(&self) -> usize {
        self.tcount
    }

    pub fn txs(&self) -> &[Recovered<SignedTransaction>] {
        &self.txs
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }
}

/// Environment-level effects buffered by a commit unit: everything a
/// commit touches except the state itself. Both commit units drive the
/// same pending block; they differ only in how they scope state writes.
#[derive(Debug, Clone)]
pub(crate) struct PendingBlock {
    gas_pool: GasPool,
    profit: U256,
    tcount: usize,
    cumulative_gas_used: u64,
    txs: Vec<Recovered<SignedTransaction>>,
    receipts: Vec<Receipt>,
}

struct PendingCheckpoint {
    gas: u64,
    profit: U256,
    tcount: usize,
    cumulative_gas_used: u64,
    txs_len: usize,
    receipts_len: usize,
}

impl PendingBlock {
    pub(crate) fn for_env(env: &Environment) -> Self {
        Self {
            gas_pool: env.gas_pool,
            profit: U256::ZERO,
            tcount: 0,
            cumulative_gas_used: env
                .receipts
                .last()
                .map(|r| r.cumulative_gas_used)
                .unwrap_or_default(),
            txs: Vec::new(),
            receipts: Vec::new(),
        }
    }

    pub(crate) fn gas_remaining(&self) -> u64 {
        self.gas_pool.gas()
    }

    pub(crate) fn profit(&self) -> U256 {
        self.profit
    }

    pub(crate) fn tcount(&self) -> usize {
        self.tcount
    }

    /// Folds every pending field into the base environment. The state is
    /// already there; only the bookkeeping moves.
    pub(crate) fn fold_into(self, env: &mut Environment) {
        env.gas_pool = self.gas_pool;
        env.profit = env.profit.saturating_add(self.profit);
        env.tcount += self.tcount;
        env.txs.extend(self.txs);
        env.receipts.extend(self.receipts);
    }

    /// Validates and executes one transaction, folding its effects into
    /// the pending fields on success. State writes go straight through to
    /// the environment's StateDb; a failing execution has already
    /// self-reverted inside the Evm.
    pub(crate) fn commit_tx<E: Evm>(
        &mut self,
        env: &mut Environment,
        tx: &SignedTransaction,
        chain: &ChainData,
        evm: &E,
    ) -> (SkipCode, Result<Receipt, TxCommitError>) {
        if tx.gas_limit > self.gas_pool.gas() {
            return (
                SkipCode::PopTx,
                Err(TxCommitError::GasLimitExceeded {
                    gas: tx.gas_limit,
                    remaining: self.gas_pool.gas(),
                }),
            );
        }

        let recovered = match env.signer.recover(tx) {
            Ok(recovered) => recovered,
            Err(err) => return (SkipCode::PopTx, Err(err.into())),
        };
        if chain.is_blacklisted(recovered.signer()) {
            return (
                SkipCode::PopTx,
                Err(TxCommitError::BlacklistedAddress(recovered.signer())),
            );
        }
        if let TxKind::Call(to) = tx.to {
            if chain.is_blacklisted(to) {
                return (SkipCode::PopTx, Err(TxCommitError::BlacklistedAddress(to)));
            }
        }

        let outcome = match evm.execute(&mut env.state, &env.header, &recovered) {
            Ok(outcome) => outcome,
            Err(err) => {
                // a stale nonce means the sender's next tx may still fit;
                // a state-level failure says nothing about the tx at all
                let skip = match err {
                    ExecutionError::NonceTooLow { .. } => SkipCode::ShiftTx,
                    ExecutionError::State(_) => SkipCode::NoChange,
                    _ => SkipCode::PopTx,
                };
                return (skip, Err(err.into()));
            }
        };

        self.gas_pool
            .sub_gas(outcome.gas_used)
            .expect("tx gas limit was checked against the pool");
        self.cumulative_gas_used += outcome.gas_used;

        let tip = tx.effective_gas_tip(env.header.base_fee).unwrap_or_default();
        self.profit = self
            .profit
            .saturating_add(U256::from(tip).saturating_mul(U256::from(outcome.gas_used)));

        let receipt = Receipt {
            tx_hash: tx.hash(),
            success: outcome.success,
            gas_used: outcome.gas_used,
            cumulative_gas_used: self.cumulative_gas_used,
            contract_address: outcome.contract_address,
        };
        self.tcount += 1;
        self.txs.push(recovered);
        self.receipts.push(receipt.clone());
        (SkipCode::ShiftTx, Ok(receipt))
    }

    /// Commits a bundle atomically: all state and pending effects of the
    /// attempt are rolled back on any failure, including the post-commit
    /// gas and profit checks.
    pub(crate) fn commit_bundle<E: Evm>(
        &mut self,
        env: &mut Environment,
        sim: &SimulatedBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
        algo: &AlgorithmConfig,
    ) -> Result<(), BundleCommitError> {
        if sim.mev_gas_price.is_none() {
            return Err(BundleCommitError::MevGasPriceNotSet);
        }
        if sim.bundle.block_number != env.header.number {
            return Err(BundleCommitError::TargetBlockMismatch {
                target: sim.bundle.block_number,
                block: env.header.number,
            });
        }

        let checkpoint = self.checkpoint();
        let coinbase = env.header.coinbase;
        let coinbase_before = env.state.balance(coinbase);
        let gas_before = self.gas_pool.gas();
        env.state.multi_tx_snapshot()?;

        let result = self
            .commit_bundle_txs(env, sim, chain, evm, interrupt)
            .and_then(|()| {
                let actual_gas_used = gas_before - self.gas_pool.gas();
                let allowed =
                    sim.total_gas_used + sim.total_gas_used / BUNDLE_GAS_TOLERANCE_QUOTIENT;
                if actual_gas_used > allowed {
                    return Err(BundleCommitError::GasUsedAboveSimulated {
                        actual: actual_gas_used,
                        simulated: sim.total_gas_used,
                    });
                }
                let actual_profit = env.state.balance(coinbase).saturating_sub(coinbase_before);
                enforce_profit_threshold(algo, sim.profit, actual_profit)?;
                Ok(actual_profit)
            });

        match result {
            Ok(actual_profit) => {
                env.state.multi_tx_snapshot_commit();
                // the measured coinbase delta supersedes the per-tx tips
                // accumulated inside the loop
                self.profit = checkpoint.profit.saturating_add(actual_profit);
                Ok(())
            }
            Err(err) => {
                env.state.multi_tx_snapshot_revert();
                self.restore(checkpoint);
                Err(err)
            }
        }
    }

    fn commit_bundle_txs<E: Evm>(
        &mut self,
        env: &mut Environment,
        sim: &SimulatedBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
    ) -> Result<(), BundleCommitError> {
        for tx in &sim.bundle.txs {
            if is_interrupted(interrupt) {
                return Err(BundleCommitError::Interrupted);
            }
            let hash = tx.hash();
            let (_, result) = self.commit_tx(env, tx, chain, evm);
            match result {
                Ok(receipt) => {
                    if !receipt.success && !sim.bundle.can_revert(hash) {
                        return Err(BundleCommitError::TxReverted(hash));
                    }
                }
                Err(err) => {
                    if sim.bundle.can_revert(hash) {
                        trace!(target: "block_builder", tx = %hash, %err, "skipping revertible bundle tx");
                        continue;
                    }
                    return Err(BundleCommitError::TxFailed {
                        tx: hash,
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }

    /// Commits a share bundle atomically and pays the declared refunds
    /// out of the measured coinbase profit via builder-signed transfers.
    pub(crate) fn commit_share_bundle<E: Evm>(
        &mut self,
        env: &mut Environment,
        sim: &SimulatedShareBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
        algo: &AlgorithmConfig,
        payout_signer: Option<&PrivateKeySigner>,
    ) -> Result<(), BundleCommitError> {
        if sim.mev_gas_price.is_none() {
            return Err(BundleCommitError::MevGasPriceNotSet);
        }
        if sim.bundle.block_number != env.header.number {
            return Err(BundleCommitError::TargetBlockMismatch {
                target: sim.bundle.block_number,
                block: env.header.number,
            });
        }

        let checkpoint = self.checkpoint();
        let coinbase = env.header.coinbase;
        let coinbase_before = env.state.balance(coinbase);
        env.state.multi_tx_snapshot()?;

        let result = self
            .commit_share_bundle_txs(env, sim, chain, evm, interrupt)
            .and_then(|()| {
                let profit = env.state.balance(coinbase).saturating_sub(coinbase_before);
                enforce_profit_threshold(algo, sim.profit, profit)?;
                self.pay_refunds(env, sim, chain, evm, payout_signer, profit)?;
                Ok(profit)
            });

        match result {
            Ok(profit) => {
                env.state.multi_tx_snapshot_commit();
                self.profit = checkpoint.profit.saturating_add(profit);
                Ok(())
            }
            Err(err) => {
                env.state.multi_tx_snapshot_revert();
                self.restore(checkpoint);
                Err(err)
            }
        }
    }

    fn commit_share_bundle_txs<E: Evm>(
        &mut self,
        env: &mut Environment,
        sim: &SimulatedShareBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
    ) -> Result<(), BundleCommitError> {
        for body in &sim.bundle.txs {
            if is_interrupted(interrupt) {
                return Err(BundleCommitError::Interrupted);
            }
            let hash = body.tx.hash();

            // own scope per tx so a dropped transaction leaves no trace
            let tx_checkpoint = self.checkpoint();
            env.state.multi_tx_snapshot()?;
            let (_, result) = self.commit_tx(env, &body.tx, chain, evm);
            match result {
                Ok(receipt) if receipt.success => {
                    env.state.multi_tx_snapshot_commit();
                }
                Ok(_) => match body.revert {
                    RevertBehavior::NotAllowed => {
                        env.state.multi_tx_snapshot_revert();
                        self.restore(tx_checkpoint);
                        return Err(BundleCommitError::TxReverted(hash));
                    }
                    RevertBehavior::AllowedIncluded => {
                        env.state.multi_tx_snapshot_commit();
                    }
                    RevertBehavior::AllowedExcluded => {
                        env.state.multi_tx_snapshot_revert();
                        self.restore(tx_checkpoint);
                        trace!(target: "block_builder", tx = %hash, "dropping reverted share bundle tx");
                    }
                },
                Err(err) => {
                    env.state.multi_tx_snapshot_revert();
                    self.restore(tx_checkpoint);
                    if body.revert.can_revert() {
                        trace!(target: "block_builder", tx = %hash, %err, "skipping failed share bundle tx");
                        continue;
                    }
                    return Err(BundleCommitError::TxFailed {
                        tx: hash,
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }

    fn pay_refunds<E: Evm>(
        &mut self,
        env: &mut Environment,
        sim: &SimulatedShareBundle,
        chain: &ChainData,
        evm: &E,
        payout_signer: Option<&PrivateKeySigner>,
        profit: U256,
    ) -> Result<(), BundleCommitError> {
        if sim.bundle.refunds.is_empty() {
            return Ok(());
        }
        let signer = payout_signer.ok_or(BundleCommitError::NoPayoutSigner)?;
        let payout_cost =
            U256::from(PAYOUT_TX_GAS).saturating_mul(U256::from(env.header.base_fee));

        for Refund { percent, .. } in &sim.bundle.refunds {
            let refund_value = profit.saturating_mul(U256::from(*percent)) / U256::from(100u64);
            if refund_value <= payout_cost {
                return Err(BundleCommitError::NotEnoughRefundForGas {
                    available: refund_value,
                    required: payout_cost,
                });
            }
            let to = sim.bundle.refund_recipient;
            let value = refund_value - payout_cost;
            let payout = build_payout_tx(env, chain, signer, to, value)
                .ok_or(BundleCommitError::PayoutFailed { to, value })?;
            let (_, result) = self.commit_tx(env, &payout, chain, evm);
            match result {
                Ok(receipt) if receipt.success => {}
                _ => return Err(BundleCommitError::PayoutFailed { to, value }),
            }
        }
        Ok(())
    }

    fn checkpoint(&self) -> PendingCheckpoint {
        PendingCheckpoint {
            gas: self.gas_pool.gas(),
            profit: self.profit,
            tcount: self.tcount,
            cumulative_gas_used: self.cumulative_gas_used,
            txs_len: self.txs.len(),
            receipts_len: self.receipts.len(),
        }
    }

    fn restore(&mut self, checkpoint: PendingCheckpoint) {
        self.gas_pool = GasPool::new(checkpoint.gas);
        self.profit = checkpoint.profit;
        self.tcount = checkpoint.tcount;
        self.cumulative_gas_used = checkpoint.cumulative_gas_used;
        self.txs.truncate(checkpoint.txs_len);
        self.receipts.truncate(checkpoint.receipts_len);
    }
}

fn enforce_profit_threshold(
    algo: &AlgorithmConfig,
    expected: U256,
    actual: U256,
) -> Result<(), BundleCommitError> {
    if !algo.enforce_profit {
        return Ok(());
    }
    let scaled_actual = actual.saturating_mul(U256::from(100u64));
    let scaled_expected = expected.saturating_mul(U256::from(algo.profit_threshold_percent));
    if scaled_actual < scaled_expected {
        return Err(BundleCommitError::LowProfit { expected, actual });
    }
    Ok(())
}

fn build_payout_tx(
    env: &Environment,
    chain: &ChainData,
    signer: &PrivateKeySigner,
    to: Address,
    value: U256,
) -> Option<SignedTransaction> {
    let tx = Transaction {
        chain_id: chain.chain_id,
        nonce: env.state.nonce(signer.address()),
        max_priority_fee_per_gas: 0,
        max_fee_per_gas: u128::from(env.header.base_fee),
        gas_limit: PAYOUT_TX_GAS,
        to: TxKind::Call(to),
        value,
        input: Bytes::new(),
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).ok()?;
    Some(SignedTransaction::new(tx, signature))
}

fn is_interrupted(interrupt: Option<&AtomicBool>) -> bool {
    interrupt
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}
