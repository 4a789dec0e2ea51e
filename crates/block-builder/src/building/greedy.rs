//! Greedy merge of price-ordered orders into the environment.
//!
//! Two algorithms share the per-order commit logic. The strict variant
//! drains the heap in price order. The bucketed variant treats all orders
//! within `price_cutoff_percent` of the current best price as tied,
//! reorders each bucket by profit (bundles move, plain transactions keep
//! their slots), commits the bucket and looks again, since a committed
//! transaction can push its sender's next one back into the heap.

use crate::building::{
    AlgorithmConfig, BundleCommitError, ChainData, CommitMode, EnvChanges, Environment,
    EnvironmentDiff, MergeAlgorithm, Order, OrdersByPriceAndNonce, SkipCode, TxCommitError,
};
use crate::evm::Evm;
use crate::primitives::{
    Receipt, SignedTransaction, SimulatedBundle, SimulatedShareBundle, UsedShareBundle,
};
use crate::state::StateError;
use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::trace;

/// Result of one build run: the advanced environment plus the bundles
/// that actually landed.
pub struct BuildOutcome {
    pub env: Environment,
    pub used_bundles: Vec<SimulatedBundle>,
    pub used_share_bundles: Vec<UsedShareBundle>,
}

/// One-shot block builder. Construct it per block-building task, call
/// [`build_block`](Self::build_block), discard it.
pub struct GreedyBuilder<E: Evm> {
    evm: E,
    chain_data: ChainData,
    config: AlgorithmConfig,
    payout_signer: Option<PrivateKeySigner>,
    interrupt: Option<Arc<AtomicBool>>,
}

/// The commit unit a merge run drives. Closed set: the merge loop
/// dispatches by match, not by trait object.
enum CommitPath<'a> {
    Direct(EnvironmentDiff<'a>),
    Snapshots(EnvChanges<'a>),
}

impl<'a> CommitPath<'a> {
    fn base_fee(&self) -> u64 {
        match self {
            CommitPath::Direct(diff) => diff.base().header().base_fee,
            CommitPath::Snapshots(changes) => changes.env().header().base_fee,
        }
    }

    fn commit_tx<E: Evm>(
        &mut self,
        tx: &SignedTransaction,
        chain: &ChainData,
        evm: &E,
    ) -> (SkipCode, Result<Receipt, TxCommitError>) {
        match self {
            CommitPath::Direct(diff) => diff.commit_tx(tx, chain, evm),
            CommitPath::Snapshots(changes) => changes.commit_tx(tx, chain, evm),
        }
    }

    fn commit_bundle<E: Evm>(
        &mut self,
        sim: &SimulatedBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
        algo: &AlgorithmConfig,
    ) -> Result<(), BundleCommitError> {
        match self {
            CommitPath::Direct(diff) => diff.commit_bundle(sim, chain, evm, interrupt, algo),
            CommitPath::Snapshots(changes) => {
                changes.commit_bundle(sim, chain, evm, interrupt, algo)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_share_bundle<E: Evm>(
        &mut self,
        sim: &SimulatedShareBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
        algo: &AlgorithmConfig,
        payout_signer: Option<&PrivateKeySigner>,
    ) -> Result<(), BundleCommitError> {
        match self {
            CommitPath::Direct(diff) => {
                diff.commit_share_bundle(sim, chain, evm, interrupt, algo, payout_signer)
            }
            CommitPath::Snapshots(changes) => {
                changes.commit_share_bundle(sim, chain, evm, interrupt, algo, payout_signer)
            }
        }
    }

    fn apply(self) {
        match self {
            CommitPath::Direct(diff) => diff.apply_to_base_env(),
            CommitPath::Snapshots(changes) => changes.apply(),
        }
    }
}

/// Accumulates what landed; `stop` is raised on interruption.
#[derive(Default)]
struct MergeRun {
    used_bundles: Vec<SimulatedBundle>,
    used_share_bundles: Vec<UsedShareBundle>,
    stop: bool,
}

impl<E: Evm> GreedyBuilder<E> {
    pub fn new(
        evm: E,
        chain_data: ChainData,
        config: AlgorithmConfig,
        payout_signer: Option<PrivateKeySigner>,
        interrupt: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            evm,
            chain_data,
            config,
            payout_signer,
            interrupt,
        }
    }

    /// Merges the given orders into `env` and returns the advanced
    /// environment with the bundle usage record. The caller computes the
    /// final state root and seals the block.
    pub fn build_block(
        &self,
        mut env: Environment,
        bundles: Vec<SimulatedBundle>,
        share_bundles: Vec<SimulatedShareBundle>,
        txs_by_sender: BTreeMap<Address, Vec<SignedTransaction>>,
    ) -> Result<BuildOutcome, StateError> {
        let mut orders = OrdersByPriceAndNonce::new(
            env.signer(),
            txs_by_sender,
            bundles,
            share_bundles,
            env.header().base_fee,
        );

        let mut path = match self.config.commit_mode {
            CommitMode::Direct => CommitPath::Direct(EnvironmentDiff::new(&mut env)),
            CommitMode::Snapshots => CommitPath::Snapshots(EnvChanges::new(&mut env)?),
        };
        let mut run = MergeRun::default();
        match self.config.merge_algorithm {
            MergeAlgorithm::StrictPrice => self.merge_by_price(&mut path, &mut orders, &mut run),
            MergeAlgorithm::PriceBuckets => {
                self.merge_price_buckets(&mut path, &mut orders, &mut run)
            }
        }
        path.apply();

        Ok(BuildOutcome {
            env,
            used_bundles: run.used_bundles,
            used_share_bundles: run.used_share_bundles,
        })
    }

    /// Strict variant: drain the heap best-price-first.
    fn merge_by_price(
        &self,
        path: &mut CommitPath<'_>,
        orders: &mut OrdersByPriceAndNonce,
        run: &mut MergeRun,
    ) {
        while let Some(order) = orders.pop() {
            self.commit_order(path, orders, order, run);
            if run.stop {
                return;
            }
        }
    }

    /// Bucketed variant: gather every order within the price band, sort
    /// the bucket by profit, commit, repeat.
    fn merge_price_buckets(
        &self,
        path: &mut CommitPath<'_>,
        orders: &mut OrdersByPriceAndNonce,
        run: &mut MergeRun,
    ) {
        let base_fee = path.base_fee();
        let Some(first) = orders.peek() else {
            return;
        };
        let mut bucket_floor = self.bucket_floor(first.price(base_fee));
        let mut bucket: Vec<Order> = Vec::new();

        loop {
            let Some(price) = orders.peek().map(|order| order.price(base_fee)) else {
                if bucket.is_empty() {
                    break;
                }
                self.commit_bucket(path, orders, std::mem::take(&mut bucket), run);
                if run.stop {
                    return;
                }
                // committing may push higher-nonce txs back into the
                // heap, so look again before giving up
                continue;
            };

            if price > bucket_floor {
                if let Some(order) = orders.pop() {
                    bucket.push(order);
                }
            } else {
                if !bucket.is_empty() {
                    self.commit_bucket(path, orders, std::mem::take(&mut bucket), run);
                    if run.stop {
                        return;
                    }
                }
                // the straggler is reconsidered against the new floor
                bucket_floor = self.bucket_floor(price);
                // a floor at or above the price itself (zero price, or a
                // 100% cutoff) would never admit the order; take it as
                // its own bucket
                if price <= bucket_floor {
                    if let Some(order) = orders.pop() {
                        bucket.push(order);
                    }
                }
            }
        }
    }

    fn commit_bucket(
        &self,
        path: &mut CommitPath<'_>,
        orders: &mut OrdersByPriceAndNonce,
        bucket: Vec<Order>,
        run: &mut MergeRun,
    ) {
        for order in sort_orders_by_profit(bucket) {
            self.commit_order(path, orders, order, run);
            if run.stop {
                return;
            }
        }
    }

    /// Commits one order that has already been popped from the heap,
    /// steering the heap afterwards. Per-order failures are logged and
    /// skipped; only an interrupt stops the run.
    fn commit_order(
        &self,
        path: &mut CommitPath<'_>,
        orders: &mut OrdersByPriceAndNonce,
        order: Order,
        run: &mut MergeRun,
    ) {
        let interrupt = self.interrupt.as_deref();
        match order {
            Order::Tx(tx) => {
                let (skip, result) = path.commit_tx(tx.inner(), &self.chain_data, &self.evm);
                match skip {
                    SkipCode::ShiftTx => orders.shift_and_push_by_account_for_tx(&tx),
                    // the sender's head is gone either way; a commit that
                    // never judged the tx does not re-arm the sender
                    SkipCode::PopTx | SkipCode::NoChange => {}
                }
                match result {
                    Ok(receipt) => {
                        let tip = tx
                            .effective_gas_tip(path.base_fee())
                            .map(U256::from)
                            .unwrap_or_default();
                        trace!(
                            target: "block_builder",
                            tx = %tx.hash(),
                            egp = %tip,
                            gas_used = receipt.gas_used,
                            "included tx"
                        );
                    }
                    Err(err) => {
                        trace!(target: "block_builder", tx = %tx.hash(), %err, "could not apply tx");
                    }
                }
            }
            Order::Bundle(sim) => {
                match path.commit_bundle(&sim, &self.chain_data, &self.evm, interrupt, &self.config)
                {
                    Ok(()) => {
                        trace!(
                            target: "block_builder",
                            bundle = %sim.bundle.hash(),
                            gas_used = sim.total_gas_used,
                            "included bundle"
                        );
                        run.used_bundles.push(sim);
                    }
                    Err(BundleCommitError::Interrupted) => {
                        trace!(target: "block_builder", bundle = %sim.bundle.hash(), "merge interrupted");
                        run.stop = true;
                    }
                    Err(err) if err.is_expected() => {
                        trace!(target: "block_builder", bundle = %sim.bundle.hash(), %err, "skipping bundle");
                    }
                    Err(err) => {
                        trace!(target: "block_builder", bundle = %sim.bundle.hash(), %err, "could not apply bundle");
                    }
                }
            }
            Order::ShareBundle(sim) => {
                let hash = sim.bundle.hash();
                match path.commit_share_bundle(
                    &sim,
                    &self.chain_data,
                    &self.evm,
                    interrupt,
                    &self.config,
                    self.payout_signer.as_ref(),
                ) {
                    Ok(()) => {
                        trace!(target: "block_builder", bundle = %hash, "included share bundle");
                        run.used_share_bundles.push(UsedShareBundle {
                            bundle_hash: hash,
                            success: true,
                        });
                    }
                    Err(BundleCommitError::Interrupted) => {
                        trace!(target: "block_builder", bundle = %hash, "merge interrupted");
                        run.stop = true;
                    }
                    Err(err) => {
                        trace!(target: "block_builder", bundle = %hash, %err, "could not apply share bundle");
                        run.used_share_bundles.push(UsedShareBundle {
                            bundle_hash: hash,
                            success: false,
                        });
                    }
                }
            }
        }
    }

    fn bucket_floor(&self, price: U256) -> U256 {
        price * U256::from(self.config.price_cutoff_percent) / U256::from(100u64)
    }
}

/// Profit ordering inside a bucket, as a stable partition: bundle-like
/// orders sort by profit descending into the non-tx slots; plain
/// transactions never move, preserving their nonce order.
fn sort_orders_by_profit(bucket: Vec<Order>) -> Vec<Order> {
    let mut slots: Vec<Option<Order>> = bucket.into_iter().map(Some).collect();
    let mut positions = Vec::new();
    let mut movable = Vec::new();
    for (idx, slot) in slots.iter_mut().enumerate() {
        let is_tx = slot.as_ref().map(Order::is_tx).unwrap_or(true);
        if !is_tx {
            positions.push(idx);
            if let Some(order) = slot.take() {
                movable.push(order);
            }
        }
    }
    movable.sort_by(|a, b| b.profit_key().cmp(&a.profit_key()));
    for (idx, order) in positions.into_iter().zip(movable) {
        slots[idx] = Some(order);
    }
    slots.into_iter().flatten().collect()
}
