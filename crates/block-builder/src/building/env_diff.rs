//! Shadow-buffer commit unit.
//!
//! The diff buffers environment-level effects (gas pool, profit, tx and
//! receipt sequences) and folds them into the base environment in one
//! shot. State writes are NOT buffered: they land directly in the
//! environment's StateDb as each transaction executes. A single failing
//! transaction is safe because the Evm self-reverts it; bundles get their
//! atomicity from a snapshot scoped inside `commit_bundle`. What the diff
//! can never do is undo a *successful* commit; callers that need that use
//! [`EnvChanges`](super::EnvChanges).

use crate::building::{
    AlgorithmConfig, BundleCommitError, ChainData, Environment, PendingBlock, SkipCode,
    TxCommitError,
};
use crate::evm::Evm;
use crate::primitives::{Receipt, SignedTransaction, SimulatedBundle, SimulatedShareBundle};
use alloy_primitives::U256;
use alloy_signer_local::PrivateKeySigner;
use std::sync::atomic::AtomicBool;

pub struct EnvironmentDiff<'a> {
    base: &'a mut Environment,
    pending: PendingBlock,
}

impl<'a> EnvironmentDiff<'a> {
    pub fn new(base: &'a mut Environment) -> Self {
        let pending = PendingBlock::for_env(base);
        Self { base, pending }
    }

    pub fn base(&self) -> &Environment {
        self.base
    }

    pub fn gas_remaining(&self) -> u64 {
        self.pending.gas_remaining()
    }

    pub fn pending_profit(&self) -> U256 {
        self.pending.profit()
    }

    pub fn pending_tx_count(&self) -> usize {
        self.pending.tcount()
    }

    /// Commits one transaction. The returned skip code tells the order
    /// heap how to advance regardless of whether the commit succeeded.
    pub fn commit_tx<E: Evm>(
        &mut self,
        tx: &SignedTransaction,
        chain: &ChainData,
        evm: &E,
    ) -> (SkipCode, Result<Receipt, TxCommitError>) {
        self.pending.commit_tx(self.base, tx, chain, evm)
    }

    /// Commits a bundle; on any failure the attempt is fully rolled back
    /// and the diff is unchanged.
    pub fn commit_bundle<E: Evm>(
        &mut self,
        sim: &SimulatedBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
        algo: &AlgorithmConfig,
    ) -> Result<(), BundleCommitError> {
        self.pending
            .commit_bundle(self.base, sim, chain, evm, interrupt, algo)
    }

    pub fn commit_share_bundle<E: Evm>(
        &mut self,
        sim: &SimulatedShareBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
        algo: &AlgorithmConfig,
        payout_signer: Option<&PrivateKeySigner>,
    ) -> Result<(), BundleCommitError> {
        self.pending
            .commit_share_bundle(self.base, sim, chain, evm, interrupt, algo, payout_signer)
    }

    /// Folds all pending effects into the base environment, consuming the
    /// diff. Dropping the diff instead discards the pending effects (the
    /// state writes of successful commits stay, as documented above).
    pub fn apply_to_base_env(self) {
        self.pending.fold_into(self.base);
    }
}
