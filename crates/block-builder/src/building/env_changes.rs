//! Snapshot-backed commit unit.
//!
//! `EnvChanges` is the only commit path with true per-commit atomicity
//! including state. Construction opens a base snapshot that scopes the
//! unit's whole lifetime; each commit attempt nests one more snapshot and
//! either squashes it into the base (success) or reverts it (failure).
//! `apply` commits the base snapshot, the one authoritative squash for
//! this scope, and folds the pending environment fields into the base.
//! `discard` reverts the base snapshot instead, erasing every committed
//! effect.

use crate::building::{
    AlgorithmConfig, BundleCommitError, ChainData, Environment, PendingBlock, SkipCode,
    TxCommitError,
};
use crate::evm::{Evm, ExecutionError};
use crate::primitives::{Receipt, SignedTransaction, SimulatedBundle, SimulatedShareBundle};
use crate::state::StateError;
use alloy_primitives::U256;
use alloy_signer_local::PrivateKeySigner;
use std::sync::atomic::AtomicBool;

pub struct EnvChanges<'a> {
    env: &'a mut Environment,
    pending: PendingBlock,
}

impl<'a> EnvChanges<'a> {
    /// Opens the base snapshot and an empty pending block over `env`.
    pub fn new(env: &'a mut Environment) -> Result<Self, StateError> {
        env.state.multi_tx_snapshot()?;
        let pending = PendingBlock::for_env(env);
        Ok(Self { env, pending })
    }

    pub fn env(&self) -> &Environment {
        self.env
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

    /// Commits one transaction under its own nested snapshot: reverted on
    /// execution failure, squashed into the base snapshot on success. A
    /// snapshot that cannot even be opened is not the transaction's
    /// fault, so the heap is left alone.
    pub fn commit_tx<E: Evm>(
        &mut self,
        tx: &SignedTransaction,
        chain: &ChainData,
        evm: &E,
    ) -> (SkipCode, Result<Receipt, TxCommitError>) {
        if let Err(err) = self.env.state.multi_tx_snapshot() {
            return (SkipCode::NoChange, Err(ExecutionError::from(err).into()));
        }
        let (skip, result) = self.pending.commit_tx(self.env, tx, chain, evm);
        match &result {
            Ok(_) => self.env.state.multi_tx_snapshot_commit(),
            Err(_) => self.env.state.multi_tx_snapshot_revert(),
        }
        (skip, result)
    }

    /// Commits a bundle under one nested snapshot covering all of its
    /// transactions and post-checks.
    pub fn commit_bundle<E: Evm>(
        &mut self,
        sim: &SimulatedBundle,
        chain: &ChainData,
        evm: &E,
        interrupt: Option<&AtomicBool>,
        algo: &AlgorithmConfig,
    ) -> Result<(), BundleCommitError> {
        self.pending
            .commit_bundle(self.env, sim, chain, evm, interrupt, algo)
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
            .commit_share_bundle(self.env, sim, chain, evm, interrupt, algo, payout_signer)
    }

    /// Commits the base snapshot and folds the pending fields into the
    /// base environment. Stack depth decreases by exactly one.
    pub fn apply(self) {
        self.env.state.multi_tx_snapshot_commit();
        self.pending.fold_into(self.env);
    }

    /// Reverts the base snapshot, erasing every state effect this unit
    /// committed, and drops the pending fields.
    pub fn discard(self) {
        self.env.state.multi_tx_snapshot_revert();
    }
}
