//! Bundle simulation pre-pass.
//!
//! Runs a bundle against a clone of the environment to derive the
//! metadata the merge algorithms order and police by: total gas, total
//! value to the coinbase, the mev gas price and the expected profit. The
//! builder itself consumes [`SimulatedBundle`] values and never
//! re-simulates.

use crate::building::{ChainData, Environment, EnvironmentDiff, TxCommitError};
use crate::evm::Evm;
use crate::primitives::{
    MevBundle, RevertBehavior, ShareBundle, SimulatedBundle, SimulatedShareBundle,
};
use alloy_primitives::{B256, U256};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundleSimError {
    #[error("bundle tx {tx} failed in simulation: {source}")]
    TxFailed {
        tx: B256,
        #[source]
        source: TxCommitError,
    },
    #[error("bundle tx {0} reverted in simulation")]
    TxReverted(B256),
}

/// Simulates `bundle` on a fork of `env`. Fails the way the real commit
/// would: a non-revertible transaction failing or reverting sinks it.
pub fn simulate_bundle<E: Evm>(
    env: &Environment,
    bundle: MevBundle,
    chain: &ChainData,
    evm: &E,
) -> Result<SimulatedBundle, BundleSimError> {
    let mut fork = env.clone();
    let coinbase = fork.header.coinbase;
    let coinbase_before = fork.state.balance(coinbase);
    let gas_before = fork.gas_pool.gas();

    let mut diff = EnvironmentDiff::new(&mut fork);
    for tx in &bundle.txs {
        let hash = tx.hash();
        let (_, result) = diff.commit_tx(tx, chain, evm);
        match result {
            Ok(receipt) => {
                if !receipt.success && !bundle.can_revert(hash) {
                    return Err(BundleSimError::TxReverted(hash));
                }
            }
            Err(err) => {
                if bundle.can_revert(hash) {
                    trace!(target: "block_builder", tx = %hash, %err, "revertible tx dropped in simulation");
                    continue;
                }
                return Err(BundleSimError::TxFailed {
                    tx: hash,
                    source: err,
                });
            }
        }
    }
    diff.apply_to_base_env();

    let total_gas_used = gas_before - fork.gas_pool.gas();
    let total_eth = fork.state.balance(coinbase).saturating_sub(coinbase_before);
    let mev_gas_price = (total_gas_used > 0).then(|| total_eth / U256::from(total_gas_used));
    Ok(SimulatedBundle {
        bundle,
        mev_gas_price,
        total_eth,
        total_gas_used,
        profit: total_eth,
    })
}

/// Simulates a share bundle on a fork of `env`. Refund payouts are not
/// part of the simulation; the profit figure is the coinbase delta the
/// bundle body produces.
pub fn simulate_share_bundle<E: Evm>(
    env: &Environment,
    bundle: ShareBundle,
    chain: &ChainData,
    evm: &E,
) -> Result<SimulatedShareBundle, BundleSimError> {
    let mut fork = env.clone();
    let coinbase = fork.header.coinbase;
    let coinbase_before = fork.state.balance(coinbase);
    let gas_before = fork.gas_pool.gas();

    let mut diff = EnvironmentDiff::new(&mut fork);
    for body in &bundle.txs {
        let hash = body.tx.hash();
        let (_, result) = diff.commit_tx(&body.tx, chain, evm);
        match result {
            Ok(receipt) => {
                if !receipt.success && matches!(body.revert, RevertBehavior::NotAllowed) {
                    return Err(BundleSimError::TxReverted(hash));
                }
            }
            Err(err) => {
                if body.revert.can_revert() {
                    trace!(target: "block_builder", tx = %hash, %err, "revertible tx dropped in simulation");
                    continue;
                }
                return Err(BundleSimError::TxFailed {
                    tx: hash,
                    source: err,
                });
            }
        }
    }
    diff.apply_to_base_env();

    let total_gas_used = gas_before - fork.gas_pool.gas();
    let profit = fork.state.balance(coinbase).saturating_sub(coinbase_before);
    let mev_gas_price = (total_gas_used > 0).then(|| profit / U256::from(total_gas_used));
    Ok(SimulatedShareBundle {
        bundle,
        mev_gas_price,
        total_gas_used,
        profit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::HarnessVm;
    use crate::primitives::{BlockHeader, SignedTransaction, Transaction};
    use crate::state::StateDb;
    use alloy_primitives::{Address, Bytes, TxKind};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use std::collections::HashSet;

    const CHAIN_ID: u64 = 1;

    fn test_env(funded: &[Address]) -> Environment {
        let mut state = StateDb::new();
        for address in funded {
            state.set_balance(*address, U256::from(10u64).pow(U256::from(18u64)));
        }
        let header = BlockHeader {
            parent_hash: B256::ZERO,
            number: 1,
            timestamp: 1_700_000_000,
            gas_limit: 1_000_000,
            base_fee: 1,
            coinbase: Address::repeat_byte(0xc0),
        };
        Environment::new(header, CHAIN_ID, state)
    }

    fn transfer(key: &PrivateKeySigner, nonce: u64, tip: u128) -> SignedTransaction {
        let tx = Transaction {
            chain_id: CHAIN_ID,
            nonce,
            max_priority_fee_per_gas: tip,
            max_fee_per_gas: tip + 1,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(7)),
            value: U256::ZERO,
            input: Bytes::new(),
        };
        let signature = key.sign_hash_sync(&tx.signature_hash()).unwrap();
        SignedTransaction::new(tx, signature)
    }

    #[test]
    fn derives_gas_price_from_coinbase_value() {
        let key = PrivateKeySigner::random();
        let env = test_env(&[key.address()]);
        let chain = ChainData::new(CHAIN_ID, HashSet::new());

        let bundle = MevBundle::new(vec![transfer(&key, 0, 3), transfer(&key, 1, 3)], 1);
        let sim = simulate_bundle(&env, bundle, &chain, &HarnessVm::new()).unwrap();

        assert_eq!(sim.total_gas_used, 42_000);
        assert_eq!(sim.total_eth, U256::from(3 * 42_000u64));
        assert_eq!(sim.mev_gas_price, Some(U256::from(3u64)));
        // simulation never touches the caller's environment
        assert_eq!(env.tcount(), 0);
        assert_eq!(env.gas_pool().gas(), 1_000_000);
    }

    #[test]
    fn nonce_collision_fails_the_simulation() {
        let key = PrivateKeySigner::random();
        let env = test_env(&[key.address()]);
        let chain = ChainData::new(CHAIN_ID, HashSet::new());

        let bundle = MevBundle::new(vec![transfer(&key, 0, 3), transfer(&key, 0, 3)], 1);
        let err = simulate_bundle(&env, bundle, &chain, &HarnessVm::new()).unwrap_err();
        assert!(matches!(err, BundleSimError::TxFailed { .. }));
    }
}
