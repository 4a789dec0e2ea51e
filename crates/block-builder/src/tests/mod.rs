//! Cross-strategy comparison suite.
//!
//! Drives identical workloads through the three commit strategies
//! (shadow-buffer baseline, one snapshot per commit, nested snapshots)
//! and asserts they converge on the same root, gas pool, header hash,
//! profit, transaction bytes and receipts.

mod state_comparison;

use crate::building::{
    AlgorithmConfig, BundleCommitError, ChainData, EnvChanges, Environment, EnvironmentDiff,
    SkipCode, TxCommitError,
};
use crate::evm::Evm;
use crate::primitives::{BlockHeader, Receipt, SignedTransaction, SimulatedBundle, Transaction};
use crate::state::StateDb;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

pub(crate) const CHAIN_ID: u64 = 1;
pub(crate) const GAS_LIMIT: u64 = 30_000_000;
pub(crate) const BASE_FEE: u64 = 1;

/// Deterministic signing keys so every strategy context works over the
/// same addresses.
pub(crate) struct SignerList {
    pub keys: Vec<PrivateKeySigner>,
    pub addresses: Vec<Address>,
    pub nonces: Vec<u64>,
}

impl SignerList {
    pub fn new(count: usize) -> Self {
        let keys: Vec<PrivateKeySigner> = (1..=count as u8)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[31] = i;
                PrivateKeySigner::from_slice(&bytes).expect("nonzero key is valid")
            })
            .collect();
        let addresses = keys.iter().map(|key| key.address()).collect();
        Self {
            keys,
            addresses,
            nonces: vec![0; count],
        }
    }

    /// Signs with the tracked nonce and advances it.
    #[allow(clippy::too_many_arguments)]
    pub fn sign_tx(
        &mut self,
        from: usize,
        gas_limit: u64,
        tip: u128,
        fee_cap: u128,
        to: TxKind,
        value: U256,
        input: Bytes,
    ) -> SignedTransaction {
        let nonce = self.nonces[from];
        self.nonces[from] += 1;
        self.sign_tx_with_nonce(from, nonce, gas_limit, tip, fee_cap, to, value, input)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sign_tx_with_nonce(
        &self,
        from: usize,
        nonce: u64,
        gas_limit: u64,
        tip: u128,
        fee_cap: u128,
        to: TxKind,
        value: U256,
        input: Bytes,
    ) -> SignedTransaction {
        let tx = Transaction {
            chain_id: CHAIN_ID,
            nonce,
            max_priority_fee_per_gas: tip,
            max_fee_per_gas: fee_cap,
            gas_limit,
            to,
            value,
            input,
        };
        let signature = self.keys[from]
            .sign_hash_sync(&tx.signature_hash())
            .expect("signing cannot fail");
        SignedTransaction::new(tx, signature)
    }
}

pub(crate) fn genesis_state(signers: &SignerList) -> StateDb {
    let mut state = StateDb::new();
    for address in &signers.addresses {
        state.set_balance(*address, U256::from(10u64).pow(U256::from(18u64)));
    }
    state
}

pub(crate) fn test_header(gas_limit: u64, coinbase: Address) -> BlockHeader {
    BlockHeader {
        parent_hash: B256::ZERO,
        number: 1,
        timestamp: 1_700_000_000,
        gas_limit,
        base_fee: BASE_FEE,
        coinbase,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    Baseline,
    SingleSnapshot,
    MultiSnapshot,
}

/// One strategy's environment plus the drivers that commit through it
/// the way that strategy prescribes.
pub(crate) struct StrategyContext {
    pub name: &'static str,
    pub strategy: Strategy,
    pub env: Environment,
    pub chain: ChainData,
}

/// The three contexts over identical genesis state. The first signer's
/// address doubles as the coinbase.
pub(crate) fn strategy_contexts(gas_limit: u64, signers: &SignerList) -> Vec<StrategyContext> {
    let contexts = [
        ("baseline", Strategy::Baseline),
        ("single-snapshot", Strategy::SingleSnapshot),
        ("multi-snapshot", Strategy::MultiSnapshot),
    ];
    contexts
        .into_iter()
        .map(|(name, strategy)| {
            let header = test_header(gas_limit, signers.addresses[0]);
            let env = Environment::new(header, CHAIN_ID, genesis_state(signers));
            StrategyContext {
                name,
                strategy,
                env,
                chain: ChainData::new(CHAIN_ID, Default::default()),
            }
        })
        .collect()
}

impl StrategyContext {
    pub fn commit_tx<E: Evm>(
        &mut self,
        tx: &SignedTransaction,
        evm: &E,
    ) -> (SkipCode, Result<Receipt, TxCommitError>) {
        match self.strategy {
            Strategy::Baseline => {
                let mut diff = EnvironmentDiff::new(&mut self.env);
                let result = diff.commit_tx(tx, &self.chain, evm);
                diff.apply_to_base_env();
                result
            }
            Strategy::SingleSnapshot => {
                let mut changes = EnvChanges::new(&mut self.env).unwrap();
                let result = changes.commit_tx(tx, &self.chain, evm);
                changes.apply();
                result
            }
            Strategy::MultiSnapshot => {
                self.env.state_mut().multi_tx_snapshot().unwrap();
                let mut changes = EnvChanges::new(&mut self.env).unwrap();
                let result = changes.commit_tx(tx, &self.chain, evm);
                changes.apply();
                self.env.state_mut().multi_tx_snapshot_commit();
                result
            }
        }
    }

    pub fn commit_bundle<E: Evm>(
        &mut self,
        sim: &SimulatedBundle,
        algo: &AlgorithmConfig,
        evm: &E,
    ) -> Result<(), BundleCommitError> {
        match self.strategy {
            Strategy::Baseline => {
                let mut diff = EnvironmentDiff::new(&mut self.env);
                let result = diff.commit_bundle(sim, &self.chain, evm, None, algo);
                diff.apply_to_base_env();
                result
            }
            Strategy::SingleSnapshot => {
                let mut changes = EnvChanges::new(&mut self.env).unwrap();
                let result = changes.commit_bundle(sim, &self.chain, evm, None, algo);
                changes.apply();
                result
            }
            Strategy::MultiSnapshot => {
                self.env.state_mut().multi_tx_snapshot().unwrap();
                let mut changes = EnvChanges::new(&mut self.env).unwrap();
                let result = changes.commit_bundle(sim, &self.chain, evm, None, algo);
                changes.apply();
                self.env.state_mut().multi_tx_snapshot_commit();
                result
            }
        }
    }

    pub fn root(&self) -> B256 {
        self.env.state().intermediate_root(true)
    }
}

/// The central assertion: every context agrees with the first one on all
/// observable outputs.
pub(crate) fn assert_contexts_converge(contexts: &[StrategyContext]) {
    let reference = &contexts[0];
    for ctx in &contexts[1..] {
        assert_eq!(
            ctx.env.gas_pool().gas(),
            reference.env.gas_pool().gas(),
            "gas pool mismatch for {}",
            ctx.name
        );
        assert_eq!(
            ctx.env.header().hash(),
            reference.env.header().hash(),
            "header hash mismatch for {}",
            ctx.name
        );
        assert_eq!(
            ctx.env.profit(),
            reference.env.profit(),
            "profit mismatch for {}",
            ctx.name
        );
        assert_eq!(
            ctx.env.tcount(),
            reference.env.tcount(),
            "tx count mismatch for {}",
            ctx.name
        );
        assert_eq!(
            ctx.env.txs().len(),
            reference.env.txs().len(),
            "tx sequence length mismatch for {}",
            ctx.name
        );
        for (idx, (actual, expected)) in ctx
            .env
            .txs()
            .iter()
            .zip(reference.env.txs())
            .enumerate()
        {
            assert_eq!(
                actual.rlp_bytes(),
                expected.rlp_bytes(),
                "tx #{idx} bytes mismatch for {}",
                ctx.name
            );
        }
        assert_eq!(
            ctx.env.receipts(),
            reference.env.receipts(),
            "receipt sequence mismatch for {}",
            ctx.name
        );
        assert_eq!(
            ctx.root(),
            reference.root(),
            "state root mismatch for {}",
            ctx.name
        );
        assert_eq!(
            ctx.env.state().snapshot_depth(),
            0,
            "leaked snapshot in {}",
            ctx.name
        );
    }
}

// --- harness call builders ---

pub(crate) fn create_object_input(key: U256, value: U256) -> Bytes {
    let mut input = vec![crate::evm::OP_CREATE_OBJECT];
    input.extend_from_slice(&key.to_be_bytes::<32>());
    input.extend_from_slice(&value.to_be_bytes::<32>());
    input.into()
}

pub(crate) fn reset_object_input(key: U256) -> Bytes {
    let mut input = vec![crate::evm::OP_RESET_OBJECT];
    input.extend_from_slice(&key.to_be_bytes::<32>());
    input.into()
}

pub(crate) fn change_storage_input(key: U256, value: U256) -> Bytes {
    let mut input = vec![crate::evm::OP_CHANGE_STORAGE];
    input.extend_from_slice(&key.to_be_bytes::<32>());
    input.extend_from_slice(&value.to_be_bytes::<32>());
    input.into()
}

pub(crate) fn change_balance_input(account: Address, value: U256) -> Bytes {
    let mut input = vec![crate::evm::OP_CHANGE_BALANCE];
    input.extend_from_slice(account.as_slice());
    input.extend_from_slice(&value.to_be_bytes::<32>());
    input.into()
}

pub(crate) fn self_destruct_input() -> Bytes {
    Bytes::from_static(&[crate::evm::OP_SELF_DESTRUCT])
}
