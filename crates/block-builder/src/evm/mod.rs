//! The execution boundary.
//!
//! The builder never interprets bytecode itself; it hands a recovered
//! transaction and the live state to an [`Evm`] implementation. The one
//! hard requirement on implementations: a failing transaction must leave
//! the state exactly as it found it (self-revert), because the
//! shadow-buffer commit path performs no state rollback of its own.

mod vm;

pub use vm::{
    create_address, HarnessVm, DATA_NONZERO_GAS, DATA_ZERO_GAS, OP_CHANGE_BALANCE,
    OP_CHANGE_STORAGE, OP_CREATE_OBJECT, OP_RESET_OBJECT, OP_REVERT, OP_SELF_DESTRUCT, TX_GAS,
};

use crate::primitives::{BlockHeader, Recovered, SignedTransaction};
use crate::state::{StateDb, StateError};
use alloy_primitives::{Address, U256};

/// Result of applying one transaction.
///
/// `success == false` means the transaction executed, paid gas, bumped
/// the sender nonce, and reverted its own effects; it is still includable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub gas_used: u64,
    /// Deployment target, when the transaction created a contract.
    pub contract_address: Option<Address>,
}

/// Rejections that prevent a transaction from executing at all. No state
/// is modified when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("nonce too low: tx {tx}, state {state}")]
    NonceTooLow { tx: u64, state: u64 },
    #[error("nonce too high: tx {tx}, state {state}")]
    NonceTooHigh { tx: u64, state: u64 },
    #[error("intrinsic gas too low: needed {needed}, limit {limit}")]
    IntrinsicGasTooLow { needed: u64, limit: u64 },
    #[error("insufficient funds: cost {cost}, balance {balance}")]
    InsufficientFunds { cost: U256, balance: U256 },
    #[error("fee cap {fee_cap} below base fee {base_fee}")]
    FeeCapBelowBaseFee { fee_cap: u128, base_fee: u64 },
    #[error(transparent)]
    State(#[from] StateError),
}

/// Synchronous transaction execution against the builder's state.
pub trait Evm {
    /// Applies `tx` to `state` under `header`'s rules.
    ///
    /// On `Err` the state is untouched. On `Ok` the sender nonce, fee
    /// payment and (if `success`) all effects are committed; a reverted
    /// transaction has had its effects undone internally.
    fn execute(
        &self,
        state: &mut StateDb,
        header: &BlockHeader,
        tx: &Recovered<SignedTransaction>,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}
