//! Deterministic reference executor.
//!
//! `HarnessVm` implements value transfers, contract deployment and a
//! built-in key/value harness contract with a fixed-width call encoding.
//! Costs are flat per operation, fees split the usual way (base fee
//! burned, tip to the coinbase), and every failure path reverts through
//! the state's own snapshot stack, which makes the executor honor the
//! self-revert requirement of the [`Evm`] trait by construction.

use crate::evm::{Evm, ExecutionError, ExecutionOutcome};
use crate::primitives::{BlockHeader, Recovered, SignedTransaction};
use crate::state::{StateDb, StateError, MAX_SNAPSHOT_DEPTH};
use alloy_primitives::{keccak256, Address, TxKind, U256};

pub const TX_GAS: u64 = 21_000;
pub const TX_CREATE_GAS: u64 = 32_000;
pub const DATA_ZERO_GAS: u64 = 4;
pub const DATA_NONZERO_GAS: u64 = 16;
pub const CODE_DEPOSIT_GAS: u64 = 200;
pub const SSTORE_SET_GAS: u64 = 20_000;
pub const SSTORE_UPDATE_GAS: u64 = 5_000;
pub const SELFDESTRUCT_GAS: u64 = 5_000;
pub const SSTORE_CLEAR_REFUND: u64 = 4_800;
/// At most a fifth of the gas actually burned can come back as refund.
pub const REFUND_QUOTIENT: u64 = 5;

/// Call tags understood by accounts that carry code. One tag byte,
/// fixed-width operands; anything else reverts.
pub const OP_CREATE_OBJECT: u8 = 0x00;
pub const OP_REVERT: u8 = 0x01;
pub const OP_RESET_OBJECT: u8 = 0x02;
pub const OP_CHANGE_STORAGE: u8 = 0x03;
pub const OP_CHANGE_BALANCE: u8 = 0x04;
pub const OP_SELF_DESTRUCT: u8 = 0x05;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HarnessOp {
    CreateObject { key: U256, value: U256 },
    Revert,
    ResetObject { key: U256 },
    ChangeStorage { key: U256, value: U256 },
    ChangeBalance { account: Address, value: U256 },
    SelfDestruct,
}

impl HarnessOp {
    fn decode(input: &[u8]) -> Option<Self> {
        let (&tag, operands) = input.split_first()?;
        match tag {
            OP_CREATE_OBJECT if operands.len() == 64 => Some(Self::CreateObject {
                key: word(&operands[..32]),
                value: word(&operands[32..]),
            }),
            OP_REVERT if operands.is_empty() => Some(Self::Revert),
            OP_RESET_OBJECT if operands.len() == 32 => Some(Self::ResetObject {
                key: word(operands),
            }),
            OP_CHANGE_STORAGE if operands.len() == 64 => Some(Self::ChangeStorage {
                key: word(&operands[..32]),
                value: word(&operands[32..]),
            }),
            OP_CHANGE_BALANCE if operands.len() == 52 => Some(Self::ChangeBalance {
                account: Address::from_slice(&operands[..20]),
                value: word(&operands[20..]),
            }),
            OP_SELF_DESTRUCT if operands.is_empty() => Some(Self::SelfDestruct),
            _ => None,
        }
    }
}

fn word(bytes: &[u8]) -> U256 {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(bytes);
    U256::from_be_bytes(buf)
}

/// Storage slot backing the harness contract's per-address balance map.
fn balance_map_slot(account: Address) -> U256 {
    U256::from_be_bytes(keccak256(account).0)
}

fn intrinsic_gas(input: &[u8], is_create: bool) -> u64 {
    let mut gas = TX_GAS;
    if is_create {
        gas += TX_CREATE_GAS;
    }
    for byte in input {
        gas += if *byte == 0 {
            DATA_ZERO_GAS
        } else {
            DATA_NONZERO_GAS
        };
    }
    gas
}

/// Deployment address: truncated hash of sender and pre-execution nonce.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut buf = [0u8; 28];
    buf[..20].copy_from_slice(sender.as_slice());
    buf[20..].copy_from_slice(&nonce.to_be_bytes());
    Address::from_slice(&keccak256(buf)[12..])
}

struct CallResult {
    success: bool,
    op_gas: u64,
    contract_address: Option<Address>,
}

/// The deterministic reference executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarnessVm;

impl HarnessVm {
    pub fn new() -> Self {
        Self
    }

    fn run_call(
        &self,
        state: &mut StateDb,
        tx: &Recovered<SignedTransaction>,
        sender: Address,
        nonce_before: u64,
    ) -> CallResult {
        match tx.to {
            TxKind::Create => {
                let contract = create_address(sender, nonce_before);
                state.create_account(contract);
                state.set_nonce(contract, 1);
                state.set_code(contract, tx.input.clone());
                if !tx.value.is_zero() {
                    state.sub_balance(sender, tx.value);
                    state.add_balance(contract, tx.value);
                }
                CallResult {
                    success: true,
                    op_gas: CODE_DEPOSIT_GAS * tx.input.len() as u64,
                    contract_address: Some(contract),
                }
            }
            TxKind::Call(to) => {
                if !tx.value.is_zero() {
                    state.sub_balance(sender, tx.value);
                    state.add_balance(to, tx.value);
                }
                if !state.has_code(to) {
                    // plain transfer; calldata is ignored
                    return CallResult {
                        success: true,
                        op_gas: 0,
                        contract_address: None,
                    };
                }
                let Some(op) = HarnessOp::decode(&tx.input) else {
                    return CallResult {
                        success: false,
                        op_gas: 0,
                        contract_address: None,
                    };
                };
                let op_gas = self.apply_op(state, to, sender, op);
                CallResult {
                    success: op_gas.is_some(),
                    op_gas: op_gas.unwrap_or(0),
                    contract_address: None,
                }
            }
        }
    }

    /// Applies one harness operation; `None` means the call reverted.
    fn apply_op(
        &self,
        state: &mut StateDb,
        contract: Address,
        caller: Address,
        op: HarnessOp,
    ) -> Option<u64> {
        match op {
            HarnessOp::CreateObject { key, value } => {
                state.set_storage(contract, key, value);
                Some(SSTORE_SET_GAS)
            }
            HarnessOp::Revert => None,
            HarnessOp::ResetObject { key } => {
                if !state.storage(contract, key).is_zero() {
                    state.add_refund(SSTORE_CLEAR_REFUND);
                }
                state.set_storage(contract, key, U256::ZERO);
                Some(SSTORE_UPDATE_GAS)
            }
            HarnessOp::ChangeStorage { key, value } => {
                state.set_storage(contract, key, value);
                Some(SSTORE_UPDATE_GAS)
            }
            HarnessOp::ChangeBalance { account, value } => {
                state.set_storage(contract, balance_map_slot(account), value);
                Some(SSTORE_SET_GAS)
            }
            HarnessOp::SelfDestruct => {
                let balance = state.balance(contract);
                state.self_destruct(contract);
                if !balance.is_zero() {
                    state.sub_balance(contract, balance);
                    state.add_balance(caller, balance);
                }
                Some(SELFDESTRUCT_GAS)
            }
        }
    }
}

impl Evm for HarnessVm {
    fn execute(
        &self,
        state: &mut StateDb,
        header: &BlockHeader,
        tx: &Recovered<SignedTransaction>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let sender = tx.signer();
        let base_fee = header.base_fee;

        let gas_price = tx
            .effective_gas_price(base_fee)
            .ok_or(ExecutionError::FeeCapBelowBaseFee {
                fee_cap: tx.max_fee_per_gas,
                base_fee,
            })?;
        let tip = tx.effective_gas_tip(base_fee).unwrap_or_default();

        let state_nonce = state.nonce(sender);
        if tx.nonce < state_nonce {
            return Err(ExecutionError::NonceTooLow {
                tx: tx.nonce,
                state: state_nonce,
            });
        }
        if tx.nonce > state_nonce {
            return Err(ExecutionError::NonceTooHigh {
                tx: tx.nonce,
                state: state_nonce,
            });
        }

        let is_create = matches!(tx.to, TxKind::Create);
        let intrinsic = intrinsic_gas(&tx.input, is_create);
        if intrinsic > tx.gas_limit {
            return Err(ExecutionError::IntrinsicGasTooLow {
                needed: intrinsic,
                limit: tx.gas_limit,
            });
        }

        let max_cost = U256::from(gas_price)
            .saturating_mul(U256::from(tx.gas_limit))
            .saturating_add(tx.value);
        let balance = state.balance(sender);
        if balance < max_cost {
            return Err(ExecutionError::InsufficientFunds {
                cost: max_cost,
                balance,
            });
        }

        // The call scope needs one snapshot; make sure it is available
        // before mutating anything, so rejections stay side-effect free.
        if state.snapshot_depth() >= MAX_SNAPSHOT_DEPTH {
            return Err(StateError::SnapshotLimitReached(MAX_SNAPSHOT_DEPTH).into());
        }

        // Execution proper. The nonce bump and the fee charge survive a
        // revert; the call's effects do not.
        state.set_nonce(sender, tx.nonce + 1);

        // stale refund from the previous transaction in this scope
        let leftover_refund = state.refund();
        if leftover_refund != 0 {
            state.sub_refund(leftover_refund);
        }

        state
            .multi_tx_snapshot()
            .expect("snapshot capacity checked above");
        let call = self.run_call(state, tx, sender, tx.nonce);

        let mut success = call.success;
        let mut gas_used = intrinsic.saturating_add(call.op_gas);
        if gas_used > tx.gas_limit {
            success = false;
            gas_used = tx.gas_limit;
        }

        if success {
            let refund = state.refund().min(gas_used / REFUND_QUOTIENT);
            gas_used -= refund;
            state.multi_tx_snapshot_commit();
        } else {
            state.multi_tx_snapshot_revert();
        }

        state.sub_balance(sender, U256::from(gas_price).saturating_mul(U256::from(gas_used)));
        state.add_balance(header.coinbase, U256::from(tip).saturating_mul(U256::from(gas_used)));

        Ok(ExecutionOutcome {
            success,
            gas_used,
            contract_address: call.contract_address.filter(|_| success),
        })
    }
}
