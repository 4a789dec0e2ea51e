//! Block header and receipt types.

use alloy_primitives::{keccak256, Address, B256};
use alloy_rlp::RlpEncodable;

/// Header of the block under construction. Only the fields the state
/// engine reads; sealing is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable)]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub base_fee: u64,
    pub coinbase: Address,
}

impl BlockHeader {
    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }
}

/// Outcome of one committed transaction.
///
/// A receipt exists only for transactions that made it into the pending
/// block; invalid transactions are rejected before producing one. A
/// reverted transaction still commits (it paid gas) and carries
/// `success == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    /// Set for deployments: the address the code landed at.
    pub contract_address: Option<Address>,
}
