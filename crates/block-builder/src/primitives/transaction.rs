//! Transaction primitives and the signature recovery boundary.
//!
//! Transactions are EIP-1559 shaped: a fee cap, a priority fee and a
//! canonical RLP encoding that doubles as the signing payload. All
//! k256-dependent recovery logic is kept here so the rest of the crate only
//! sees [`Recovered`] values.

use alloy_primitives::{keccak256, Address, Bytes, Signature, TxKind, B256, U256};
use alloy_rlp::{BufMut, Encodable};
use std::ops::Deref;

/// An unsigned dynamic-fee transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: TxKind,
    pub value: U256,
    pub input: Bytes,
}

impl Transaction {
    fn rlp_fields_length(&self) -> usize {
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.input.length()
    }

    fn rlp_encode_fields(&self, out: &mut dyn BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
    }

    /// Hash of the unsigned payload; the message that gets signed.
    pub fn signature_hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// The tip this transaction pays on top of `base_fee`, capped by the
    /// priority fee. `None` when the fee cap does not cover the base fee;
    /// such transactions are unincludable and never enter the order heap.
    pub fn effective_gas_tip(&self, base_fee: u64) -> Option<u128> {
        let base_fee = u128::from(base_fee);
        if self.max_fee_per_gas < base_fee {
            return None;
        }
        Some(self.max_priority_fee_per_gas.min(self.max_fee_per_gas - base_fee))
    }

    /// Per-gas price actually charged to the sender: base fee plus tip.
    pub fn effective_gas_price(&self, base_fee: u64) -> Option<u128> {
        self.effective_gas_tip(base_fee)
            .map(|tip| u128::from(base_fee) + tip)
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut dyn BufMut) {
        alloy_rlp::Header {
            list: true,
            payload_length: self.rlp_fields_length(),
        }
        .encode(out);
        self.rlp_encode_fields(out);
    }

    fn length(&self) -> usize {
        let payload = self.rlp_fields_length();
        alloy_rlp::length_of_length(payload) + payload
    }
}

/// A signed transaction with its hash computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
    signature: Signature,
    hash: B256,
}

impl SignedTransaction {
    pub fn new(tx: Transaction, signature: Signature) -> Self {
        let mut this = Self {
            tx,
            signature,
            hash: B256::ZERO,
        };
        this.hash = keccak256(alloy_rlp::encode(&this));
        this
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Canonical wire bytes. Two transactions are the same transaction
    /// exactly when these bytes are equal.
    pub fn rlp_bytes(&self) -> Vec<u8> {
        alloy_rlp::encode(self)
    }

    fn rlp_fields_length(&self) -> usize {
        self.tx.rlp_fields_length()
            + self.signature.v().length()
            + self.signature.r().length()
            + self.signature.s().length()
    }
}

impl Encodable for SignedTransaction {
    fn encode(&self, out: &mut dyn BufMut) {
        alloy_rlp::Header {
            list: true,
            payload_length: self.rlp_fields_length(),
        }
        .encode(out);
        self.tx.rlp_encode_fields(out);
        self.signature.v().encode(out);
        self.signature.r().encode(out);
        self.signature.s().encode(out);
    }

    fn length(&self) -> usize {
        let payload = self.rlp_fields_length();
        alloy_rlp::length_of_length(payload) + payload
    }
}

impl Deref for SignedTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.tx
    }
}

/// Sender recovery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    #[error("transaction chain id {tx} does not match chain id {expected}")]
    WrongChainId { tx: u64, expected: u64 },
    #[error("invalid transaction signature")]
    InvalidSignature,
}

/// Chain-id-bound signature recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSigner {
    chain_id: u64,
}

impl ChainSigner {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Recovers the sender, rejecting transactions bound to another chain.
    pub fn recover(&self, tx: &SignedTransaction) -> Result<Recovered<SignedTransaction>, RecoveryError> {
        if tx.chain_id != self.chain_id {
            return Err(RecoveryError::WrongChainId {
                tx: tx.chain_id,
                expected: self.chain_id,
            });
        }
        let signer = tx
            .signature
            .recover_address_from_prehash(&tx.tx.signature_hash())
            .map_err(|_| RecoveryError::InvalidSignature)?;
        Ok(Recovered::new_unchecked(tx.clone(), signer))
    }
}

/// A value paired with its recovered sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered<T> {
    signer: Address,
    inner: T,
}

impl<T> Recovered<T> {
    /// Pairs a value with a sender address without re-deriving it.
    pub fn new_unchecked(inner: T, signer: Address) -> Self {
        Self { signer, inner }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for Recovered<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}
