//! Order heap: price-sorted, per-sender nonce-ordered.
//!
//! Every includable unit of work is an [`Order`]: a plain transaction, a
//! simulated bundle or a simulated share bundle, with a uniform price key
//! (effective gas tip for transactions, mev gas price for bundles). Only
//! one transaction per sender is in the heap at a time; committing it
//! makes the sender's next-nonce transaction eligible.

use crate::primitives::{
    ChainSigner, Recovered, SignedTransaction, SimulatedBundle, SimulatedShareBundle,
};
use alloy_primitives::{Address, U256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use tracing::trace;

/// One includable unit of work. The set is closed; commit dispatch is a
/// match on the variant.
#[derive(Debug, Clone)]
pub enum Order {
    Tx(Recovered<SignedTransaction>),
    Bundle(SimulatedBundle),
    ShareBundle(SimulatedShareBundle),
}

impl Order {
    /// Primary ordering key.
    pub fn price(&self, base_fee: u64) -> U256 {
        match self {
            Order::Tx(tx) => U256::from(tx.effective_gas_tip(base_fee).unwrap_or_default()),
            Order::Bundle(sim) => sim.mev_gas_price.unwrap_or_default(),
            Order::ShareBundle(sim) => sim.mev_gas_price.unwrap_or_default(),
        }
    }

    /// Secondary key used inside a price bucket.
    pub fn profit_key(&self) -> U256 {
        match self {
            Order::Tx(tx) => tx.value,
            Order::Bundle(sim) => sim.total_eth,
            Order::ShareBundle(sim) => sim.profit,
        }
    }

    pub fn is_tx(&self) -> bool {
        matches!(self, Order::Tx(_))
    }
}

struct HeapEntry {
    price: U256,
    /// Insertion sequence; earlier insertions win price ties so the drain
    /// order is deterministic.
    seq: u64,
    order: Order,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.price
            .cmp(&other.price)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-heap over orders by price, with per-sender nonce queues feeding
/// plain transactions in one at a time.
pub struct OrdersByPriceAndNonce {
    heap: BinaryHeap<HeapEntry>,
    pending_txs: HashMap<Address, VecDeque<Recovered<SignedTransaction>>>,
    base_fee: u64,
    next_seq: u64,
}

impl OrdersByPriceAndNonce {
    /// Builds the heap from per-sender nonce-sorted transaction lists and
    /// pre-simulated bundles. Transactions that fail recovery drop the
    /// rest of their sender's list (the nonce chain is broken anyway);
    /// underpriced transactions are skipped.
    pub fn new(
        signer: &ChainSigner,
        txs_by_sender: BTreeMap<Address, Vec<SignedTransaction>>,
        bundles: Vec<SimulatedBundle>,
        share_bundles: Vec<SimulatedShareBundle>,
        base_fee: u64,
    ) -> Self {
        let mut this = Self {
            heap: BinaryHeap::new(),
            pending_txs: HashMap::new(),
            base_fee,
            next_seq: 0,
        };

        for (sender, txs) in txs_by_sender {
            let mut queue = VecDeque::with_capacity(txs.len());
            for tx in txs {
                match signer.recover(&tx) {
                    Ok(recovered) => queue.push_back(recovered),
                    Err(err) => {
                        trace!(target: "block_builder", %sender, %err, "dropping unrecoverable txs");
                        break;
                    }
                }
            }
            this.pending_txs.insert(sender, queue);
            this.push_next_tx(sender);
        }
        for sim in bundles {
            this.push(Order::Bundle(sim));
        }
        for sim in share_bundles {
            this.push(Order::ShareBundle(sim));
        }
        this
    }

    pub fn peek(&self) -> Option<&Order> {
        self.heap.peek().map(|entry| &entry.order)
    }

    pub fn pop(&mut self) -> Option<Order> {
        self.heap.pop().map(|entry| entry.order)
    }

    /// Replaces the top transaction with its sender's next-nonce one. A
    /// non-transaction top is simply dropped.
    pub fn shift(&mut self) {
        if let Some(entry) = self.heap.pop() {
            if let Order::Tx(tx) = entry.order {
                self.push_next_tx(tx.signer());
            }
        }
    }

    /// Re-arms a sender after `tx` was committed from outside the heap
    /// (the bucketed merge pops whole buckets before committing them).
    pub fn shift_and_push_by_account_for_tx(&mut self, tx: &Recovered<SignedTransaction>) {
        self.push_next_tx(tx.signer());
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn push(&mut self, order: Order) {
        let price = order.price(self.base_fee);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry { price, seq, order });
    }

    fn push_next_tx(&mut self, sender: Address) {
        let Some(queue) = self.pending_txs.get_mut(&sender) else {
            return;
        };
        while let Some(tx) = queue.pop_front() {
            if tx.effective_gas_tip(self.base_fee).is_none() {
                trace!(target: "block_builder", tx = %tx.hash(), "dropping underpriced tx");
                continue;
            }
            self.push(Order::Tx(tx));
            return;
        }
    }
}
