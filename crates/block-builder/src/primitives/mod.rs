//! Core data types shared across the builder.

mod block;
mod bundle;
mod transaction;

pub use block::{BlockHeader, Receipt};
pub use bundle::{
    MevBundle, Refund, RevertBehavior, ShareBundle, ShareBundleTx, SimulatedBundle,
    SimulatedShareBundle, UsedShareBundle,
};
pub use transaction::{ChainSigner, Recovered, RecoveryError, SignedTransaction, Transaction};
