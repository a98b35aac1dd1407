//! Data storage and persistence
//!
//! This module holds the unspent-output index (in memory and persisted in
//! sled) and the memory pool of transactions waiting to be mined.

pub mod memory_pool;
pub mod utxo_set;
pub mod utxo_view;

pub use memory_pool::MemoryPool;
pub use utxo_set::{UTXOSet, UtxoDelta};
pub use utxo_view::{replay, SpendableOutput, UtxoEntry, UtxoMap, UtxoView};
