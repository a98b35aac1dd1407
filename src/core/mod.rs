//! Core ledger functionality
//!
//! Blocks, transactions and their locking rules, the proof-of-work engine
//! and the persisted chain.

pub mod block;
pub mod blockchain;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{BlockAcceptance, Blockchain, BlockchainIterator, ChainParams};
pub use monetary::{INITIAL_BLOCK_REWARD, SATOSHIS_PER_COIN};
pub use proof_of_work::{MiningJob, MiningState, ProofOfWork};
pub use transaction::{TXInput, TXOutput, Transaction};
