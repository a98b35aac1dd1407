//! # Ledger Chain - a single-asset UTXO ledger with proof-of-work
//!
//! Notes for when I come back to this code.
//!
//! ## What is here
//! - **Transactions**: outputs locked to a public-key hash, inputs that unlock
//!   them with an ECDSA P-256 signature, a coinbase per block for the reward
//! - **Proof-of-work**: nonce search on a worker thread that can be aborted,
//!   retried with a fresh timestamp when the nonce range runs out
//! - **Chain**: blocks in Sled keyed by hash, a tip pointer, one writer at a time
//! - **UTXO index**: a derived cache next to the blocks, updated in the same
//!   transaction as every append and rebuildable from genesis at any time
//! - **Network**: JSON packages over TCP to relay transactions and blocks
//!
//! ## How the code is organized
//! - `core/`: blocks, transactions, mining and the chain itself
//! - `storage/`: the UTXO index (in memory and persisted) and the memory pool
//! - `wallet/`: key pairs and Base58Check addresses
//! - `network/`: peers and the node server
//! - `config/`: node settings from defaults, TOML and environment
//! - `utils/`: hashing, signatures and the bincode codec
//! - `cli/`: command-line parsing for the binary
//!
//! ## Where to start reading
//! 1. `core/transaction.rs` for building and validating transfers
//! 2. `core/blockchain.rs` for how blocks get appended
//! 3. `storage/utxo_view.rs` for `replay`, the definition of the UTXO index
//! 4. `core/proof_of_work.rs` for the mining loop

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testnet;

pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, BlockAcceptance, Blockchain, BlockchainIterator, ChainParams, MiningState,
    ProofOfWork, TXInput, TXOutput, Transaction,
};
pub use error::{BlockchainError, RejectReason, Result};
pub use network::{send_tx, Package, PeerRegistry, Server};
pub use storage::{replay, MemoryPool, UTXOSet, UtxoMap, UtxoView};
pub use wallet::{
    convert_address, decode_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
