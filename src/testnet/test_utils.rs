//! Test utilities for chain testing

use crate::config::Config;
use crate::core::{Block, Blockchain};
use crate::error::{BlockchainError, Result};
use crate::storage::replay;
use crate::wallet::Wallet;
use tempfile::TempDir;

/// A chain in a temporary directory together with the wallet its genesis paid
pub struct TestChain {
    pub dir: TempDir,
    pub config: Config,
    pub chain: Blockchain,
    pub miner: Wallet,
}

pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// Fresh chain whose genesis reward belongs to a new wallet
pub fn create_test_chain() -> Result<TestChain> {
    let dir = create_temp_dir()?;
    let config = Config::for_testing(dir.path());
    let miner = Wallet::new()?;
    let chain = Blockchain::create_blockchain(&config, &miner.get_address())?;
    Ok(TestChain {
        dir,
        config,
        chain,
        miner,
    })
}

/// Mines a block holding nothing but a reward for `to`
pub fn mine_reward_block(chain: &Blockchain, to: &Wallet) -> Result<Block> {
    chain.mine_block_with_reward(&[], &to.get_address())
}

/// Fails if the persisted index differs from a replay of the chain
pub fn assert_index_matches_replay(chain: &Blockchain) {
    let replayed = replay(chain.blocks_from_genesis().unwrap()).unwrap();
    assert_eq!(chain.utxo_set().snapshot().unwrap(), replayed);
}
