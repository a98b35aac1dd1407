use crate::core::INITIAL_BLOCK_REWARD;
use crate::error::{BlockchainError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";
const DEFAULT_NODE_ID: &str = "2001";
const DEFAULT_DIFFICULTY_BITS: u32 = 16;
const DEFAULT_MAX_NONCE: u64 = u32::MAX as u64;
const DEFAULT_MAX_MINING_ATTEMPTS: u32 = 4;
const DEFAULT_TRANSACTION_THRESHOLD: usize = 2;

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const NODE_ID_KEY: &str = "NODE_ID";
const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY_BITS";

/// Node configuration. Built once at startup and handed to the chain,
/// the wallet store and the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub node_id: String,
    pub node_addr: String,
    pub central_node: String,
    pub mining_address: Option<String>,
    /// Leading zero bits a block hash needs; fixed for the life of the chain
    pub difficulty_bits: u32,
    pub subsidy: u64,
    /// Nonces tried per attempt before the search reports exhaustion
    pub max_nonce: u64,
    pub max_mining_attempts: u32,
    /// Pooled transactions needed before a mining node assembles a block
    pub transaction_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            node_id: String::from(DEFAULT_NODE_ID),
            node_addr: String::from(DEFAULT_NODE_ADDR),
            central_node: String::from(DEFAULT_NODE_ADDR),
            mining_address: None,
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            subsidy: INITIAL_BLOCK_REWARD,
            max_nonce: DEFAULT_MAX_NONCE,
            max_mining_attempts: DEFAULT_MAX_MINING_ATTEMPTS,
            transaction_threshold: DEFAULT_TRANSACTION_THRESHOLD,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&text)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.node_addr = addr;
        }
        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            self.node_id = node_id;
        }
        if let Ok(addr) = env::var(MINING_ADDRESS_KEY) {
            self.mining_address = Some(addr);
        }
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(bits) = env::var(DIFFICULTY_KEY) {
            self.difficulty_bits = bits.parse().map_err(|e| {
                BlockchainError::Config(format!("{DIFFICULTY_KEY} must be an integer: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty_bits == 0 || self.difficulty_bits >= 256 {
            return Err(BlockchainError::Config(format!(
                "difficulty_bits must be in 1..=255, got {}",
                self.difficulty_bits
            )));
        }
        if self.max_mining_attempts == 0 {
            return Err(BlockchainError::Config(
                "max_mining_attempts must be at least 1".to_string(),
            ));
        }
        if self.node_id.is_empty() {
            return Err(BlockchainError::Config("node_id must not be empty".to_string()));
        }
        Ok(())
    }

    /// Sled database directory for this node (./data/blocks_2001)
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("blocks_{}", self.node_id))
    }

    /// Wallet file for this node (./data/wallet_2001.dat)
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.dat", self.node_id))
    }

    pub fn is_miner(&self) -> bool {
        self.mining_address.is_some()
    }

    pub fn is_central_node(&self) -> bool {
        self.node_addr == self.central_node
    }

    /// Cheap settings for tests: rooted at `data_dir`, low difficulty
    pub fn for_testing(data_dir: &Path) -> Config {
        Config {
            data_dir: data_dir.to_path_buf(),
            difficulty_bits: 8,
            ..Config::default()
        }
    }
}
