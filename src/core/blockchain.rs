// The chain manager. Blocks live in a sled tree keyed by hash, with one extra
// key pointing at the tip. The UTXO index sits in a second tree of the same
// database; every append writes block, tip and index delta in one transaction.

use crate::config::Config;
use crate::core::proof_of_work::mine;
use crate::core::{Block, ProofOfWork, Transaction};
use crate::error::{BlockchainError, RejectReason, Result};
use crate::storage::utxo_set::UTXO_TREE;
use crate::storage::UTXOSet;
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{info, warn};
use sled::transaction::ConflictableTransactionResult;
use sled::{Db, Transactional, Tree};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const CHAIN_PARAMS_KEY: &str = "chain_params";
const BLOCKS_TREE: &str = "blocks";
const GENESIS_COINBASE_DATA: &str = "First transaction from genesis";

/// Consensus and mining knobs the chain is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub difficulty_bits: u32,
    pub subsidy: u64,
    pub max_nonce: u64,
    pub max_mining_attempts: u32,
}

impl From<&Config> for ChainParams {
    fn from(config: &Config) -> Self {
        ChainParams {
            difficulty_bits: config.difficulty_bits,
            subsidy: config.subsidy,
            max_nonce: config.max_nonce,
            max_mining_attempts: config.max_mining_attempts,
        }
    }
}

/// What happened to a block received from elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAcceptance {
    Appended,
    /// Already stored
    Duplicate,
    /// Does not extend the current tip
    Stale,
}

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    db: Db,
    blocks: Tree,
    chainstate: Tree,
    db_path: PathBuf,
    // Held across validate, mine, append and index update
    append_lock: Arc<Mutex<()>>,
    abort_mining: Arc<AtomicBool>,
    params: ChainParams,
}

impl Blockchain {
    /// Mines and stores a genesis block paying the subsidy to `genesis_address`.
    pub fn create_blockchain(config: &Config, genesis_address: &str) -> Result<Blockchain> {
        Self::create_blockchain_with_path(&config.db_path(), config.into(), genesis_address)
    }

    pub fn create_blockchain_with_path(
        db_path: &Path,
        params: ChainParams,
        genesis_address: &str,
    ) -> Result<Blockchain> {
        let (db, blocks, chainstate) = Self::open_trees(db_path)?;
        if blocks.contains_key(TIP_BLOCK_HASH_KEY)? {
            return Err(BlockchainError::AlreadyInitialized);
        }
        // Leftovers from an interrupted run; the index is rebuilt below
        chainstate.clear()?;
        blocks.insert(
            CHAIN_PARAMS_KEY,
            serialize(&(params.difficulty_bits, params.subsidy))?,
        )?;

        let chain = Blockchain {
            tip_hash: Arc::new(RwLock::new(vec![])),
            db,
            blocks,
            chainstate,
            db_path: db_path.to_path_buf(),
            append_lock: Arc::new(Mutex::new(())),
            abort_mining: Arc::new(AtomicBool::new(false)),
            params,
        };

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase = Transaction::new_coinbase_tx(
            genesis_address,
            GENESIS_COINBASE_DATA,
            chain.params.subsidy,
        )?;
        {
            let _guard = chain.lock_appends();
            let block = Block::new_block(vec![], &[coinbase], 0, chain.params.difficulty_bits)?;
            let block = chain.run_proof_of_work(block)?;
            chain.commit_block(&block)?;
            info!("Genesis block {} stored", HEXLOWER.encode(block.get_hash()));
        }
        Ok(chain)
    }

    /// Opens the chain stored for this node. Difficulty and subsidy are fixed
    /// when the chain is created and must match `config`.
    pub fn open(config: &Config) -> Result<Blockchain> {
        Self::open_with_path(&config.db_path(), config.into())
    }

    pub fn open_with_path(db_path: &Path, params: ChainParams) -> Result<Blockchain> {
        let (db, blocks, chainstate) = Self::open_trees(db_path)?;
        let tip_hash = blocks
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or(BlockchainError::ChainUninitialized)?
            .to_vec();
        Self::check_stored_params(&blocks, &params)?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            blocks,
            chainstate,
            db_path: db_path.to_path_buf(),
            append_lock: Arc::new(Mutex::new(())),
            abort_mining: Arc::new(AtomicBool::new(false)),
            params,
        })
    }

    fn check_stored_params(blocks: &Tree, params: &ChainParams) -> Result<()> {
        let bytes = blocks.get(CHAIN_PARAMS_KEY)?.ok_or_else(|| {
            BlockchainError::Database("Chain parameters are missing".to_string())
        })?;
        let (difficulty_bits, subsidy): (u32, u64) = deserialize(bytes.as_ref())?;
        if difficulty_bits != params.difficulty_bits || subsidy != params.subsidy {
            return Err(BlockchainError::Config(format!(
                "chain was created with difficulty_bits={difficulty_bits} and subsidy={subsidy}, \
                 got difficulty_bits={} and subsidy={}",
                params.difficulty_bits, params.subsidy
            )));
        }
        Ok(())
    }

    fn open_trees(db_path: &Path) -> Result<(Db, Tree, Tree)> {
        let db = sled::open(db_path).map_err(|e| {
            BlockchainError::Database(format!(
                "Failed to open database at {}: {e}",
                db_path.display()
            ))
        })?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let chainstate = db.open_tree(UTXO_TREE)?;
        Ok((db, blocks, chainstate))
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub(crate) fn chainstate(&self) -> &Tree {
        &self.chainstate
    }

    pub(crate) fn lock_appends(&self) -> MutexGuard<'_, ()> {
        self.append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self.tip_hash.write().unwrap_or_else(PoisonError::into_inner);
        *tip_hash = new_tip_hash.to_vec();
    }

    /// The persisted UTXO index of this chain
    pub fn utxo_set(&self) -> UTXOSet {
        UTXOSet::new(self.clone())
    }

    /// Validates `transactions`, mines a block holding them on top of the tip
    /// and appends it. The only path that produces new local blocks.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        let _guard = self.lock_appends();
        self.check_block_transactions(transactions)?;

        let height = self.get_best_height()? + 1;
        info!(
            "Mining block at height {height} with {} transactions",
            transactions.len()
        );
        let block = Block::new_block(
            self.get_tip_hash(),
            transactions,
            height,
            self.params.difficulty_bits,
        )?;
        let block = self.run_proof_of_work(block)?;
        self.commit_block(&block)?;

        info!(
            "Successfully mined block: {} (height {height})",
            HEXLOWER.encode(block.get_hash())
        );
        Ok(block)
    }

    /// Like [`Blockchain::mine_block`] with a coinbase paying the subsidy to
    /// `miner_address` placed first.
    pub fn mine_block_with_reward(
        &self,
        transactions: &[Transaction],
        miner_address: &str,
    ) -> Result<Block> {
        let coinbase = Transaction::new_coinbase_tx(miner_address, "", self.params.subsidy)?;
        let mut block_transactions = Vec::with_capacity(transactions.len() + 1);
        block_transactions.push(coinbase);
        block_transactions.extend_from_slice(transactions);
        self.mine_block(&block_transactions)
    }

    /// Appends a block mined elsewhere if it extends the tip. A local search
    /// on the same tip is abandoned first; stale blocks never interrupt it.
    pub fn accept_block(&self, block: &Block) -> Result<BlockAcceptance> {
        let block_hash = HEXLOWER.encode(block.get_hash());
        if self.blocks.contains_key(block.get_hash())? {
            info!("Ignoring duplicate block {block_hash}");
            return Ok(BlockAcceptance::Duplicate);
        }
        if !ProofOfWork::validate(block) {
            warn!("Refusing block {block_hash}: proof-of-work does not hold");
            return Err(BlockchainError::InvalidBlock(format!(
                "{block_hash} fails proof-of-work"
            )));
        }
        if block.get_difficulty() != self.params.difficulty_bits {
            return Err(BlockchainError::InvalidBlock(format!(
                "{block_hash} has difficulty {} but the chain requires {}",
                block.get_difficulty(),
                self.params.difficulty_bits
            )));
        }

        if !self.extends_tip(block) {
            return Ok(BlockAcceptance::Stale);
        }

        self.abort_mining.store(true, Ordering::SeqCst);
        let _guard = self.lock_appends();
        self.abort_mining.store(false, Ordering::SeqCst);

        // The tip may have moved while waiting for the lock
        if self.blocks.contains_key(block.get_hash())? {
            return Ok(BlockAcceptance::Duplicate);
        }
        if !self.extends_tip(block) {
            return Ok(BlockAcceptance::Stale);
        }
        let expected_height = self.get_best_height()? + 1;
        if block.get_height() != expected_height {
            return Err(BlockchainError::InvalidBlock(format!(
                "{block_hash} claims height {} on top of height {}",
                block.get_height(),
                expected_height - 1
            )));
        }

        self.check_block_transactions(block.get_transactions())?;
        self.commit_block(block)?;
        info!(
            "Accepted block {block_hash} at height {}",
            block.get_height()
        );
        Ok(BlockAcceptance::Appended)
    }

    fn extends_tip(&self, block: &Block) -> bool {
        let tip_hash = self.get_tip_hash();
        if block.get_prev_hash() == tip_hash.as_slice() {
            return true;
        }
        warn!(
            "Block {} does not extend tip {}",
            HEXLOWER.encode(block.get_hash()),
            HEXLOWER.encode(&tip_hash)
        );
        false
    }

    fn run_proof_of_work(&self, block: Block) -> Result<Block> {
        mine(
            block,
            self.params.max_nonce,
            self.params.max_mining_attempts,
            &self.abort_mining,
        )
    }

    /// Block-level rules on top of per-transaction validation: at most one
    /// coinbase paying no more than the subsidy, and no output spent twice.
    fn check_block_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let utxo = self.utxo_set();
        let mut coinbase_seen = false;
        let mut ids = HashSet::new();
        let mut spent = HashSet::new();

        for (idx, tx) in transactions.iter().enumerate() {
            let txid_hex = HEXLOWER.encode(tx.get_id());
            if !ids.insert(tx.get_id().to_vec()) {
                return Err(BlockchainError::rejected(
                    RejectReason::Malformed,
                    format!("{txid_hex} appears twice in the block"),
                ));
            }
            if utxo.has_outputs_of(tx.get_id())? {
                return Err(BlockchainError::rejected(
                    RejectReason::Malformed,
                    format!("{txid_hex} already has unspent outputs in the index"),
                ));
            }

            if tx.is_coinbase() {
                if coinbase_seen {
                    return Err(BlockchainError::rejected(
                        RejectReason::MultipleCoinbase,
                        format!("second coinbase {txid_hex} at position {idx}"),
                    ));
                }
                coinbase_seen = true;
                tx.check_id()?;
                let reward = tx.get_output_value()?;
                if reward > self.params.subsidy {
                    return Err(BlockchainError::rejected(
                        RejectReason::ExcessiveReward,
                        format!(
                            "coinbase {txid_hex} pays {reward}, subsidy is {}",
                            self.params.subsidy
                        ),
                    ));
                }
                continue;
            }

            if let Err(e) = tx.validate(&utxo) {
                warn!("Rejected transaction {txid_hex} at position {idx}: {e}");
                return Err(e);
            }
            for vin in tx.get_vin() {
                if !spent.insert((vin.get_txid().to_vec(), vin.get_vout())) {
                    return Err(BlockchainError::rejected(
                        RejectReason::DuplicateInput,
                        format!(
                            "output {}:{} already spent in this block",
                            HEXLOWER.encode(vin.get_txid()),
                            vin.get_vout()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Writes block, tip and UTXO delta atomically. Caller holds the append lock.
    fn commit_block(&self, block: &Block) -> Result<()> {
        let delta = self.utxo_set().plan_update(block)?;
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;

        (&self.blocks, &self.chainstate).transaction(
            |(blocks, chainstate)| -> ConflictableTransactionResult<(), BlockchainError> {
                blocks.insert(block_hash, block_data.as_slice())?;
                blocks.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                delta.apply(chainstate)?;
                Ok(())
            },
        )?;
        self.db.flush()?;
        self.set_tip_hash(block_hash);
        Ok(())
    }

    /// Blocks from the tip back to genesis
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.blocks.clone())
    }

    /// Every block in append order
    pub fn blocks_from_genesis(&self) -> Result<Vec<Block>> {
        let mut blocks = self.iterator().collect::<Result<Vec<_>>>()?;
        blocks.reverse();
        Ok(blocks)
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        match self.blocks.get(block_hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip_hash = self.get_tip_hash();
        let tip_block = self.get_block(&tip_hash)?.ok_or_else(|| {
            BlockchainError::Database(format!(
                "Tip block {} is missing",
                HEXLOWER.encode(&tip_hash)
            ))
        })?;
        Ok(tip_block.get_height())
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        for block in self.iterator() {
            let block = block?;
            if let Some(tx) = block.get_transactions().iter().find(|tx| tx.get_id() == txid) {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }

    /// Checks proof-of-work, difficulty, hash links and heights from genesis
    /// to tip.
    /// Returns the number of blocks checked.
    pub fn verify_chain(&self) -> Result<usize> {
        let blocks = self.blocks_from_genesis()?;
        let mut prev_hash: &[u8] = &[];
        for (height, block) in blocks.iter().enumerate() {
            let block_hash = HEXLOWER.encode(block.get_hash());
            if !ProofOfWork::validate(block) {
                return Err(BlockchainError::InvalidBlock(format!(
                    "{block_hash} fails proof-of-work"
                )));
            }
            if block.get_difficulty() != self.params.difficulty_bits {
                return Err(BlockchainError::InvalidBlock(format!(
                    "{block_hash} has difficulty {} but the chain requires {}",
                    block.get_difficulty(),
                    self.params.difficulty_bits
                )));
            }
            if block.get_prev_hash() != prev_hash {
                return Err(BlockchainError::InvalidBlock(format!(
                    "{block_hash} does not link to its predecessor"
                )));
            }
            if block.get_height() != height {
                return Err(BlockchainError::InvalidBlock(format!(
                    "{block_hash} stored at height {height} claims {}",
                    block.get_height()
                )));
            }
            if block.is_genesis()
                && (block.get_transactions().len() != 1 || block.coinbase_count() != 1)
            {
                return Err(BlockchainError::InvalidBlock(
                    "genesis must hold exactly one coinbase".to_string(),
                ));
            }
            prev_hash = block.get_hash();
        }
        Ok(blocks.len())
    }
}

pub struct BlockchainIterator {
    blocks: Tree,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, blocks: Tree) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            blocks,
        }
    }

    fn read_current(&self) -> Result<Block> {
        let data = self.blocks.get(&self.current_hash)?.ok_or_else(|| {
            BlockchainError::Database(format!(
                "Block {} is missing",
                HEXLOWER.encode(&self.current_hash)
            ))
        })?;
        Block::deserialize(data.as_ref())
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        match self.read_current() {
            Ok(block) => {
                self.current_hash = block.get_prev_hash().to_vec();
                Some(Ok(block))
            }
            Err(e) => {
                self.current_hash.clear();
                Some(Err(e))
            }
        }
    }
}
