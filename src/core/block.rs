use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    prev_hash: Vec<u8>, // empty only for genesis
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: u64,
    height: usize,
    difficulty: u32,
}

impl Block {
    /// Unmined block stamped with the current time. `hash` stays empty until
    /// the proof-of-work engine seals it.
    pub fn new_block(
        prev_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        difficulty: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        Ok(Block {
            timestamp: current_timestamp()?,
            prev_hash,
            hash: vec![],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
            difficulty,
        })
    }

    /// Moves the timestamp forward so an exhausted nonce range can be retried
    pub fn refresh_timestamp(&mut self) -> Result<()> {
        self.timestamp = current_timestamp()?.max(self.timestamp + 1);
        Ok(())
    }

    pub(crate) fn seal(&mut self, nonce: u64, hash: Vec<u8>) {
        self.nonce = nonce;
        self.hash = hash;
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_hash(&self) -> &[u8] {
        self.prev_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    pub fn coinbase_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.is_coinbase()).count()
    }

    /// Digest of the concatenated transaction ids, committed to by the header
    pub fn hash_transactions(&self) -> Vec<u8> {
        let mut txhashs = vec![];
        for transaction in &self.transactions {
            txhashs.extend(transaction.get_id());
        }

        sha256_digest(txhashs.as_slice())
    }

    #[cfg(test)]
    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }
}
