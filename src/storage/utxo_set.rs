use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::storage::utxo_view::{replay, SpendableOutput, UtxoEntry, UtxoMap, UtxoView};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{error, info};
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Tree;
use std::collections::{BTreeMap, BTreeSet};

pub(crate) const UTXO_TREE: &str = "chainstate";

/// Key writes and removals that move the persisted index past one block.
#[derive(Debug, Default)]
pub struct UtxoDelta {
    written: Vec<(Vec<u8>, Vec<u8>)>,
    removed: Vec<Vec<u8>>,
}

impl UtxoDelta {
    pub(crate) fn apply(
        &self,
        tree: &TransactionalTree,
    ) -> ConflictableTransactionResult<(), BlockchainError> {
        for key in &self.removed {
            tree.remove(key.as_slice())?;
        }
        for (key, value) in &self.written {
            tree.insert(key.as_slice(), value.as_slice())?;
        }
        Ok(())
    }
}

/// The persisted unspent-output index (`txid -> Vec<UtxoEntry>`) kept in the
/// chain's database. Derived state: [`UTXOSet::reindex`] rebuilds it from the
/// blocks at any time.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn tree(&self) -> &Tree {
        self.blockchain.chainstate()
    }

    fn read_entries(&self, txid: &[u8]) -> Result<Option<Vec<UtxoEntry>>> {
        match self.tree().get(txid)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Rebuilds the index by replaying the chain from genesis. Stale keys are
    /// removed in the same batch that writes the replayed entries, so readers
    /// see either the old index or the new one. Returns the number of unspent
    /// outputs.
    pub fn reindex(&self) -> Result<usize> {
        let _guard = self.blockchain.lock_appends();
        let utxo = replay(self.blockchain.blocks_from_genesis()?)?;

        let tree = self.tree();
        let mut batch = sled::Batch::default();
        for key in tree.iter().keys() {
            let key = key?;
            if utxo.get(key.as_ref()).is_none() {
                batch.remove(key);
            }
        }
        for (txid, outs) in utxo.iter() {
            batch.insert(txid.as_slice(), serialize(outs)?);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;

        let count = utxo.count_entries();
        info!(
            "Reindexed UTXO set: {count} unspent outputs across {} transactions",
            utxo.count_transactions()
        );
        Ok(count)
    }

    /// Computes the index changes for appending `block` without writing them.
    /// Loads only the keys the block touches and runs the same transition as
    /// a full replay over them.
    pub fn plan_update(&self, block: &Block) -> Result<UtxoDelta> {
        let mut touched = BTreeSet::new();
        for tx in block.get_transactions() {
            touched.insert(tx.get_id().to_vec());
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    touched.insert(vin.get_txid().to_vec());
                }
            }
        }

        let mut loaded = BTreeMap::new();
        for txid in &touched {
            if let Some(outs) = self.read_entries(txid)? {
                loaded.insert(txid.clone(), outs);
            }
        }
        let mut scratch = UtxoMap::from_entries(loaded);
        scratch.apply_block(block).map_err(|e| {
            BlockchainError::IndexDivergence(format!(
                "block {} cannot be applied to the index: {e}",
                HEXLOWER.encode(block.get_hash())
            ))
        })?;

        let mut delta = UtxoDelta::default();
        for txid in touched {
            match scratch.get(&txid) {
                Some(outs) => delta.written.push((txid, serialize(&outs.to_vec())?)),
                None => delta.removed.push(txid),
            }
        }
        Ok(delta)
    }

    /// Applies one appended block to the index. The chain already does this
    /// as part of every append; calling it again for the same block fails.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.blockchain.lock_appends();
        let delta = self.plan_update(block)?;
        self.tree().transaction(|tree| delta.apply(tree))?;
        Ok(())
    }

    pub(crate) fn has_outputs_of(&self, txid: &[u8]) -> Result<bool> {
        Ok(self.tree().contains_key(txid)?)
    }

    /// Current index contents
    pub fn snapshot(&self) -> Result<UtxoMap> {
        let mut entries = BTreeMap::new();
        for item in self.tree().iter() {
            let (k, v) = item?;
            let outs: Vec<UtxoEntry> = deserialize(v.as_ref())?;
            entries.insert(k.to_vec(), outs);
        }
        Ok(UtxoMap::from_entries(entries))
    }

    /// Compares the index with a fresh replay of the chain.
    pub fn verify_consistency(&self) -> Result<()> {
        let _guard = self.blockchain.lock_appends();
        let expected = replay(self.blockchain.blocks_from_genesis()?)?;
        let actual = self.snapshot()?;
        if expected != actual {
            error!(
                "UTXO index holds {} outputs but chain replay yields {}",
                actual.count_entries(),
                expected.count_entries()
            );
            return Err(BlockchainError::IndexDivergence(format!(
                "index has {} outputs in {} transactions, replay has {} in {}",
                actual.count_entries(),
                actual.count_transactions(),
                expected.count_entries(),
                expected.count_transactions()
            )));
        }
        Ok(())
    }

    /// Number of unspent outputs tracked
    pub fn count_entries(&self) -> Result<usize> {
        let mut counter = 0;
        for item in self.tree().iter() {
            let (_, v) = item?;
            let outs: Vec<UtxoEntry> = deserialize(v.as_ref())?;
            counter += outs.len();
        }
        Ok(counter)
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<usize> {
        Ok(self.tree().len())
    }
}

impl UtxoView for UTXOSet {
    fn find_spendable(&self, pub_key_hash: &[u8]) -> Result<Vec<SpendableOutput>> {
        let mut found = vec![];
        // sled iterates keys in ascending order
        for item in self.tree().iter() {
            let (k, v) = item?;
            let outs: Vec<UtxoEntry> = deserialize(v.as_ref())?;
            for entry in outs {
                if entry.output.is_locked_with_key(pub_key_hash) {
                    found.push(SpendableOutput {
                        txid: k.to_vec(),
                        index: entry.index,
                        output: entry.output,
                    });
                }
            }
        }
        Ok(found)
    }

    fn find_output(&self, txid: &[u8], index: usize) -> Result<Option<TXOutput>> {
        Ok(self.read_entries(txid)?.and_then(|outs| {
            outs.into_iter()
                .find(|entry| entry.index == index)
                .map(|entry| entry.output)
        }))
    }
}
