//! Read access to unspent outputs, and the in-memory index produced by
//! replaying a chain.

use crate::core::{Block, TXOutput};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use std::collections::BTreeMap;

/// One unspent output together with where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableOutput {
    pub txid: Vec<u8>,
    pub index: usize,
    pub output: TXOutput,
}

/// Stored value per transaction id: the outputs of that transaction that are
/// still unspent, keyed by their original position.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UtxoEntry {
    pub index: usize,
    pub output: TXOutput,
}

/// Anything the transaction builder and validator can query for unspent outputs.
pub trait UtxoView {
    /// All unspent outputs locked to `pub_key_hash`, ascending by (txid, index)
    fn find_spendable(&self, pub_key_hash: &[u8]) -> Result<Vec<SpendableOutput>>;

    fn find_output(&self, txid: &[u8], index: usize) -> Result<Option<TXOutput>>;

    /// Takes outputs in `find_spendable` order until `amount` is covered or
    /// they run out; the caller compares the total against `amount`.
    fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, Vec<SpendableOutput>)> {
        let mut accumulated = 0u64;
        let mut selected = vec![];
        for spendable in self.find_spendable(pub_key_hash)? {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.saturating_add(spendable.output.get_value());
            selected.push(spendable);
        }
        Ok((accumulated, selected))
    }

    fn balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_spendable(pub_key_hash)?
            .iter()
            .fold(0u64, |total, s| total.saturating_add(s.output.get_value())))
    }
}

/// Unspent outputs held in memory, ordered by transaction id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoMap {
    entries: BTreeMap<Vec<u8>, Vec<UtxoEntry>>,
}

impl UtxoMap {
    pub fn new() -> UtxoMap {
        UtxoMap::default()
    }

    pub(crate) fn from_entries(entries: BTreeMap<Vec<u8>, Vec<UtxoEntry>>) -> UtxoMap {
        UtxoMap { entries }
    }

    pub fn get(&self, txid: &[u8]) -> Option<&[UtxoEntry]> {
        self.entries.get(txid).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<UtxoEntry>)> {
        self.entries.iter()
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> usize {
        self.entries.len()
    }

    /// Number of unspent outputs
    pub fn count_entries(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Removes the outputs each transaction spends, then adds its own outputs.
    /// Spending an output that is not present is an error and leaves the map
    /// partially updated; callers apply to a scratch copy.
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    self.spend(vin.get_txid(), vin.get_vout())?;
                }
            }

            if self.entries.contains_key(tx.get_id()) {
                return Err(BlockchainError::InvalidBlock(format!(
                    "transaction {} already has unspent outputs",
                    HEXLOWER.encode(tx.get_id())
                )));
            }
            let outs = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(index, output)| UtxoEntry {
                    index,
                    output: output.clone(),
                })
                .collect::<Vec<_>>();
            if !outs.is_empty() {
                self.entries.insert(tx.get_id().to_vec(), outs);
            }
        }
        Ok(())
    }

    fn spend(&mut self, txid: &[u8], index: usize) -> Result<()> {
        let missing = || {
            BlockchainError::InvalidBlock(format!(
                "spends missing output {}:{index}",
                HEXLOWER.encode(txid)
            ))
        };
        let outs = self.entries.get_mut(txid).ok_or_else(missing)?;
        let position = outs
            .iter()
            .position(|entry| entry.index == index)
            .ok_or_else(missing)?;
        outs.remove(position);
        if outs.is_empty() {
            self.entries.remove(txid);
        }
        Ok(())
    }
}

impl UtxoView for UtxoMap {
    fn find_spendable(&self, pub_key_hash: &[u8]) -> Result<Vec<SpendableOutput>> {
        let mut found = vec![];
        for (txid, outs) in &self.entries {
            for entry in outs {
                if entry.output.is_locked_with_key(pub_key_hash) {
                    found.push(SpendableOutput {
                        txid: txid.clone(),
                        index: entry.index,
                        output: entry.output.clone(),
                    });
                }
            }
        }
        Ok(found)
    }

    fn find_output(&self, txid: &[u8], index: usize) -> Result<Option<TXOutput>> {
        Ok(self.entries.get(txid).and_then(|outs| {
            outs.iter()
                .find(|entry| entry.index == index)
                .map(|entry| entry.output.clone())
        }))
    }
}

/// Rebuilds the unspent set from blocks given genesis first.
pub fn replay<I>(blocks: I) -> Result<UtxoMap>
where
    I: IntoIterator<Item = Block>,
{
    let mut utxo = UtxoMap::new();
    for block in blocks {
        utxo.apply_block(&block)?;
    }
    Ok(utxo)
}
