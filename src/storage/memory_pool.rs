use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// ( K -> txid_hex, V => Transaction ), drained in txid order
pub struct MemoryPool {
    inner: RwLock<BTreeMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    // A panicking holder cannot leave the map half-written, so keep going
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Transaction>> {
        self.inner.read().unwrap_or_else(|poisoned| {
            log::error!("Memory pool lock was poisoned");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Transaction>> {
        self.inner.write().unwrap_or_else(|poisoned| {
            log::error!("Memory pool lock was poisoned");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, txid_hex: &str) -> Option<Transaction> {
        self.read().get(txid_hex).cloned()
    }

    /// Returns false if the transaction was already pooled
    pub fn add(&self, tx: Transaction) -> bool {
        let key = HEXLOWER.encode(tx.get_id());
        let mut pool = self.write();
        if pool.contains_key(&key) {
            return false;
        }
        pool.insert(key, tx);
        true
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        self.read().contains_key(txid_hex)
    }

    pub fn remove(&self, txid_hex: &str) -> Option<Transaction> {
        self.write().remove(txid_hex)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        self.read().values().cloned().collect()
    }

    /// Empties the pool and hands back everything that was in it
    pub fn take_all(&self) -> Vec<Transaction> {
        std::mem::take(&mut *self.write()).into_values().collect()
    }
}
