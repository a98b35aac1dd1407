use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{BlockchainError, Result};

/// Addresses of the nodes this one has heard from, in the order they appeared.
pub struct PeerRegistry {
    inner: RwLock<Vec<String>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry {
            inner: RwLock::new(vec![]),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<String>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<String>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if `addr` was not known before
    pub fn add_peer(&self, addr: &str) -> bool {
        let mut inner = self.write();
        if inner.iter().any(|known| known == addr) {
            return false;
        }
        inner.push(addr.to_string());
        true
    }

    pub fn evict_peer(&self, addr: &str) {
        self.write().retain(|known| known != addr);
    }

    pub fn is_known(&self, addr: &str) -> bool {
        self.read().iter().any(|known| known == addr)
    }

    pub fn get_peers(&self) -> Vec<String> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| BlockchainError::Network(format!("Invalid address {addr}: {e}")))
}
