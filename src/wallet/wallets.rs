use crate::error::Result;
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Address -> key pair, persisted as one bincode file per node.
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<String, Wallet>,
}

impl Wallets {
    /// Opens the wallet file at `path`, starting empty if it does not exist yet
    pub fn load(path: &Path) -> Result<Wallets> {
        let wallets = if path.exists() {
            let bytes = fs::read(path)?;
            deserialize(&bytes)?
        } else {
            BTreeMap::new()
        };
        Ok(Wallets {
            path: path.to_path_buf(),
            wallets,
        })
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        log::info!("Created wallet {address}");
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&serialize(&self.wallets)?)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::validate_address;

    #[test]
    fn test_wallets_persist_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_1.dat");

        let mut wallets = Wallets::load(&path).unwrap();
        assert!(wallets.get_addresses().is_empty());
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();
        assert_ne!(first, second);
        assert!(validate_address(&first));

        let reloaded = Wallets::load(&path).unwrap();
        let mut addresses = reloaded.get_addresses();
        addresses.sort();
        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(addresses, expected);

        let wallet = reloaded.get_wallet(&first).unwrap();
        assert_eq!(wallet.get_address(), first);
    }

    #[test]
    fn test_corrupt_wallet_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_1.dat");
        fs::write(&path, [0xFF, 0xFF, 0xFF]).unwrap();
        assert!(Wallets::load(&path).is_err());
    }
}
