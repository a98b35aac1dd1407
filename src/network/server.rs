use crate::config::Config;
use crate::core::{Block, BlockAcceptance, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::peers::{parse_socket_addr, PeerRegistry};
use crate::storage::MemoryPool;
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Deserializer;
use std::collections::HashSet;
use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const NODE_VERSION: usize = 1;
const TCP_WRITE_TIMEOUT: u64 = 5000;
const TCP_READ_TIMEOUT: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Package {
    Version {
        addr_from: String,
        version: usize,
        best_height: usize,
    },
    Tx {
        addr_from: String,
        transaction: Vec<u8>,
    },
    Block {
        addr_from: String,
        block: Vec<u8>,
    },
}

/// A node: accepts packages, pools valid transactions, relays them and,
/// when configured with a mining address, mines once enough are pooled.
#[derive(Clone)]
pub struct Server {
    blockchain: Blockchain,
    config: Config,
    peers: Arc<PeerRegistry>,
    mempool: Arc<MemoryPool>,
}

impl Server {
    pub fn new(blockchain: Blockchain, config: Config) -> Server {
        Server {
            blockchain,
            config,
            peers: Arc::new(PeerRegistry::new()),
            mempool: Arc::new(MemoryPool::new()),
        }
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    /// Binds the configured address and serves until the listener fails
    pub fn run(&self) -> Result<()> {
        let addr = self.config.node_addr.as_str();
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!("Server listening on {addr}");

        if !self.config.is_central_node() {
            self.peers.add_peer(&self.config.central_node);
            let best_height = self.blockchain.get_best_height()?;
            if let Err(e) = self.send_version(&self.config.central_node, best_height) {
                warn!("Central node {} unreachable: {e}", self.config.central_node);
            }
        }
        self.serve(listener)
    }

    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            error!("Error handling connection: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let peer_addr = stream.peer_addr()?;
        stream.set_read_timeout(Some(Duration::from_secs(TCP_READ_TIMEOUT)))?;

        let reader = BufReader::new(&stream);
        let pkg_reader = Deserializer::from_reader(reader).into_iter::<Package>();
        for pkg in pkg_reader {
            let pkg = pkg?;
            info!("Received {} from {peer_addr}", describe(&pkg));
            if let Err(e) = self.handle_package(pkg) {
                warn!("Dropped package from {peer_addr}: {e}");
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }

    pub fn handle_package(&self, pkg: Package) -> Result<()> {
        match pkg {
            Package::Version {
                addr_from,
                version: _,
                best_height,
            } => self.handle_version(&addr_from, best_height),
            Package::Tx {
                addr_from,
                transaction,
            } => self.handle_tx(&addr_from, &transaction),
            Package::Block { addr_from, block } => self.handle_block(&addr_from, &block),
        }
    }

    fn handle_version(&self, addr_from: &str, best_height: usize) -> Result<()> {
        let local_height = self.blockchain.get_best_height()?;
        info!("Version from {addr_from}: best_height={best_height}, ours={local_height}");
        if addr_from != self.config.node_addr && self.peers.add_peer(addr_from) {
            self.send_version(addr_from, local_height)?;
        }
        Ok(())
    }

    fn handle_tx(&self, addr_from: &str, transaction: &[u8]) -> Result<()> {
        let tx = Transaction::deserialize(transaction)?;
        let txid_hex = HEXLOWER.encode(tx.get_id());
        if self.mempool.contains(&txid_hex) {
            return Ok(());
        }

        if tx.is_coinbase() {
            return Err(BlockchainError::Network(format!(
                "coinbase {txid_hex} cannot be relayed"
            )));
        }
        tx.validate(&self.blockchain.utxo_set())?;
        self.mempool.add(tx.clone());
        info!("Pooled transaction {txid_hex} ({} pending)", self.mempool.len());

        if self.config.is_central_node() {
            broadcast_tx(
                &self.peers,
                &self.config.node_addr,
                &tx,
                &[addr_from, self.config.node_addr.as_str()],
            );
        }

        if self.config.is_miner() && self.mempool.len() >= self.config.transaction_threshold {
            self.mine_pending()?;
        }
        Ok(())
    }

    fn handle_block(&self, addr_from: &str, block: &[u8]) -> Result<()> {
        let block = Block::deserialize(block)?;
        let block_hash = HEXLOWER.encode(block.get_hash());
        match self.blockchain.accept_block(&block)? {
            BlockAcceptance::Appended => {
                for tx in block.get_transactions() {
                    self.mempool.remove(&HEXLOWER.encode(tx.get_id()));
                }
                self.prune_mempool();
                info!("Added block {block_hash} from {addr_from}");
                broadcast_block(
                    &self.peers,
                    &self.config.node_addr,
                    &block,
                    &[addr_from, self.config.node_addr.as_str()],
                );
            }
            BlockAcceptance::Duplicate => {}
            BlockAcceptance::Stale => {
                warn!("Block {block_hash} from {addr_from} does not extend our tip");
            }
        }
        Ok(())
    }

    /// Drops pooled transactions the new tip made invalid, such as ones
    /// spending an output a block just consumed.
    fn prune_mempool(&self) {
        let utxo = self.blockchain.utxo_set();
        for tx in self.mempool.get_all() {
            if !tx.verify(&utxo) {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                info!("Pruning pooled transaction {txid_hex}");
                self.mempool.remove(&txid_hex);
            }
        }
    }

    /// Mines the pooled transactions that are still valid together. Returns
    /// `None` when nothing was left to mine.
    pub fn mine_pending(&self) -> Result<Option<Block>> {
        let mining_address = self.config.mining_address.as_deref().ok_or_else(|| {
            BlockchainError::Config("Mining address not configured".to_string())
        })?;

        let utxo = self.blockchain.utxo_set();
        let mut spent = HashSet::new();
        let mut selected = vec![];
        for tx in self.mempool.take_all() {
            let outpoints = tx
                .get_vin()
                .iter()
                .map(|vin| (vin.get_txid().to_vec(), vin.get_vout()))
                .collect::<Vec<_>>();
            if outpoints.iter().any(|outpoint| spent.contains(outpoint)) || !tx.verify(&utxo) {
                warn!(
                    "Dropping pooled transaction {}",
                    HEXLOWER.encode(tx.get_id())
                );
                continue;
            }
            spent.extend(outpoints);
            selected.push(tx);
        }
        if selected.is_empty() {
            return Ok(None);
        }

        let block = match self.blockchain.mine_block_with_reward(&selected, mining_address) {
            Ok(block) => block,
            Err(e) => {
                for tx in selected {
                    self.mempool.add(tx);
                }
                return Err(e);
            }
        };
        info!("New block {} is mined!", HEXLOWER.encode(block.get_hash()));

        broadcast_block(
            &self.peers,
            &self.config.node_addr,
            &block,
            &[self.config.node_addr.as_str()],
        );
        Ok(Some(block))
    }

    fn send_version(&self, addr: &str, best_height: usize) -> Result<()> {
        send_data(
            addr,
            &Package::Version {
                addr_from: self.config.node_addr.clone(),
                version: NODE_VERSION,
                best_height,
            },
        )
    }
}

fn describe(pkg: &Package) -> String {
    match pkg {
        Package::Version { best_height, .. } => format!("version (height {best_height})"),
        Package::Tx { transaction, .. } => format!("tx ({} bytes)", transaction.len()),
        Package::Block { block, .. } => format!("block ({} bytes)", block.len()),
    }
}

/// Sends one package and closes the connection
fn send_data(addr: &str, pkg: &Package) -> Result<()> {
    let socket_addr = parse_socket_addr(addr)?;
    let mut stream =
        TcpStream::connect_timeout(&socket_addr, Duration::from_millis(TCP_WRITE_TIMEOUT))
            .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;
    stream.set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))?;

    serde_json::to_writer(&stream, pkg)?;
    stream.flush()?;
    Ok(())
}

/// Hands a transaction to the node at `to`, typically the central node
pub fn send_tx(addr_from: &str, to: &str, tx: &Transaction) -> Result<()> {
    send_data(
        to,
        &Package::Tx {
            addr_from: addr_from.to_string(),
            transaction: tx.serialize()?,
        },
    )
}

fn broadcast(peers: &PeerRegistry, pkg: &Package, skip: &[&str]) {
    for peer in peers.get_peers() {
        if skip.contains(&peer.as_str()) {
            continue;
        }
        if let Err(e) = send_data(&peer, pkg) {
            warn!("Evicting unreachable peer {peer}: {e}");
            peers.evict_peer(&peer);
        }
    }
}

/// Relays a transaction to every known peer not listed in `skip`
pub fn broadcast_tx(peers: &PeerRegistry, addr_from: &str, tx: &Transaction, skip: &[&str]) {
    match tx.serialize() {
        Ok(transaction) => broadcast(
            peers,
            &Package::Tx {
                addr_from: addr_from.to_string(),
                transaction,
            },
            skip,
        ),
        Err(e) => error!("Failed to serialize transaction: {e}"),
    }
}

pub fn broadcast_block(peers: &PeerRegistry, addr_from: &str, block: &Block, skip: &[&str]) {
    match block.serialize() {
        Ok(block) => broadcast(
            peers,
            &Package::Block {
                addr_from: addr_from.to_string(),
                block,
            },
            skip,
        ),
        Err(e) => error!("Failed to serialize block: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proof_of_work::mine;
    use crate::storage::UtxoView;
    use crate::testnet::{create_test_chain, TestChain};
    use crate::wallet::Wallet;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn mining_server(test: &TestChain, threshold: usize) -> Server {
        let config = Config {
            mining_address: Some(test.miner.get_address()),
            transaction_threshold: threshold,
            ..test.config.clone()
        };
        Server::new(test.chain.clone(), config)
    }

    fn tx_package(tx: &Transaction) -> Package {
        Package::Tx {
            addr_from: "127.0.0.1:3999".to_string(),
            transaction: tx.serialize().unwrap(),
        }
    }

    #[test]
    fn test_package_wire_format() {
        let pkg = Package::Version {
            addr_from: "127.0.0.1:2001".to_string(),
            version: NODE_VERSION,
            best_height: 3,
        };
        let json = serde_json::to_string(&pkg).unwrap();
        assert!(json.starts_with("{\"Version\":"));
        assert_eq!(serde_json::from_str::<Package>(&json).unwrap(), pkg);
    }

    #[test]
    fn test_valid_tx_is_pooled_once() {
        let test = create_test_chain().unwrap();
        let server = mining_server(&test, 10);
        let bob = Wallet::new().unwrap();
        let tx = Transaction::new_utxo_transaction(
            &test.miner,
            &bob.get_address(),
            5,
            &test.chain.utxo_set(),
        )
        .unwrap();

        server.handle_package(tx_package(&tx)).unwrap();
        server.handle_package(tx_package(&tx)).unwrap();
        assert_eq!(server.mempool().len(), 1);
    }

    #[test]
    fn test_invalid_tx_is_not_pooled() {
        let test = create_test_chain().unwrap();
        let server = mining_server(&test, 10);
        let thief = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&thief.get_address(), "", 1).unwrap();

        assert!(server.handle_package(tx_package(&coinbase)).is_err());
        assert!(server.mempool().is_empty());
    }

    #[test]
    fn test_threshold_triggers_mining() {
        let test = create_test_chain().unwrap();
        let server = mining_server(&test, 1);
        let bob = Wallet::new().unwrap();
        let tx = Transaction::new_utxo_transaction(
            &test.miner,
            &bob.get_address(),
            5,
            &test.chain.utxo_set(),
        )
        .unwrap();

        server.handle_package(tx_package(&tx)).unwrap();
        assert!(server.mempool().is_empty());
        assert_eq!(test.chain.get_best_height().unwrap(), 1);
        assert_eq!(
            test.chain.utxo_set().balance(&bob.pub_key_hash()).unwrap(),
            5
        );
    }

    #[test]
    fn test_block_from_peer_is_accepted() {
        let test = create_test_chain().unwrap();
        let server = mining_server(&test, 10);
        let bob = Wallet::new().unwrap();
        let coinbase =
            Transaction::new_coinbase_tx(&bob.get_address(), "", test.config.subsidy).unwrap();
        let block = Block::new_block(test.chain.get_tip_hash(), &[coinbase], 1, 8).unwrap();
        let block = mine(block, u64::MAX, 1, &Arc::new(AtomicBool::new(false))).unwrap();
        let pkg = Package::Block {
            addr_from: "127.0.0.1:3999".to_string(),
            block: block.serialize().unwrap(),
        };

        server.handle_package(pkg.clone()).unwrap();
        // A second delivery is a harmless duplicate
        server.handle_package(pkg).unwrap();
        assert_eq!(test.chain.get_best_height().unwrap(), 1);
        assert_eq!(test.chain.get_tip_hash(), block.get_hash());
    }

    #[test]
    fn test_conflicting_block_prunes_pool() {
        let test = create_test_chain().unwrap();
        let server = Server::new(test.chain.clone(), test.config.clone());
        let bob = Wallet::new().unwrap();
        let carol = Wallet::new().unwrap();
        let utxo = test.chain.utxo_set();
        let to_bob =
            Transaction::new_utxo_transaction(&test.miner, &bob.get_address(), 5, &utxo).unwrap();
        let to_carol =
            Transaction::new_utxo_transaction(&test.miner, &carol.get_address(), 6, &utxo)
                .unwrap();
        server.handle_package(tx_package(&to_bob)).unwrap();
        assert_eq!(server.mempool().len(), 1);

        // A peer mined the other spend of the same output
        let coinbase =
            Transaction::new_coinbase_tx(&carol.get_address(), "", test.config.subsidy).unwrap();
        let block =
            Block::new_block(test.chain.get_tip_hash(), &[coinbase, to_carol], 1, 8).unwrap();
        let block = mine(block, u64::MAX, 1, &Arc::new(AtomicBool::new(false))).unwrap();
        server
            .handle_package(Package::Block {
                addr_from: "127.0.0.1:3999".to_string(),
                block: block.serialize().unwrap(),
            })
            .unwrap();

        assert_eq!(test.chain.get_tip_hash(), block.get_hash());
        assert!(server.mempool().is_empty());
    }

    #[test]
    fn test_send_tx_over_tcp() {
        let test = create_test_chain().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = Config {
            node_addr: addr.clone(),
            central_node: addr.clone(),
            ..test.config.clone()
        };
        let server = Server::new(test.chain.clone(), config);
        let background = server.clone();
        thread::spawn(move || background.serve(listener));

        let bob = Wallet::new().unwrap();
        let tx = Transaction::new_utxo_transaction(
            &test.miner,
            &bob.get_address(),
            5,
            &test.chain.utxo_set(),
        )
        .unwrap();
        send_tx("127.0.0.1:3999", &addr, &tx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while server.mempool().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(server.mempool().contains(&HEXLOWER.encode(tx.get_id())));
    }
}
