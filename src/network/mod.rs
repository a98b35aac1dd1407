//! Peer-to-peer networking
//!
//! Nodes exchange JSON packages over TCP: version handshakes, transactions to
//! pool and relay, and freshly mined blocks.

pub mod peers;
pub mod server;

pub use peers::PeerRegistry;
pub use server::{broadcast_block, broadcast_tx, send_tx, Package, Server, NODE_VERSION};
