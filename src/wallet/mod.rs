//! Key management and address encoding
//!
//! Addresses are Base58(version ∥ RIPEMD160(SHA256(pubkey)) ∥ checksum).
//! `decode_address` is the only way a locking hash is recovered from an
//! address, and it always verifies the checksum.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    convert_address, decode_address, hash_pub_key, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN, ADDRESS_OVERHEAD,
};
pub use wallets::Wallets;
