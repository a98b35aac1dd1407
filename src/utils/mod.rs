//! Utility functions and helpers
//!
//! Hashing, signatures, Base58 and the binary codec used for storage.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign,
    ecdsa_p256_sha256_verify, new_key_pair, ripemd160_digest, sha256_concat, sha256_digest,
};

pub use serialization::{deserialize, serialize};
