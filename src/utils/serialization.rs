//! Binary encoding for everything that goes into sled.
//!
//! bincode 2 with the standard (varint, little-endian) configuration. Block
//! and UTXO bytes are only ever decoded by this crate, so the configuration
//! must not change once a database exists.

use crate::error::{BlockchainError, Result};

pub fn serialize<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(data, bincode::config::standard())
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Decodes `bytes`, rejecting trailing garbage after the value
pub fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (data, read) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if read != bytes.len() {
        return Err(BlockchainError::Serialization(format!(
            "Deserialization left {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
    struct Entry {
        index: usize,
        value: u64,
        locking_hash: Vec<u8>,
    }

    #[test]
    fn test_entries_survive_encoding() {
        let entries = vec![
            Entry {
                index: 0,
                value: 42,
                locking_hash: vec![7; 20],
            },
            Entry {
                index: 3,
                value: 0,
                locking_hash: vec![],
            },
        ];

        let bytes = serialize(&entries).expect("Serialization should work");
        let decoded: Vec<Entry> = deserialize(&bytes).expect("Deserialization should work");
        assert_eq!(entries, decoded);
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut bytes = serialize(&7u64).unwrap();
        bytes.push(0);
        assert!(deserialize::<u64>(&bytes).is_err());
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Entry> = deserialize(&invalid_bytes);
        assert!(result.is_err());
    }
}
