use crate::error::{BlockchainError, Result};
use crate::utils::{base58_decode, base58_encode, ripemd160_digest, sha256_digest};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
/// Version byte plus trailing checksum wrapped around every public-key hash
pub const ADDRESS_OVERHEAD: usize = 1 + ADDRESS_CHECK_SUM_LEN;

/// An ECDSA P-256 key pair. The address is derived from the public key.
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = crate::utils::new_key_pair()?;
        Self::from_pkcs8(pkcs8)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Wallet> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng)
            .map_err(|e| {
                BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
            })?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        convert_address(&self.pub_key_hash())
    }

    pub fn pub_key_hash(&self) -> Vec<u8> {
        hash_pub_key(&self.public_key)
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        crate::utils::ecdsa_p256_sha256_sign(&self.pkcs8, message)
    }
}

/// SHA-256 then RIPEMD-160; the locking hash recorded on outputs
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    ripemd160_digest(&sha256_digest(pub_key))
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let second_sha = sha256_digest(&sha256_digest(payload));
    second_sha[..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// Strips version and checksum from `address` after verifying both.
pub fn decode_address(address: &str) -> Result<Vec<u8>> {
    let payload = base58_decode(address)?;
    if payload.len() < ADDRESS_OVERHEAD {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: decoded payload is {} bytes, need at least {ADDRESS_OVERHEAD}",
            payload.len()
        )));
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    if checksum(body) != actual_checksum {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: checksum mismatch"
        )));
    }
    if body[0] != VERSION {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address}: unknown version byte {:#04x}",
            body[0]
        )));
    }
    Ok(body[1..].to_vec())
}

pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(pub_key_hash.len() + ADDRESS_OVERHEAD);
    payload.push(VERSION);
    payload.extend_from_slice(pub_key_hash);
    let checksum = checksum(&payload);
    payload.extend(checksum);
    base58_encode(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();

        assert!(validate_address(&address));
        assert_eq!(decode_address(&address).unwrap(), wallet.pub_key_hash());
        assert_eq!(wallet.pub_key_hash().len(), 20);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let wallet = Wallet::new().unwrap();
        let mut payload = base58_decode(&wallet.get_address()).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        let tampered = base58_encode(&payload);

        assert!(matches!(
            decode_address(&tampered),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let short = base58_encode(&[0x00, 1, 2, 3]);
        assert!(matches!(
            decode_address(&short),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_decode_rejects_other_version() {
        let wallet = Wallet::new().unwrap();
        let mut payload = vec![0x05];
        payload.extend_from_slice(&wallet.pub_key_hash());
        let sum = checksum(&payload);
        payload.extend(sum);

        assert!(matches!(
            decode_address(&base58_encode(&payload)),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_known_address_is_valid() {
        assert!(validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
        assert!(!validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb"));
    }
}
