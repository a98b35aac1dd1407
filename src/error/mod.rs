//! Error handling for the ledger
//!
//! Every fallible operation in the crate returns [`Result`]. Validation
//! failures abort only the offending operation; storage errors are fatal to
//! the current operation and are never retried here.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Why a transaction or block was refused by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Input references an output that is not in the UTXO view (already spent or never existed)
    UnknownOutput,
    /// The same output is referenced twice in one transaction or block
    DuplicateInput,
    /// Input public key does not hash to the referenced output's locking hash
    KeyMismatch,
    /// Signature does not verify against the input's public key
    BadSignature,
    /// Stored id does not match the recomputed content hash
    IdMismatch,
    /// Structurally invalid (no inputs, no outputs, zero amount, ...)
    Malformed,
    /// Summing values overflowed
    ValueOverflow,
    /// Coinbase pays more than the block subsidy
    ExcessiveReward,
    /// More than one coinbase in a block
    MultipleCoinbase,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            RejectReason::UnknownOutput => "unknown-output",
            RejectReason::DuplicateInput => "duplicate-input",
            RejectReason::KeyMismatch => "key-mismatch",
            RejectReason::BadSignature => "bad-signature",
            RejectReason::IdMismatch => "id-mismatch",
            RejectReason::Malformed => "malformed",
            RejectReason::ValueOverflow => "value-overflow",
            RejectReason::ExcessiveReward => "excessive-reward",
            RejectReason::MultipleCoinbase => "multiple-coinbase",
        };
        f.write_str(tag)
    }
}

/// Error kinds for ledger operations
#[derive(Debug, Clone)]
pub enum BlockchainError {
    /// Address failed to decode or its checksum did not match
    InvalidAddress(String),
    /// Spendable outputs do not cover the requested amount
    InsufficientFunds { required: u64, available: u64 },
    /// Double-spend, forged signature, unknown reference and friends
    InvalidTransaction {
        reason: RejectReason,
        detail: String,
    },
    /// Outputs are worth more than the inputs they spend
    ValueMismatch { inputs: u64, outputs: u64 },
    /// A chain already exists in storage
    AlreadyInitialized,
    /// No chain exists in storage yet
    ChainUninitialized,
    /// Storage I/O errors from sled
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// File I/O errors
    Io(String),
    /// Network communication errors
    Network(String),
    /// Wallet operation errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// Block failed an append invariant
    InvalidBlock(String),
    /// Every mining attempt ran out of nonces
    MiningExhausted { attempts: u32 },
    /// The nonce search was aborted
    MiningCancelled,
    /// Incremental UTXO index disagrees with a full replay
    IndexDivergence(String),
}

impl BlockchainError {
    pub fn rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        BlockchainError::InvalidTransaction {
            reason,
            detail: detail.into(),
        }
    }

    /// Reason tag of an `InvalidTransaction`, if that is what this is
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            BlockchainError::InvalidTransaction { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidTransaction { reason, detail } => {
                write!(f, "Invalid transaction ({reason}): {detail}")
            }
            BlockchainError::ValueMismatch { inputs, outputs } => {
                write!(f, "Value mismatch: inputs {inputs} < outputs {outputs}")
            }
            BlockchainError::AlreadyInitialized => write!(f, "Blockchain already exists"),
            BlockchainError::ChainUninitialized => {
                write!(f, "No existing blockchain found. Create one first.")
            }
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::MiningExhausted { attempts } => {
                write!(f, "Mining exhausted the nonce space after {attempts} attempts")
            }
            BlockchainError::MiningCancelled => write!(f, "Mining was cancelled"),
            BlockchainError::IndexDivergence(msg) => {
                write!(f, "UTXO index diverged from chain replay: {msg}")
            }
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => e.into(),
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Network(format!("Malformed package: {err}"))
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_is_reported() {
        let err = BlockchainError::rejected(RejectReason::KeyMismatch, "input 0");
        assert_eq!(err.reject_reason(), Some(RejectReason::KeyMismatch));
        assert_eq!(
            err.to_string(),
            "Invalid transaction (key-mismatch): input 0"
        );
        assert_eq!(BlockchainError::AlreadyInitialized.reject_reason(), None);
    }
}
