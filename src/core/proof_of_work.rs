use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_concat;
use data_encoding::HEXLOWER;
use log::{info, warn};
use num_bigint::BigUint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// Nonces hashed between checks of the abort flag
const CHECK_INTERVAL: u64 = 1 << 12;

/// Where a single mining attempt ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningState {
    Preparing,
    Searching { nonce: u64 },
    Found { nonce: u64, hash: Vec<u8> },
    /// Every nonce in `0..max_nonce` failed; retry with a new timestamp
    Exhausted { tried: u64 },
    Cancelled { tried: u64 },
}

pub struct ProofOfWork {
    header: Vec<u8>,
    target: BigUint,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: &Block) -> ProofOfWork {
        let difficulty = block.get_difficulty();
        let mut header = vec![];
        header.extend_from_slice(block.get_prev_hash());
        header.extend(block.hash_transactions());
        header.extend(block.get_timestamp().to_be_bytes());
        header.extend(difficulty.to_be_bytes());
        ProofOfWork {
            header,
            target: Self::target(difficulty),
        }
    }

    /// 2^(256 - difficulty); a hash must be strictly below it
    pub fn target(difficulty: u32) -> BigUint {
        BigUint::from(1u8) << (256 - difficulty.clamp(1, 255)) as usize
    }

    fn hash_with_nonce(&self, nonce: u64) -> Vec<u8> {
        sha256_concat(&[&self.header, &nonce.to_be_bytes()])
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }

    /// Recomputes the header digest from the block's stored fields and checks
    /// it against both the target and the stored hash. Never fails.
    pub fn validate(block: &Block) -> bool {
        let difficulty = block.get_difficulty();
        if difficulty == 0 || difficulty >= 256 {
            return false;
        }
        let pow = ProofOfWork::new_proof_of_work(block);
        let hash = pow.hash_with_nonce(block.get_nonce());
        pow.meets_target(&hash) && hash == block.get_hash()
    }

    /// Searches nonces `0..max_nonce`, polling `abort` every few thousand hashes
    pub fn run(&self, max_nonce: u64, abort: &AtomicBool) -> MiningState {
        let mut state = MiningState::Preparing;
        loop {
            state = match state {
                MiningState::Preparing => MiningState::Searching { nonce: 0 },
                MiningState::Searching { nonce } if nonce >= max_nonce => {
                    MiningState::Exhausted { tried: nonce }
                }
                MiningState::Searching { nonce } => {
                    if nonce % CHECK_INTERVAL == 0 && nonce > 0 {
                        if abort.load(Ordering::Relaxed) {
                            return MiningState::Cancelled { tried: nonce };
                        }
                        thread::yield_now();
                    }
                    let hash = self.hash_with_nonce(nonce);
                    if self.meets_target(&hash) {
                        MiningState::Found { nonce, hash }
                    } else {
                        MiningState::Searching { nonce: nonce + 1 }
                    }
                }
                done => return done,
            };
        }
    }

    /// Runs the search on a dedicated worker thread
    pub fn spawn(self, max_nonce: u64, abort: Arc<AtomicBool>) -> MiningJob {
        let handle = thread::spawn(move || self.run(max_nonce, &abort));
        MiningJob { handle }
    }
}

pub struct MiningJob {
    handle: JoinHandle<MiningState>,
}

impl MiningJob {
    pub fn wait(self) -> Result<MiningState> {
        self.handle
            .join()
            .map_err(|_| BlockchainError::Io("Mining worker panicked".to_string()))
    }
}

/// Mines `block` on a worker thread, retrying with a fresh timestamp each
/// time the nonce range is exhausted.
pub fn mine(
    mut block: Block,
    max_nonce: u64,
    max_attempts: u32,
    abort: &Arc<AtomicBool>,
) -> Result<Block> {
    info!(
        "Mining block at height {} with difficulty {}",
        block.get_height(),
        block.get_difficulty()
    );
    for attempt in 1..=max_attempts {
        let pow = ProofOfWork::new_proof_of_work(&block);
        match pow.spawn(max_nonce, Arc::clone(abort)).wait()? {
            MiningState::Found { nonce, hash } => {
                info!("Proof-of-work found: {} (nonce {nonce})", HEXLOWER.encode(&hash));
                block.seal(nonce, hash);
                return Ok(block);
            }
            MiningState::Cancelled { tried } => {
                info!("Mining aborted after {tried} nonces");
                return Err(BlockchainError::MiningCancelled);
            }
            MiningState::Exhausted { tried } => {
                warn!("Attempt {attempt}: no valid nonce in {tried} tries, refreshing timestamp");
                block.refresh_timestamp()?;
            }
            MiningState::Preparing | MiningState::Searching { .. } => {
                unreachable!("run only returns terminal states")
            }
        }
    }
    Err(BlockchainError::MiningExhausted {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn unmined_block(difficulty: u32) -> Block {
        let address = Wallet::new().unwrap().get_address();
        let coinbase = Transaction::new_coinbase_tx(&address, "", 10).unwrap();
        Block::new_block(vec![], &[coinbase], 0, difficulty).unwrap()
    }

    fn no_abort() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_mined_block_validates() {
        let block = mine(unmined_block(8), u64::MAX, 1, &no_abort()).unwrap();
        assert!(ProofOfWork::validate(&block));
        assert_eq!(block.get_hash()[0], 0);
    }

    #[test]
    fn test_forged_nonce_fails_validation() {
        let mut block = mine(unmined_block(8), u64::MAX, 1, &no_abort()).unwrap();
        let nonce = block.get_nonce();
        block.set_nonce(nonce.wrapping_add(1));
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_unmined_block_fails_validation() {
        assert!(!ProofOfWork::validate(&unmined_block(8)));
    }

    #[test]
    fn test_higher_difficulty_means_smaller_target() {
        assert!(ProofOfWork::target(12) < ProofOfWork::target(8));
        assert_eq!(ProofOfWork::target(8), BigUint::from(1u8) << 248usize);
    }

    #[test]
    fn test_search_is_bounded() {
        // 255 leading zero bits is out of reach in 16 tries
        let pow = ProofOfWork::new_proof_of_work(&unmined_block(255));
        let state = pow.run(16, &AtomicBool::new(false));
        assert_eq!(state, MiningState::Exhausted { tried: 16 });
    }

    #[test]
    fn test_exhaustion_is_reported_after_all_attempts() {
        let result = mine(unmined_block(255), 8, 2, &no_abort());
        assert!(matches!(
            result,
            Err(BlockchainError::MiningExhausted { attempts: 2 })
        ));
    }

    #[test]
    fn test_abort_flag_cancels_search() {
        let abort = Arc::new(AtomicBool::new(true));
        let pow = ProofOfWork::new_proof_of_work(&unmined_block(255));
        let state = pow.spawn(u64::MAX, abort).wait().unwrap();
        assert_eq!(state, MiningState::Cancelled { tried: CHECK_INTERVAL });
    }
}
