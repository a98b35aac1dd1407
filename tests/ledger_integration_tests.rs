//! Ledger integration tests
//!
//! End-to-end scenarios through the public API: genesis, transfers, mining,
//! inbound blocks and the UTXO index staying equal to a chain replay.

use ledger_chain::core::proof_of_work::mine;
use ledger_chain::storage::{SpendableOutput, UTXOSet};
use ledger_chain::{
    replay, Block, BlockAcceptance, Blockchain, BlockchainError, Config, ProofOfWork,
    RejectReason, TXOutput, Transaction, UtxoView, Wallet, Wallets,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct Node {
    _dir: TempDir,
    config: Config,
    chain: Blockchain,
    alice: Wallet,
}

fn new_node() -> Node {
    let dir = tempdir().unwrap();
    let config = Config::for_testing(dir.path());
    let alice = Wallet::new().unwrap();
    let chain = Blockchain::create_blockchain(&config, &alice.get_address()).unwrap();
    Node {
        _dir: dir,
        config,
        chain,
        alice,
    }
}

fn assert_index_matches_replay(chain: &Blockchain) {
    let replayed = replay(chain.blocks_from_genesis().unwrap()).unwrap();
    assert_eq!(chain.utxo_set().snapshot().unwrap(), replayed);
}

#[test]
fn test_genesis_pays_single_output() {
    let node = new_node();
    let spendable = node
        .chain
        .utxo_set()
        .find_spendable(&node.alice.pub_key_hash())
        .unwrap();

    assert_eq!(spendable.len(), 1);
    assert_eq!(spendable[0].output.get_value(), node.config.subsidy);
}

#[test]
fn test_send_without_mining_leaves_index_untouched() {
    let node = new_node();
    let bob = Wallet::new().unwrap();
    let utxo = node.chain.utxo_set();
    let before = utxo.snapshot().unwrap();
    let k = 1_000;

    let tx = Transaction::new_utxo_transaction(&node.alice, &bob.get_address(), k, &utxo).unwrap();

    let outputs = tx.get_vout();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].get_value(), k);
    assert!(outputs[0].is_locked_with_key(&bob.pub_key_hash()));
    assert_eq!(outputs[1].get_value(), node.config.subsidy - k);
    assert!(outputs[1].is_locked_with_key(&node.alice.pub_key_hash()));

    assert_eq!(utxo.snapshot().unwrap(), before);
    assert_eq!(utxo.balance(&bob.pub_key_hash()).unwrap(), 0);

    node.chain.mine_block(&[tx]).unwrap();
    assert_eq!(utxo.balance(&bob.pub_key_hash()).unwrap(), k);
    assert_eq!(
        utxo.balance(&node.alice.pub_key_hash()).unwrap(),
        node.config.subsidy - k
    );
}

#[test]
fn test_overspend_reports_insufficient_funds() {
    let node = new_node();
    let bob = Wallet::new().unwrap();
    let result = Transaction::new_utxo_transaction(
        &node.alice,
        &bob.get_address(),
        node.config.subsidy + 1,
        &node.chain.utxo_set(),
    );

    match result {
        Err(BlockchainError::InsufficientFunds {
            required,
            available,
        }) => {
            assert_eq!(required, node.config.subsidy + 1);
            assert_eq!(available, node.config.subsidy);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
}

/// Presents the victim's outputs as if they were locked to whoever asks
struct Relabeled<'a> {
    real: &'a UTXOSet,
    victim: Vec<u8>,
}

impl UtxoView for Relabeled<'_> {
    fn find_spendable(&self, pub_key_hash: &[u8]) -> ledger_chain::Result<Vec<SpendableOutput>> {
        Ok(self
            .real
            .find_spendable(&self.victim)?
            .into_iter()
            .map(|s| SpendableOutput {
                output: TXOutput::with_locking_hash(s.output.get_value(), pub_key_hash),
                ..s
            })
            .collect())
    }

    fn find_output(&self, txid: &[u8], index: usize) -> ledger_chain::Result<Option<TXOutput>> {
        self.real.find_output(txid, index)
    }
}

#[test]
fn test_foreign_key_cannot_spend() {
    let node = new_node();
    let mallory = Wallet::new().unwrap();
    let utxo = node.chain.utxo_set();

    // Nothing is locked to mallory, so an honest build fails
    assert!(matches!(
        Transaction::new_utxo_transaction(&mallory, &mallory.get_address(), 1, &utxo),
        Err(BlockchainError::InsufficientFunds { .. })
    ));

    // A well-formed, correctly signed input carrying mallory's key but
    // pointing at alice's genesis output
    let disguised = Relabeled {
        real: &utxo,
        victim: node.alice.pub_key_hash(),
    };
    let stolen =
        Transaction::new_utxo_transaction(&mallory, &mallory.get_address(), 1, &disguised)
            .unwrap();

    let err = stolen.validate(&utxo).unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::KeyMismatch));
    let err = node.chain.mine_block(&[stolen]).unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::KeyMismatch));
    assert_eq!(node.chain.get_best_height().unwrap(), 0);
}

#[test]
fn test_forged_nonce_is_refused() {
    let node = new_node();
    let coinbase =
        Transaction::new_coinbase_tx(&node.alice.get_address(), "", node.config.subsidy).unwrap();
    let block = Block::new_block(node.chain.get_tip_hash(), &[coinbase], 1, 8).unwrap();
    let mined = mine(block, u64::MAX, 1, &Arc::new(AtomicBool::new(false))).unwrap();
    assert!(ProofOfWork::validate(&mined));

    let mut fields = serde_json::to_value(&mined).unwrap();
    fields["nonce"] = serde_json::json!(mined.get_nonce().wrapping_add(1));
    let forged: Block = serde_json::from_value(fields).unwrap();
    assert_eq!(forged.get_hash(), mined.get_hash());

    assert!(!ProofOfWork::validate(&forged));
    assert!(matches!(
        node.chain.accept_block(&forged),
        Err(BlockchainError::InvalidBlock(_))
    ));
    assert_eq!(node.chain.get_best_height().unwrap(), 0);

    assert_eq!(
        node.chain.accept_block(&mined).unwrap(),
        BlockAcceptance::Appended
    );
    assert_index_matches_replay(&node.chain);
}

#[test]
fn test_reindex_equals_incremental_after_every_block() {
    let node = new_node();
    let bob = Wallet::new().unwrap();
    let carol = Wallet::new().unwrap();
    let utxo = node.chain.utxo_set();

    let pay_bob =
        Transaction::new_utxo_transaction(&node.alice, &bob.get_address(), 700, &utxo).unwrap();
    node.chain
        .mine_block_with_reward(&[pay_bob], &carol.get_address())
        .unwrap();
    assert_index_matches_replay(&node.chain);

    let pay_carol =
        Transaction::new_utxo_transaction(&bob, &carol.get_address(), 300, &utxo).unwrap();
    let pay_bob_again =
        Transaction::new_utxo_transaction(&node.alice, &bob.get_address(), 50, &utxo).unwrap();
    node.chain
        .mine_block_with_reward(&[pay_carol, pay_bob_again], &node.alice.get_address())
        .unwrap();
    assert_index_matches_replay(&node.chain);

    let incremental = utxo.snapshot().unwrap();
    utxo.reindex().unwrap();
    assert_eq!(utxo.snapshot().unwrap(), incremental);

    assert_eq!(utxo.balance(&bob.pub_key_hash()).unwrap(), 450);
    assert_eq!(
        utxo.balance(&carol.pub_key_hash()).unwrap(),
        node.config.subsidy + 300
    );
    node.chain.verify_chain().unwrap();
}

#[test]
fn test_double_spend_is_rejected() {
    let node = new_node();
    let bob = Wallet::new().unwrap();
    let utxo = node.chain.utxo_set();
    let tx = Transaction::new_utxo_transaction(&node.alice, &bob.get_address(), 10, &utxo).unwrap();

    node.chain.mine_block(&[tx.clone()]).unwrap();
    let err = node.chain.mine_block(&[tx]).unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::UnknownOutput));
    assert_eq!(node.chain.get_best_height().unwrap(), 1);
    assert_index_matches_replay(&node.chain);
}

#[test]
fn test_chain_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = Config::for_testing(dir.path());
    let mut wallets = Wallets::load(&config.wallet_path()).unwrap();
    let alice_addr = wallets.create_wallet().unwrap();
    let bob_addr = wallets.create_wallet().unwrap();

    let tip = {
        let chain = Blockchain::create_blockchain(&config, &alice_addr).unwrap();
        let wallets = Wallets::load(&config.wallet_path()).unwrap();
        let alice = wallets.get_wallet(&alice_addr).unwrap();
        let tx = Transaction::new_utxo_transaction(alice, &bob_addr, 25, &chain.utxo_set())
            .unwrap();
        chain.mine_block(&[tx]).unwrap();
        chain.get_tip_hash()
    };

    let chain = Blockchain::open(&config).unwrap();
    assert_eq!(chain.get_tip_hash(), tip);
    assert_eq!(chain.get_best_height().unwrap(), 1);
    assert_eq!(chain.verify_chain().unwrap(), 2);
    chain.utxo_set().verify_consistency().unwrap();

    let wallets = Wallets::load(&config.wallet_path()).unwrap();
    let bob = wallets.get_wallet(&bob_addr).unwrap();
    assert_eq!(chain.utxo_set().balance(&bob.pub_key_hash()).unwrap(), 25);
}
