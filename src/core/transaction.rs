// Transactions move value by consuming unspent outputs and creating new ones.
// An output is locked to a public-key hash; an input unlocks it by carrying a
// public key that hashes to that value and a signature made with its key.

use crate::error::{BlockchainError, RejectReason, Result};
use crate::storage::UtxoView;
use crate::utils::{deserialize, ecdsa_p256_sha256_verify, serialize, sha256_concat, sha256_digest};
use crate::wallet::{decode_address, hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// References output `vout` of transaction `txid`
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: usize,
    signature: Vec<u8>,
    // Coinbase inputs carry arbitrary data here instead of a key
    pub_key: Vec<u8>,
}

impl TXInput {
    /// Unsigned input; signature and key are filled in when the transaction is signed
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> usize {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn set_pub_key(&mut self, pub_key: &[u8]) {
        self.pub_key = pub_key.to_vec();
    }

    pub fn set_signature(&mut self, signature: &[u8]) {
        self.signature = signature.to_vec();
    }

    /// True iff this input's public key hashes to `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(&self.pub_key) == pub_key_hash
    }

    fn outpoint(&self) -> (Vec<u8>, usize) {
        (self.txid.clone(), self.vout)
    }
}

/// `value` spendable only by the owner of `pub_key_hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn with_locking_hash(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    /// Locks the output to the public-key hash embedded in `address`
    pub fn lock(&mut self, address: &str) -> Result<()> {
        self.pub_key_hash = decode_address(address)?;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Reward transaction for a mined block. Empty `data` is replaced with a
    /// random tag so two rewards to the same address never share an id.
    pub fn new_coinbase_tx(to: &str, data: &str, reward: u64) -> Result<Transaction> {
        let data = if data.is_empty() {
            format!("Reward to {to} ({})", Uuid::new_v4())
        } else {
            data.to_string()
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![TXInput {
                txid: vec![],
                vout: 0,
                signature: vec![],
                pub_key: data.into_bytes(),
            }],
            vout: vec![TXOutput::new(reward, to)?],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Spends enough of `wallet`'s outputs in `utxo` to pay `amount` to `to`,
    /// returning any surplus to the wallet as change.
    pub fn new_utxo_transaction<V: UtxoView + ?Sized>(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo: &V,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::rejected(
                RejectReason::Malformed,
                "amount must be positive",
            ));
        }

        let recipient = TXOutput::new(amount, to)?;
        let from_hash = wallet.pub_key_hash();
        let (accumulated, selected) = utxo.find_spendable_outputs(&from_hash, amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = Vec::with_capacity(selected.len());
        let mut prev_outputs = Vec::with_capacity(selected.len());
        for spendable in selected {
            let mut input = TXInput::new(&spendable.txid, spendable.index);
            input.set_pub_key(wallet.get_public_key());
            inputs.push(input);
            prev_outputs.push(spendable.output);
        }

        let mut outputs = vec![recipient];
        if accumulated > amount {
            outputs.push(TXOutput::with_locking_hash(
                accumulated - amount,
                &from_hash,
            ));
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        tx.sign(wallet, &prev_outputs)?;

        log::debug!(
            "Built transaction {} spending {} inputs",
            HEXLOWER.encode(&tx.id),
            tx.vin.len()
        );
        Ok(tx)
    }

    /// Copy with every signature blanked; the id is computed over this
    fn unsigned_copy(&self) -> Transaction {
        let vin = self
            .vin
            .iter()
            .map(|input| TXInput {
                signature: vec![],
                ..input.clone()
            })
            .collect();
        Transaction {
            id: vec![],
            vin,
            vout: self.vout.clone(),
        }
    }

    /// Copy with signatures and keys blanked, each key slot replaced by the
    /// locking hash of the output that input spends
    fn trimmed_copy(&self, prev_outputs: &[TXOutput]) -> Transaction {
        let vin = self
            .vin
            .iter()
            .zip(prev_outputs)
            .map(|(input, prev)| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: prev.pub_key_hash.clone(),
            })
            .collect();
        Transaction {
            id: self.id.clone(),
            vin,
            vout: self.vout.clone(),
        }
    }

    /// Message signed by input `idx`: commits to the id, the input position
    /// and every output being spent
    fn signing_payload(&self, idx: usize, prev_outputs: &[TXOutput]) -> Result<Vec<u8>> {
        let trimmed = serialize(&self.trimmed_copy(prev_outputs))?;
        let spent = serialize(&prev_outputs.to_vec())?;
        let position = (idx as u64).to_be_bytes();
        Ok(sha256_concat(&[&self.id, &position, &spent, &trimmed]))
    }

    fn sign(&mut self, wallet: &Wallet, prev_outputs: &[TXOutput]) -> Result<()> {
        for idx in 0..self.vin.len() {
            let payload = self.signing_payload(idx, prev_outputs)?;
            let signature = wallet.sign(&payload)?;
            self.vin[idx].signature = signature;
        }
        Ok(())
    }

    /// Checks every input against `utxo`. Coinbase transactions always pass;
    /// the one-per-block rule belongs to the chain.
    pub fn validate<V: UtxoView + ?Sized>(&self, utxo: &V) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let txid_hex = HEXLOWER.encode(&self.id);
        if self.vin.is_empty() || self.vout.is_empty() {
            return Err(BlockchainError::rejected(
                RejectReason::Malformed,
                format!("{txid_hex} needs at least one input and one output"),
            ));
        }
        self.check_id()?;

        let mut seen = HashSet::new();
        let mut prev_outputs = Vec::with_capacity(self.vin.len());
        let mut input_value = 0u64;
        for (idx, vin) in self.vin.iter().enumerate() {
            let outpoint = format!("{}:{}", HEXLOWER.encode(&vin.txid), vin.vout);
            if !seen.insert(vin.outpoint()) {
                return Err(BlockchainError::rejected(
                    RejectReason::DuplicateInput,
                    format!("{txid_hex} spends {outpoint} twice"),
                ));
            }

            let prev = utxo.find_output(&vin.txid, vin.vout)?.ok_or_else(|| {
                BlockchainError::rejected(
                    RejectReason::UnknownOutput,
                    format!("input {idx} of {txid_hex} references missing or spent output {outpoint}"),
                )
            })?;

            if !vin.uses_key(&prev.pub_key_hash) {
                return Err(BlockchainError::rejected(
                    RejectReason::KeyMismatch,
                    format!("input {idx} of {txid_hex} cannot unlock {outpoint}"),
                ));
            }

            input_value = input_value.checked_add(prev.value).ok_or_else(|| {
                BlockchainError::rejected(RejectReason::ValueOverflow, "input value overflow")
            })?;
            prev_outputs.push(prev);
        }

        for (idx, vin) in self.vin.iter().enumerate() {
            let payload = self.signing_payload(idx, &prev_outputs)?;
            if !ecdsa_p256_sha256_verify(&vin.pub_key, &vin.signature, &payload) {
                return Err(BlockchainError::rejected(
                    RejectReason::BadSignature,
                    format!("input {idx} of {txid_hex} has an invalid signature"),
                ));
            }
        }

        let output_value = self.get_output_value()?;
        if input_value < output_value {
            return Err(BlockchainError::ValueMismatch {
                inputs: input_value,
                outputs: output_value,
            });
        }
        Ok(())
    }

    pub fn verify<V: UtxoView + ?Sized>(&self, utxo: &V) -> bool {
        match self.validate(utxo) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Rejected transaction {}: {e}", HEXLOWER.encode(&self.id));
                false
            }
        }
    }

    /// The stored id must equal the content hash
    pub fn check_id(&self) -> Result<()> {
        if self.hash()? != self.id {
            return Err(BlockchainError::rejected(
                RejectReason::IdMismatch,
                format!("{} is not the hash of its contents", HEXLOWER.encode(&self.id)),
            ));
        }
        Ok(())
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty()
    }

    fn hash(&self) -> Result<Vec<u8>> {
        Ok(sha256_digest(&serialize(&self.unsigned_copy())?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn get_output_value(&self) -> Result<u64> {
        self.vout.iter().try_fold(0u64, |total, out| {
            total.checked_add(out.value).ok_or_else(|| {
                BlockchainError::rejected(RejectReason::ValueOverflow, "output value overflow")
            })
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    /// Mutable access for tests that forge transactions
    #[cfg(test)]
    pub(crate) fn inputs_mut(&mut self) -> &mut Vec<TXInput> {
        &mut self.vin
    }

    #[cfg(test)]
    pub(crate) fn outputs_mut(&mut self) -> &mut Vec<TXOutput> {
        &mut self.vout
    }

    #[cfg(test)]
    pub(crate) fn rehash(&mut self) {
        self.id = self.hash().unwrap();
    }
}
