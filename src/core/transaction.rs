// This file implements the transaction record - the unit of value transfer in my ledger
// I moved to an account model: a transaction debits sender by amount + fee,
// credits receiver by amount, and carries a per-sender replay nonce

use crate::error::{LedgerError, Result};
use crate::utils::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, is_hex_digest, sha256_hex,
};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

// Field order here is the wire order: sender, receiver, amount, fee, timestamp, nonce, signature, id
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    sender: String,
    receiver: String,
    amount: u64,
    fee: u64,
    timestamp: u64,
    nonce: u64,
    signature: String,
    id: String,
}

impl Transaction {
    /// Create an unsigned transaction stamped with the current time
    pub fn new(sender: &str, receiver: &str, amount: u64, fee: u64, nonce: u64) -> Result<Self> {
        Self::new_with_timestamp(sender, receiver, amount, fee, nonce, current_timestamp()?)
    }

    pub fn new_with_timestamp(
        sender: &str,
        receiver: &str,
        amount: u64,
        fee: u64,
        nonce: u64,
        timestamp: u64,
    ) -> Result<Self> {
        if amount == 0 {
            return Err(LedgerError::Validation(
                "Transaction amount must be positive".to_string(),
            ));
        }
        if sender.is_empty() || receiver.is_empty() {
            return Err(LedgerError::Validation(
                "Sender and receiver must be non-empty".to_string(),
            ));
        }

        let mut tx = Transaction {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            fee,
            timestamp,
            nonce,
            signature: String::new(),
            id: String::new(),
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }

    /// Content hash over every field except signature and id.
    ///
    /// Strings are length-prefixed so that field boundaries can't shift
    /// ("ab" + "c" and "a" + "bc" hash differently).
    pub fn compute_id(&self) -> String {
        let mut content = Vec::with_capacity(64 + self.sender.len() + self.receiver.len());
        for field in [self.sender.as_bytes(), self.receiver.as_bytes()] {
            content.extend((field.len() as u64).to_be_bytes());
            content.extend(field);
        }
        content.extend(self.amount.to_be_bytes());
        content.extend(self.fee.to_be_bytes());
        content.extend(self.timestamp.to_be_bytes());
        content.extend(self.nonce.to_be_bytes());
        sha256_hex(&content)
    }

    /// Sign the id with an ECDSA P-256 PKCS#8 key
    pub fn sign(&mut self, pkcs8: &[u8]) -> Result<()> {
        let signature = ecdsa_p256_sha256_sign_digest(pkcs8, self.id.as_bytes())?;
        self.signature = HEXLOWER.encode(&signature);
        Ok(())
    }

    /// Attach the structural seal accepted by the seal verifier
    pub fn seal(&mut self) {
        self.signature = Self::seal_for(&self.sender, &self.id);
    }

    pub fn seal_for(sender: &str, id: &str) -> String {
        sha256_hex(format!("{sender}{id}").as_bytes())
    }

    /// Structural checks that need no ledger state
    pub fn verify_structure(&self) -> Result<()> {
        if self.amount == 0 {
            return Err(LedgerError::Validation(format!(
                "Transaction {} has a zero amount",
                self.id
            )));
        }
        if self.sender.is_empty() || self.receiver.is_empty() {
            return Err(LedgerError::Validation(format!(
                "Transaction {} has an empty sender or receiver",
                self.id
            )));
        }
        if !is_hex_digest(&self.id) {
            return Err(LedgerError::Validation(format!(
                "Transaction id is not a hex digest: {}",
                self.id
            )));
        }
        let expected = self.compute_id();
        if expected != self.id {
            return Err(LedgerError::Validation(format!(
                "Transaction id {} does not match its content (expected {expected})",
                self.id
            )));
        }
        if self.signature.is_empty() {
            return Err(LedgerError::Validation(format!(
                "Transaction {} is unsigned",
                self.id
            )));
        }
        self.total_cost()?;
        Ok(())
    }

    /// Amount plus fee, the sender's debit
    pub fn total_cost(&self) -> Result<u64> {
        self.amount.checked_add(self.fee).ok_or_else(|| {
            LedgerError::Validation(format!("Transaction {} cost overflows", self.id))
        })
    }

    /// Size of the JSON wire form in bytes, the denominator of fee-per-byte
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Transaction> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_sender(&self) -> &str {
        self.sender.as_str()
    }

    pub fn get_receiver(&self) -> &str {
        self.receiver.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_fee(&self) -> u64 {
        self.fee
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn get_signature(&self) -> &str {
        self.signature.as_str()
    }
}
