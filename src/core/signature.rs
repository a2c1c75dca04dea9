// Signature verification is a pluggable capability: the ledger only asks
// "does this signature authorize this transaction id?"

use crate::core::Transaction;
use crate::utils::ecdsa_p256_sha256_sign_verify;
use data_encoding::HEXLOWER;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Decides whether a transaction's signature authorizes it
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, tx: &Transaction) -> bool;

    fn scheme(&self) -> SignatureScheme;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// SHA-256 seal of sender || id, no key material
    #[default]
    Seal,
    /// ECDSA P-256 over the id, keys looked up in a [`KeyRegistry`]
    Ecdsa,
}

/// Explicit address -> public key registry handed to the verifier at bootstrap
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl KeyRegistry {
    pub fn new() -> KeyRegistry {
        KeyRegistry::default()
    }

    pub fn register(&self, address: &str, public_key: Vec<u8>) {
        match self.keys.write() {
            Ok(mut keys) => {
                keys.insert(address.to_string(), public_key);
            }
            Err(e) => error!("Failed to acquire write lock on key registry: {e}"),
        }
    }

    pub fn get(&self, address: &str) -> Option<Vec<u8>> {
        match self.keys.read() {
            Ok(keys) => keys.get(address).cloned(),
            Err(e) => {
                error!("Failed to acquire read lock on key registry: {e}");
                None
            }
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SealVerifier;

impl SignatureVerifier for SealVerifier {
    fn verify(&self, tx: &Transaction) -> bool {
        tx.get_signature() == Transaction::seal_for(tx.get_sender(), tx.get_id())
    }

    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Seal
    }
}

#[derive(Debug, Clone)]
pub struct EcdsaVerifier {
    registry: Arc<KeyRegistry>,
}

impl EcdsaVerifier {
    pub fn new(registry: Arc<KeyRegistry>) -> EcdsaVerifier {
        EcdsaVerifier { registry }
    }
}

impl SignatureVerifier for EcdsaVerifier {
    fn verify(&self, tx: &Transaction) -> bool {
        let Some(public_key) = self.registry.get(tx.get_sender()) else {
            debug!("No public key registered for {}", tx.get_sender());
            return false;
        };
        let Ok(signature) = HEXLOWER.decode(tx.get_signature().as_bytes()) else {
            return false;
        };
        ecdsa_p256_sha256_sign_verify(&public_key, &signature, tx.get_id().as_bytes())
    }

    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Ecdsa
    }
}

/// Build the verifier for a configured scheme
pub fn verifier_for(
    scheme: SignatureScheme,
    registry: Arc<KeyRegistry>,
) -> Arc<dyn SignatureVerifier> {
    match scheme {
        SignatureScheme::Seal => Arc::new(SealVerifier),
        SignatureScheme::Ecdsa => Arc::new(EcdsaVerifier::new(registry)),
    }
}
