//! Utility functions and helpers
//!
//! Hashing, signing and the bincode helpers shared by the ledger core.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    is_hex_digest, new_key_pair, public_key_from_pkcs8, sha256_digest, sha256_hex,
};

pub use serialization::{deserialize, serialize};
