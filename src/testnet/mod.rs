//! Testnet helpers for ledger testing
//!
//! Funded chains, sealed transactions and quickly mined blocks shared by the
//! unit tests.

pub mod test_utils;

pub use test_utils::*;
