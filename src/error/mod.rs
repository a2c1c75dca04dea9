//! Error handling for the ledger
//!
//! Every validation failure is returned to the immediate caller as a
//! [`LedgerError`]. [`ErrorKind`] groups the variants into the categories the
//! node boundary reports as structured error codes.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse error categories exposed to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed transaction or block structure
    Validation,
    /// Linkage, hash or difficulty failures
    Consensus,
    /// Balance, nonce or double-spend failures
    State,
    /// Mempool at capacity
    Capacity,
    /// Transaction or block already known
    Duplicate,
    /// Lookup misses
    NotFound,
    /// Persistence, serialization, configuration and I/O failures
    Storage,
    /// Broken invariants inside the core
    Internal,
}

impl ErrorKind {
    /// Stable error code sent across the node boundary
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Consensus => "consensus_error",
            ErrorKind::State => "state_error",
            ErrorKind::Capacity => "capacity_error",
            ErrorKind::Duplicate => "duplicate_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error types for all ledger operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed transaction or block
    Validation(String),
    /// Block does not point at the current tip
    PreviousHashMismatch { expected: String, found: String },
    /// Stored hash does not recompute
    HashMismatch { expected: String, found: String },
    /// Hash does not carry enough leading zeros
    DifficultyNotMet { hash: String, difficulty: usize },
    /// Block index is not the next one after the tip
    UnexpectedIndex { expected: u64, found: u64 },
    /// Sender cannot cover amount plus fee
    InsufficientBalance {
        address: String,
        required: u64,
        available: u64,
    },
    /// Replay nonce is not the next expected value
    StaleNonce {
        address: String,
        expected: u64,
        found: u64,
    },
    /// The same transaction appears twice in one chain
    DoubleSpend(String),
    /// Mempool reached its configured capacity
    MempoolFull { capacity: usize },
    /// Transaction or block already known
    Duplicate(String),
    /// Lookup miss
    NotFound(String),
    /// Database errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Configuration errors
    Config(String),
    /// Broken invariant, poisoned lock or an invalid candidate built by the miner
    Internal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::PreviousHashMismatch { .. }
            | LedgerError::HashMismatch { .. }
            | LedgerError::DifficultyNotMet { .. }
            | LedgerError::UnexpectedIndex { .. } => ErrorKind::Consensus,
            LedgerError::InsufficientBalance { .. }
            | LedgerError::StaleNonce { .. }
            | LedgerError::DoubleSpend(_) => ErrorKind::State,
            LedgerError::MempoolFull { .. } => ErrorKind::Capacity,
            LedgerError::Duplicate(_) => ErrorKind::Duplicate,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Database(_)
            | LedgerError::Serialization(_)
            | LedgerError::Io(_)
            | LedgerError::Config(_) => ErrorKind::Storage,
            LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// The block builds on a height we already have
    pub fn is_stale(&self) -> bool {
        matches!(self, LedgerError::UnexpectedIndex { expected, found } if found < expected)
    }

    /// The block is ahead of our tip; we are missing its ancestors
    pub fn is_ahead(&self) -> bool {
        matches!(self, LedgerError::UnexpectedIndex { expected, found } if found > expected)
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Validation(msg) => write!(f, "Validation error: {msg}"),
            LedgerError::PreviousHashMismatch { expected, found } => {
                write!(f, "Previous hash mismatch: expected {expected}, found {found}")
            }
            LedgerError::HashMismatch { expected, found } => {
                write!(f, "Hash mismatch: recomputed {expected}, stored {found}")
            }
            LedgerError::DifficultyNotMet { hash, difficulty } => {
                write!(f, "Hash {hash} does not meet difficulty {difficulty}")
            }
            LedgerError::UnexpectedIndex { expected, found } => {
                write!(f, "Unexpected block index: expected {expected}, found {found}")
            }
            LedgerError::InsufficientBalance {
                address,
                required,
                available,
            } => write!(
                f,
                "Insufficient balance for {address}: required {required}, available {available}"
            ),
            LedgerError::StaleNonce {
                address,
                expected,
                found,
            } => write!(
                f,
                "Invalid nonce for {address}: expected {expected}, found {found}"
            ),
            LedgerError::DoubleSpend(msg) => write!(f, "Double spend detected: {msg}"),
            LedgerError::MempoolFull { capacity } => {
                write!(f, "Mempool is full (capacity {capacity})")
            }
            LedgerError::Duplicate(msg) => write!(f, "Already known: {msg}"),
            LedgerError::NotFound(msg) => write!(f, "Not found: {msg}"),
            LedgerError::Database(msg) => write!(f, "Database error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
            LedgerError::Config(msg) => write!(f, "Configuration error: {msg}"),
            LedgerError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}
