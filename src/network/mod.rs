//! Boundary towards the network layer
//!
//! The ledger performs no network I/O. Peers reach it through [`Node`] with
//! tagged JSON [`Message`]s and learn about new tips from [`ChainEvent`]s.

pub mod events;
pub mod message;
pub mod node;

pub use events::{ChainEvent, EventBus};
pub use message::{Message, Response, ResponseStatus};
pub use node::{Node, TransactionLocation};
