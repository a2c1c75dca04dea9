// Wire messages exchanged with the network layer. Every message kind is a
// variant here; a payload with any other "type" fails to parse

use crate::core::{Block, Transaction};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Inbound message, JSON-encoded as `{"type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    Transaction(Transaction),
    Block(Block),
    /// A peer's full chain, genesis first
    Chain(Vec<Block>),
    ChainRequest,
}

impl Message {
    pub fn parse(raw: &str) -> Result<Message> {
        serde_json::from_str(raw)
            .map_err(|e| LedgerError::Validation(format!("Malformed message: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Transaction(_) => "transaction",
            Message::Block(_) => "block",
            Message::Chain(_) => "chain",
            Message::ChainRequest => "chain_request",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Reply to a handled message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    pub message: String,
    /// Error code from the ledger error taxonomy, set on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Response {
        Response {
            status: ResponseStatus::Success,
            message: message.into(),
            code: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Response {
        self.data = Some(data);
        self
    }

    pub fn error(err: &LedgerError) -> Response {
        Response {
            status: ResponseStatus::Error,
            message: err.to_string(),
            code: Some(err.code().to_string()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
