//! Protocol-level rejections.
//!
//! These never tear down a connection: the session reports them and the
//! driver logs and drops the offending message.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("unexpected {kind} message while {state}")]
    Unexpected { kind: &'static str, state: String },

    #[error("session is disconnected")]
    Disconnected,

    #[error("undecodable frame: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Decode(e.to_string())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
