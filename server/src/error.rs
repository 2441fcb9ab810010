//! Error types for server setup and the per-connection transport.
//!
//! Vote validation never produces an error: a rejected vote is a
//! [`shared::VoteResult`] returned to the voter.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dictionary error: {0}")]
    Dictionary(String),

    #[error("game record of {0} bytes exceeds the record size limit")]
    RecordTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, ServerError>;
