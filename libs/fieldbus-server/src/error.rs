//! Server-side error type for setup and I/O faults.
//!
//! Protocol-level errors stay in `fieldbus_proto::ErrorCode`; this covers
//! what can go wrong around them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ServerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
