//! Error kinds for every fallible core operation.
//!
//! Mirrors the teacher's `Result<_, String>` shape (see `CoreSimulator::new`,
//! `poke`, `peek`) but replaces the ad hoc `String` with a typed enum so
//! callers can match on failure kind instead of grepping messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("malformed statement: {0}")]
    MalformedStatement(String),

    #[error("bad expression: {0}")]
    BadExpression(String),

    #[error("unresolved signal: {0}")]
    UnresolvedSignal(String),

    #[error("missing module: {0}")]
    MissingModule(String),

    #[error("missing ROM data file: {0}")]
    MissingRom(String),

    #[error("bad memory binding: {0}")]
    BadBinding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
