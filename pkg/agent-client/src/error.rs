//! Agent client error taxonomy (spec §4.2, §7).

use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent call timed out at {deadline:?}")]
    Timeout { deadline: Instant },
    #[error("agent transport disconnected")]
    Unavailable,
    #[error("agent returned status {status}: {message}")]
    Agent { status: i32, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode/decode agent frame: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
