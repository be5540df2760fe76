//! Typed failures for session operations.
//!
//! Every variant maps to one stable wire error code so the gateway and the
//! HTTP surface report failures identically.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session already terminated: {0}")]
    Terminated(String),

    #[error("session quota exceeded: {active} of {max} active")]
    QuotaExceeded { active: usize, max: usize },

    #[error("working directory does not exist or is not a directory: {0}")]
    InvalidWorkDir(String),

    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("failed to spawn session process: {0}")]
    SpawnFailed(String),

    #[error("pty operation failed: {0}")]
    Pty(String),
}

impl SessionError {
    /// Stable code carried in wire `error` messages.
    pub fn wire_code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "not_found",
            SessionError::Terminated(_) => "terminated",
            SessionError::QuotaExceeded { .. } => "quota_exceeded",
            SessionError::InvalidWorkDir(_) => "invalid_path",
            SessionError::UnknownAgentType(_) => "unknown_agent_type",
            SessionError::SpawnFailed(_) | SessionError::Pty(_) => "spawn_failed",
        }
    }
}
