use std::fmt;

/// Errors raised by PTY operations.
#[derive(Debug)]
pub enum PtyError {
    /// Opening the PTY or spawning the child failed
    SpawnFailed(String),
    /// Writing to the PTY's input failed
    WriteFailed(String),
    /// Resizing the PTY failed
    ResizeFailed(String),
    /// Signalling/killing the child failed
    KillFailed(String),
    /// The actor is gone (channel closed)
    Channel(String),
}

impl fmt::Display for PtyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "failed to spawn PTY: {}", msg),
            PtyError::WriteFailed(msg) => write!(f, "failed to write to PTY: {}", msg),
            PtyError::ResizeFailed(msg) => write!(f, "failed to resize PTY: {}", msg),
            PtyError::KillFailed(msg) => write!(f, "failed to kill PTY process: {}", msg),
            PtyError::Channel(msg) => write!(f, "PTY actor unavailable: {}", msg),
        }
    }
}

impl std::error::Error for PtyError {}

impl From<anyhow::Error> for PtyError {
    fn from(err: anyhow::Error) -> Self {
        PtyError::SpawnFailed(err.to_string())
    }
}
