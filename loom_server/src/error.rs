use crate::framing::FrameOverflow;
use crate::protocol::Severity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("pattern json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database schema version {found} is not {expected}; restart with --reset-db")]
    SchemaMismatch { found: i64, expected: i64 },
    #[error("no such pattern: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("loom i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("loom connection closed")]
    Closed,
    #[error("not connected to the loom")]
    NotConnected,
    #[error("cannot open loom port {port:?}: {reason}")]
    Open { port: String, reason: String },
    #[error("invalid loom reply {reply:?}: {reason}")]
    Codec { reply: String, reason: String },
    #[error(transparent)]
    Framing(#[from] FrameOverflow),
}

/// Why a client command was refused. Every variant is reported to the
/// client; none of them ends the session.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Protocol(String),
    #[error("{0}")]
    StateConflict(String),
    #[error("could not save: {0}")]
    Persistence(#[from] StoreError),
    #[error("{0}")]
    Hardware(#[from] LinkError),
}

impl CommandError {
    pub fn severity(&self) -> Severity {
        match self {
            CommandError::StateConflict(_) => Severity::Warning,
            CommandError::Protocol(_)
            | CommandError::Persistence(_)
            | CommandError::Hardware(_) => Severity::Error,
        }
    }
}
