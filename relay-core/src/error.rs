use thiserror::Error;

/// Domain errors surfaced by the bridge. Distinguished from transport errors
/// (`relay-telegram`) so the orchestrator can decide what to show the user.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{engine} emitted session id {got} but expected {expected}")]
    SessionMismatch {
        engine: String,
        expected: String,
        got: String,
    },

    #[error("resume token is for engine {0:?}, not the engine this runner handles")]
    WrongEngine(EngineId),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

use crate::engine::EngineId;
