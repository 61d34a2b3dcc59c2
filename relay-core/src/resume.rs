use serde::{Deserialize, Serialize};

use crate::engine::EngineId;

/// Engine-tagged opaque session identifier.
///
/// Immutable once created; equal iff both fields are equal. Created by a
/// translator on the first `Started` event of a run and never destroyed —
/// only dropped from whatever in-memory map is holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken {
    pub engine: EngineId,
    pub value: String,
}

impl ResumeToken {
    pub fn new(engine: impl Into<EngineId>, value: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            value: value.into(),
        }
    }
}
