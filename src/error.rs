// src/error.rs
// Coordination error taxonomy. These cross the tool boundary as structured
// results, never as panics; one session's failure must not leak into another.

use serde::Serialize;
use thiserror::Error;

use crate::session::LockMode;

/// Detail payload for a contended claim. Carries enough for the caller to
/// decide whether to wait, message the holder, or retry after expiry.
#[derive(Debug, Clone, Serialize)]
pub struct LockConflict {
    pub path: String,
    pub holder: String,
    pub mode: LockMode,
    pub expires_in_seconds: i64,
}

#[derive(Debug, Error)]
pub enum CoordError {
    /// Malformed session/agent encoding. Rejected before any state mutation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Caller type not permitted. Deliberately shaped like a missing tool so
    /// unauthorized callers cannot probe for the capability.
    #[error("tool not available")]
    ToolNotAvailable,

    /// Lock claim contended. Never retried automatically by the core.
    #[error("lock conflict on {} path(s)", .0.len())]
    Conflict(Vec<LockConflict>),

    /// Operation on a session past close. Caller must start a new session.
    #[error("session is closed")]
    SessionClosed,

    #[error("not found: {0}")]
    NotFound(String),

    /// Long-term store write failed. The session stays degraded-closed with
    /// ephemeral state retained; close is safely retriable.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl CoordError {
    /// User-facing rendering. Internal classifier/store detail stays generic;
    /// conflicts and closed sessions surface actionable detail.
    pub fn to_tool_message(&self) -> String {
        match self {
            CoordError::Conflict(conflicts) => {
                let mut msg = String::from("Conflict:\n");
                for c in conflicts {
                    msg.push_str(&format!(
                        "  {} held by {} ({}, expires in {}s)\n",
                        c.path,
                        c.holder,
                        c.mode.as_str(),
                        c.expires_in_seconds
                    ));
                }
                msg
            }
            CoordError::Persistence(_) => {
                "Session close degraded: summary not yet persisted, will retry".to_string()
            }
            other => other.to_string(),
        }
    }
}
