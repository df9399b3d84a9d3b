//! Session history records.
//!
//! A Session is one run of the orchestrator from start to a terminal state.
//! It is appended to the history once and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::timestamp;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Item list exhausted
    Completed,

    /// Interrupted, paused, or outside allowed hours (resumable)
    Stopped,

    /// Daily quota reached (resumable next day)
    QuotaExhausted,
}

impl Default for SessionOutcome {
    fn default() -> Self {
        Self::Completed
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::QuotaExhausted => "quota-exhausted",
        };
        f.write_str(s)
    }
}

/// Summary of one finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    #[serde(alias = "started", alias = "date", deserialize_with = "timestamp::deserialize")]
    pub started_at: DateTime<Utc>,

    #[serde(default, alias = "ended", deserialize_with = "timestamp::deserialize_option")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Channel (or other source) processed
    #[serde(default)]
    pub channel: String,

    #[serde(default)]
    pub downloaded: u32,

    #[serde(default)]
    pub failed: u32,

    #[serde(default)]
    pub skipped: u32,

    #[serde(default)]
    pub total: u32,

    #[serde(default)]
    pub bytes: u64,

    #[serde(default)]
    pub outcome: SessionOutcome,
}

/// Derive a session id from the session start time (8 hex chars)
pub fn session_id_for(started_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(started_at.to_rfc3339().as_bytes());
    hex::encode(&hasher.finalize()[..4])
}
