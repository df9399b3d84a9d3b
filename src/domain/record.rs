//! Per-item download records.
//!
//! A record is created lazily when the first fetch of an item begins and is
//! only ever transitioned afterwards, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::media::{truncate_chars, MediaItem};
use super::timestamp;

/// Maximum stored length of an error message
pub const MAX_ERROR_CHARS: usize = 200;

/// Download status of a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Fetch started but no outcome recorded yet
    Pending,

    /// Fetched successfully (terminal)
    Downloaded,

    /// Failed, may be retried while attempts remain
    FailedTransient,

    /// Failed for good (terminal)
    FailedPermanent,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl DownloadStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Downloaded | Self::FailedPermanent)
    }
}

/// Outcome of one fetch attempt, after classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Downloaded,
    Transient,
    Permanent,
}

impl AttemptOutcome {
    fn status(self) -> DownloadStatus {
        match self {
            Self::Downloaded => DownloadStatus::Downloaded,
            Self::Transient => DownloadStatus::FailedTransient,
            Self::Permanent => DownloadStatus::FailedPermanent,
        }
    }
}

/// Durable state of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Item id (the map key; filled in on load for older documents)
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// URL used for the fetch
    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub status: DownloadStatus,

    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub first_attempt_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    #[serde(
        default,
        alias = "downloaded_at",
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    /// Session that last touched this record
    #[serde(default, alias = "session")]
    pub session_id: String,

    /// Flag written by older versions of the progress file
    #[serde(default, skip_serializing)]
    pub permanent_failure: bool,
}

impl DownloadRecord {
    /// Fresh Pending record for an item about to be fetched
    pub fn pending(item: &MediaItem, session_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            source: item.source.clone(),
            status: DownloadStatus::Pending,
            attempts: 0,
            last_error: None,
            first_attempt_at: Some(now),
            last_attempt_at: None,
            completed_at: None,
            session_id: session_id.to_string(),
            permanent_failure: false,
        }
    }

    /// Apply an attempt outcome. Returns false if the record is terminal.
    pub fn apply(
        &mut self,
        outcome: AttemptOutcome,
        error: Option<&str>,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        self.attempts += 1;
        self.status = outcome.status();
        self.last_attempt_at = Some(now);
        self.first_attempt_at.get_or_insert(now);
        self.session_id = session_id.to_string();

        match outcome {
            AttemptOutcome::Downloaded => {
                self.completed_at = Some(now);
                self.last_error = None;
            }
            AttemptOutcome::Transient | AttemptOutcome::Permanent => {
                self.last_error = error.map(|e| truncate_chars(e, MAX_ERROR_CHARS));
            }
        }

        true
    }

    /// Whether another fetch may be attempted
    pub fn is_eligible(&self, max_retries: u32) -> bool {
        matches!(
            self.status,
            DownloadStatus::Pending | DownloadStatus::FailedTransient
        ) && self.attempts < max_retries
    }

    /// Rebuild the media item this record was created from
    pub fn to_media_item(&self) -> MediaItem {
        MediaItem::new(self.id.clone(), self.title.clone(), self.source.clone())
    }
}
