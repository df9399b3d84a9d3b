//! The persisted progress document.
//!
//! One document per destination directory. Items that finished successfully
//! live in `downloaded_videos`; every other record (pending or failed) lives
//! in `failed_videos`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::record::{DownloadRecord, DownloadStatus};
use super::session::Session;
use super::timestamp;

/// Per-channel bookkeeping, written once per session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Channel URL
    #[serde(alias = "url")]
    pub source: String,

    /// Number of items the catalog returned
    #[serde(default)]
    pub total_items: usize,

    #[serde(alias = "started", deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, alias = "session")]
    pub session_id: String,
}

/// Full progress document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default, alias = "downloadedVideos")]
    pub downloaded_videos: BTreeMap<String, DownloadRecord>,

    #[serde(default, alias = "failedVideos")]
    pub failed_videos: BTreeMap<String, DownloadRecord>,

    #[serde(default)]
    pub channels: BTreeMap<String, ChannelState>,

    /// Successful fetches per local calendar date
    #[serde(default, alias = "dailyDownloads")]
    pub daily_downloads: BTreeMap<NaiveDate, u32>,

    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl ProgressState {
    /// Look up the record for an item in either collection
    pub fn record(&self, item_id: &str) -> Option<&DownloadRecord> {
        self.downloaded_videos
            .get(item_id)
            .or_else(|| self.failed_videos.get(item_id))
    }

    /// Successful fetches on a date
    pub fn downloads_on(&self, date: NaiveDate) -> u32 {
        self.daily_downloads.get(&date).copied().unwrap_or(0)
    }

    /// Bring documents written by older versions up to the current shape.
    ///
    /// Older records carry no `status` and no `id`; their collection and the
    /// `permanent_failure` flag decide the status instead. Older versions also
    /// left failure entries behind after a later success; the downloaded
    /// record wins.
    pub fn normalize(&mut self) {
        for (id, record) in self.downloaded_videos.iter_mut() {
            if record.id.is_empty() {
                record.id = id.clone();
            }
            record.status = DownloadStatus::Downloaded;
            if record.attempts == 0 {
                record.attempts = 1;
            }
        }

        for (id, record) in self.failed_videos.iter_mut() {
            if record.id.is_empty() {
                record.id = id.clone();
            }
            if record.permanent_failure {
                record.status = DownloadStatus::FailedPermanent;
                record.permanent_failure = false;
            } else if record.status == DownloadStatus::Pending && record.attempts > 0 {
                record.status = DownloadStatus::FailedTransient;
            }
        }

        let downloaded = &self.downloaded_videos;
        self.failed_videos.retain(|id, _| !downloaded.contains_key(id));
    }

    /// Aggregate view for the `stats` command
    pub fn summary(&self) -> StoreSummary {
        let count = |status: DownloadStatus| {
            self.failed_videos
                .values()
                .filter(|r| r.status == status)
                .count()
        };

        let recent_days = self
            .daily_downloads
            .iter()
            .rev()
            .take(7)
            .map(|(d, c)| (*d, *c))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let skip = self.sessions.len().saturating_sub(5);

        StoreSummary {
            downloaded: self.downloaded_videos.len(),
            failed_transient: count(DownloadStatus::FailedTransient),
            failed_permanent: count(DownloadStatus::FailedPermanent),
            pending: count(DownloadStatus::Pending),
            channels: self.channels.len(),
            total_sessions: self.sessions.len(),
            recent_days,
            recent_sessions: self.sessions[skip..].to_vec(),
        }
    }
}

/// Aggregate statistics over the whole progress document
#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub downloaded: usize,
    pub failed_transient: usize,
    pub failed_permanent: usize,
    pub pending: usize,
    pub channels: usize,
    pub total_sessions: usize,
    /// Last seven dates with downloads, oldest first
    pub recent_days: Vec<(NaiveDate, u32)>,
    /// Last five sessions, oldest first
    pub recent_sessions: Vec<Session>,
}

/// Channel key derived from its URL (`channel_` + 8 hex chars)
pub fn channel_id_for(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("channel_{}", hex::encode(&hasher.finalize()[..4]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
  "downloaded_videos": {
    "aaaaaaaaaaa": {"title": "One", "downloaded_at": "2024-03-01T12:00:00.123456", "session": "deadbeef"}
  },
  "failed_videos": {
    "bbbbbbbbbbb": {"title": "Gone", "attempts": 1, "permanent_failure": true},
    "ccccccccccc": {"title": "Flaky", "attempts": 2, "permanent_failure": false, "errors": []}
  },
  "channels": {},
  "daily_downloads": {"2024-03-01": 1},
  "sessions": []
}"#;

    #[test]
    fn test_legacy_document_normalizes() {
        let mut state: ProgressState = serde_json::from_str(LEGACY).unwrap();
        state.normalize();

        let one = state.record("aaaaaaaaaaa").unwrap();
        assert_eq!(one.status, DownloadStatus::Downloaded);
        assert_eq!(one.id, "aaaaaaaaaaa");
        assert_eq!(one.session_id, "deadbeef");
        assert!(one.completed_at.is_some());

        let gone = state.record("bbbbbbbbbbb").unwrap();
        assert_eq!(gone.status, DownloadStatus::FailedPermanent);

        let flaky = state.record("ccccccccccc").unwrap();
        assert_eq!(flaky.status, DownloadStatus::FailedTransient);
        assert_eq!(flaky.attempts, 2);

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(state.downloads_on(date), 1);
    }

    #[test]
    fn test_downloaded_record_shadows_stale_failure() {
        let doc = r#"{
  "downloaded_videos": {
    "aaaaaaaaaaa": {"title": "One", "downloaded_at": "2024-03-01T12:00:00"}
  },
  "failed_videos": {
    "aaaaaaaaaaa": {"title": "One", "attempts": 2, "permanent_failure": false},
    "ccccccccccc": {"title": "Flaky", "attempts": 1, "permanent_failure": false}
  }
}"#;
        let mut state: ProgressState = serde_json::from_str(doc).unwrap();
        state.normalize();

        assert!(!state.failed_videos.contains_key("aaaaaaaaaaa"));
        assert_eq!(state.record("aaaaaaaaaaa").unwrap().status, DownloadStatus::Downloaded);

        let summary = state.summary();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed_transient, 1);
    }

    #[test]
    fn test_channel_id() {
        let id = channel_id_for("https://www.youtube.com/@someone");
        assert!(id.starts_with("channel_"));
        assert_eq!(id.len(), "channel_".len() + 8);
        assert_eq!(id, channel_id_for("https://www.youtube.com/@someone"));
    }

    #[test]
    fn test_summary_of_empty_state() {
        let summary = ProgressState::default().summary();
        assert_eq!(summary.downloaded, 0);
        assert!(summary.recent_days.is_empty());
        assert!(summary.recent_sessions.is_empty());
    }
}
