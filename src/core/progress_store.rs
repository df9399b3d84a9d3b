//! Durable progress store backed by a single JSON document.
//!
//! Every state change is written through immediately. Writes go to a
//! temporary file in the same directory which is then renamed over the
//! canonical name, so a crash never leaves a half-written document behind.
//! An exclusive lock file keeps a second session away from the same store.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{
    channel_id_for, AttemptOutcome, ChannelState, DownloadRecord, DownloadStatus, MediaItem,
    ProgressState, Session, StoreSummary,
};

/// File name of the progress document inside the destination directory
pub const PROGRESS_FILE: &str = ".stealth_progress.json";

/// File name of the lock file inside the destination directory
pub const LOCK_FILE: &str = ".stealth_progress.lock";

/// Errors that can occur with the progress store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Progress file {path} is corrupt: {source}")]
    Corruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Progress store {0} is in use by another session")]
    Locked(PathBuf),

    #[error("Record {id} is {status:?} and cannot change")]
    TerminalRecord { id: String, status: DownloadStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What to do when the persisted document cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptionPolicy {
    /// Surface the error to the operator
    #[default]
    Abort,

    /// Move the corrupt file aside and start from an empty state
    BackupAndReset,
}

/// Single-writer store for one destination directory
pub struct ProgressStore {
    /// Path to the progress document
    path: PathBuf,

    /// In-memory copy of the document
    state: ProgressState,

    /// Held for the lifetime of the store; the lock is released on drop
    _lock: File,
}

impl ProgressStore {
    /// Open the store in `dir`, taking the exclusive lock
    pub fn open(dir: &Path, policy: CorruptionPolicy) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(dir.to_path_buf()))?;

        let path = dir.join(PROGRESS_FILE);
        let state = match Self::load(&path) {
            Ok(state) => state,
            Err(StoreError::Corruption { path, source }) => match policy {
                CorruptionPolicy::Abort => {
                    return Err(StoreError::Corruption { path, source });
                }
                CorruptionPolicy::BackupAndReset => {
                    let backup = Self::backup_corrupt(&path)?;
                    warn!(
                        error = %source,
                        backup = %backup.display(),
                        "Progress file was corrupt; moved aside and starting from empty state"
                    );
                    ProgressState::default()
                }
            },
            Err(e) => return Err(e),
        };

        debug!(
            path = %path.display(),
            downloaded = state.downloaded_videos.len(),
            failed = state.failed_videos.len(),
            "Opened progress store"
        );

        Ok(Self {
            path,
            state,
            _lock: lock,
        })
    }

    /// Read a progress document without taking the lock.
    ///
    /// A missing file yields an empty state.
    pub fn load(path: &Path) -> Result<ProgressState, StoreError> {
        if !path.exists() {
            return Ok(ProgressState::default());
        }

        let content = fs::read_to_string(path)?;
        let mut state: ProgressState =
            serde_json::from_str(&content).map_err(|source| StoreError::Corruption {
                path: path.to_path_buf(),
                source,
            })?;
        state.normalize();

        Ok(state)
    }

    /// Progress document path for a destination directory
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(PROGRESS_FILE)
    }

    /// Move a corrupt document to `<name>.corrupt-<timestamp>`
    fn backup_corrupt(path: &Path) -> Result<PathBuf, StoreError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let backup = path.with_file_name(format!("{}.corrupt-{}", PROGRESS_FILE, stamp));
        fs::rename(path, &backup)?;
        Ok(backup)
    }

    /// Persist the full state atomically
    pub fn save(&self) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let json = serde_json::to_string_pretty(&self.state)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        Ok(())
    }

    /// Current in-memory state
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Path of the progress document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up an item's record
    pub fn record(&self, item_id: &str) -> Option<&DownloadRecord> {
        self.state.record(item_id)
    }

    /// True iff the item has no record, or a Pending/FailedTransient record
    /// with attempts left
    pub fn is_eligible(&self, item_id: &str, max_retries: u32) -> bool {
        match self.state.record(item_id) {
            None => true,
            Some(record) => record.is_eligible(max_retries),
        }
    }

    /// Successful fetches on a local date
    pub fn downloads_on(&self, date: NaiveDate) -> u32 {
        self.state.downloads_on(date)
    }

    /// Create the Pending record for an item whose first fetch is starting.
    ///
    /// Existing records are left alone.
    pub fn begin_attempt(
        &mut self,
        item: &MediaItem,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.state.record(&item.id).is_some() {
            return Ok(());
        }

        self.state
            .failed_videos
            .insert(item.id.clone(), DownloadRecord::pending(item, session_id, now));
        self.save()
    }

    /// Record the outcome of one fetch attempt and persist it
    pub fn record_attempt(
        &mut self,
        item: &MediaItem,
        outcome: AttemptOutcome,
        error: Option<&str>,
        session_id: &str,
        now: DateTime<Local>,
    ) -> Result<DownloadRecord, StoreError> {
        let now_utc = now.with_timezone(&Utc);

        if let Some(existing) = self.state.downloaded_videos.get(&item.id) {
            return Err(StoreError::TerminalRecord {
                id: item.id.clone(),
                status: existing.status,
            });
        }

        let mut record = self
            .state
            .failed_videos
            .remove(&item.id)
            .unwrap_or_else(|| DownloadRecord::pending(item, session_id, now_utc));

        if !record.apply(outcome, error, session_id, now_utc) {
            let status = record.status;
            self.state.failed_videos.insert(item.id.clone(), record);
            return Err(StoreError::TerminalRecord {
                id: item.id.clone(),
                status,
            });
        }

        if record.status == DownloadStatus::Downloaded {
            *self
                .state
                .daily_downloads
                .entry(now.date_naive())
                .or_insert(0) += 1;
            self.state
                .downloaded_videos
                .insert(item.id.clone(), record.clone());
        } else {
            self.state
                .failed_videos
                .insert(item.id.clone(), record.clone());
        }

        self.save()?;
        Ok(record)
    }

    /// Update the channel entry at session start
    pub fn record_channel(
        &mut self,
        source: &str,
        total_items: usize,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let channel_id = channel_id_for(source);
        self.state.channels.insert(
            channel_id.clone(),
            ChannelState {
                source: source.to_string(),
                total_items,
                updated_at: now,
                session_id: session_id.to_string(),
            },
        );
        self.save()?;
        Ok(channel_id)
    }

    /// Append a finished session to the history
    pub fn append_session(&mut self, session: Session) -> Result<(), StoreError> {
        self.state.sessions.push(session);
        self.save()
    }

    /// Totals, recent days and recent sessions
    pub fn summary(&self) -> StoreSummary {
        self.state.summary()
    }

    /// Failed or pending records that may still be retried, oldest first
    pub fn retryable(&self, max_retries: u32) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> = self
            .state
            .failed_videos
            .values()
            .filter(|r| r.is_eligible(max_retries) && !r.source.is_empty())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.first_attempt_at.cmp(&b.first_attempt_at));
        records
    }
}
