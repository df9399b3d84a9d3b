//! Media items as reported by a catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single remote media item (one video of a channel)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable unique identifier assigned by the remote service
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// URL the item can be fetched from
    pub source: String,

    /// Duration in seconds (if the catalog reported it)
    #[serde(default)]
    pub duration: Option<u64>,

    /// Upload time (if the catalog reported it)
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// Create an item with only the required fields
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source: source.into(),
            duration: None,
            uploaded_at: None,
        }
    }

    /// Attach a duration
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Attach an upload time
    pub fn with_uploaded_at(mut self, uploaded_at: DateTime<Utc>) -> Self {
        self.uploaded_at = Some(uploaded_at);
        self
    }

    /// Title shortened for log lines
    pub fn short_title(&self) -> String {
        truncate_chars(&self.title, 60)
    }
}

/// Filters applied by the catalog while listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    /// Only keep items uploaded within the last N days
    pub days: Option<u32>,

    /// Oldest first instead of the catalog's newest-first order
    pub reverse: bool,
}

/// Truncate to at most `max` characters, appending "..." when cut
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{}...", cut)
}
