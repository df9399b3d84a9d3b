//! Adapter interfaces for external systems.
//!
//! The orchestrator only talks to the outside world through two traits:
//! a [`Catalog`] that lists a channel's items and a [`Fetcher`] that
//! downloads a single item. The yt-dlp implementations live in [`ytdlp`].

pub mod ytdlp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ItemFilter, MediaItem};

// Re-export the yt-dlp adapters
pub use ytdlp::{YtDlpCatalog, YtDlpConfig, YtDlpFetcher};

/// Broad category of a fetch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The item is gone, private, or otherwise not retrievable
    Unavailable,

    /// The remote service is throttling us
    RateLimited,

    /// Connection-level failure
    Network,

    /// Anything else
    Unknown,
}

/// A failed fetch of a single item
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unknown, message)
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOutput {
    /// Final file written (if the fetcher reports it)
    pub path: Option<PathBuf>,

    /// Bytes written (if the fetcher reports it)
    pub bytes: Option<u64>,
}

/// Per-fetch options passed through from the session
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Audio quality in kbps
    pub quality: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            quality: "192".to_string(),
        }
    }
}

/// Errors from listing a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to run catalog tool: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog tool failed: {0}")]
    Tool(String),
}

/// Lists the items of a channel or playlist
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Human-readable catalog name
    fn name(&self) -> &str;

    /// Ordered items for `source`, malformed entries already dropped
    async fn list_items(
        &self,
        source: &str,
        filter: &ItemFilter,
    ) -> Result<Vec<MediaItem>, CatalogError>;
}

/// Downloads one item
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable fetcher name
    fn name(&self) -> &str;

    /// Fetch `item` into `destination`
    async fn fetch(
        &self,
        item: &MediaItem,
        destination: &Path,
        options: &FetchOptions,
    ) -> Result<FetchOutput, FetchError>;
}
