//! Domain types for the downloader.
//!
//! This module contains the core data structures:
//! - MediaItem: what the catalog lists
//! - DownloadRecord: per-item durable state
//! - Session: one run of the orchestrator
//! - ProgressState: the persisted document holding all of the above

pub mod media;
pub mod record;
pub mod session;
pub mod state;
pub mod timestamp;

// Re-export commonly used types
pub use media::{ItemFilter, MediaItem};
pub use record::{AttemptOutcome, DownloadRecord, DownloadStatus};
pub use session::{session_id_for, Session, SessionOutcome};
pub use state::{channel_id_for, ChannelState, ProgressState, StoreSummary};
