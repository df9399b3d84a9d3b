//! stealthdl - Slow, resumable, quota-aware channel audio downloader
//!
//! Downloads a channel's items one at a time with human-looking pacing,
//! a per-day quota and time-of-day rules, recording every outcome in a
//! durable progress file so an interrupted session resumes where it left
//! off.
//!
//! # Modules
//!
//! - `adapters`: Catalog and Fetcher traits plus the yt-dlp implementations
//! - `core`: ProgressStore, retry classification, DelayScheduler, SessionOrchestrator
//! - `domain`: Data structures (MediaItem, DownloadRecord, Session, ProgressState)
//! - `control`: Ctrl-C and pause sentinel cancellation
//! - `config`: Config file and environment resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Download a channel with the paranoid preset
//! stealthdl run "https://www.youtube.com/@someone" --stealth paranoid
//!
//! # Stop a running session from another shell
//! stealthdl pause
//!
//! # Show progress
//! stealthdl stats
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod control;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{
    DelayScheduler, ProgressStore, SessionOptions, SessionOrchestrator, SessionReport,
    StealthProfile,
};
pub use crate::domain::{DownloadRecord, DownloadStatus, MediaItem, Session, SessionOutcome};
