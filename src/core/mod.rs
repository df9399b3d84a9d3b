//! Core download logic.
//!
//! This module contains:
//! - ProgressStore: durable per-item state, quota counters, session history
//! - Retry: failure classification
//! - Scheduler: pacing, quota and time-of-day policy
//! - Stats: per-session counters
//! - Orchestrator: the session state machine

pub mod orchestrator;
pub mod progress_store;
pub mod retry;
pub mod scheduler;
pub mod stats;

// Re-export commonly used types
pub use orchestrator::{
    truncate_to_quota, SessionOptions, SessionOrchestrator, SessionReport, SessionState,
    EXIT_INTERRUPTED, RETRY_CHANNEL,
};
pub use progress_store::{CorruptionPolicy, ProgressStore, StoreError, LOCK_FILE, PROGRESS_FILE};
pub use retry::{classify, classify_message, strip_item_prefix, Disposition};
pub use scheduler::{
    check_quota, round_for_plausibility, Admission, BreakRule, Clock, DelayScheduler, HourWindow,
    LoadPolicy, Preset, ProfileError, ProfileOverrides, QuotaCheck, StealthProfile, StepEscalation,
    SystemClock,
};
pub use stats::{SessionStats, SessionSummary};
