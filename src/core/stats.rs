//! Per-session counters and the end-of-session summary.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::domain::{Session, SessionOutcome};

/// Counters for one session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub channel: String,
    pub started_at: DateTime<Utc>,
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub total: u32,
    pub bytes: u64,
    start: Instant,
}

impl SessionStats {
    pub fn new(session_id: impl Into<String>, channel: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            channel: channel.into(),
            started_at,
            downloaded: 0,
            skipped: 0,
            failed: 0,
            total: 0,
            bytes: 0,
            start: Instant::now(),
        }
    }

    pub fn record_download(&mut self, bytes: Option<u64>) {
        self.downloaded += 1;
        if let Some(bytes) = bytes {
            self.bytes += bytes;
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_skips(&mut self, count: u32) {
        self.skipped += count;
    }

    /// Wall time since the session started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Seal the counters into a history entry
    pub fn into_session(&self, outcome: SessionOutcome, ended_at: DateTime<Utc>) -> Session {
        Session {
            id: self.session_id.clone(),
            started_at: self.started_at,
            ended_at: Some(ended_at),
            channel: self.channel.clone(),
            downloaded: self.downloaded,
            failed: self.failed,
            skipped: self.skipped,
            total: self.total,
            bytes: self.bytes,
            outcome,
        }
    }

    pub fn summary(&self, outcome: SessionOutcome) -> SessionSummary {
        SessionSummary {
            outcome,
            downloaded: self.downloaded,
            skipped: self.skipped,
            failed: self.failed,
            total: self.total,
            bytes: self.bytes,
            elapsed: self.elapsed(),
        }
    }
}

/// Printable end-of-session summary
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub outcome: SessionOutcome,
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub total: u32,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session {}", self.outcome)?;
        writeln!(f, "  Downloaded: {}", self.downloaded)?;
        writeln!(f, "  Skipped:    {}", self.skipped)?;
        writeln!(f, "  Failed:     {}", self.failed)?;
        writeln!(f, "  Total:      {}", self.total)?;
        if self.bytes > 0 {
            writeln!(f, "  Size:       {}", format_bytes(self.bytes))?;
        }
        write!(f, "  Duration:   {}", format_duration(self.elapsed))
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// `1h 02m`, `4m 10s`, `12s`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m", h, m)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
