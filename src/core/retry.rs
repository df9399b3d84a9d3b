//! Classification of fetch failures.
//!
//! Permanent failures (item gone, access restricted, withdrawn) get exactly
//! one attempt. Everything else is transient and may be retried until the
//! attempt budget runs out.

use crate::adapters::{FetchError, FetchErrorKind};
use crate::domain::AttemptOutcome;

/// How a failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Permanent,
    Transient,
}

impl From<Disposition> for AttemptOutcome {
    fn from(d: Disposition) -> Self {
        match d {
            Disposition::Permanent => AttemptOutcome::Permanent,
            Disposition::Transient => AttemptOutcome::Transient,
        }
    }
}

/// Phrases that mean "try again later" even though they may also contain a
/// permanent keyword ("Service Unavailable")
const TRANSIENT_PATTERNS: &[&str] = &[
    "service unavailable",
    "temporarily unavailable",
    "try again later",
    "http error 503",
    "http error 429",
    "too many requests",
    "not a bot",
    "timed out",
    "timeout",
    "connection",
];

/// Phrases that mean the item will never be retrievable
const PERMANENT_PATTERNS: &[&str] = &[
    // gone
    "video unavailable",
    "unavailable",
    "deleted",
    "removed",
    "no longer available",
    "terminated",
    "does not exist",
    // access restricted
    "private video",
    "private",
    "members-only",
    "age-restricted",
    "confirm your age",
    // withdrawn
    "copyright",
    "blocked it",
    "not available in your country",
];

/// Classify a fetch failure
pub fn classify(error: &FetchError) -> Disposition {
    if error.kind == FetchErrorKind::Unavailable {
        return Disposition::Permanent;
    }
    classify_message(&error.message)
}

/// Drop the `ERROR: [extractor] <id>:` prefix so the item id never takes
/// part in matching
pub fn strip_item_prefix(message: &str) -> &str {
    let trimmed = message.trim();
    let rest = trimmed.strip_prefix("ERROR:").unwrap_or(trimmed).trim_start();

    let after_tag = match rest.strip_prefix('[').and_then(|r| r.split_once(']')) {
        Some((_, tail)) => tail.trim_start(),
        None => return rest,
    };

    match after_tag.split_once(':') {
        Some((id, tail)) if !id.is_empty() && !id.contains(char::is_whitespace) => tail.trim_start(),
        _ => after_tag,
    }
}

/// Classify raw error text
pub fn classify_message(message: &str) -> Disposition {
    let msg = strip_item_prefix(message).to_lowercase();

    if TRANSIENT_PATTERNS.iter().any(|p| msg.contains(p)) {
        return Disposition::Transient;
    }

    if PERMANENT_PATTERNS.iter().any(|p| msg.contains(p)) {
        return Disposition::Permanent;
    }

    Disposition::Transient
}
