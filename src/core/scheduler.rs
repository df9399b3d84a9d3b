//! Pacing, quota and time-of-day policy.
//!
//! Delays are drawn from an injected random source so callers (and tests)
//! control reproducibility. The shape of a delay:
//! - uniform base between `min_wait` and `max_wait`
//! - multiplied by a variance factor around 1.0
//! - multiplied by the load policy (longer waits deeper into a session)
//! - plus occasional "break" pauses
//! - rounded to human-looking values and clamped to `min_wait`

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, Timelike};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for any configured wait, one week
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 3600;

/// Named stealth presets, most relaxed first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Low,
    Medium,
    #[default]
    High,
    Paranoid,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Paranoid => "paranoid",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "paranoid" => Ok(Self::Paranoid),
            other => Err(ProfileError::UnknownPreset(other.to_string())),
        }
    }
}

/// Profile validation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProfileError {
    #[error("Unknown stealth preset: {0}")]
    UnknownPreset(String),

    #[error("min_wait ({min}s) is greater than max_wait ({max}s)")]
    InvalidWaitRange { min: u64, max: u64 },

    #[error("wait of {0}s is longer than one week")]
    WaitTooLong(u64),

    #[error("variance must be in [0, 1), got {0}")]
    InvalidVariance(f64),

    #[error("break probability must be in [0, 1], got {0}")]
    InvalidBreakProbability(f64),

    #[error("hour window {start}-{end} is out of range")]
    InvalidHours { start: u32, end: u32 },
}

/// Half-open range of hours `[start, end)`; wraps past midnight when
/// `start > end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether `hour` (0-23) falls inside the window
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

impl std::fmt::Display for HourWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.start, self.end)
    }
}

/// An occasional extra pause added on top of the regular delay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakRule {
    /// Chance per delay, in [0, 1]
    pub probability: f64,
    pub min_secs: u64,
    pub max_secs: u64,
}

/// The full pacing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealthProfile {
    pub name: String,

    /// Minimum wait between fetches in seconds
    pub min_wait: u64,

    /// Maximum (base) wait between fetches in seconds
    pub max_wait: u64,

    /// Successful fetches allowed per local calendar day
    pub daily_limit: u32,

    /// Never fetch inside this window
    pub night_hours: Option<HourWindow>,

    /// Prefer fetching inside this window
    pub work_hours: Option<HourWindow>,

    /// Relative variance applied to the base delay
    pub variance: f64,

    /// Treat "outside work hours" as a hard stop instead of a warning
    pub strict_hours: bool,

    /// Shuffle the item list before downloading
    pub shuffle: bool,

    pub breaks: Vec<BreakRule>,

    /// Extra wait after a transient failure, `(min, max)` seconds
    pub failure_cooldown: Option<(u64, u64)>,

    /// Occasional short pause right before a fetch
    #[serde(default)]
    pub hesitation: Option<BreakRule>,
}

fn default_breaks() -> Vec<BreakRule> {
    vec![
        BreakRule {
            probability: 0.10,
            min_secs: 900,
            max_secs: 1800,
        },
        BreakRule {
            probability: 0.05,
            min_secs: 3600,
            max_secs: 7200,
        },
    ]
}

impl StealthProfile {
    /// Build a named preset
    pub fn preset(preset: Preset) -> Self {
        let (min_wait, max_wait, daily_limit, night, work, variance) = match preset {
            Preset::Low => (120, 600, 50, None, None, 0.2),
            Preset::Medium => (300, 1200, 20, Some(HourWindow::new(23, 7)), None, 0.3),
            Preset::High => (
                600,
                2400,
                10,
                Some(HourWindow::new(22, 8)),
                Some(HourWindow::new(9, 17)),
                0.5,
            ),
            Preset::Paranoid => (
                1800,
                7200,
                5,
                Some(HourWindow::new(21, 9)),
                Some(HourWindow::new(10, 16)),
                0.7,
            ),
        };

        Self {
            name: preset.as_str().to_string(),
            min_wait,
            max_wait,
            daily_limit,
            night_hours: night,
            work_hours: work,
            variance,
            strict_hours: preset == Preset::Paranoid,
            shuffle: matches!(preset, Preset::High | Preset::Paranoid),
            breaks: default_breaks(),
            failure_cooldown: Some((60, 180)),
            hesitation: Some(BreakRule {
                probability: 0.3,
                min_secs: 5,
                max_secs: 20,
            }),
        }
    }

    /// Apply explicit overrides on top of a preset
    pub fn with_overrides(mut self, overrides: &ProfileOverrides) -> Self {
        if let Some(min) = overrides.min_wait {
            self.min_wait = min;
        }
        if let Some(max) = overrides.max_wait {
            self.max_wait = max;
        }
        if let Some(limit) = overrides.daily_limit {
            self.daily_limit = limit;
        }
        self
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.min_wait > self.max_wait {
            return Err(ProfileError::InvalidWaitRange {
                min: self.min_wait,
                max: self.max_wait,
            });
        }
        for secs in [self.min_wait, self.max_wait] {
            if secs > MAX_WAIT_SECS {
                return Err(ProfileError::WaitTooLong(secs));
            }
        }
        if !(0.0..1.0).contains(&self.variance) {
            return Err(ProfileError::InvalidVariance(self.variance));
        }
        for rule in self.breaks.iter().chain(self.hesitation.iter()) {
            if !(0.0..=1.0).contains(&rule.probability) {
                return Err(ProfileError::InvalidBreakProbability(rule.probability));
            }
            if rule.min_secs > MAX_WAIT_SECS || rule.max_secs > MAX_WAIT_SECS {
                return Err(ProfileError::WaitTooLong(rule.min_secs.max(rule.max_secs)));
            }
        }
        if let Some((min, max)) = self.failure_cooldown {
            if min.max(max) > MAX_WAIT_SECS {
                return Err(ProfileError::WaitTooLong(min.max(max)));
            }
        }
        for window in [self.night_hours, self.work_hours].into_iter().flatten() {
            if window.start > 23 || window.end > 24 {
                return Err(ProfileError::InvalidHours {
                    start: window.start,
                    end: window.end,
                });
            }
        }
        Ok(())
    }
}

/// Explicit values that take precedence over the preset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileOverrides {
    pub min_wait: Option<u64>,
    pub max_wait: Option<u64>,
    pub daily_limit: Option<u32>,
}

impl ProfileOverrides {
    /// Layer `other` on top of `self`
    pub fn merged(&self, other: &ProfileOverrides) -> ProfileOverrides {
        ProfileOverrides {
            min_wait: other.min_wait.or(self.min_wait),
            max_wait: other.max_wait.or(self.max_wait),
            daily_limit: other.daily_limit.or(self.daily_limit),
        }
    }
}

/// Scales the delay with how much the session has already done
pub trait LoadPolicy: Send + Sync {
    fn multiplier(&self, session_downloads: u32) -> f64;
}

/// Step function: the highest threshold strictly exceeded wins
#[derive(Debug, Clone)]
pub struct StepEscalation {
    steps: Vec<(u32, f64)>,
}

impl StepEscalation {
    pub fn new(mut steps: Vec<(u32, f64)>) -> Self {
        steps.sort_by_key(|(threshold, _)| *threshold);
        Self { steps }
    }
}

impl Default for StepEscalation {
    fn default() -> Self {
        Self::new(vec![(10, 1.5), (20, 2.0)])
    }
}

impl LoadPolicy for StepEscalation {
    fn multiplier(&self, session_downloads: u32) -> f64 {
        self.steps
            .iter()
            .rev()
            .find(|(threshold, _)| session_downloads > *threshold)
            .map(|(_, m)| *m)
            .unwrap_or(1.0)
    }
}

/// Time-of-day decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Outside preferred hours; advisory unless the profile is strict
    DeferUntilWorkHours,
    /// Inside night hours
    Reject,
}

/// Daily quota decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheck {
    Admit { remaining: u32 },
    QuotaExceeded,
}

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Computes delays and admission decisions for one profile
pub struct DelayScheduler {
    profile: StealthProfile,
    load_policy: Box<dyn LoadPolicy>,
}

impl DelayScheduler {
    /// Scheduler with the default escalation policy
    pub fn new(profile: StealthProfile) -> Result<Self, ProfileError> {
        Self::with_load_policy(profile, Box::new(StepEscalation::default()))
    }

    /// Scheduler with a custom load policy
    pub fn with_load_policy(
        profile: StealthProfile,
        load_policy: Box<dyn LoadPolicy>,
    ) -> Result<Self, ProfileError> {
        profile.validate()?;
        Ok(Self {
            profile,
            load_policy,
        })
    }

    pub fn profile(&self) -> &StealthProfile {
        &self.profile
    }

    /// Delay before the next fetch
    pub fn next_delay<R: Rng + ?Sized>(&self, session_downloads: u32, rng: &mut R) -> Duration {
        let p = &self.profile;
        let min = p.min_wait as f64;
        let max = p.max_wait as f64;

        let mut delay = if max > min { rng.gen_range(min..=max) } else { min };

        if p.variance > 0.0 {
            delay *= rng.gen_range((1.0 - p.variance)..=(1.0 + p.variance));
        }

        delay *= self.load_policy.multiplier(session_downloads);

        for rule in &p.breaks {
            if rng.gen_bool(rule.probability) {
                delay += uniform_secs(rng, rule.min_secs, rule.max_secs);
            }
        }

        let delay = round_for_plausibility(delay).max(min);
        secs_to_duration(delay)
    }

    /// Extra wait after a transient failure
    pub fn failure_cooldown<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Duration> {
        self.profile
            .failure_cooldown
            .map(|(min, max)| secs_to_duration(uniform_secs(rng, min, max)))
    }

    /// Short pause before a fetch, when the profile's hesitation rule fires
    pub fn hesitation<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Duration> {
        let rule = self.profile.hesitation?;
        if rng.gen_bool(rule.probability) {
            Some(secs_to_duration(uniform_secs(rng, rule.min_secs, rule.max_secs)))
        } else {
            None
        }
    }

    /// Time-of-day decision for `now`
    pub fn check_admission(&self, now: NaiveTime) -> Admission {
        let hour = now.hour();

        if let Some(night) = self.profile.night_hours {
            if night.contains(hour) {
                return Admission::Reject;
            }
        }

        if let Some(work) = self.profile.work_hours {
            if !work.contains(hour) {
                return Admission::DeferUntilWorkHours;
            }
        }

        Admission::Admit
    }

    /// Quota decision against this profile's daily limit
    pub fn check_daily_quota(&self, count_today: u32) -> QuotaCheck {
        check_quota(count_today, self.profile.daily_limit)
    }
}

/// Quota decision
pub fn check_quota(count_today: u32, daily_limit: u32) -> QuotaCheck {
    if count_today >= daily_limit {
        QuotaCheck::QuotaExceeded
    } else {
        QuotaCheck::Admit {
            remaining: daily_limit - count_today,
        }
    }
}

/// Round to the nearest 10 s below five minutes, nearest minute above
pub fn round_for_plausibility(secs: f64) -> f64 {
    if secs < 300.0 {
        (secs / 10.0).round() * 10.0
    } else {
        (secs / 60.0).round() * 60.0
    }
}

/// Seconds to a `Duration`; saturates where `from_secs_f64` would panic
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn uniform_secs<R: Rng + ?Sized>(rng: &mut R, min: u64, max: u64) -> f64 {
    if max > min {
        rng.gen_range(min as f64..=max as f64)
    } else {
        min as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn quiet(min: u64, max: u64) -> StealthProfile {
        StealthProfile {
            breaks: Vec::new(),
            variance: 0.0,
            night_hours: None,
            work_hours: None,
            ..StealthProfile::preset(Preset::Low)
        }
        .with_overrides(&ProfileOverrides {
            min_wait: Some(min),
            max_wait: Some(max),
            daily_limit: None,
        })
    }

    #[test]
    fn test_hour_window_wraps_midnight() {
        let night = HourWindow::new(22, 8);
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(night.contains(7));
        assert!(!night.contains(8));
        assert!(!night.contains(12));

        let day = HourWindow::new(9, 17);
        assert!(day.contains(9));
        assert!(!day.contains(17));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_for_plausibility(123.0), 120.0);
        assert_eq!(round_for_plausibility(125.0), 130.0);
        assert_eq!(round_for_plausibility(299.0), 300.0);
        assert_eq!(round_for_plausibility(329.0), 300.0);
        assert_eq!(round_for_plausibility(331.0), 360.0);
    }

    #[test]
    fn test_escalation_thresholds() {
        let policy = StepEscalation::default();
        assert_eq!(policy.multiplier(0), 1.0);
        assert_eq!(policy.multiplier(10), 1.0);
        assert_eq!(policy.multiplier(11), 1.5);
        assert_eq!(policy.multiplier(20), 1.5);
        assert_eq!(policy.multiplier(21), 2.0);
    }

    #[test]
    fn test_fixed_delay_without_randomness() {
        let scheduler = DelayScheduler::new(quiet(120, 120)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(scheduler.next_delay(0, &mut rng), Duration::from_secs(120));
        assert_eq!(scheduler.next_delay(11, &mut rng), Duration::from_secs(180));
        assert_eq!(scheduler.next_delay(21, &mut rng), Duration::from_secs(240));
    }

    #[test]
    fn test_admission() {
        let scheduler = DelayScheduler::new(StealthProfile::preset(Preset::High)).unwrap();
        let at = |h| NaiveTime::from_hms_opt(h, 30, 0).unwrap();
        assert_eq!(scheduler.check_admission(at(23)), Admission::Reject);
        assert_eq!(scheduler.check_admission(at(3)), Admission::Reject);
        assert_eq!(scheduler.check_admission(at(8)), Admission::DeferUntilWorkHours);
        assert_eq!(scheduler.check_admission(at(12)), Admission::Admit);
        assert_eq!(scheduler.check_admission(at(18)), Admission::DeferUntilWorkHours);

        let low = DelayScheduler::new(StealthProfile::preset(Preset::Low)).unwrap();
        assert_eq!(low.check_admission(at(3)), Admission::Admit);
    }

    #[test]
    fn test_quota() {
        assert_eq!(check_quota(0, 3), QuotaCheck::Admit { remaining: 3 });
        assert_eq!(check_quota(2, 3), QuotaCheck::Admit { remaining: 1 });
        assert_eq!(check_quota(3, 3), QuotaCheck::QuotaExceeded);
        assert_eq!(check_quota(5, 3), QuotaCheck::QuotaExceeded);
    }

    #[test]
    fn test_profile_validation() {
        let bad = quiet(600, 100);
        assert!(matches!(
            DelayScheduler::new(bad),
            Err(ProfileError::InvalidWaitRange { .. })
        ));

        let bad_variance = StealthProfile {
            variance: 1.0,
            ..StealthProfile::preset(Preset::Low)
        };
        assert!(bad_variance.validate().is_err());

        let huge = quiet(100, 10_000_000_000_000_000_000);
        assert_eq!(
            huge.validate(),
            Err(ProfileError::WaitTooLong(10_000_000_000_000_000_000))
        );
        assert!(quiet(MAX_WAIT_SECS, MAX_WAIT_SECS).validate().is_ok());
    }

    #[test]
    fn test_extreme_multiplier_saturates() {
        struct Runaway;
        impl LoadPolicy for Runaway {
            fn multiplier(&self, _: u32) -> f64 {
                f64::MAX
            }
        }

        let scheduler =
            DelayScheduler::with_load_policy(quiet(MAX_WAIT_SECS, MAX_WAIT_SECS), Box::new(Runaway))
                .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(scheduler.next_delay(0, &mut rng), Duration::MAX);
        assert_eq!(secs_to_duration(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_hesitation() {
        let always = StealthProfile {
            hesitation: Some(BreakRule {
                probability: 1.0,
                min_secs: 5,
                max_secs: 20,
            }),
            ..StealthProfile::preset(Preset::Low)
        };
        let scheduler = DelayScheduler::new(always).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let pause = scheduler.hesitation(&mut rng).unwrap();
            assert!(pause >= Duration::from_secs(5) && pause <= Duration::from_secs(20));
        }

        let never = StealthProfile {
            hesitation: None,
            ..StealthProfile::preset(Preset::Low)
        };
        assert!(DelayScheduler::new(never).unwrap().hesitation(&mut rng).is_none());
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("Paranoid".parse::<Preset>().unwrap(), Preset::Paranoid);
        assert!("ninja".parse::<Preset>().is_err());
        let paranoid = StealthProfile::preset(Preset::Paranoid);
        assert!(paranoid.strict_hours);
        assert!(paranoid.shuffle);
        assert_eq!(paranoid.daily_limit, 5);
    }
}
