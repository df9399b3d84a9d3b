//! Delay Scheduler Integration Tests
//!
//! Statistical and property checks on pacing, plus admission and quota
//! decisions.

use std::time::Duration;

use chrono::NaiveTime;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stealthdl::core::{
    check_quota, Admission, BreakRule, DelayScheduler, HourWindow, LoadPolicy, Preset,
    ProfileOverrides, QuotaCheck, StealthProfile,
};

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

#[test]
fn test_sweep_respects_minimum_and_rounding() {
    for preset in [Preset::Low, Preset::Medium, Preset::High, Preset::Paranoid] {
        let scheduler = DelayScheduler::new(StealthProfile::preset(preset)).unwrap();
        let min = scheduler.profile().min_wait;
        let mut rng = StdRng::seed_from_u64(42);

        for i in 0..10_000u32 {
            let delay = scheduler.next_delay(i % 30, &mut rng);
            let secs = delay.as_secs();
            assert!(secs >= min, "{} delay {}s below minimum {}s", preset, secs, min);
            assert_eq!(delay.subsec_nanos(), 0);
            if secs >= 300 {
                assert_eq!(secs % 60, 0, "{}s not rounded to a minute", secs);
            } else {
                assert_eq!(secs % 10, 0, "{}s not rounded to ten seconds", secs);
            }
        }
    }
}

#[test]
fn test_breaks_occur_at_expected_rate() {
    // Fixed base so any excess comes from a break
    let profile = StealthProfile {
        min_wait: 120,
        max_wait: 120,
        variance: 0.0,
        ..StealthProfile::preset(Preset::Low)
    };
    let scheduler = DelayScheduler::new(profile).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    let draws = 10_000;
    let with_break = (0..draws)
        .filter(|_| scheduler.next_delay(0, &mut rng) > Duration::from_secs(120))
        .count();

    // P(at least one break) = 1 - 0.9 * 0.95 = 0.145
    let rate = with_break as f64 / draws as f64;
    assert!((0.12..0.17).contains(&rate), "break rate {}", rate);
}

#[test]
fn test_custom_load_policy() {
    struct Triple;
    impl LoadPolicy for Triple {
        fn multiplier(&self, _: u32) -> f64 {
            3.0
        }
    }

    let profile = StealthProfile {
        min_wait: 100,
        max_wait: 100,
        variance: 0.0,
        breaks: Vec::new(),
        ..StealthProfile::preset(Preset::Low)
    };
    let scheduler = DelayScheduler::with_load_policy(profile, Box::new(Triple)).unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    assert_eq!(scheduler.next_delay(0, &mut rng), Duration::from_secs(300));
}

#[test]
fn test_admission_across_midnight() {
    let scheduler = DelayScheduler::new(StealthProfile::preset(Preset::Paranoid)).unwrap();

    assert_eq!(scheduler.check_admission(at(21, 0)), Admission::Reject);
    assert_eq!(scheduler.check_admission(at(23, 59)), Admission::Reject);
    assert_eq!(scheduler.check_admission(at(0, 0)), Admission::Reject);
    assert_eq!(scheduler.check_admission(at(8, 59)), Admission::Reject);
    assert_eq!(scheduler.check_admission(at(9, 0)), Admission::DeferUntilWorkHours);
    assert_eq!(scheduler.check_admission(at(10, 0)), Admission::Admit);
    assert_eq!(scheduler.check_admission(at(15, 59)), Admission::Admit);
    assert_eq!(scheduler.check_admission(at(16, 0)), Admission::DeferUntilWorkHours);
}

#[test]
fn test_medium_has_no_work_hours() {
    let scheduler = DelayScheduler::new(StealthProfile::preset(Preset::Medium)).unwrap();
    assert_eq!(scheduler.check_admission(at(6, 30)), Admission::Reject);
    assert_eq!(scheduler.check_admission(at(7, 0)), Admission::Admit);
    assert_eq!(scheduler.check_admission(at(22, 59)), Admission::Admit);
}

#[test]
fn test_quota_boundaries() {
    let scheduler = DelayScheduler::new(StealthProfile::preset(Preset::High)).unwrap();
    assert_eq!(scheduler.check_daily_quota(9), QuotaCheck::Admit { remaining: 1 });
    assert_eq!(scheduler.check_daily_quota(10), QuotaCheck::QuotaExceeded);
    assert_eq!(check_quota(0, 0), QuotaCheck::QuotaExceeded);
}

#[test]
fn test_overrides_take_precedence() {
    let profile = StealthProfile::preset(Preset::Paranoid).with_overrides(&ProfileOverrides {
        min_wait: Some(10),
        max_wait: Some(20),
        daily_limit: Some(100),
    });
    assert_eq!(profile.min_wait, 10);
    assert_eq!(profile.max_wait, 20);
    assert_eq!(profile.daily_limit, 100);
    assert!(profile.strict_hours);
}

proptest! {
    #[test]
    fn prop_delay_never_below_min_wait(
        min in 0u64..5_000,
        extra in 0u64..5_000,
        variance in 0.0f64..0.99,
        break_p in 0.0f64..=1.0,
        downloads in 0u32..100,
        seed in any::<u64>(),
    ) {
        let profile = StealthProfile {
            min_wait: min,
            max_wait: min + extra,
            variance,
            breaks: vec![BreakRule { probability: break_p, min_secs: 60, max_secs: 600 }],
            night_hours: Some(HourWindow::new(22, 6)),
            ..StealthProfile::preset(Preset::Low)
        };
        let scheduler = DelayScheduler::new(profile).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);

        let delay = scheduler.next_delay(downloads, &mut rng);
        prop_assert!(delay.as_secs() >= min);
    }
}
