use draftsync_sync::BackoffPolicy;
use proptest::prelude::*;
use std::time::Duration;

#[test]
fn default_schedule_doubles_from_250ms() {
    let policy = BackoffPolicy::default();
    let delays: Vec<_> = (0..4).map(|a| policy.base_delay(a)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(250),
            Duration::from_millis(500),
            Duration::from_millis(1_000),
            Duration::from_millis(2_000),
        ]
    );
}

#[test]
fn delay_is_capped() {
    let policy = BackoffPolicy::default();
    assert_eq!(policy.base_delay(10), Duration::from_secs(8));
    assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(8));
}

#[test]
fn fixed_policy_has_no_jitter() {
    let policy = BackoffPolicy::fixed(100);
    for attempt in 0..4 {
        assert_eq!(policy.delay(attempt), policy.base_delay(attempt));
    }
}

proptest! {
    #[test]
    fn jitter_stays_below_bound(attempt in 0u32..8) {
        let policy = BackoffPolicy::default();
        let delay = policy.delay(attempt);
        prop_assert!(delay >= policy.base_delay(attempt));
        prop_assert!(delay < policy.max_delay(attempt));
    }

    #[test]
    fn base_delay_is_monotonic_and_bounded(
        base_ms in 1u64..2_000,
        multiplier in 1u32..5,
        max_delay_ms in 1u64..60_000,
    ) {
        let policy = BackoffPolicy { base_ms, multiplier, max_delay_ms, jitter_ms: 200 };
        let mut previous = Duration::ZERO;
        for attempt in 0..4 {
            let delay = policy.base_delay(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_millis(max_delay_ms));
            previous = delay;
        }
    }
}
