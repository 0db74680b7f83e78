// Property tests for the pure counter math mirrored by the Lua scripts.

use proptest::prelude::*;

use viva_limiter::modules::ratelimit::limiter::{
    fixed_window_start, token_bucket_params, token_refill, Algorithm,
};

#[test]
fn test_algorithm_names() {
    assert_eq!("sliding".parse::<Algorithm>().unwrap(), Algorithm::SlidingWindow);
    assert_eq!(
        "sliding_window".parse::<Algorithm>().unwrap(),
        Algorithm::SlidingWindow
    );
    assert_eq!("fixed".parse::<Algorithm>().unwrap(), Algorithm::FixedWindow);
    assert_eq!("token".parse::<Algorithm>().unwrap(), Algorithm::TokenBucket);
    assert!("gcra".parse::<Algorithm>().is_err());
    assert!("".parse::<Algorithm>().is_err());
}

proptest! {
    /// Window starts are aligned to wall-clock multiples of the window
    /// and always contain `now`.
    #[test]
    fn fixed_window_start_aligns(now in 0i64..2_000_000_000, window in 1i64..86_400) {
        let start = fixed_window_start(now, window);
        prop_assert_eq!(start % window, 0);
        prop_assert!(start <= now);
        prop_assert!(now < start + window);
    }

    /// After idle time, available tokens equal
    /// min(capacity, before + floor(elapsed/period) * rate).
    #[test]
    fn token_refill_matches_quantized_formula(
        tokens in 0i64..1_000,
        elapsed in 0i64..1_000_000,
        capacity in 1i64..1_000,
        rate in 1i64..100,
        period in 1i64..3_600,
    ) {
        let tokens = tokens.min(capacity);
        let base = 1_700_000_000i64;
        let (refilled, advanced) = token_refill(tokens, base, base + elapsed, capacity, rate, period);

        prop_assert_eq!(refilled, (tokens + (elapsed / period) * rate).min(capacity));
        prop_assert!(refilled >= tokens);
        prop_assert!(refilled <= capacity);
        // last_refill advances by whole periods only, never past now
        prop_assert_eq!((advanced - base) % period, 0);
        prop_assert!(advanced <= base + elapsed);
    }

    /// The derived bucket parameters always refill at least one token per
    /// period and cap at a positive capacity.
    #[test]
    fn token_bucket_params_are_positive(
        limit in 1i64..1_000_000,
        window in 1i64..86_400,
        burst in proptest::option::of(1i64..1_000_000),
    ) {
        let (capacity, rate, period) = token_bucket_params(limit, window, burst);
        prop_assert!(capacity >= 1);
        prop_assert!(rate >= 1);
        prop_assert!(period >= 1);
        if let Some(b) = burst {
            prop_assert_eq!(capacity, b.max(1));
        }
    }
}

#[test]
fn test_refill_is_lossless_across_split_intervals() {
    // Refilling in two steps must equal refilling once, because
    // last_refill advances by consumed periods only.
    let base = 1_700_000_000i64;
    let (capacity, rate, period) = (100, 1, 3);

    let (t1, l1) = token_refill(0, base, base + 4, capacity, rate, period);
    let (t2, _) = token_refill(t1, l1, base + 9, capacity, rate, period);

    let (direct, _) = token_refill(0, base, base + 9, capacity, rate, period);
    assert_eq!(t2, direct);
}
