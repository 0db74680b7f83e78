use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

use viva_limiter::modules::api_keys::models::Tier;
use viva_limiter::modules::billing::models::{BillingRecord, BillingStatus};
use viva_limiter::modules::usage::models::UsageTotals;

fn july() -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    (
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
    )
}

#[test]
fn test_base_only_at_exact_quota() {
    let (start, end) = july();
    let totals = UsageTotals {
        total_requests: Tier::Pro.included_requests(),
        success_requests: Tier::Pro.included_requests(),
        error_requests: 0,
        total_bandwidth: 0,
    };

    let record = BillingRecord::compute("k", Tier::Pro, start, end, &totals, 0);
    assert_eq!(record.overage_requests, 0);
    assert_eq!(record.total_amount, dec!(49.00));
}

#[test]
fn test_tiny_overage_rounds_to_cents() {
    let (start, end) = july();
    let totals = UsageTotals {
        total_requests: Tier::Pro.included_requests() + 1,
        ..Default::default()
    };

    // one request at $0.10 per 1,000 rounds to $0.00
    let record = BillingRecord::compute("k", Tier::Pro, start, end, &totals, 0);
    assert_eq!(record.overage_requests, 1);
    assert_eq!(record.overage_amount, dec!(0.00));
    assert_eq!(record.total_amount, dec!(49.00));
}

#[test]
fn test_enterprise_overage_rate() {
    let (start, end) = july();
    let totals = UsageTotals {
        total_requests: Tier::Enterprise.included_requests() + 2_000_000,
        ..Default::default()
    };

    // 2M over quota at $0.05 per 1,000 = $100.00
    let record = BillingRecord::compute("k", Tier::Enterprise, start, end, &totals, 0);
    assert_eq!(record.overage_amount, dec!(100.00));
    assert_eq!(record.total_amount, dec!(499.00) + dec!(100.00));
}

#[test]
fn test_record_carries_period_and_counts() {
    let (start, end) = july();
    let totals = UsageTotals {
        total_requests: 42,
        success_requests: 40,
        error_requests: 2,
        total_bandwidth: 8_192,
    };

    let record = BillingRecord::compute("key-1", Tier::Free, start, end, &totals, 7);
    assert_eq!(record.api_key_id, "key-1");
    assert_eq!(record.period_start, start);
    assert_eq!(record.period_end, end);
    assert_eq!(record.total_requests, 42);
    assert_eq!(record.success_requests, 40);
    assert_eq!(record.error_requests, 2);
    assert_eq!(record.rate_limit_hits, 7);
    assert_eq!(record.total_bandwidth, 8_192);
    assert_eq!(record.status, BillingStatus::Completed);
    assert_eq!(record.tier_at_start, record.tier_at_end);
}
