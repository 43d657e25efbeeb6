//! Property tests for sync invariants.
//!
//! Uses proptest to verify:
//! 1. Boundary walk: strictly increasing, starts at S, ends exactly at E
//! 2. De-duplication: one row per timestamp, first occurrence wins, idempotent
//! 3. Table names: deterministic and distinct for distinct instruments
//! 4. Upsert: applying the same batch twice equals applying it once

use proptest::prelude::*;
use std::collections::HashSet;

use barsync_core::domain::{dedup_keep_first, Bar, Granularity, Instrument};
use barsync_core::store::{BarStore, MemoryStore};
use barsync_core::window::{boundary_walk, fetch_windows, window_boundaries};
use chrono::{DateTime, Duration, TimeZone, Utc};

// ── Strategies (proptest) ────────────────────────────────────────────

fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
}

fn arb_price() -> impl Strategy<Value = f64> {
    (10.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

/// Bars on a small minute grid so timestamps repeat often.
fn arb_bars() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((0..40i64, arb_price(), 0..10_000u32), 0..120).prop_map(|rows| {
        rows.into_iter()
            .map(|(minute, close, count)| Bar {
                timestamp: origin() + Duration::minutes(minute),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: f64::from(count) * 10.0,
                average: close,
                bar_count: count,
            })
            .collect()
    })
}

fn arb_code() -> impl Strategy<Value = String> {
    "[A-Z]{1,5}"
}

fn arb_granularity() -> impl Strategy<Value = Granularity> {
    prop_oneof![
        Just(Granularity::OneMinute),
        Just(Granularity::FiveMinutes),
        Just(Granularity::FifteenMinutes),
        Just(Granularity::OneHour),
        Just(Granularity::OneDay),
    ]
}

// ── 1. Boundary walk ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn boundaries_cover_span_exactly(start in -10_000i64..10_000, len in 1i64..10_000, step in 1i64..500) {
        let end = start + len;
        let bounds = boundary_walk(start, end, step);

        prop_assert_eq!(bounds[0], start);
        prop_assert_eq!(*bounds.last().unwrap(), end);
        prop_assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(bounds.iter().filter(|&&b| b == end).count(), 1);

        // Every interior step is exactly `step`; only the last may be shorter.
        let gaps: Vec<i64> = bounds.windows(2).map(|w| w[1] - w[0]).collect();
        let (last, interior) = gaps.split_last().unwrap();
        prop_assert!(interior.iter().all(|&g| g == step));
        prop_assert!(*last <= step);
    }

    #[test]
    fn backfill_windows_end_on_every_later_boundary(days in 1i64..400, step_days in 1u32..60) {
        let end = origin();
        let start = end - Duration::days(days);
        let bounds = window_boundaries(start, end, Duration::days(i64::from(step_days)));
        let windows = fetch_windows(&bounds, step_days);

        prop_assert_eq!(windows.len(), bounds.len() - 1);
        prop_assert_eq!(windows.last().unwrap().end, Some(end));
        for (w, b) in windows.iter().zip(&bounds[1..]) {
            prop_assert_eq!(w.end, Some(*b));
            prop_assert_eq!(w.lookback_days, step_days);
        }
    }
}

// ── 2. De-duplication ────────────────────────────────────────────────

proptest! {
    #[test]
    fn dedup_keeps_first_occurrence(bars in arb_bars()) {
        let deduped = dedup_keep_first(bars.clone());

        let distinct: HashSet<_> = bars.iter().map(|b| b.timestamp).collect();
        prop_assert_eq!(deduped.len(), distinct.len());

        for kept in &deduped {
            let first = bars.iter().find(|b| b.timestamp == kept.timestamp).unwrap();
            prop_assert_eq!(kept, first);
        }
    }

    #[test]
    fn dedup_is_idempotent(bars in arb_bars()) {
        let once = dedup_keep_first(bars);
        let twice = dedup_keep_first(once.clone());
        prop_assert_eq!(once, twice);
    }
}

// ── 3. Table names ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn table_name_is_deterministic(
        symbol in arb_code(),
        exchange in arb_code(),
        granularity in arb_granularity(),
    ) {
        let a = Instrument::new(symbol.clone(), exchange.clone(), "USD");
        let b = Instrument::new(symbol, exchange, "USD");
        prop_assert_eq!(a.table_name("ib", granularity), b.table_name("ib", granularity));
        prop_assert_eq!(a.table_name("ib", granularity), a.table_name("ib", granularity).to_lowercase());
    }

    #[test]
    fn distinct_instruments_get_distinct_tables(
        a in (arb_code(), arb_code(), arb_code()),
        b in (arb_code(), arb_code(), arb_code()),
        granularity in arb_granularity(),
    ) {
        let ia = Instrument::new(a.0, a.1, a.2);
        let ib = Instrument::new(b.0, b.1, b.2);
        prop_assume!(ia != ib);
        prop_assert_ne!(ia.table_name("ib", granularity), ib.table_name("ib", granularity));
    }
}

// ── 4. Upsert idempotence ────────────────────────────────────────────

proptest! {
    #[test]
    fn upserting_twice_equals_once(bars in arb_bars()) {
        let mut once = MemoryStore::new();
        once.ensure_schema("s").unwrap();
        once.create_table_if_absent("s", "t").unwrap();
        once.upsert_bars("s", "t", &bars).unwrap();

        let mut twice = MemoryStore::new();
        twice.ensure_schema("s").unwrap();
        twice.create_table_if_absent("s", "t").unwrap();
        twice.upsert_bars("s", "t", &bars).unwrap();
        twice.upsert_bars("s", "t", &bars).unwrap();

        prop_assert_eq!(once.rows("s", "t"), twice.rows("s", "t"));

        let mut expected = dedup_keep_first(bars);
        expected.sort_by_key(|b| b.timestamp);
        prop_assert_eq!(once.rows("s", "t"), expected);
    }
}
