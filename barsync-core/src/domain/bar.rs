//! Bar: one aggregated price slice for an instrument.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// OHLCV bar for a single instrument over one granularity slice.
///
/// `timestamp` is the primary key in storage: at most one row per table and
/// timestamp, later writes overwrite every other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Volume-weighted average price over the bar.
    pub average: f64,
    /// Number of trades composing the bar.
    pub bar_count: u32,
}

impl Bar {
    /// True when the gateway left any price unset (NaN).
    pub fn has_missing_price(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .any(|p| p.is_nan())
    }

    /// Prices are present, open and close lie within `[low, high]`, and
    /// volume is non-negative. Every bar written to a store passes this.
    pub fn is_sane(&self) -> bool {
        !self.has_missing_price()
            && (self.low..=self.high).contains(&self.open)
            && (self.low..=self.high).contains(&self.close)
            && self.volume >= 0.0
    }
}

/// Drop bars whose timestamp was already seen, keeping the first occurrence.
///
/// Order of the surviving bars is preserved. Overlapping fetch windows produce
/// repeated timestamps by construction; the earliest fetch call's value wins.
pub fn dedup_keep_first(bars: Vec<Bar>) -> Vec<Bar> {
    let mut seen = HashSet::with_capacity(bars.len());
    bars.into_iter()
        .filter(|bar| seen.insert(bar.timestamp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(minute: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 14, minute, 0).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close,
            volume: 1200.0,
            average: 100.2,
            bar_count: 42,
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let bars = vec![bar_at(30, 100.5), bar_at(31, 100.7), bar_at(30, 99.9)];
        let deduped = dedup_keep_first(bars);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].close, 100.5);
        assert_eq!(deduped[1].close, 100.7);
    }

    #[test]
    fn dedup_preserves_order() {
        let bars = vec![bar_at(33, 1.0), bar_at(31, 2.0), bar_at(33, 3.0), bar_at(32, 4.0)];
        let minutes: Vec<f64> = dedup_keep_first(bars).iter().map(|b| b.close).collect();
        assert_eq!(minutes, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn dedup_empty_is_empty() {
        assert!(dedup_keep_first(Vec::new()).is_empty());
    }

    #[test]
    fn sanity_rejects_inverted_range() {
        let mut bar = bar_at(30, 100.5);
        assert!(bar.is_sane());
        bar.high = 98.0;
        assert!(!bar.is_sane());
    }

    #[test]
    fn nan_price_is_missing() {
        let mut bar = bar_at(30, 100.5);
        bar.open = f64::NAN;
        assert!(bar.has_missing_price());
        assert!(!bar.is_sane());
    }
}
