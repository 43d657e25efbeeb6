//! Pure sync planning: which branch to take and which windows to request.
//!
//! Nothing here touches the network or the store, so every decision can be
//! tested against a fixed `now`.

use barsync_core::window::{fetch_windows, window_boundaries, FetchWindow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SyncPolicy;
use crate::engine::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Fetch the whole required history window.
    Backfill,
    /// Fetch only the gap since the latest stored bar.
    Incremental,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Backfill => f.write_str("backfill"),
            Branch::Incremental => f.write_str("incremental"),
        }
    }
}

fn days(n: u32) -> Duration {
    Duration::days(i64::from(n))
}

/// Backfill unless the store already reaches back past the required history cutoff.
///
/// An earliest bar exactly on the cutoff counts as sufficient history.
pub fn choose_branch(
    now: DateTime<Utc>,
    earliest: Option<DateTime<Utc>>,
    policy: &SyncPolicy,
) -> Branch {
    let cutoff = now - days(policy.required_history_days);
    match earliest {
        Some(ts) if ts <= cutoff => Branch::Incremental,
        _ => Branch::Backfill,
    }
}

/// Windows covering `[now - required_history, now]` in `max_request_days` steps.
pub fn backfill_windows(now: DateTime<Utc>, policy: &SyncPolicy) -> Vec<FetchWindow> {
    let start = now - days(policy.required_history_days);
    let boundaries = window_boundaries(start, now, days(policy.max_request_days));
    fetch_windows(&boundaries, policy.max_request_days)
}

/// Whole days to request to cover the gap since `latest`: `floor(gap) + 1`.
///
/// A sub-day gap still asks for one day; a gap of 25.1 hours asks for two.
pub fn gap_days(now: DateTime<Utc>, latest: DateTime<Utc>) -> u32 {
    let whole = (now - latest).num_days().max(0);
    u32::try_from(whole + 1).unwrap_or(u32::MAX)
}

/// Single window ending at `now` that covers the gap since `latest`.
///
/// Fails with [`SyncError::Stale`] when `latest` is older than the staleness
/// limit; nothing is fetched in that case.
pub fn incremental_window(
    now: DateTime<Utc>,
    latest: DateTime<Utc>,
    policy: &SyncPolicy,
) -> Result<FetchWindow, SyncError> {
    if latest < now - days(policy.staleness_limit_days) {
        return Err(SyncError::Stale {
            latest,
            limit_days: policy.staleness_limit_days,
        });
    }
    Ok(FetchWindow {
        end: Some(now),
        lookback_days: gap_days(now, latest),
    })
}
