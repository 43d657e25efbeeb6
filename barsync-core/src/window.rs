//! Fetch-window planning primitives.
//!
//! A long history span is covered by walking boundaries from the span start
//! in fixed steps. The walk always terminates on the span end exactly once,
//! even when the step does not divide the span evenly, so the last window
//! may be shorter than the others.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Walk from `start` towards `end` in increments of `step`, then emit `end`.
///
/// Produces an inclusive, finite sequence of boundaries:
/// `[start, start + step, ..., end]`. The last element is always `end`.
/// If `step` does not advance the cursor the walk stops early instead of
/// looping forever.
pub fn boundary_walk<T, D>(start: T, end: T, step: D) -> Vec<T>
where
    T: Copy + PartialOrd + Add<D, Output = T>,
    D: Copy,
{
    let mut boundaries = Vec::new();
    let mut current = start;

    while current < end {
        boundaries.push(current);
        let next = current + step;
        if next <= current {
            break;
        }
        current = next;
    }

    // Overshoot or early stop both clamp to the span end.
    boundaries.push(end);
    boundaries
}

/// Boundaries covering `[start, end]` in steps of `step`.
pub fn window_boundaries(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
) -> Vec<DateTime<Utc>> {
    boundary_walk(start, end, step)
}

/// One request against the market-data client: a window ending at `end`
/// reaching back `lookback_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    /// End of the window; `None` means "up to now".
    pub end: Option<DateTime<Utc>>,
    pub lookback_days: u32,
}

/// Turn consecutive boundary pairs into fetch windows ending at the later boundary.
///
/// Every window asks for the full step, so windows overlap when the final step
/// is short; callers de-duplicate the results.
pub fn fetch_windows(boundaries: &[DateTime<Utc>], lookback_days: u32) -> Vec<FetchWindow> {
    boundaries
        .windows(2)
        .map(|pair| FetchWindow {
            end: Some(pair[1]),
            lookback_days,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn uneven_step_lands_on_end() {
        assert_eq!(boundary_walk(0, 95, 30), vec![0, 30, 60, 90, 95]);
    }

    #[test]
    fn even_step_emits_end_once() {
        assert_eq!(boundary_walk(0, 90, 30), vec![0, 30, 60, 90]);
    }

    #[test]
    fn step_larger_than_span() {
        assert_eq!(boundary_walk(0, 10, 30), vec![0, 10]);
    }

    #[test]
    fn empty_span_is_single_boundary() {
        assert_eq!(boundary_walk(5, 5, 30), vec![5]);
        assert_eq!(boundary_walk(7, 5, 30), vec![5]);
    }

    #[test]
    fn non_advancing_step_terminates() {
        assert_eq!(boundary_walk(0, 10, 0), vec![0, 10]);
        assert_eq!(boundary_walk(0, 10, -3), vec![0, 10]);
    }

    #[test]
    fn sixty_days_in_thirty_day_steps() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let start = now - Duration::days(60);
        let bounds = window_boundaries(start, now, Duration::days(30));

        assert_eq!(bounds, vec![start, start + Duration::days(30), now]);

        let windows = fetch_windows(&bounds, 30);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].end, Some(start + Duration::days(30)));
        assert_eq!(windows[1].end, Some(now));
        assert!(windows.iter().all(|w| w.lookback_days == 30));
    }

    #[test]
    fn single_boundary_yields_no_windows() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert!(fetch_windows(&[now], 30).is_empty());
    }
}
