//! Market-data client trait and structured error types.
//!
//! The MarketDataClient trait abstracts over the brokerage connection so the
//! sync engine can be driven by the real gateway or by a scripted client in tests.

use crate::domain::{Bar, Granularity, Instrument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameters for a single historical-bars request.
///
/// The brokerage pulls backwards from `end`: the effective window is
/// `[end - lookback_days, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// End of the window; `None` means "up to now".
    pub end: Option<DateTime<Utc>>,
    pub lookback_days: u32,
    pub granularity: Granularity,
    /// Trade prints when true, bid/ask midpoint otherwise.
    pub trades_only: bool,
    /// Restrict to regular trading hours.
    pub regular_hours_only: bool,
}

/// Structured error types for market-data operations.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("failed to connect to market-data gateway at {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("hard stop: market-data connection failed after {attempts} attempts: {last_error}")]
    ConnectExhausted { attempts: u32, last_error: String },

    #[error("market-data connection lost: {0}")]
    Disconnected(String),

    #[error("historical data request for {instrument} failed: {reason}")]
    Request { instrument: String, reason: String },

    #[error("invalid bar from gateway: {0}")]
    InvalidBar(String),
}

impl MarketDataError {
    /// Whether a reconnect-and-retry can plausibly clear this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MarketDataError::ConnectFailed { .. }
                | MarketDataError::Disconnected(_)
                | MarketDataError::Request { .. }
        )
    }
}

/// Trait for brokerage market-data clients.
///
/// Implementations return bars in ascending timestamp order. Successive calls
/// over overlapping windows may repeat timestamps; de-duplication belongs to
/// the caller.
pub trait MarketDataClient {
    /// Human-readable name of this client.
    fn name(&self) -> &str;

    /// Fetch historical bars for an instrument.
    fn fetch(
        &mut self,
        instrument: &Instrument,
        request: &FetchRequest,
    ) -> Result<Vec<Bar>, MarketDataError>;

    /// Drop the current connection and establish a new one.
    fn reconnect(&mut self) -> Result<(), MarketDataError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_level_errors_are_recoverable() {
        assert!(MarketDataError::Disconnected("socket closed".into()).is_recoverable());
        assert!(MarketDataError::ConnectFailed {
            address: "127.0.0.1:4001".into(),
            reason: "refused".into(),
        }
        .is_recoverable());
        assert!(MarketDataError::Request {
            instrument: "AAPL".into(),
            reason: "pacing violation".into(),
        }
        .is_recoverable());
    }

    #[test]
    fn exhaustion_and_bad_data_are_fatal() {
        assert!(!MarketDataError::ConnectExhausted {
            attempts: 5,
            last_error: "refused".into(),
        }
        .is_recoverable());
        assert!(!MarketDataError::InvalidBar("negative count".into()).is_recoverable());
    }
}
