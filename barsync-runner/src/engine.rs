//! Sync engine: reconciles stored bars against what must be fetched.
//!
//! Per instrument, one pass:
//! 1. Ensure the table exists
//! 2. Read the earliest stored bar and pick backfill or incremental
//! 3. Plan the fetch windows (staleness guard on the incremental path)
//! 4. Fetch windows one at a time, reconnecting between failed attempts
//! 5. De-duplicate keep-first and upsert the batch in one transaction
//!
//! Instruments are isolated: a failure is recorded and the batch moves on.
//! Only a lost gateway (reconnect exhausted) stops the batch, and the
//! remaining instruments are reported as aborted.

use barsync_core::data::{FetchRequest, MarketDataClient, MarketDataError, RetryError, RetryPolicy};
use barsync_core::domain::{dedup_keep_first, Bar, Granularity, Instrument};
use barsync_core::store::{BarStore, StoreError};
use barsync_core::window::FetchWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::config::{SyncConfig, SyncPolicy};
use crate::plan::{self, Branch};

/// Errors from syncing one instrument.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(
        "latest stored bar at {latest} is older than the {limit_days}-day staleness limit; \
         refusing incremental catch-up"
    )]
    Stale {
        latest: DateTime<Utc>,
        limit_days: u32,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("fetch failed: {0}")]
    Fetch(MarketDataError),

    #[error("fetch failed after {attempts} attempts: {last}")]
    FetchExhausted { attempts: u32, last: MarketDataError },

    #[error("market-data gateway lost: {0}")]
    GatewayLost(MarketDataError),

    #[error("not attempted: batch stopped after the market-data gateway was lost")]
    Aborted,
}

impl SyncError {
    /// Whether no further instrument in the batch can succeed.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, SyncError::GatewayLost(_))
    }
}

/// Where and how bars are synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub schema: String,
    pub source_prefix: String,
    pub granularity: Granularity,
    pub policy: SyncPolicy,
    /// Pause between fetch attempts, after the reconnect.
    pub fetch_retry_delay: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            schema: config.schema.clone(),
            source_prefix: config.source_prefix.clone(),
            granularity: config.granularity,
            policy: config.policy,
            fetch_retry_delay: Duration::ZERO,
        }
    }

    pub fn table_for(&self, instrument: &Instrument) -> String {
        instrument.table_name(&self.source_prefix, self.granularity)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Result of one successful instrument sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub instrument: Instrument,
    pub table: String,
    pub branch: Branch,
    pub requested_windows: Vec<FetchWindow>,
    /// Bars returned by the client, duplicates included.
    pub fetched: usize,
    /// Rows upserted after de-duplication.
    pub written: u64,
}

/// Summary of a batch sync.
#[derive(Debug)]
pub struct SyncSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<SyncOutcome>,
    pub errors: Vec<(Instrument, SyncError)>,
}

impl SyncSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Instruments that were skipped after a batch-fatal error.
    pub fn aborted(&self) -> usize {
        self.errors
            .iter()
            .filter(|(_, e)| matches!(e, SyncError::Aborted))
            .count()
    }
}

/// Drives one market-data client and one store through a sync pass.
pub struct SyncEngine<'a> {
    client: &'a mut dyn MarketDataClient,
    store: &'a mut dyn BarStore,
    settings: SyncSettings,
    fetch_policy: RetryPolicy,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        client: &'a mut dyn MarketDataClient,
        store: &'a mut dyn BarStore,
        settings: SyncSettings,
    ) -> Self {
        let fetch_policy =
            RetryPolicy::new(settings.policy.fetch_attempts, settings.fetch_retry_delay);
        Self {
            client,
            store,
            settings,
            fetch_policy,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Ensure the schema namespace exists. Run once before the batch.
    pub fn prepare(&mut self) -> Result<(), SyncError> {
        self.store.ensure_schema(&self.settings.schema)?;
        Ok(())
    }

    /// Sync every instrument in order, isolating failures.
    pub fn sync_all(&mut self, instruments: &[Instrument], now: DateTime<Utc>) -> SyncSummary {
        let total = instruments.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut errors: Vec<(Instrument, SyncError)> = Vec::new();

        info!(
            total,
            client = self.client.name(),
            schema = %self.settings.schema,
            "starting sync batch"
        );

        for (i, instrument) in instruments.iter().enumerate() {
            match self.sync_instrument(instrument, now) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(instrument = %instrument, error = %e, "instrument sync failed");
                    let fatal = e.is_batch_fatal();
                    errors.push((instrument.clone(), e));

                    if fatal {
                        for rest in &instruments[(i + 1)..] {
                            warn!(instrument = %rest, "skipping: gateway lost");
                            errors.push((rest.clone(), SyncError::Aborted));
                        }
                        break;
                    }
                }
            }
        }

        let summary = SyncSummary {
            total,
            succeeded: outcomes.len(),
            failed: errors.len(),
            outcomes,
            errors,
        };
        info!(
            total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "sync batch complete"
        );
        summary
    }

    /// Run one sync pass for a single instrument.
    pub fn sync_instrument(
        &mut self,
        instrument: &Instrument,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome, SyncError> {
        let table = self.settings.table_for(instrument);
        let schema = self.settings.schema.clone();
        let policy = self.settings.policy;

        let span = info_span!("sync", instrument = %instrument, table = %table);
        let _enter = span.enter();

        self.store.create_table_if_absent(&schema, &table)?;

        let earliest = self.store.earliest(&schema, &table)?.map(|b| b.timestamp);
        let branch = plan::choose_branch(now, earliest, &policy);

        let windows = match branch {
            Branch::Backfill => plan::backfill_windows(now, &policy),
            Branch::Incremental => {
                let latest = self
                    .store
                    .latest(&schema, &table)?
                    .map(|b| b.timestamp)
                    .ok_or_else(|| StoreError::Query {
                        operation: "latest lookup",
                        target: table.clone(),
                        reason: "table has an earliest bar but no latest bar".into(),
                    })?;
                vec![plan::incremental_window(now, latest, &policy)?]
            }
        };
        info!(%branch, ?earliest, windows = windows.len(), "planned sync");

        let mut fetched_bars: Vec<Bar> = Vec::new();
        for window in &windows {
            let bars = self.fetch_window(instrument, window)?;
            debug!(end = ?window.end, lookback_days = window.lookback_days, bars = bars.len(), "window fetched");
            fetched_bars.extend(bars);
        }

        let fetched = fetched_bars.len();
        let batch = dedup_keep_first(fetched_bars);
        if batch.len() < fetched {
            debug!(duplicates = fetched - batch.len(), "dropped overlapping bars");
        }

        let written = if batch.is_empty() {
            warn!("no bars returned; nothing to write");
            0
        } else {
            self.store.upsert_bars(&schema, &table, &batch)?
        };
        info!(fetched, written, "instrument synced");

        Ok(SyncOutcome {
            instrument: instrument.clone(),
            table,
            branch,
            requested_windows: windows,
            fetched,
            written,
        })
    }

    /// Fetch one window; failed attempts reconnect before the next try.
    fn fetch_window(
        &mut self,
        instrument: &Instrument,
        window: &FetchWindow,
    ) -> Result<Vec<Bar>, SyncError> {
        let request = FetchRequest {
            end: window.end,
            lookback_days: window.lookback_days,
            granularity: self.settings.granularity,
            trades_only: self.settings.policy.trades_only,
            regular_hours_only: self.settings.policy.regular_hours_only,
        };
        let client = &mut *self.client;

        self.fetch_policy
            .run("historical fetch", |attempt| {
                if attempt > 1 {
                    client.reconnect()?;
                }
                client.fetch(instrument, &request)
            })
            .map_err(|e| match e {
                RetryError::Fatal(e @ MarketDataError::ConnectExhausted { .. }) => {
                    SyncError::GatewayLost(e)
                }
                RetryError::Fatal(e) => SyncError::Fetch(e),
                RetryError::Exhausted { attempts, last } => {
                    SyncError::FetchExhausted { attempts, last }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gateway_loss_is_batch_fatal() {
        let lost = SyncError::GatewayLost(MarketDataError::ConnectExhausted {
            attempts: 5,
            last_error: "refused".into(),
        });
        assert!(lost.is_batch_fatal());

        let stale = SyncError::Stale {
            latest: Utc::now(),
            limit_days: 30,
        };
        assert!(!stale.is_batch_fatal());
        assert!(!SyncError::Aborted.is_batch_fatal());
        assert!(!SyncError::Store(StoreError::MissingTable("t".into())).is_batch_fatal());
    }

    #[test]
    fn settings_follow_config() {
        let settings = SyncSettings::default();
        assert_eq!(settings.schema, "market_data");
        assert_eq!(
            settings.table_for(&Instrument::us_stock("AAPL", "NASDAQ")),
            "ib_aapl_nasdaq_usd_1m"
        );
    }
}
