//! Resident poll loop: snapshot the last day of bars for one instrument to CSV.
//!
//! Each poll writes `<output_dir>/<SYMBOL>_data_<YYYYMMDD_HHMMSS>.csv`. A failed
//! fetch is logged, the client reconnects, and polling resumes. Only a
//! reconnect that exhausts its retries (or a write error) ends the loop.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use barsync_core::data::{FetchRequest, MarketDataClient, MarketDataError};
use barsync_core::domain::{Bar, Granularity, Instrument};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("failed to create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write snapshot {}: {source}", path.display())]
    Write { path: PathBuf, source: csv::Error },

    #[error("fetch failed: {0}")]
    Fetch(MarketDataError),

    #[error("market-data gateway lost: {0}")]
    GatewayLost(MarketDataError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub instrument: Instrument,
    pub output_dir: PathBuf,
    pub interval: Duration,
    /// Stop after this many polls; `None` polls until the gateway is lost.
    pub iterations: Option<u64>,
    pub granularity: Granularity,
    pub trades_only: bool,
    pub regular_hours_only: bool,
}

impl PollSettings {
    pub fn new(instrument: Instrument, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            instrument,
            output_dir: output_dir.into(),
            interval: Duration::from_secs(30),
            iterations: None,
            granularity: Granularity::OneMinute,
            trades_only: true,
            regular_hours_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub polls: u64,
    pub snapshots: u64,
    pub failures: u64,
    pub last_snapshot: Option<PathBuf>,
}

/// `<dir>/<SYMBOL>_data_<YYYYMMDD_HHMMSS>.csv`
pub fn snapshot_path(dir: &Path, symbol: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{symbol}_data_{}.csv", at.format("%Y%m%d_%H%M%S")))
}

/// Write bars as CSV with a header row.
pub fn write_snapshot(path: &Path, bars: &[Bar]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer.flush()?;
    Ok(())
}

pub struct Poller<'a> {
    client: &'a mut dyn MarketDataClient,
    settings: PollSettings,
    clock: Box<dyn FnMut() -> DateTime<Utc> + 'a>,
}

impl<'a> Poller<'a> {
    pub fn new(client: &'a mut dyn MarketDataClient, settings: PollSettings) -> Self {
        Self {
            client,
            settings,
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the clock used to stamp snapshot file names.
    pub fn with_clock(mut self, clock: impl FnMut() -> DateTime<Utc> + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Fetch the last day of bars and write one snapshot.
    pub fn poll_once(&mut self) -> Result<(PathBuf, usize), PollError> {
        let request = FetchRequest {
            end: None,
            lookback_days: 1,
            granularity: self.settings.granularity,
            trades_only: self.settings.trades_only,
            regular_hours_only: self.settings.regular_hours_only,
        };
        let bars = self
            .client
            .fetch(&self.settings.instrument, &request)
            .map_err(PollError::Fetch)?;

        let path = snapshot_path(
            &self.settings.output_dir,
            &self.settings.instrument.symbol,
            (self.clock)(),
        );
        write_snapshot(&path, &bars).map_err(|source| PollError::Write {
            path: path.clone(),
            source,
        })?;
        Ok((path, bars.len()))
    }

    pub fn run(&mut self) -> Result<PollReport, PollError> {
        let dir = &self.settings.output_dir;
        std::fs::create_dir_all(dir).map_err(|source| PollError::OutputDir {
            path: dir.clone(),
            source,
        })?;

        info!(
            instrument = %self.settings.instrument,
            output_dir = %dir.display(),
            interval_secs = self.settings.interval.as_secs(),
            "starting poll loop"
        );

        let mut report = PollReport::default();
        loop {
            report.polls += 1;
            match self.poll_once() {
                Ok((path, bars)) => {
                    info!(path = %path.display(), bars, "snapshot written");
                    report.snapshots += 1;
                    report.last_snapshot = Some(path);
                }
                Err(PollError::Fetch(e)) => {
                    warn!(error = %e, "poll failed; reconnecting");
                    report.failures += 1;
                    self.client.reconnect().map_err(PollError::GatewayLost)?;
                }
                Err(e) => return Err(e),
            }

            if self.settings.iterations.is_some_and(|max| report.polls >= max) {
                break;
            }
            if !self.settings.interval.is_zero() {
                thread::sleep(self.settings.interval);
            }
        }

        info!(
            polls = report.polls,
            snapshots = report.snapshots,
            failures = report.failures,
            "poll loop finished"
        );
        Ok(report)
    }
}
