//! Poll loop tests: snapshots, reconnect on failure, iteration cap, lost gateway.

use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use barsync_core::data::{FetchRequest, MarketDataClient, MarketDataError};
use barsync_core::domain::{Bar, Instrument};
use barsync_runner::poll::{snapshot_path, PollError, PollReport, PollSettings, Poller};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).unwrap()
}

fn aapl() -> Instrument {
    Instrument::us_stock("AAPL", "NASDAQ")
}

fn bar_at(timestamp: DateTime<Utc>) -> Bar {
    Bar {
        timestamp,
        open: 190.0,
        high: 191.0,
        low: 189.5,
        close: 190.5,
        volume: 1200.0,
        average: 190.2,
        bar_count: 35,
    }
}

/// Replays scripted responses, then answers every fetch with two bars.
#[derive(Default)]
struct ScriptedClient {
    script: VecDeque<Result<Vec<Bar>, MarketDataError>>,
    requests: Vec<FetchRequest>,
    reconnects: u32,
    fail_reconnect: bool,
}

impl MarketDataClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &mut self,
        _instrument: &Instrument,
        request: &FetchRequest,
    ) -> Result<Vec<Bar>, MarketDataError> {
        self.requests.push(*request);
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(vec![bar_at(start()), bar_at(start() + Duration::minutes(1))]))
    }

    fn reconnect(&mut self) -> Result<(), MarketDataError> {
        self.reconnects += 1;
        if self.fail_reconnect {
            return Err(MarketDataError::ConnectExhausted {
                attempts: 5,
                last_error: "connection refused".into(),
            });
        }
        Ok(())
    }
}

fn lost_connection() -> MarketDataError {
    MarketDataError::Disconnected("socket closed".into())
}

fn settings(dir: &std::path::Path, iterations: Option<u64>) -> PollSettings {
    let mut settings = PollSettings::new(aapl(), dir);
    settings.interval = StdDuration::ZERO;
    settings.iterations = iterations;
    settings
}

/// Clock that advances one second per call, so snapshot names never collide.
fn ticking_clock() -> impl FnMut() -> DateTime<Utc> {
    let mut ticks = 0;
    move || {
        ticks += 1;
        start() + Duration::seconds(ticks)
    }
}

fn run(client: &mut ScriptedClient, settings: PollSettings) -> Result<PollReport, PollError> {
    Poller::new(client, settings).with_clock(ticking_clock()).run()
}

fn csv_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "csv"))
        .count()
}

#[test]
fn stops_at_iteration_cap() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = ScriptedClient::default();

    let report = run(&mut client, settings(dir.path(), Some(2))).unwrap();

    assert_eq!(report.polls, 2);
    assert_eq!(report.snapshots, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(
        report.last_snapshot,
        Some(snapshot_path(dir.path(), "AAPL", start() + Duration::seconds(2)))
    );
    assert_eq!(csv_files(dir.path()), 2);
    assert_eq!(client.reconnects, 0);
}

#[test]
fn polls_last_day_up_to_now() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = ScriptedClient::default();

    run(&mut client, settings(dir.path(), Some(1))).unwrap();

    assert_eq!(client.requests.len(), 1);
    assert_eq!(client.requests[0].end, None);
    assert_eq!(client.requests[0].lookback_days, 1);
    assert!(client.requests[0].trades_only);
    assert!(client.requests[0].regular_hours_only);
}

#[test]
fn failed_fetch_reconnects_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = ScriptedClient::default();
    client.script.push_back(Err(lost_connection()));

    let report = run(&mut client, settings(dir.path(), Some(3))).unwrap();

    assert_eq!(report.polls, 3);
    assert_eq!(report.snapshots, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(client.reconnects, 1);
    assert_eq!(client.requests.len(), 3);
    assert_eq!(csv_files(dir.path()), 2);
}

#[test]
fn exhausted_reconnect_ends_with_gateway_lost() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = ScriptedClient {
        fail_reconnect: true,
        ..ScriptedClient::default()
    };
    client.script.push_back(Err(lost_connection()));

    let err = run(&mut client, settings(dir.path(), None)).unwrap_err();

    assert!(matches!(
        err,
        PollError::GatewayLost(MarketDataError::ConnectExhausted { attempts: 5, .. })
    ));
    assert_eq!(client.reconnects, 1);
    assert_eq!(client.requests.len(), 1);
    assert_eq!(csv_files(dir.path()), 0);
}

#[test]
fn creates_missing_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("snapshots").join("aapl");
    let mut client = ScriptedClient::default();

    let report = run(&mut client, settings(&nested, Some(1))).unwrap();

    assert_eq!(report.snapshots, 1);
    assert!(nested.is_dir());
    assert_eq!(csv_files(&nested), 1);
}
