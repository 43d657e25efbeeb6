//! Barsync Runner: configuration, sync engine, batch orchestration, poll loop.
//!
//! This crate builds on `barsync-core` to provide:
//! - TOML configuration with validated sync policy
//! - Pure branch and window planning
//! - The sync engine with per-instrument failure isolation
//! - A resident poll loop writing CSV snapshots
//! - Logging setup

pub mod config;
pub mod engine;
pub mod logging;
pub mod plan;
pub mod poll;

pub use config::{ConfigError, GatewayConfig, SecretsConfig, StoreConfig, SyncConfig, SyncPolicy};
pub use engine::{SyncEngine, SyncError, SyncOutcome, SyncSettings, SyncSummary};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use plan::{backfill_windows, choose_branch, incremental_window, Branch};
pub use poll::{PollError, PollReport, PollSettings, Poller};
