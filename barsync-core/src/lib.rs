//! Barsync Core: domain types, market-data client, bar store, window planning.
//!
//! This crate contains everything the sync engine talks to:
//! - Domain types (bars, instruments, granularities)
//! - Fetch-window boundary generation
//! - Market-data client trait, retry policy and the Interactive Brokers client
//! - Bar store trait with PostgreSQL and in-memory implementations
//! - Database credential providers

pub mod data;
pub mod domain;
pub mod secrets;
pub mod store;
pub mod window;
