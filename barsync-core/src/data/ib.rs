//! Interactive Brokers market-data client.
//!
//! Talks to a running TWS or IB Gateway through the blocking `ibapi` client.
//! Connection establishment goes through a [`RetryPolicy`] (5 attempts, 30 s
//! apart by default); a connection that cannot be established is a hard stop.
//!
//! Historical requests are limited by the gateway's pacing rules. The sync
//! engine keeps requests sequential and never asks for more than the
//! configured per-request maximum.

use super::provider::{FetchRequest, MarketDataClient, MarketDataError};
use super::retry::{RetryError, RetryPolicy};
use crate::domain::{Bar, Granularity, Instrument};
use chrono::{DateTime, Utc};
use ibapi::contracts::Contract;
use ibapi::market_data::historical::{self, BarSize, WhatToShow};
use ibapi::Client;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

/// Where the gateway listens and which client id to claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayAddress {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
}

impl GatewayAddress {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewayAddress {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4001,
            client_id: 1,
        }
    }
}

/// Interactive Brokers historical-data client.
pub struct IbClient {
    address: GatewayAddress,
    connect_policy: RetryPolicy,
    client: Option<Client>,
}

impl IbClient {
    /// Connect to the gateway, retrying per `connect_policy`.
    pub fn connect(
        address: GatewayAddress,
        connect_policy: RetryPolicy,
    ) -> Result<Self, MarketDataError> {
        let mut ib = Self {
            address,
            connect_policy,
            client: None,
        };
        ib.establish()?;
        Ok(ib)
    }

    fn establish(&mut self) -> Result<(), MarketDataError> {
        let addr = self.address.socket_addr();
        let client_id = self.address.client_id;

        let client = self
            .connect_policy
            .run("connect to gateway", |attempt| {
                Client::connect(&addr, client_id)
                    .map(|client| {
                        info!(address = %addr, client_id, attempt, "connected to gateway");
                        client
                    })
                    .map_err(|e| MarketDataError::ConnectFailed {
                        address: addr.clone(),
                        reason: e.to_string(),
                    })
            })
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, last } => MarketDataError::ConnectExhausted {
                    attempts,
                    last_error: last.to_string(),
                },
                RetryError::Fatal(e) => e,
            })?;

        self.client = Some(client);
        Ok(())
    }

    fn contract_for(instrument: &Instrument) -> Contract {
        let mut contract = Contract::stock(&instrument.symbol);
        contract.exchange = instrument.exchange.clone();
        contract.currency = instrument.currency.clone();
        contract
    }
}

fn bar_size(granularity: Granularity) -> BarSize {
    match granularity {
        Granularity::OneMinute => BarSize::Min,
        Granularity::FiveMinutes => BarSize::Min5,
        Granularity::FifteenMinutes => BarSize::Min15,
        Granularity::OneHour => BarSize::Hour,
        Granularity::OneDay => BarSize::Day,
    }
}

fn to_offset(dt: DateTime<Utc>) -> Result<OffsetDateTime, MarketDataError> {
    OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| MarketDataError::InvalidBar(format!("end time {dt} out of range: {e}")))
}

fn to_bar(raw: &historical::Bar) -> Result<Bar, MarketDataError> {
    let timestamp = DateTime::from_timestamp(raw.date.unix_timestamp(), raw.date.nanosecond())
        .ok_or_else(|| MarketDataError::InvalidBar(format!("timestamp {} out of range", raw.date)))?;

    // Midpoint bars report -1 for volume, average and count.
    checked(Bar {
        timestamp,
        open: raw.open,
        high: raw.high,
        low: raw.low,
        close: raw.close,
        volume: raw.volume.max(0.0),
        average: raw.wap,
        bar_count: raw.count.max(0) as u32,
    })
}

/// Reject bars with a missing price or an inverted range before they reach storage.
fn checked(bar: Bar) -> Result<Bar, MarketDataError> {
    if bar.is_sane() {
        Ok(bar)
    } else {
        Err(MarketDataError::InvalidBar(format!(
            "bar at {} fails OHLC check (o={} h={} l={} c={})",
            bar.timestamp, bar.open, bar.high, bar.low, bar.close
        )))
    }
}

impl MarketDataClient for IbClient {
    fn name(&self) -> &str {
        "interactive_brokers"
    }

    fn fetch(
        &mut self,
        instrument: &Instrument,
        request: &FetchRequest,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| MarketDataError::Disconnected("no active gateway session".into()))?;

        let contract = Self::contract_for(instrument);
        let end = request.end.map(to_offset).transpose()?;
        let what_to_show = if request.trades_only {
            WhatToShow::Trades
        } else {
            WhatToShow::MidPoint
        };

        debug!(
            instrument = %instrument,
            end = ?request.end,
            lookback_days = request.lookback_days,
            bar_size = %request.granularity,
            "requesting historical bars"
        );

        let data = client
            .historical_data(
                &contract,
                end,
                historical::Duration::days(request.lookback_days as i32),
                bar_size(request.granularity),
                what_to_show,
                request.regular_hours_only,
            )
            .map_err(|e| MarketDataError::Request {
                instrument: instrument.to_string(),
                reason: e.to_string(),
            })?;

        let mut bars = data.bars.iter().map(to_bar).collect::<Result<Vec<_>, _>>()?;
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    fn reconnect(&mut self) -> Result<(), MarketDataError> {
        info!(address = %self.address.socket_addr(), "reconnecting to gateway");
        self.client = None;
        self.establish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_address() {
        let addr = GatewayAddress::default();
        assert_eq!(addr.socket_addr(), "127.0.0.1:4001");
        assert_eq!(addr.client_id, 1);
    }

    #[test]
    fn contract_carries_venue_and_currency() {
        let contract = IbClient::contract_for(&Instrument::new("SHEL", "NYSE", "USD"));
        assert_eq!(contract.symbol, "SHEL");
        assert_eq!(contract.exchange, "NYSE");
        assert_eq!(contract.currency, "USD");
    }

    fn gateway_bar() -> Bar {
        Bar {
            timestamp: DateTime::from_timestamp(1_717_425_000, 0).unwrap(),
            open: 190.0,
            high: 191.0,
            low: 189.5,
            close: 190.5,
            volume: 1200.0,
            average: 190.2,
            bar_count: 35,
        }
    }

    #[test]
    fn sane_bar_passes_check() {
        let bar = gateway_bar();
        assert_eq!(checked(bar.clone()).unwrap(), bar);
    }

    #[test]
    fn inverted_range_is_invalid() {
        let mut bar = gateway_bar();
        bar.low = 192.0;
        let err = checked(bar).unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidBar(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn missing_price_is_invalid() {
        let mut bar = gateway_bar();
        bar.close = f64::NAN;
        assert!(matches!(checked(bar), Err(MarketDataError::InvalidBar(_))));
    }

    #[test]
    fn end_time_converts_to_same_instant() {
        let dt = DateTime::from_timestamp(1_717_243_200, 0).unwrap();
        let offset = to_offset(dt).unwrap();
        assert_eq!(offset.unix_timestamp(), 1_717_243_200);
    }
}
