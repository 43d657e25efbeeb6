use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Bar duration label.
///
/// Serialized by its short code, which is also the table-name suffix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Granularity {
    /// Short code used in table names.
    pub fn code(self) -> &'static str {
        match self {
            Granularity::OneMinute => "1m",
            Granularity::FiveMinutes => "5m",
            Granularity::FifteenMinutes => "15m",
            Granularity::OneHour => "1h",
            Granularity::OneDay => "1d",
        }
    }

    /// Bar size label as the brokerage spells it.
    pub fn label(self) -> &'static str {
        match self {
            Granularity::OneMinute => "1 min",
            Granularity::FiveMinutes => "5 mins",
            Granularity::FifteenMinutes => "15 mins",
            Granularity::OneHour => "1 hour",
            Granularity::OneDay => "1 day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A tradeable security identified by symbol, venue and currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
}

impl Instrument {
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            currency: currency.into(),
        }
    }

    /// US-listed stock on the given exchange.
    pub fn us_stock(symbol: &str, exchange: &str) -> Self {
        Self::new(symbol, exchange, "USD")
    }

    /// Storage table name: `<prefix>_<symbol>_<exchange>_<currency>_<code>`, lower-cased.
    pub fn table_name(&self, prefix: &str, granularity: Granularity) -> String {
        format!(
            "{prefix}_{}_{}_{}_{}",
            self.symbol,
            self.exchange,
            self.currency,
            granularity.code()
        )
        .to_lowercase()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.symbol, self.exchange, self.currency)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InstrumentError {
    #[error("instrument list is empty")]
    Empty,

    #[error("instrument has an empty {field}: {instrument}")]
    BlankField {
        instrument: String,
        field: &'static str,
    },

    #[error("instruments {first} and {second} both map to table '{table}'")]
    TableCollision {
        first: String,
        second: String,
        table: String,
    },
}

/// Reject a tracked instrument list that cannot be stored one table per instrument.
///
/// Checks for blank identity fields and for two instruments whose table names
/// collide under the lower-cased naming scheme.
pub fn validate_instruments(
    instruments: &[Instrument],
    prefix: &str,
    granularity: Granularity,
) -> Result<(), InstrumentError> {
    if instruments.is_empty() {
        return Err(InstrumentError::Empty);
    }

    let mut tables: HashMap<String, &Instrument> = HashMap::new();
    for inst in instruments {
        for (field, value) in [
            ("symbol", &inst.symbol),
            ("exchange", &inst.exchange),
            ("currency", &inst.currency),
        ] {
            if value.trim().is_empty() {
                return Err(InstrumentError::BlankField {
                    instrument: inst.to_string(),
                    field,
                });
            }
        }

        let table = inst.table_name(prefix, granularity);
        if let Some(first) = tables.get(&table) {
            return Err(InstrumentError::TableCollision {
                first: first.to_string(),
                second: inst.to_string(),
                table,
            });
        }
        tables.insert(table, inst);
    }

    Ok(())
}
