//! Domain types: instruments, granularities and bars.

pub mod bar;
pub mod instrument;

pub use bar::{dedup_keep_first, Bar};
pub use instrument::{validate_instruments, Granularity, Instrument, InstrumentError};
