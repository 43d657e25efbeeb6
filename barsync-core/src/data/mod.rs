//! Market-data access: client trait, Interactive Brokers client, retry policy.

pub mod ib;
pub mod provider;
pub mod retry;

pub use ib::{GatewayAddress, IbClient};
pub use provider::{FetchRequest, MarketDataClient, MarketDataError};
pub use retry::{Recoverable, RetryError, RetryPolicy};
