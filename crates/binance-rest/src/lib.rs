//! Binance REST catalog.
//!
//! Fetches `/api/v3/exchangeInfo` and narrows it to the spot pairs quoted in
//! USDT or USD, the set the feed runner offers.
//!
//! ```rust,ignore
//! use binance_rest::BinanceRestClient;
//! use common::BinanceEnvironment;
//!
//! let client = BinanceRestClient::new(BinanceEnvironment::Production)?;
//! for pair in client.get_trading_pairs().await? {
//!     println!("{}", pair.symbol);
//! }
//! ```

mod client;
mod error;
mod responses;

pub use client::{is_supported_pair, BinanceRestClient, SUPPORTED_QUOTE_ASSETS};
pub use error::BinanceRestError;
pub use responses::{ExchangeInfoResponse, ExchangeInfoSymbol};
