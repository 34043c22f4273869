use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized identifier of one live feed.
///
/// Symbols are compared case-insensitively: `"btcusdt"` and `" BTCUSDT "`
/// produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    /// The normalized (upper-case) symbol.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-case form used in stream names.
    pub fn to_lowercase(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamKey {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

impl From<String> for StreamKey {
    fn from(symbol: String) -> Self {
        Self::new(symbol)
    }
}

impl From<StreamKey> for String {
    fn from(key: StreamKey) -> Self {
        key.0
    }
}

/// One `[price, quantity]` level, kept as the decimal strings the feed sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct PriceLevel {
    pub price: String,
    pub quantity: String,
}

impl PriceLevel {
    pub fn new(price: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            quantity: quantity.into(),
        }
    }

    /// Price as an exact decimal.
    pub fn price_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str(&self.price)
    }

    /// Quantity as an exact decimal.
    pub fn quantity_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str(&self.quantity)
    }
}

impl From<(String, String)> for PriceLevel {
    fn from((price, quantity): (String, String)) -> Self {
        Self { price, quantity }
    }
}

impl From<PriceLevel> for (String, String) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.quantity)
    }
}

/// Partial book depth pushed by the feed on every update.
///
/// Wire shape: `{"lastUpdateId": 1, "bids": [["100","1"]], "asks": [["101","2"]]}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl DepthSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

/// A tradable pair as reported by the exchange catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

impl TradingPair {
    pub fn key(&self) -> StreamKey {
        StreamKey::new(&self.symbol)
    }
}
