//! Binance API response types.

use serde::Deserialize;

/// Response from GET /api/v3/exchangeInfo. Only the fields we read.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    #[serde(default)]
    pub timezone: String,
    #[serde(rename = "serverTime", default)]
    pub server_time: i64,
    pub symbols: Vec<ExchangeInfoSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoSymbol {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "baseAsset")]
    pub base_asset: String,
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    #[serde(rename = "isSpotTradingAllowed", default)]
    pub is_spot_trading_allowed: bool,
}
