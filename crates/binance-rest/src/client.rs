use crate::error::BinanceRestError;
use crate::responses::{ExchangeInfoResponse, ExchangeInfoSymbol};
use common::BinanceEnvironment;
use model::TradingPair;
use rest_client::{RestClient, RestError};
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Quote assets whose pairs are offered.
pub const SUPPORTED_QUOTE_ASSETS: [&str; 2] = ["USDT", "USD"];

/// Spot trading allowed and quoted in a supported asset.
pub fn is_supported_pair(symbol: &ExchangeInfoSymbol) -> bool {
    symbol.is_spot_trading_allowed && SUPPORTED_QUOTE_ASSETS.contains(&symbol.quote_asset.as_str())
}

impl From<&ExchangeInfoSymbol> for TradingPair {
    fn from(symbol: &ExchangeInfoSymbol) -> Self {
        TradingPair {
            symbol: symbol.symbol.clone(),
            base_asset: symbol.base_asset.clone(),
            quote_asset: symbol.quote_asset.clone(),
        }
    }
}

pub struct BinanceRestClient {
    client: RestClient,
    environment: BinanceEnvironment,
}

impl BinanceRestClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(environment: BinanceEnvironment) -> Result<Self, BinanceRestError> {
        let client = RestClient::new(environment.rest_base_url(), REQUEST_TIMEOUT)?;
        Ok(Self {
            client,
            environment,
        })
    }

    pub fn environment(&self) -> BinanceEnvironment {
        self.environment
    }

    /// GET /api/v3/exchangeInfo
    pub async fn get_exchange_info(&self) -> Result<ExchangeInfoResponse, BinanceRestError> {
        debug!(environment = %self.environment, "Fetching exchange info");

        match self.client.get("/api/v3/exchangeInfo", None).await {
            Ok(response) => Ok(response),
            Err(RestError::HttpError { status, message }) if status < 500 => {
                debug!(status, "Exchange info rejected");
                Err(BinanceRestError::from_api_response(&message))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tradable pairs, in exchange order.
    pub async fn get_trading_pairs(&self) -> Result<Vec<TradingPair>, BinanceRestError> {
        let info = self.get_exchange_info().await?;
        let pairs = supported_pairs(&info);

        info!(
            total = info.symbols.len(),
            supported = pairs.len(),
            "Loaded trading pairs"
        );
        Ok(pairs)
    }
}

fn supported_pairs(info: &ExchangeInfoResponse) -> Vec<TradingPair> {
    info.symbols
        .iter()
        .filter(|s| is_supported_pair(s))
        .map(TradingPair::from)
        .collect()
}

impl std::fmt::Debug for BinanceRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceRestClient")
            .field("environment", &self.environment)
            .field("base_url", &self.client.base_url())
            .finish()
    }
}
