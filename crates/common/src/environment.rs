//! Exchange environment selection.
//!
//! Picks the REST and push-stream hosts for production or testnet.

use std::fmt;
use std::str::FromStr;

/// Environment variable consulted by [`BinanceEnvironment::from_env`].
pub const ENVIRONMENT_VAR: &str = "BINANCE_ENVIRONMENT";

/// Binance environment (production or testnet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinanceEnvironment {
    #[default]
    Production,
    Testnet,
}

impl BinanceEnvironment {
    /// REST API base URL.
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Self::Production => "https://api.binance.com",
            Self::Testnet => "https://testnet.binance.vision",
        }
    }

    /// WebSocket base URL for market data streams.
    pub fn ws_base_url(&self) -> &'static str {
        match self {
            Self::Production => "wss://stream.binance.com:9443",
            Self::Testnet => "wss://testnet.binance.vision",
        }
    }

    /// Raw single-stream endpoint: `{ws_base}/ws/{stream}`.
    pub fn ws_stream_url(&self, stream: &str) -> String {
        format!("{}/ws/{}", self.ws_base_url(), stream)
    }

    /// Load environment from `BINANCE_ENVIRONMENT`.
    ///
    /// Returns `Production` if not set or invalid.
    pub fn from_env() -> Self {
        std::env::var(ENVIRONMENT_VAR)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for BinanceEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for BinanceEnvironment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" | "mainnet" => Ok(Self::Production),
            "testnet" | "test" => Ok(Self::Testnet),
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

/// Error parsing environment string.
#[derive(Debug, Clone)]
pub struct ParseEnvironmentError(String);

impl fmt::Display for ParseEnvironmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid environment '{}', expected 'production' or 'testnet'",
            self.0
        )
    }
}

impl std::error::Error for ParseEnvironmentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_stream_url() {
        let env = BinanceEnvironment::Production;
        assert_eq!(
            env.ws_stream_url("btcusdt@depth5"),
            "wss://stream.binance.com:9443/ws/btcusdt@depth5"
        );
        assert_eq!(env.rest_base_url(), "https://api.binance.com");
    }

    #[test]
    fn test_testnet_stream_url() {
        let env = BinanceEnvironment::Testnet;
        assert_eq!(
            env.ws_stream_url("ethusdt@depth10"),
            "wss://testnet.binance.vision/ws/ethusdt@depth10"
        );
        assert_eq!(env.rest_base_url(), "https://testnet.binance.vision");
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(
            " Prod ".parse::<BinanceEnvironment>().unwrap(),
            BinanceEnvironment::Production
        );
        assert_eq!(
            "MAINNET".parse::<BinanceEnvironment>().unwrap(),
            BinanceEnvironment::Production
        );
        assert_eq!(
            "test".parse::<BinanceEnvironment>().unwrap(),
            BinanceEnvironment::Testnet
        );
    }

    #[test]
    fn test_parse_invalid() {
        let err = "staging".parse::<BinanceEnvironment>().unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_display_round_trips() {
        for env in [BinanceEnvironment::Production, BinanceEnvironment::Testnet] {
            assert_eq!(env.to_string().parse::<BinanceEnvironment>().unwrap(), env);
        }
    }
}
