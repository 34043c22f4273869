//! Binance REST API error types.

use rest_client::RestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BinanceRestError {
    /// Network, timeout or HTTP failure.
    #[error("REST client error: {0}")]
    Rest(#[from] RestError),

    /// Error body returned by the exchange.
    #[error("Binance API error {code}: {message}")]
    ApiError { code: i32, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BinanceRestError {
    /// Parse a Binance error body: `{"code": -1000, "msg": "..."}`.
    pub fn from_api_response(body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct ApiError {
            code: i32,
            msg: String,
        }

        match serde_json::from_str::<ApiError>(body) {
            Ok(err) => Self::ApiError {
                code: err.code,
                message: err.msg,
            },
            Err(_) => Self::Parse(format!("Failed to parse error response: {}", body)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rest(rest_err) => rest_err.is_retryable(),
            // Unknown error, disconnected, too many requests
            Self::ApiError { code, .. } => matches!(code, -1000 | -1001 | -1003),
            Self::Parse(_) => false,
        }
    }
}
