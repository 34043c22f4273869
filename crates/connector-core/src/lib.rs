//! Transport seam between the feed hub and a concrete push connection.
//!
//! A [`Transport`] knows how to turn a [`StreamKey`] into an endpoint and how
//! to open that endpoint as a stream of parsed [`DepthSnapshot`]s. The stream
//! ends (or yields an error) when the upstream connection dies.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use model::{DepthSnapshot, StreamKey};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    /// The session was replaced after going silent.
    #[error("Session went silent and was replaced")]
    Stale,

    /// The registry released the connection; it will not reopen.
    #[error("Connection released")]
    Released,
}

/// Messages from one open upstream session.
///
/// `Err` and end-of-stream both mean the session is over.
pub type MessageStream = BoxStream<'static, Result<DepthSnapshot, ConnectorError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Endpoint address for a key. Must be deterministic.
    fn endpoint(&self, key: &StreamKey) -> String;

    /// Open one upstream session to `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<MessageStream, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConnectorError::WebSocket("reset by peer".to_string()).to_string(),
            "WebSocket error: reset by peer"
        );
        assert_eq!(ConnectorError::Released.to_string(), "Connection released");
    }

    #[test]
    fn test_error_is_cloneable_for_fan_out() {
        let err = ConnectorError::Parse("bad frame".to_string());
        assert_eq!(err.clone(), err);
    }
}
