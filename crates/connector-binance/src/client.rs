use async_trait::async_trait;
use common::BinanceEnvironment;
use connector_core::{ConnectorError, MessageStream, Transport};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::SharedMetrics;
use model::{DepthSnapshot, StreamKey};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::parser::{parse_message, ParsedMessage};

/// Timeout for WebSocket connection attempts.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of book levels per side.
pub const DEFAULT_DEPTH_LEVELS: u32 = 5;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stream name for the partial book depth feed of one symbol.
pub fn depth_stream_name(key: &StreamKey, depth: u32) -> String {
    format!("{}@depth{}", key.to_lowercase(), depth)
}

/// Partial book depth transport over the Binance WebSocket API.
///
/// Each [`connect`](Transport::connect) opens one socket; the returned stream
/// answers pings, skips frames it cannot parse and ends with an error when
/// the socket closes.
pub struct DepthTransport {
    environment: BinanceEnvironment,
    depth: u32,
    metrics: SharedMetrics,
}

impl DepthTransport {
    pub fn new(environment: BinanceEnvironment, depth: u32, metrics: SharedMetrics) -> Self {
        Self {
            environment,
            depth,
            metrics,
        }
    }

    pub fn environment(&self) -> BinanceEnvironment {
        self.environment
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

#[async_trait]
impl Transport for DepthTransport {
    fn endpoint(&self, key: &StreamKey) -> String {
        self.environment
            .ws_stream_url(&depth_stream_name(key, self.depth))
    }

    async fn connect(&self, endpoint: &str) -> Result<MessageStream, ConnectorError> {
        info!(url = %endpoint, "Connecting to Binance WebSocket");

        let ws_stream = match tokio::time::timeout(CONNECTION_TIMEOUT, connect_async(endpoint)).await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => return Err(ConnectorError::WebSocket(e.to_string())),
            Err(_) => return Err(ConnectorError::Timeout),
        };

        info!(url = %endpoint, "Connected to Binance WebSocket");

        let (write, read) = ws_stream.split();
        let session = Session {
            write,
            read,
            metrics: self.metrics.clone(),
            finished: false,
        };

        let stream = futures_util::stream::unfold(session, |mut session| async move {
            let item = session.next_snapshot().await?;
            Some((item, session))
        });

        Ok(stream.boxed())
    }
}

/// One open socket.
struct Session {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    metrics: SharedMetrics,
    finished: bool,
}

impl Session {
    /// Next parsed snapshot, or the error that ended the socket.
    ///
    /// Returns `None` after the terminal error has been yielded.
    async fn next_snapshot(&mut self) -> Option<Result<DepthSnapshot, ConnectorError>> {
        if self.finished {
            return None;
        }

        loop {
            let msg = match self.read.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    return Some(self.finish(ConnectorError::WebSocket(e.to_string())));
                }
                None => {
                    info!("WebSocket stream ended");
                    return Some(self.finish(ConnectorError::ConnectionClosed));
                }
            };

            match msg {
                Message::Text(text) => match parse_message(&text) {
                    Ok(ParsedMessage::Depth(depth)) => return Some(Ok(depth)),
                    Ok(ParsedMessage::Unknown) => {}
                    Err(e) => {
                        self.metrics.inc_parse_errors();
                        warn!(error = %e, "Failed to parse message");
                    }
                },
                Message::Ping(data) => {
                    debug!("Received Ping, sending Pong");
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to send Pong");
                        return Some(self.finish(ConnectorError::WebSocket(e.to_string())));
                    }
                }
                Message::Close(_) => {
                    info!("WebSocket closed by server");
                    return Some(self.finish(ConnectorError::ConnectionClosed));
                }
                _ => {}
            }
        }
    }

    fn finish(&mut self, error: ConnectorError) -> Result<DepthSnapshot, ConnectorError> {
        self.finished = true;
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::create_metrics;

    #[test]
    fn test_depth_stream_name_lowercases() {
        let key = StreamKey::new("BTCUSDT");
        assert_eq!(depth_stream_name(&key, 5), "btcusdt@depth5");
        assert_eq!(depth_stream_name(&key, 20), "btcusdt@depth20");
    }

    #[test]
    fn test_endpoint_production() {
        let transport =
            DepthTransport::new(BinanceEnvironment::Production, DEFAULT_DEPTH_LEVELS, create_metrics());
        assert_eq!(
            transport.endpoint(&StreamKey::new("btcusdt")),
            "wss://stream.binance.com:9443/ws/btcusdt@depth5"
        );
    }

    #[test]
    fn test_endpoint_testnet_custom_depth() {
        let transport = DepthTransport::new(BinanceEnvironment::Testnet, 10, create_metrics());
        assert_eq!(
            transport.endpoint(&StreamKey::new("EthUsdt")),
            "wss://testnet.binance.vision/ws/ethusdt@depth10"
        );
        assert_eq!(transport.depth(), 10);
    }

    #[test]
    fn test_endpoint_is_case_insensitive() {
        let transport =
            DepthTransport::new(BinanceEnvironment::Production, DEFAULT_DEPTH_LEVELS, create_metrics());
        assert_eq!(
            transport.endpoint(&StreamKey::new("bnbusdt")),
            transport.endpoint(&StreamKey::new("BNBUSDT"))
        );
    }
}
