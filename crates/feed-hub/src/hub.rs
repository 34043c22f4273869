//! Entry point tying registry, multiplexer and supervisors together, plus the
//! symbol selection used by the runner.

use connector_core::Transport;
use metrics::SharedMetrics;
use model::StreamKey;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::FeedConfig;
use crate::multiplexer::StreamMultiplexer;
use crate::registry::ConnectionRegistry;
use crate::supervisor::{supervise, FeedHandle};

pub struct FeedHub {
    registry: Arc<ConnectionRegistry>,
    multiplexer: Arc<StreamMultiplexer>,
    config: FeedConfig,
    metrics: SharedMetrics,
    selected: RwLock<Vec<StreamKey>>,
}

impl FeedHub {
    pub fn new(transport: Arc<dyn Transport>, config: FeedConfig, metrics: SharedMetrics) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(transport, metrics.clone()));
        let multiplexer = Arc::new(StreamMultiplexer::new(
            Arc::clone(&registry),
            config.channel_capacity,
            metrics.clone(),
        ));

        Self {
            registry,
            multiplexer,
            config,
            metrics,
            selected: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn multiplexer(&self) -> &Arc<StreamMultiplexer> {
        &self.multiplexer
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Supervised feed for one consumer. Consumers of the same symbol share
    /// one upstream connection.
    pub fn request_feed(&self, symbol: impl Into<StreamKey>) -> FeedHandle {
        supervise(
            symbol.into(),
            Arc::clone(&self.multiplexer),
            self.config.supervisor_policy(),
            self.metrics.clone(),
        )
    }

    /// Mark a symbol as selected. Returns false if it already was.
    pub fn add_symbol(&self, symbol: impl Into<StreamKey>) -> bool {
        let key = symbol.into();
        let mut selected = self.selected.write();
        if selected.contains(&key) {
            warn!(symbol = %key, "Symbol already selected");
            return false;
        }
        info!(symbol = %key, "Symbol selected");
        selected.push(key);
        true
    }

    /// Deselect a symbol and close its shared connection.
    ///
    /// The connection is closed even if the symbol was not selected. Returns
    /// whether it was.
    pub fn remove_symbol(&self, symbol: impl Into<StreamKey>) -> bool {
        let key = symbol.into();
        let was_selected = {
            let mut selected = self.selected.write();
            let before = selected.len();
            selected.retain(|k| k != &key);
            selected.len() != before
        };
        self.multiplexer.close(&key);
        info!(symbol = %key, was_selected, "Symbol removed");
        was_selected
    }

    pub fn is_symbol_selected(&self, symbol: impl Into<StreamKey>) -> bool {
        let key = symbol.into();
        self.selected.read().contains(&key)
    }

    /// Selected symbols in selection order.
    pub fn selected_symbols(&self) -> Vec<StreamKey> {
        self.selected.read().clone()
    }

    /// Deselect everything and close the matching connections.
    pub fn clear_all_symbols(&self) {
        let keys = std::mem::take(&mut *self.selected.write());
        for key in &keys {
            self.multiplexer.close(key);
        }
        info!(count = keys.len(), "Cleared all symbols");
    }

    /// Close every shared stream and connection, selected or not.
    pub fn shutdown(&self) {
        self.selected.write().clear();
        self.multiplexer.close_all();
        info!("Feed hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::FeedPhase;
    use crate::testing::{depth, settle, ScriptedTransport};
    use metrics::create_metrics;

    fn hub(transport: Arc<ScriptedTransport>) -> FeedHub {
        FeedHub::new(transport, FeedConfig::default(), create_metrics())
    }

    #[test]
    fn test_add_symbol_rejects_duplicates() {
        let hub = hub(ScriptedTransport::new());

        assert!(hub.add_symbol("BTCUSDT"));
        assert!(!hub.add_symbol("btcusdt"));
        assert!(hub.add_symbol("ETHUSDT"));

        assert_eq!(
            hub.selected_symbols(),
            vec![StreamKey::new("BTCUSDT"), StreamKey::new("ETHUSDT")]
        );
        assert!(hub.is_symbol_selected("ethusdt"));
        assert!(!hub.is_symbol_selected("BNBUSDT"));
    }

    #[test]
    fn test_remove_symbol_closes_connection() {
        let hub = hub(ScriptedTransport::new());
        let key = StreamKey::new("BTCUSDT");
        hub.add_symbol(key.clone());
        let connection = hub.registry().acquire(&key);

        assert!(hub.remove_symbol("BTCUSDT"));

        assert!(!hub.is_symbol_selected("BTCUSDT"));
        assert!(connection.is_released());
        assert!(!hub.registry().contains(&key));
        assert!(!hub.remove_symbol("BTCUSDT"));
    }

    #[test]
    fn test_clear_all_symbols() {
        let hub = hub(ScriptedTransport::new());
        hub.add_symbol("BTCUSDT");
        hub.add_symbol("ETHUSDT");
        hub.multiplexer().stream(&StreamKey::new("BTCUSDT"));
        hub.multiplexer().stream(&StreamKey::new("ETHUSDT"));

        hub.clear_all_symbols();

        assert!(hub.selected_symbols().is_empty());
        assert!(hub.registry().is_empty());
        assert!(hub.multiplexer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_feed_shares_connection() {
        let transport = ScriptedTransport::new();
        let hub = hub(transport.clone());
        let key = StreamKey::new("ETHUSDT");

        let mut first = hub.request_feed("ethusdt");
        let mut second = hub.request_feed(key.clone());
        settle(|| hub.multiplexer().stream(&key).observer_count() == 2).await;
        transport.wait_for_connects(1).await;
        transport.push(depth(3));

        first.wait_for(|s| s.is_live()).await;
        second.wait_for(|s| s.is_live()).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.endpoints(), vec!["mock://ethusdt@depth5"]);
        assert_eq!(hub.metrics().open_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_symbol_errors_live_feeds() {
        let transport = ScriptedTransport::new();
        let hub = hub(transport.clone());
        hub.add_symbol("BTCUSDT");
        let mut feed = hub.request_feed("BTCUSDT");

        transport.wait_for_connects(1).await;
        transport.push(depth(1));
        feed.wait_for(|s| s.is_live()).await;

        hub.remove_symbol("BTCUSDT");

        let state = feed.wait_for(|s| s.phase == FeedPhase::Error).await;
        assert_eq!(state.failure.unwrap().to_string(), "connection released");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_unselected_streams() {
        let transport = ScriptedTransport::new();
        let hub = hub(transport.clone());
        let _feed = hub.request_feed("SOLUSDT");
        settle(|| transport.connect_count() == 1).await;

        hub.shutdown();

        assert!(hub.registry().is_empty());
        assert_eq!(hub.metrics().open_connections(), 0);
    }
}
