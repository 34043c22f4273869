//! Connection registry: one transport handle per stream key.
//!
//! `acquire` creates a [`Connection`] the first time a key is asked for and
//! hands out the same `Arc` afterwards. `release` is authoritative: it
//! signals the transport to stop and forgets the key, whoever still holds a
//! reference. Nothing here is reference-counted.

use chrono::{DateTime, Utc};
use connector_core::{ConnectorError, MessageStream, Transport};
use dashmap::DashMap;
use metrics::SharedMetrics;
use model::StreamKey;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Handle to the single upstream transport for one key.
///
/// The socket itself is opened lazily through [`open`](Self::open); the
/// shared stream guarantees only one session runs at a time.
pub struct Connection {
    key: StreamKey,
    endpoint: String,
    created_at: DateTime<Utc>,
    transport: Arc<dyn Transport>,
    released: watch::Sender<bool>,
}

impl Connection {
    fn new(key: StreamKey, transport: Arc<dyn Transport>) -> Self {
        let endpoint = transport.endpoint(&key);
        let (released, _) = watch::channel(false);
        Self {
            key,
            endpoint,
            created_at: Utc::now(),
            transport,
            released,
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Open one upstream session.
    pub async fn open(&self) -> Result<MessageStream, ConnectorError> {
        if self.is_released() {
            return Err(ConnectorError::Released);
        }
        self.transport.connect(&self.endpoint).await
    }

    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Receiver that flips to `true` when the registry releases this connection.
    pub fn release_signal(&self) -> watch::Receiver<bool> {
        self.released.subscribe()
    }

    /// Resolves once the registry releases this connection.
    pub async fn released(&self) {
        let mut signal = self.released.subscribe();
        // The sender lives in self, so this only returns on release
        let _ = signal.wait_for(|released| *released).await;
    }

    fn terminate(&self) {
        // send_replace updates even with no receivers
        self.released.send_replace(true);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("created_at", &self.created_at)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Owns the key → connection map.
pub struct ConnectionRegistry {
    transport: Arc<dyn Transport>,
    connections: DashMap<StreamKey, Arc<Connection>>,
    metrics: SharedMetrics,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn Transport>, metrics: SharedMetrics) -> Self {
        Self {
            transport,
            connections: DashMap::new(),
            metrics,
        }
    }

    /// Existing connection for `key`, or a new one.
    ///
    /// The insert happens under the map's shard lock, so racing callers all
    /// get the same connection.
    pub fn acquire(&self, key: &StreamKey) -> Arc<Connection> {
        let entry = self.connections.entry(key.clone()).or_insert_with(|| {
            let connection = Connection::new(key.clone(), Arc::clone(&self.transport));
            self.metrics.inc_connections_opened();
            info!(symbol = %key, url = %connection.endpoint(), "Registered connection");
            Arc::new(connection)
        });
        Arc::clone(entry.value())
    }

    /// Terminate and forget the connection for `key`. No-op when absent.
    pub fn release(&self, key: &StreamKey) {
        match self.connections.remove(key) {
            Some((_, connection)) => {
                connection.terminate();
                self.metrics.inc_connections_released();
                info!(symbol = %key, "Released connection");
            }
            None => debug!(symbol = %key, "Release for unknown key ignored"),
        }
    }

    pub fn release_all(&self) {
        let keys: Vec<StreamKey> = self.keys();
        for key in &keys {
            self.release(key);
        }
    }

    pub fn get(&self, key: &StreamKey) -> Option<Arc<Connection>> {
        self.connections.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.connections.contains_key(key)
    }

    pub fn keys(&self) -> Vec<StreamKey> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use metrics::create_metrics;

    fn registry() -> (ConnectionRegistry, SharedMetrics) {
        let metrics = create_metrics();
        let registry = ConnectionRegistry::new(ScriptedTransport::new(), metrics.clone());
        (registry, metrics)
    }

    #[test]
    fn test_acquire_is_idempotent() {
        let (registry, metrics) = registry();
        let key = StreamKey::new("BTCUSDT");

        let first = registry.acquire(&key);
        let second = registry.acquire(&StreamKey::new("btcusdt"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(metrics.connections_opened(), 1);
    }

    #[test]
    fn test_endpoint_derived_from_key() {
        let (registry, _) = registry();
        let connection = registry.acquire(&StreamKey::new("EthUsdt"));
        assert_eq!(connection.endpoint(), "mock://ethusdt@depth5");
        assert_eq!(connection.key().as_str(), "ETHUSDT");
    }

    #[test]
    fn test_release_terminates_and_forgets() {
        let (registry, metrics) = registry();
        let key = StreamKey::new("BTCUSDT");
        let connection = registry.acquire(&key);
        let signal = connection.release_signal();

        registry.release(&key);

        assert!(connection.is_released());
        assert!(*signal.borrow());
        assert!(!registry.contains(&key));
        assert_eq!(metrics.connections_released(), 1);
    }

    #[test]
    fn test_release_unknown_key_is_noop() {
        let (registry, metrics) = registry();
        registry.release(&StreamKey::new("DOGEUSDT"));
        assert!(registry.is_empty());
        assert_eq!(metrics.connections_released(), 0);
    }

    #[test]
    fn test_acquire_after_release_creates_new_connection() {
        let (registry, metrics) = registry();
        let key = StreamKey::new("BTCUSDT");

        let old = registry.acquire(&key);
        registry.release(&key);
        let new = registry.acquire(&key);

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_released());
        assert!(!new.is_released());
        assert_eq!(metrics.connections_opened(), 2);
    }

    #[test]
    fn test_release_all() {
        let (registry, _) = registry();
        let btc = registry.acquire(&StreamKey::new("BTCUSDT"));
        let eth = registry.acquire(&StreamKey::new("ETHUSDT"));

        registry.release_all();

        assert!(registry.is_empty());
        assert!(btc.is_released());
        assert!(eth.is_released());
    }

    #[tokio::test]
    async fn test_released_resolves_for_waiters() {
        let (registry, _) = registry();
        let key = StreamKey::new("BTCUSDT");
        let connection = registry.acquire(&key);

        let waiter = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.released().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.release(&key);
        waiter.await.unwrap();

        // Already released: returns at once
        connection.released().await;
    }

    #[tokio::test]
    async fn test_open_after_release_is_rejected() {
        let (registry, _) = registry();
        let key = StreamKey::new("BTCUSDT");
        let connection = registry.acquire(&key);
        registry.release(&key);

        assert!(matches!(
            connection.open().await,
            Err(ConnectorError::Released)
        ));
    }
}
