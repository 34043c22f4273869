//! Shared stream multiplexer.
//!
//! Every key gets one [`SharedStream`]: a broadcast channel fed by at most one
//! upstream session at a time. Observers attach with
//! [`SharedStream::subscribe`]; the first observer of an idle stream starts a
//! session, later ones join it and only see what arrives after they attach.
//! A session that fails is not restarted here. The failure is broadcast and
//! the next `subscribe` opens a new one.

use connector_core::ConnectorError;
use dashmap::DashMap;
use futures_util::StreamExt;
use metrics::SharedMetrics;
use model::{DepthSnapshot, StreamKey};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::{Connection, ConnectionRegistry};

/// What observers of a shared stream receive.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Message(Arc<DepthSnapshot>),
    /// The current session died. Subscribing again opens a new one.
    Failed(ConnectorError),
    /// The connection was released; this stream is finished.
    Closed,
}

struct ActiveSession {
    id: u64,
    last_message_at: Instant,
    abort: Option<AbortHandle>,
}

pub struct SharedStream {
    connection: Arc<Connection>,
    sender: broadcast::Sender<StreamEvent>,
    session: Mutex<Option<ActiveSession>>,
    next_session: AtomicU64,
    metrics: SharedMetrics,
}

impl SharedStream {
    fn new(connection: Arc<Connection>, capacity: usize, metrics: SharedMetrics) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            connection,
            sender,
            session: Mutex::new(None),
            next_session: AtomicU64::new(1),
            metrics,
        }
    }

    pub fn key(&self) -> &StreamKey {
        self.connection.key()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn is_session_active(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Attach an observer, starting an upstream session if none is running.
    ///
    /// Fails with [`ConnectorError::Released`] once the connection is released.
    pub fn subscribe(self: &Arc<Self>) -> Result<broadcast::Receiver<StreamEvent>, ConnectorError> {
        let mut slot = self.session.lock();
        self.attach(&mut slot)
    }

    /// Like [`subscribe`](Self::subscribe), but first replaces the running
    /// session if it has been silent for longer than `max_silence`.
    ///
    /// Observers of the replaced session get `Failed(Stale)`.
    pub fn subscribe_fresh(
        self: &Arc<Self>,
        max_silence: Duration,
    ) -> Result<broadcast::Receiver<StreamEvent>, ConnectorError> {
        let mut slot = self.session.lock();
        let stale = slot
            .as_ref()
            .map(|active| active.last_message_at.elapsed() > max_silence)
            .unwrap_or(false);

        if stale {
            if let Some(active) = slot.take() {
                warn!(symbol = %self.key(), session = active.id, "Replacing silent upstream session");
                if let Some(abort) = active.abort {
                    abort.abort();
                }
                self.metrics.inc_transport_failures();
                let _ = self.sender.send(StreamEvent::Failed(ConnectorError::Stale));
            }
        }

        self.attach(&mut slot)
    }

    fn attach(
        self: &Arc<Self>,
        slot: &mut Option<ActiveSession>,
    ) -> Result<broadcast::Receiver<StreamEvent>, ConnectorError> {
        if self.connection.is_released() {
            return Err(ConnectorError::Released);
        }

        // Receiver exists before the session can emit anything
        let receiver = self.sender.subscribe();

        if slot.is_none() {
            let id = self.next_session.fetch_add(1, Ordering::Relaxed);
            debug!(symbol = %self.key(), session = id, "Starting upstream session");
            let task = tokio::spawn(Arc::clone(self).pump(id));
            *slot = Some(ActiveSession {
                id,
                last_message_at: Instant::now(),
                abort: Some(task.abort_handle()),
            });
        }

        Ok(receiver)
    }

    async fn pump(self: Arc<Self>, id: u64) {
        let outcome = tokio::select! {
            _ = self.connection.released() => StreamEvent::Closed,
            error = self.forward(id) => StreamEvent::Failed(error),
        };

        let mut slot = self.session.lock();
        if slot.as_ref().map(|active| active.id) != Some(id) {
            return;
        }
        *slot = None;

        match &outcome {
            StreamEvent::Failed(error) => {
                self.metrics.inc_transport_failures();
                warn!(symbol = %self.key(), session = id, error = %error, "Upstream session ended");
            }
            _ => info!(symbol = %self.key(), session = id, "Upstream session closed"),
        }

        // Sent under the lock so a concurrent subscribe lands on one side of it
        let _ = self.sender.send(outcome);
    }

    async fn forward(&self, id: u64) -> ConnectorError {
        let mut messages = match self.connection.open().await {
            Ok(messages) => messages,
            Err(e) => return e,
        };

        self.metrics.inc_sessions_started();
        info!(symbol = %self.key(), session = id, "Upstream session open");

        while let Some(item) = messages.next().await {
            let snapshot = match item {
                Ok(snapshot) => snapshot,
                Err(e) => return e,
            };

            self.metrics.inc_messages_received();
            if let Some(active) = self.session.lock().as_mut().filter(|a| a.id == id) {
                active.last_message_at = Instant::now();
            }

            // No observers is fine
            let _ = self.sender.send(StreamEvent::Message(Arc::new(snapshot)));
        }

        ConnectorError::ConnectionClosed
    }
}

impl std::fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStream")
            .field("key", self.key())
            .field("observers", &self.observer_count())
            .field("session_active", &self.is_session_active())
            .finish()
    }
}

/// Key → shared stream cache on top of the registry.
pub struct StreamMultiplexer {
    registry: Arc<ConnectionRegistry>,
    streams: DashMap<StreamKey, Arc<SharedStream>>,
    capacity: usize,
    metrics: SharedMetrics,
}

impl StreamMultiplexer {
    pub fn new(registry: Arc<ConnectionRegistry>, capacity: usize, metrics: SharedMetrics) -> Self {
        Self {
            registry,
            streams: DashMap::new(),
            capacity,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The shared stream for `key`, created on first use.
    ///
    /// A cached stream whose connection was released behind our back is
    /// replaced.
    pub fn stream(&self, key: &StreamKey) -> Arc<SharedStream> {
        let mut entry = self
            .streams
            .entry(key.clone())
            .or_insert_with(|| self.build(key));

        if entry.connection().is_released() {
            debug!(symbol = %key, "Cached stream was released, rebuilding");
            *entry = self.build(key);
        }

        Arc::clone(entry.value())
    }

    fn build(&self, key: &StreamKey) -> Arc<SharedStream> {
        let connection = self.registry.acquire(key);
        debug!(symbol = %key, "Created shared stream");
        Arc::new(SharedStream::new(
            connection,
            self.capacity,
            self.metrics.clone(),
        ))
    }

    /// Forget the shared stream and release the connection. Observers get `Closed`.
    pub fn close(&self, key: &StreamKey) {
        if self.streams.remove(key).is_some() {
            debug!(symbol = %key, "Removed shared stream");
        }
        self.registry.release(key);
    }

    pub fn close_all(&self) {
        let keys: Vec<StreamKey> = self.streams.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            self.close(key);
        }
        self.registry.release_all();
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.streams.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
