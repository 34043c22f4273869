//! In-memory transport driven by the tests.

use async_trait::async_trait;
use connector_core::{ConnectorError, MessageStream, Transport};
use futures_util::StreamExt;
use model::{DepthSnapshot, PriceLevel, StreamKey};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

type SessionSender = mpsc::UnboundedSender<Result<DepthSnapshot, ConnectorError>>;

/// What the next `connect` call does.
pub enum Script {
    Refuse(ConnectorError),
    Open,
}

/// Pops one [`Script`] per connect; opens a session once the script runs out.
/// Open sessions are fed through [`push`](Self::push) and
/// [`fail_current`](Self::fail_current), which target the newest session.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    sessions: Mutex<Vec<SessionSender>>,
    connects: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        let transport = Self::default();
        transport.scripts.lock().extend(scripts);
        Arc::new(transport)
    }

    /// Refuses the first `times` connects, then opens sessions.
    pub fn refusing(times: usize) -> Arc<Self> {
        Self::with_scripts(
            (0..times).map(|_| Script::Refuse(ConnectorError::WebSocket("refused".to_string()))),
        )
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.connects.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn push(&self, snapshot: DepthSnapshot) {
        if let Some(session) = self.sessions.lock().last() {
            let _ = session.send(Ok(snapshot));
        }
    }

    pub fn fail_current(&self, error: ConnectorError) {
        if let Some(session) = self.sessions.lock().last() {
            let _ = session.send(Err(error));
        }
    }

    pub async fn wait_for_connects(&self, count: usize) {
        while self.connect_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn endpoint(&self, key: &StreamKey) -> String {
        format!("mock://{}@depth5", key.to_lowercase())
    }

    async fn connect(&self, endpoint: &str) -> Result<MessageStream, ConnectorError> {
        self.connects
            .lock()
            .push((endpoint.to_string(), Instant::now()));

        let script = self.scripts.lock().pop_front().unwrap_or(Script::Open);
        match script {
            Script::Refuse(error) => Err(error),
            Script::Open => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.sessions.lock().push(tx);
                let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                    let item = rx.recv().await?;
                    Some((item, rx))
                });
                Ok(stream.boxed())
            }
        }
    }
}

pub fn depth(last_update_id: u64) -> DepthSnapshot {
    DepthSnapshot {
        last_update_id,
        bids: vec![PriceLevel::new("100.00", "1.5")],
        asks: vec![PriceLevel::new("100.50", "2.0")],
    }
}

/// Poll with short sleeps until `condition` holds.
pub async fn settle(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
