//! Per-consumer feed supervision.
//!
//! [`supervise`] spawns one task per consumer. The task attaches to the
//! key's shared stream and publishes a [`FeedState`] through a watch channel:
//!
//! - transport failures are retried after a fixed delay, up to the policy's
//!   limit, then the feed enters `Error`;
//! - a liveness probe declares the feed `Error` when no message arrives for
//!   longer than the silence threshold. This never consumes retries;
//! - `Error` is only left through [`FeedHandle::reconnect`];
//! - [`FeedHandle::dispose`] is final. Nothing the task does afterwards is
//!   visible.

use common::FixedBackoff;
use connector_core::ConnectorError;
use metrics::SharedMetrics;
use model::{DepthSnapshot, StreamKey};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::multiplexer::{StreamEvent, StreamMultiplexer};
use crate::registry::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Connecting,
    Live,
    Error,
    Closed,
}

impl fmt::Display for FeedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedPhase::Connecting => write!(f, "CONNECTING"),
            FeedPhase::Live => write!(f, "LIVE"),
            FeedPhase::Error => write!(f, "ERROR"),
            FeedPhase::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a feed is not live.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedFailure {
    /// Transient: a retry is scheduled.
    #[error("transport failed, retrying: {0}")]
    Transport(ConnectorError),

    #[error("gave up after {attempts} retries: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: ConnectorError,
    },

    #[error("no data for {}ms", silence.as_millis())]
    Silent { silence: Duration },

    #[error("connection released")]
    Released,
}

impl FeedFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedFailure::Transport(_))
    }
}

/// Observable state of one supervised feed.
#[derive(Debug, Clone)]
pub struct FeedState {
    pub key: StreamKey,
    pub phase: FeedPhase,
    /// Latest snapshot. Kept across failures.
    pub data: Option<Arc<DepthSnapshot>>,
    /// Retries consumed since the feed was last live.
    pub retry_attempt: u32,
    pub last_message_at: Option<Instant>,
    pub liveness_armed: bool,
    pub failure: Option<FeedFailure>,
}

impl FeedState {
    fn new(key: StreamKey) -> Self {
        Self {
            key,
            phase: FeedPhase::Connecting,
            data: None,
            retry_attempt: 0,
            last_message_at: None,
            liveness_armed: false,
            failure: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase == FeedPhase::Live
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorPolicy {
    pub backoff: FixedBackoff,
    pub silence_threshold: Duration,
    pub probe_interval: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            backoff: FixedBackoff::default(),
            silence_threshold: Duration::from_secs(10),
            probe_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
}

/// How one attachment to the shared stream ended.
enum Outcome {
    Reconnect,
    Disposed,
    Failed(ConnectorError),
    Silent(Duration),
    Released,
}

/// What the task does next.
enum Next {
    Subscribe,
    Reconnect,
    Stop,
}

struct Supervisor {
    key: StreamKey,
    multiplexer: Arc<StreamMultiplexer>,
    /// Connection of the latest attachment.
    connection: Option<Arc<Connection>>,
    backoff: FixedBackoff,
    silence_threshold: Duration,
    probe_interval: Duration,
    state: Arc<watch::Sender<FeedState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    metrics: SharedMetrics,
}

impl Supervisor {
    async fn run(mut self) {
        let mut next = Next::Subscribe;
        loop {
            let outcome = match next {
                Next::Subscribe => self.attempt(false).await,
                Next::Reconnect => self.attempt(true).await,
                Next::Stop => return,
            };

            next = match outcome {
                Outcome::Reconnect => Next::Reconnect,
                Outcome::Disposed => Next::Stop,
                Outcome::Released | Outcome::Failed(ConnectorError::Released) => {
                    self.on_released().await
                }
                Outcome::Failed(e) => self.schedule_retry(e).await,
                Outcome::Silent(silence) => {
                    self.metrics.inc_liveness_timeouts();
                    warn!(
                        symbol = %self.key,
                        silence_ms = silence.as_millis() as u64,
                        "Feed went silent"
                    );
                    self.enter_error(FeedFailure::Silent { silence });
                    self.await_command().await
                }
            };
        }
    }

    /// Attach to the shared stream and follow it until something ends the attachment.
    async fn attempt(&mut self, fresh: bool) -> Outcome {
        let shared = self.multiplexer.stream(&self.key);
        self.connection = Some(Arc::clone(shared.connection()));
        let subscribed = if fresh {
            shared.subscribe_fresh(self.silence_threshold)
        } else {
            shared.subscribe()
        };
        let mut events = match subscribed {
            Ok(events) => events,
            Err(_) => return Outcome::Released,
        };

        let armed = self.update(|state| {
            // A reconnect request may have raced with a transition to Error
            if state.phase == FeedPhase::Error {
                state.phase = FeedPhase::Connecting;
                state.failure = None;
            }
            state.liveness_armed = true;
        });
        if !armed {
            return Outcome::Disposed;
        }
        let mut last_activity = Instant::now();
        let mut probe =
            tokio::time::interval_at(last_activity + self.probe_interval, self.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    return match self.on_command(command) {
                        Next::Stop => Outcome::Disposed,
                        _ => Outcome::Reconnect,
                    };
                }

                event = events.recv() => match event {
                    Ok(StreamEvent::Message(snapshot)) => {
                        let now = Instant::now();
                        last_activity = now;
                        let was_live = self.state.borrow().is_live();
                        let published = self.update(|state| {
                            state.phase = FeedPhase::Live;
                            state.data = Some(snapshot);
                            state.last_message_at = Some(now);
                            state.retry_attempt = 0;
                            state.failure = None;
                        });
                        if !published {
                            return Outcome::Disposed;
                        }
                        self.backoff.reset();
                        if !was_live {
                            info!(symbol = %self.key, "Feed live");
                        }
                    }
                    Ok(StreamEvent::Failed(e)) => return Outcome::Failed(e),
                    Ok(StreamEvent::Closed) | Err(RecvError::Closed) => return Outcome::Released,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(symbol = %self.key, skipped, "Feed consumer lagged, skipping ahead");
                    }
                },

                _ = probe.tick() => {
                    let silence = last_activity.elapsed();
                    if silence > self.silence_threshold {
                        return Outcome::Silent(silence);
                    }
                }
            }
        }
    }

    async fn schedule_retry(&mut self, cause: ConnectorError) -> Next {
        let delay = match self.backoff.next_delay() {
            Some(delay) => delay,
            None => {
                let attempts = self.backoff.attempt();
                error!(symbol = %self.key, attempts, error = %cause, "Feed failed, retries exhausted");
                self.enter_error(FeedFailure::RetriesExhausted {
                    attempts,
                    last_error: cause,
                });
                return self.await_command().await;
            }
        };

        let attempt = self.backoff.attempt();
        self.metrics.inc_retry_attempts();
        warn!(
            symbol = %self.key,
            attempt,
            max_attempts = self.backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "Feed transport failed, retrying"
        );

        let published = self.update(|state| {
            state.phase = FeedPhase::Connecting;
            state.retry_attempt = attempt;
            state.liveness_armed = false;
            state.failure = Some(FeedFailure::Transport(cause));
        });
        if !published {
            return Next::Stop;
        }

        // A release during the wait is final
        let connection = self.connection.clone();
        let released = async move {
            match connection {
                Some(connection) => connection.released().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            command = self.commands.recv() => self.on_command(command),
            _ = released => self.on_released().await,
            _ = tokio::time::sleep(delay) => Next::Subscribe,
        }
    }

    async fn on_released(&mut self) -> Next {
        warn!(symbol = %self.key, "Feed connection released");
        self.enter_error(FeedFailure::Released);
        self.await_command().await
    }

    async fn await_command(&mut self) -> Next {
        let command = self.commands.recv().await;
        self.on_command(command)
    }

    fn on_command(&mut self, command: Option<Command>) -> Next {
        match command {
            Some(Command::Reconnect) => {
                debug!(symbol = %self.key, "Reconnect requested");
                self.backoff.reset();
                Next::Reconnect
            }
            None => Next::Stop,
        }
    }

    fn enter_error(&self, failure: FeedFailure) {
        self.update(|state| {
            state.phase = FeedPhase::Error;
            state.liveness_armed = false;
            state.failure = Some(failure);
        });
    }

    /// Apply `modify` unless the feed is closed. Returns false once closed.
    fn update(&self, modify: impl FnOnce(&mut FeedState)) -> bool {
        self.state.send_if_modified(|state| {
            if state.phase == FeedPhase::Closed {
                return false;
            }
            modify(state);
            true
        })
    }
}

/// Start supervising `key` for one consumer.
pub fn supervise(
    key: StreamKey,
    multiplexer: Arc<StreamMultiplexer>,
    policy: SupervisorPolicy,
    metrics: SharedMetrics,
) -> FeedHandle {
    let (state_tx, updates) = watch::channel(FeedState::new(key.clone()));
    let state = Arc::new(state_tx);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let supervisor = Supervisor {
        key: key.clone(),
        multiplexer,
        connection: None,
        backoff: policy.backoff,
        silence_threshold: policy.silence_threshold,
        probe_interval: policy.probe_interval,
        state: Arc::clone(&state),
        commands: commands_rx,
        metrics: metrics.clone(),
    };

    debug!(symbol = %key, "Starting feed supervisor");
    let task = tokio::spawn(supervisor.run());

    FeedHandle {
        key,
        state,
        updates,
        commands: commands_tx,
        task: Some(task),
        metrics,
    }
}

/// Consumer side of a supervised feed. Dropping it disposes the feed.
pub struct FeedHandle {
    key: StreamKey,
    state: Arc<watch::Sender<FeedState>>,
    updates: watch::Receiver<FeedState>,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
    metrics: SharedMetrics,
}

impl FeedHandle {
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> FeedPhase {
        self.state.borrow().phase
    }

    pub fn data(&self) -> Option<Arc<DepthSnapshot>> {
        self.state.borrow().data.clone()
    }

    pub fn retry_attempt(&self) -> u32 {
        self.state.borrow().retry_attempt
    }

    pub fn failure(&self) -> Option<FeedFailure> {
        self.state.borrow().failure.clone()
    }

    pub fn is_liveness_armed(&self) -> bool {
        self.state.borrow().liveness_armed
    }

    /// A fresh receiver for state changes.
    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Wait for the next state change. Never resolves after disposal.
    pub async fn changed(&mut self) -> FeedState {
        if self.updates.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        self.updates.borrow_and_update().clone()
    }

    /// Wait until `predicate` holds for the current state.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&FeedState) -> bool) -> FeedState {
        match self.updates.wait_for(predicate).await {
            Ok(state) => state.clone(),
            Err(_) => self.state.borrow().clone(),
        }
    }

    /// Restart the feed from zero retries.
    ///
    /// The state switches to `Connecting` before this returns. Ignored once
    /// the feed is closed; returns whether the request was accepted.
    pub fn reconnect(&self) -> bool {
        let accepted = self.state.send_if_modified(|state| {
            if state.phase == FeedPhase::Closed {
                return false;
            }
            state.phase = FeedPhase::Connecting;
            state.retry_attempt = 0;
            state.liveness_armed = false;
            state.failure = None;
            true
        });

        if accepted {
            self.metrics.inc_manual_reconnects();
            info!(symbol = %self.key, "Manual reconnect");
            let _ = self.commands.send(Command::Reconnect);
        }
        accepted
    }

    /// Stop supervising. Final and idempotent; the shared connection stays up.
    ///
    /// The state reads `Closed` as soon as this returns. The task's stream
    /// subscription is dropped once the runtime reaps the aborted task, so
    /// [`SharedStream::observer_count`](crate::SharedStream::observer_count)
    /// may lag by one scheduler turn.
    pub fn dispose(&mut self) {
        let closed = self.state.send_if_modified(|state| {
            if state.phase == FeedPhase::Closed {
                return false;
            }
            state.phase = FeedPhase::Closed;
            state.liveness_armed = false;
            true
        });

        if let Some(task) = self.task.take() {
            task.abort();
        }
        if closed {
            debug!(symbol = %self.key, "Feed disposed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == FeedPhase::Closed
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedHandle")
            .field("key", &self.key)
            .field("phase", &self.phase())
            .finish()
    }
}
