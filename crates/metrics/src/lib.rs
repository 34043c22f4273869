use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe metrics collector for the feed hub.
#[derive(Debug)]
pub struct FeedMetrics {
    // Registry
    connections_opened: AtomicU64,
    connections_released: AtomicU64,

    // Upstream sessions
    sessions_started: AtomicU64,
    messages_received: AtomicU64,
    parse_errors: AtomicU64,
    transport_failures: AtomicU64,

    // Supervisors
    retry_attempts: AtomicU64,
    liveness_timeouts: AtomicU64,
    manual_reconnects: AtomicU64,

    inner: RwLock<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    start_time: Instant,
    last_message_time: Option<Instant>,
    last_failure_time: Option<Instant>,
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_released: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
            liveness_timeouts: AtomicU64::new(0),
            manual_reconnects: AtomicU64::new(0),
            inner: RwLock::new(MetricsInner {
                start_time: Instant::now(),
                last_message_time: None,
                last_failure_time: None,
            }),
        }
    }

    // --- Increment methods ---

    pub fn inc_connections_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connections_released(&self) {
        self.connections_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_message_time = Some(Instant::now());
    }

    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_transport_failures(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_failure_time = Some(Instant::now());
    }

    pub fn inc_retry_attempts(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_liveness_timeouts(&self) {
        self.liveness_timeouts.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_failure_time = Some(Instant::now());
    }

    pub fn inc_manual_reconnects(&self) {
        self.manual_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    // --- Getter methods ---

    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    pub fn connections_released(&self) -> u64 {
        self.connections_released.load(Ordering::Relaxed)
    }

    /// Connections currently held by the registry.
    pub fn open_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_released())
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn transport_failures(&self) -> u64 {
        self.transport_failures.load(Ordering::Relaxed)
    }

    pub fn retry_attempts(&self) -> u64 {
        self.retry_attempts.load(Ordering::Relaxed)
    }

    pub fn liveness_timeouts(&self) -> u64 {
        self.liveness_timeouts.load(Ordering::Relaxed)
    }

    pub fn manual_reconnects(&self) -> u64 {
        self.manual_reconnects.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.inner.read().start_time.elapsed().as_secs_f64()
    }

    pub fn secs_since_last_message(&self) -> Option<f64> {
        self.inner
            .read()
            .last_message_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_failure(&self) -> Option<f64> {
        self.inner
            .read()
            .last_failure_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Generate a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            open_connections: self.open_connections(),
            connections_opened: self.connections_opened(),
            sessions_started: self.sessions_started(),
            messages_received: self.messages_received(),
            parse_errors: self.parse_errors(),
            transport_failures: self.transport_failures(),
            retry_attempts: self.retry_attempts(),
            liveness_timeouts: self.liveness_timeouts(),
            manual_reconnects: self.manual_reconnects(),
            uptime_secs: self.uptime_secs(),
            secs_since_last_message: self.secs_since_last_message(),
            secs_since_last_failure: self.secs_since_last_failure(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub open_connections: u64,
    pub connections_opened: u64,
    pub sessions_started: u64,
    pub messages_received: u64,
    pub parse_errors: u64,
    pub transport_failures: u64,
    pub retry_attempts: u64,
    pub liveness_timeouts: u64,
    pub manual_reconnects: u64,
    pub uptime_secs: f64,
    pub secs_since_last_message: Option<f64>,
    pub secs_since_last_failure: Option<f64>,
}

/// Health status of the hub as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Idle (no connections) or receiving data.
    Healthy,
    /// Connections exist but data is going stale.
    Degraded,
    /// Connections exist and nothing has arrived for a long time.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

impl MetricsSnapshot {
    /// Seconds without any message before the hub counts as degraded.
    const STALE_THRESHOLD_SECS: f64 = 10.0;
    /// Seconds without any message before the hub counts as unhealthy.
    const UNHEALTHY_THRESHOLD_SECS: f64 = 30.0;

    /// Determine the health status based on metrics.
    pub fn health_status(&self) -> HealthStatus {
        if self.open_connections == 0 {
            return HealthStatus::Healthy;
        }

        // Never received anything: judge by how long we've been up
        let silent_for = self.secs_since_last_message.unwrap_or(self.uptime_secs);

        if silent_for > Self::UNHEALTHY_THRESHOLD_SECS {
            HealthStatus::Unhealthy
        } else if silent_for > Self::STALE_THRESHOLD_SECS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Feed Metrics ===")?;
        writeln!(f, "Uptime:              {:.1}s", self.uptime_secs)?;
        writeln!(f, "Open connections:    {}", self.open_connections)?;
        writeln!(f, "Connections opened:  {}", self.connections_opened)?;
        writeln!(f, "Sessions started:    {}", self.sessions_started)?;
        writeln!(f, "Messages received:   {}", self.messages_received)?;
        writeln!(f, "Parse errors:        {}", self.parse_errors)?;
        writeln!(f, "Transport failures:  {}", self.transport_failures)?;
        writeln!(f, "Retry attempts:      {}", self.retry_attempts)?;
        writeln!(f, "Liveness timeouts:   {}", self.liveness_timeouts)?;
        writeln!(f, "Manual reconnects:   {}", self.manual_reconnects)?;
        if let Some(secs) = self.secs_since_last_message {
            writeln!(f, "Since last message:  {:.1}s", secs)?;
        }
        if let Some(secs) = self.secs_since_last_failure {
            writeln!(f, "Since last failure:  {:.1}s", secs)?;
        }
        Ok(())
    }
}

/// Shared handle to metrics.
pub type SharedMetrics = Arc<FeedMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(FeedMetrics::new())
}
