use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Metrics for observability
///
/// Counters and gauges for login health and coordination traffic. Use
/// `snapshot()` to get a point-in-time view of all metrics, or the individual
/// getters for specific values.
///
/// # Example
/// ```ignore
/// let metrics = runtime.metrics();
///
/// println!("Login failures: {}", metrics.connect_failures());
/// println!("Stale messages dropped: {}", metrics.messages_dropped());
///
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    connect_attempts_total: AtomicU64,
    connect_failures_total: AtomicU64,
    escalations_total: AtomicU64,
    sessions_ready_total: AtomicU64,
    session_drops_total: AtomicU64,
    messages_dispatched_total: AtomicU64,
    messages_dropped_total: AtomicU64,
    schedule_runs_total: AtomicU64,
    terminal_actions_total: AtomicU64,
    outbound_failures_total: AtomicU64,

    /// Consecutive failed logins since the last success
    retry_counter: AtomicU32,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts_total.load(Ordering::Relaxed)
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures_total.load(Ordering::Relaxed)
    }

    /// Times the supervisor reported attempts exhausted
    pub fn escalations(&self) -> u64 {
        self.escalations_total.load(Ordering::Relaxed)
    }

    pub fn sessions_ready(&self) -> u64 {
        self.sessions_ready_total.load(Ordering::Relaxed)
    }

    /// Ready sessions that later closed
    pub fn session_drops(&self) -> u64 {
        self.session_drops_total.load(Ordering::Relaxed)
    }

    pub fn messages_dispatched(&self) -> u64 {
        self.messages_dispatched_total.load(Ordering::Relaxed)
    }

    /// Coordination messages ignored as stale or not addressed to this shard
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_total.load(Ordering::Relaxed)
    }

    pub fn schedule_runs(&self) -> u64 {
        self.schedule_runs_total.load(Ordering::Relaxed)
    }

    pub fn terminal_actions(&self) -> u64 {
        self.terminal_actions_total.load(Ordering::Relaxed)
    }

    pub fn outbound_failures(&self) -> u64 {
        self.outbound_failures_total.load(Ordering::Relaxed)
    }

    pub fn retry_counter(&self) -> u32 {
        self.retry_counter.load(Ordering::Relaxed)
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_failure(&self, retry_counter: u32) {
        self.connect_failures_total.fetch_add(1, Ordering::Relaxed);
        self.retry_counter.store(retry_counter, Ordering::Relaxed);
    }

    pub(crate) fn record_escalation(&self) {
        self.escalations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_ready(&self) {
        self.sessions_ready_total.fetch_add(1, Ordering::Relaxed);
        self.retry_counter.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_session_drop(&self) {
        self.session_drops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_dispatched(&self) {
        self.messages_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_dropped(&self) {
        self.messages_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_schedule_run(&self) {
        self.schedule_runs_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_terminal_action(&self) {
        self.terminal_actions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outbound_failure(&self) {
        self.outbound_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts_total: self.connect_attempts_total.load(Ordering::Acquire),
            connect_failures_total: self.connect_failures_total.load(Ordering::Acquire),
            escalations_total: self.escalations_total.load(Ordering::Acquire),
            sessions_ready_total: self.sessions_ready_total.load(Ordering::Acquire),
            session_drops_total: self.session_drops_total.load(Ordering::Acquire),
            messages_dispatched_total: self.messages_dispatched_total.load(Ordering::Acquire),
            messages_dropped_total: self.messages_dropped_total.load(Ordering::Acquire),
            schedule_runs_total: self.schedule_runs_total.load(Ordering::Acquire),
            terminal_actions_total: self.terminal_actions_total.load(Ordering::Acquire),
            outbound_failures_total: self.outbound_failures_total.load(Ordering::Acquire),
            retry_counter: self.retry_counter.load(Ordering::Acquire),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connect_attempts_total: u64,
    pub connect_failures_total: u64,
    pub escalations_total: u64,
    pub sessions_ready_total: u64,
    pub session_drops_total: u64,
    pub messages_dispatched_total: u64,
    pub messages_dropped_total: u64,
    pub schedule_runs_total: u64,
    pub terminal_actions_total: u64,
    pub outbound_failures_total: u64,
    pub retry_counter: u32,
}
