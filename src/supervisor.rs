use crate::config::ReconnectConfig;
use crate::error::Error;
use crate::ipc::OrchestratorLink;
use crate::message::OutboundMessage;
use crate::metrics::Metrics;
use crate::session::{SessionFactory, SessionHandle};
use crate::shard::ShardTag;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Classification of a failed login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReport {
    /// Below the maximum, retrying after the backoff
    Retrying { attempt: u32, backoff: Duration },
    /// The maximum was just reached and the escalation went out
    Escalated { attempt: u32, max_attempts: u32 },
    /// Past the maximum; already escalated, still retrying
    Exhausted { attempt: u32, max_attempts: u32 },
}

impl FailureReport {
    pub fn attempt(&self) -> u32 {
        match *self {
            FailureReport::Retrying { attempt, .. }
            | FailureReport::Escalated { attempt, .. }
            | FailureReport::Exhausted { attempt, .. } => attempt,
        }
    }
}

/// Drives one session to readiness, retrying forever with a fixed delay.
///
/// The retry counter lives as long as the supervisor (the process). Reaching
/// `max_attempts` escalates once to the orchestrator but does not stop the
/// loop; only a successful login resets the counter and re-arms escalation.
pub struct ReconnectSupervisor<F: SessionFactory> {
    factory: Arc<F>,
    config: ReconnectConfig,
    backoff: Duration,
    retry_counter: u32,
    escalated: bool,
    link: OrchestratorLink,
    metrics: Arc<Metrics>,
    tag: ShardTag,
}

impl<F: SessionFactory> ReconnectSupervisor<F> {
    pub fn new(
        factory: Arc<F>,
        config: ReconnectConfig,
        link: OrchestratorLink,
        metrics: Arc<Metrics>,
        tag: ShardTag,
    ) -> Self {
        let backoff = config.backoff();
        Self {
            factory,
            config,
            backoff,
            retry_counter: 0,
            escalated: false,
            link,
            metrics,
            tag,
        }
    }

    /// Fixed delay between attempts, computed once
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Failed attempts since the last successful login
    pub fn retry_counter(&self) -> u32 {
        self.retry_counter
    }

    /// Log in, retrying until a session is ready.
    ///
    /// Uses `handle` for the first attempt when given; every retry gets a
    /// fresh session from the factory and the failed one is dropped.
    pub async fn establish(
        &mut self,
        handle: Option<SessionHandle<F::Session>>,
    ) -> SessionHandle<F::Session> {
        let mut handle = match handle {
            Some(handle) => handle,
            None => self.fresh_handle(),
        };

        loop {
            self.metrics.record_connect_attempt();
            debug!("{}Login attempt (retry counter {})", self.tag, self.retry_counter);

            match self.attempt(&mut handle).await {
                Ok(()) => {
                    self.record_success();
                    match handle.identity() {
                        Some(identity) => info!(
                            "{}Logged in as \"{}\" (ID {})",
                            self.tag, identity.username, identity.user_id
                        ),
                        None => info!("{}Logged in", self.tag),
                    }
                    return handle;
                }
                Err(e) => {
                    let report = self.record_failure();
                    self.log_failure(&e, report);
                    tokio::time::sleep(self.backoff).await;
                    handle = self.fresh_handle();
                }
            }
        }
    }

    async fn attempt(&self, handle: &mut SessionHandle<F::Session>) -> Result<(), Error> {
        match timeout(self.config.connect_timeout, handle.connect()).await {
            Ok(result) => result,
            Err(_) => {
                handle.mark_failed();
                Err(Error::ConnectTimeout(self.config.connect_timeout))
            }
        }
    }

    fn fresh_handle(&self) -> SessionHandle<F::Session> {
        SessionHandle::new(self.factory.create(), self.retry_counter + 1)
    }

    /// Count a failed attempt and escalate if it reaches the maximum
    pub(crate) fn record_failure(&mut self) -> FailureReport {
        self.retry_counter = self.retry_counter.saturating_add(1);
        self.metrics.record_connect_failure(self.retry_counter);

        let attempt = self.retry_counter;
        let max_attempts = self.config.max_attempts;
        if attempt < max_attempts {
            return FailureReport::Retrying {
                attempt,
                backoff: self.backoff,
            };
        }
        if self.escalated {
            return FailureReport::Exhausted {
                attempt,
                max_attempts,
            };
        }

        self.escalated = true;
        self.metrics.record_escalation();
        if let Err(e) = self.link.send(OutboundMessage::Kill) {
            self.metrics.record_outbound_failure();
            warn!("{}Failed to send kill request: {}", self.tag, e);
        }
        FailureReport::Escalated {
            attempt,
            max_attempts,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.retry_counter = 0;
        self.escalated = false;
        self.metrics.record_session_ready();
    }

    fn log_failure(&self, e: &Error, report: FailureReport) {
        let minutes = self.backoff.as_secs_f64() / 60.0;
        match report {
            FailureReport::Retrying { attempt, .. } => warn!(
                "{}Failed to login ({}) on attempt #{}, retrying in {:.2} minutes...",
                self.tag, e, attempt, minutes
            ),
            FailureReport::Escalated {
                attempt,
                max_attempts,
            } => {
                error!(
                    "{}Failed to login after {} attempts. Terminating.",
                    self.tag, max_attempts
                );
                error!(
                    "{}Failed to login ({}) on attempt #{}, retrying in {:.2} minutes...",
                    self.tag, e, attempt, minutes
                );
            }
            FailureReport::Exhausted {
                attempt,
                max_attempts,
            } => error!(
                "{}Failed to login ({}) on attempt #{} (max {} reached), retrying in {:.2} minutes...",
                self.tag, e, attempt, max_attempts, minutes
            ),
        }
    }
}
