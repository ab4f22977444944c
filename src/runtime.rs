use crate::config::ShardRuntimeConfig;
use crate::error::Error;
use crate::fault::FaultGuard;
use crate::handler::ShardHandler;
use crate::ipc::OrchestratorLink;
use crate::message::{CoordinationMessage, OutboundMessage};
use crate::metrics::Metrics;
use crate::router::{CoordinationRouter, RouterAction};
use crate::session::{Session, SessionFactory, SessionHandle};
use crate::shard::ShardTag;
use crate::state::{ReplicatedState, StateView};
use crate::supervisor::ReconnectSupervisor;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Supervisor task in flight; hands the supervisor back with the ready session
type Establishing<F> = JoinHandle<(
    ReconnectSupervisor<F>,
    SessionHandle<<F as SessionFactory>::Session>,
)>;

/// How a runtime stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// The orchestrator broadcast a terminate instruction
    Shutdown,
    /// The inbound coordination channel closed
    Closed,
    /// An unhandled fault; the fleet has been told to stop
    Fault(String),
}

impl Exit {
    pub fn is_fault(&self) -> bool {
        matches!(self, Exit::Fault(_))
    }
}

/// Entry orchestration for one shard process.
///
/// Wires the session factory, reconnect supervisor and coordination router
/// together and runs them on a single logical thread of control: inbound
/// messages, session readiness and session loss are all handled by one
/// `select!` loop, so replicated state is never touched concurrently.
///
/// # Example
///
/// ```ignore
/// let config = ShardRuntimeConfig::builder()
///     .shard(ShardInfo::from_env()?)
///     .build()?;
/// let (inbound, link, reader, _writer) = ipc::stdio(config.inbound_buffer, config.shard.into());
///
/// let runtime = ShardRuntime::new(config, GatewayFactory::new(token), FeedHandler::new(), inbound, link);
/// runtime.fault_guard().install_panic_hook();
/// let exit = runtime.run_guarded_with_transport(reader).await;
/// std::process::exit(if exit.is_fault() { 1 } else { 0 });
/// ```
pub struct ShardRuntime<F, H>
where
    F: SessionFactory,
    H: ShardHandler<Session = F::Session>,
{
    config: ShardRuntimeConfig,
    handler: Arc<H>,
    router: CoordinationRouter<H>,
    /// `None` while its task is running
    supervisor: Option<ReconnectSupervisor<F>>,
    inbound: mpsc::Receiver<CoordinationMessage>,
    link: OrchestratorLink,
    fault: FaultGuard,
    metrics: Arc<Metrics>,
    state: StateView,
    tag: ShardTag,
    initialized: bool,
}

impl<F, H> ShardRuntime<F, H>
where
    F: SessionFactory,
    H: ShardHandler<Session = F::Session>,
{
    /// Create a runtime.
    ///
    /// Outbound messages go through `link` only when `config.shard` is set;
    /// a standalone process keeps everything local.
    pub fn new(
        config: ShardRuntimeConfig,
        factory: F,
        handler: H,
        inbound: mpsc::Receiver<CoordinationMessage>,
        link: OrchestratorLink,
    ) -> Self {
        let link = if config.is_orchestrated() {
            link
        } else {
            OrchestratorLink::detached()
        };
        let shard_id = config.shard.map(|s| s.id);
        let tag = ShardTag(shard_id);
        let metrics = Arc::new(Metrics::new());
        let handler = Arc::new(handler);
        let (writer, state) = ReplicatedState::shared();

        let router = CoordinationRouter::new(
            writer,
            handler.clone(),
            link.clone(),
            metrics.clone(),
            shard_id,
        );
        let supervisor = ReconnectSupervisor::new(
            Arc::new(factory),
            config.reconnect.clone(),
            link.clone(),
            metrics.clone(),
            tag,
        );

        Self {
            config,
            handler,
            router,
            supervisor: Some(supervisor),
            inbound,
            fault: FaultGuard::new(tag, link.clone()),
            link,
            metrics,
            state,
            tag,
            initialized: false,
        }
    }

    /// Get the metrics for this runtime
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Read-only view of the replicated state
    pub fn state(&self) -> StateView {
        self.state.clone()
    }

    /// Fault reporting for this shard. Install its panic hook to cover tasks
    /// and threads outside the runtime loop.
    pub fn fault_guard(&self) -> FaultGuard {
        self.fault.clone()
    }

    /// Run until terminated, turning any escaping error or panic into a
    /// fleet-wide stop.
    ///
    /// On a fault this reports through the [`FaultGuard`], flushes the link,
    /// and returns [`Exit::Fault`]. The caller is expected to exit the process.
    pub async fn run_guarded(self) -> Exit {
        let fault = self.fault.clone();

        let detail = match AssertUnwindSafe(self.run()).catch_unwind().await {
            Ok(Ok(exit)) => return exit,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        fault.report(&detail);
        fault.flush().await;
        Exit::Fault(detail)
    }

    /// [`run_guarded`](Self::run_guarded), also watching the task that feeds
    /// the inbound channel.
    ///
    /// A transport that ends cleanly only closes the inbound channel. One that
    /// fails or panics is a fault.
    pub async fn run_guarded_with_transport(self, transport: JoinHandle<Result<(), Error>>) -> Exit {
        let fault = self.fault.clone();
        let run = self.run_guarded();
        tokio::pin!(run);
        let mut transport = Some(transport);

        let detail = loop {
            tokio::select! {
                exit = &mut run => {
                    // inbound closes before the transport task has reported why
                    if exit != Exit::Closed {
                        return exit;
                    }
                    match transport.take() {
                        Some(handle) => match transport_failure(handle.await) {
                            Some(detail) => break detail,
                            None => return exit,
                        },
                        None => return exit,
                    }
                }

                joined = join_task(&mut transport) => {
                    transport = None;
                    if let Some(detail) = transport_failure(joined) {
                        break detail;
                    }
                }
            }
        };

        fault.report(&detail);
        fault.flush().await;
        Exit::Fault(detail)
    }

    /// Run the shard until the orchestrator terminates it or, for a fleet
    /// member, the inbound channel closes. A standalone or sole-member shard
    /// keeps running without inbound messages.
    ///
    /// Errors returned here are unhandled faults; connection failures never
    /// surface, the supervisor retries them forever.
    pub async fn run(mut self) -> Result<Exit, Error> {
        let mut establishing: Option<Establishing<F>> = None;
        let mut session: Option<SessionHandle<F::Session>> = None;
        let mut inbound_open = true;

        if self.config.waits_for_start_signal() {
            info!("{}Waiting for start signal from orchestrator", self.tag);
        } else {
            establishing = self.spawn_establish();
        }

        loop {
            tokio::select! {
                joined = join_task(&mut establishing) => {
                    establishing = None;
                    let (supervisor, handle) = joined.map_err(unwind_join_error)?;
                    self.supervisor = Some(supervisor);
                    self.on_ready(&handle).await?;
                    session = Some(handle);
                }

                reason = wait_closed(&mut session) => {
                    warn!("{}Session closed ({}), logging in again", self.tag, reason);
                    self.metrics.record_session_drop();
                    self.router.set_scheduler_armed(false);
                    session = None;
                    establishing = self.spawn_establish();
                }

                message = self.inbound.recv(), if inbound_open => {
                    let Some(message) = message else {
                        if !self.config.waits_for_start_signal() {
                            info!("{}Orchestrator channel closed, continuing without it", self.tag);
                            inbound_open = false;
                            continue;
                        }
                        info!("{}Orchestrator channel closed, stopping", self.tag);
                        abort(establishing.take());
                        return Ok(Exit::Closed);
                    };

                    let current = session.as_ref().map(|h| h.session());
                    match self.router.dispatch(message, current).await {
                        RouterAction::None => {}
                        RouterAction::EstablishSession => {
                            if establishing.is_some() {
                                debug!("{}Start signal while already logging in, ignoring", self.tag);
                            } else {
                                if session.take().is_some() {
                                    info!("{}Start signal received again, restarting session", self.tag);
                                    self.router.set_scheduler_armed(false);
                                }
                                establishing = self.spawn_establish();
                            }
                        }
                        RouterAction::Shutdown => {
                            abort(establishing.take());
                            info!("{}Stopping on orchestrator instruction", self.tag);
                            return Ok(Exit::Shutdown);
                        }
                    }
                }
            }
        }
    }

    fn spawn_establish(&mut self) -> Option<Establishing<F>> {
        let Some(mut supervisor) = self.supervisor.take() else {
            warn!("{}Login already in progress", self.tag);
            return None;
        };
        info!(
            "{}Logging in (retry delay {:.2} minutes)",
            self.tag,
            supervisor.backoff().as_secs_f64() / 60.0
        );
        Some(tokio::spawn(async move {
            let handle = supervisor.establish(None).await;
            (supervisor, handle)
        }))
    }

    /// First readiness runs one-time initialization; every later one only
    /// re-arms the scheduler against the new session.
    async fn on_ready(&mut self, handle: &SessionHandle<F::Session>) -> Result<(), Error> {
        let session = handle.session();
        session
            .set_activity(self.config.default_activity.as_deref())
            .await;

        if self.initialized {
            self.handler.arm_scheduler(session).await;
            self.router.set_scheduler_armed(true);
            info!("{}Session restored, scheduler re-armed", self.tag);
            return Ok(());
        }

        if self.config.enable_commands {
            self.handler.enable_commands(session).await;
        }

        let snapshot = self.handler.initialize(session, &self.state).await?;
        self.router.apply_snapshot(&snapshot);
        self.initialized = true;

        if self.config.is_orchestrated() {
            let links = self.state.read().link_registry().as_slice().to_vec();
            self.notify(OutboundMessage::InitComplete {
                entities: snapshot.entities,
            });
            self.notify(OutboundMessage::MergeLinkRegistry { links });
        }

        self.handler.arm_scheduler(session).await;
        self.router.set_scheduler_armed(true);
        self.handler.start_managers(session).await;

        let state = self.state.read();
        info!(
            "{}Initialization complete ({} entities, {} links)",
            self.tag,
            state.entity_count(),
            state.link_registry().len()
        );
        Ok(())
    }

    fn notify(&self, message: OutboundMessage) {
        if let Err(e) = self.link.send(message) {
            self.metrics.record_outbound_failure();
            warn!("{}Failed to notify orchestrator: {}", self.tag, e);
        }
    }
}

async fn join_task<T>(handle: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn wait_closed<S: Session>(session: &mut Option<SessionHandle<S>>) -> Error {
    match session {
        Some(handle) => handle.closed().await,
        None => std::future::pending().await,
    }
}

/// Why a transport task failed, or `None` if it ended cleanly
fn transport_failure(joined: Result<Result<(), Error>, JoinError>) -> Option<String> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("Transport failed: {}", e)),
        Err(e) => Some(format!("Transport task failed: {}", e)),
    }
}

fn abort<T>(handle: Option<JoinHandle<T>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

/// Re-raise a panic from the supervisor task so the guard sees it
fn unwind_join_error(e: JoinError) -> Error {
    match e.try_into_panic() {
        Ok(panic) => std::panic::resume_unwind(panic),
        Err(_) => Error::ShuttingDown,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::OutboundReceiver;
    use crate::message::EntityRecord;
    use crate::shard::ShardInfo;
    use crate::testing::{FakeFactory, FakeHandler};
    use std::time::Duration;
    use tokio::time::sleep;

    struct Harness {
        runtime: ShardRuntime<Arc<FakeFactory>, Arc<FakeHandler>>,
        tx: mpsc::Sender<CoordinationMessage>,
        outbound: OutboundReceiver,
        factory: Arc<FakeFactory>,
        handler: Arc<FakeHandler>,
    }

    fn harness(shard: Option<ShardInfo>, factory: FakeFactory, handler: FakeHandler) -> Harness {
        let config = ShardRuntimeConfig::builder()
            .refresh_interval(Duration::from_secs(20))
            .default_activity(Some("feeds".to_string()))
            .shard(shard)
            .build()
            .expect("valid config");
        let (tx, rx) = mpsc::channel(16);
        let (link, outbound) = OrchestratorLink::channel();
        let factory = Arc::new(factory);
        let handler = Arc::new(handler);
        Harness {
            runtime: ShardRuntime::new(config, factory.clone(), handler.clone(), rx, link),
            tx,
            outbound,
            factory,
            handler,
        }
    }

    async fn settle() {
        sleep(Duration::from_secs(1)).await;
    }

    fn run_schedule(shard_id: u32, ms: u64) -> CoordinationMessage {
        CoordinationMessage::RunSchedule {
            shard_id,
            refresh_interval: Duration::from_millis(ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_logs_in_without_start_signal() {
        let mut h = harness(None, FakeFactory::default(), FakeHandler::with_snapshot(&["g1"], &["a"]));
        let metrics = h.runtime.metrics();
        let state = h.runtime.state();
        let platform = h.factory.platform.clone();
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            assert_eq!(metrics.sessions_ready(), 1);
            assert!(state.has_entity("g1"));
            assert_eq!(*platform.activities.lock(), vec![Some("feeds".to_string())]);
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert_eq!(
            h.handler.calls(),
            vec!["enable_commands", "initialize", "arm_scheduler", "start_managers"]
        );
        // standalone processes never talk to an orchestrator
        assert!(h.outbound.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sole_member_reports_init_snapshot() {
        let handler = FakeHandler::with_snapshot(&["g1", "g2"], &["a", "b"]);
        let mut h = harness(Some(ShardInfo::new(0, 1)), FakeFactory::default(), handler);
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert_eq!(
            h.outbound.drain(),
            vec![
                OutboundMessage::InitComplete {
                    entities: vec![EntityRecord::new("g1"), EntityRecord::new("g2")],
                },
                OutboundMessage::MergeLinkRegistry {
                    links: vec!["a".to_string(), "b".to_string()],
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fleet_member_waits_for_own_start_init() {
        let h = harness(Some(ShardInfo::new(1, 3)), FakeFactory::default(), FakeHandler::default());
        let factory = h.factory.clone();
        let handler = h.handler.clone();
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            assert_eq!(factory.created(), 0);

            tx.send(CoordinationMessage::StartInit { shard_id: 0 }).await.unwrap();
            settle().await;
            assert_eq!(factory.created(), 0);

            tx.send(CoordinationMessage::StartInit { shard_id: 1 }).await.unwrap();
            settle().await;
            assert_eq!(factory.created(), 1);
            assert_eq!(handler.count("initialize"), 1);

            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);
        assert_eq!(exit.unwrap(), Exit::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_schedule_before_start_init_is_ignored() {
        let h = harness(Some(ShardInfo::new(1, 2)), FakeFactory::default(), FakeHandler::default());
        let handler = h.handler.clone();
        let tx = h.tx.clone();

        let script = async move {
            tx.send(run_schedule(1, 1_000)).await.unwrap();
            settle().await;
            assert!(handler.calls().is_empty());

            tx.send(CoordinationMessage::StartInit { shard_id: 1 }).await.unwrap();
            settle().await;
            tx.send(run_schedule(1, 2_000)).await.unwrap();
            settle().await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert_eq!(*h.handler.schedule_runs.lock(), vec![Duration::from_millis(2_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_drop_relogs_without_reinitializing() {
        let h = harness(None, FakeFactory::default(), FakeHandler::default());
        let metrics = h.runtime.metrics();
        let platform = h.factory.platform.clone();
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            platform.drop_session.notify_one();
            settle().await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert_eq!(metrics.session_drops(), 1);
        assert_eq!(metrics.sessions_ready(), 2);
        assert_eq!(h.factory.created(), 2);
        assert_eq!(h.handler.count("initialize"), 1);
        assert_eq!(h.handler.count("arm_scheduler"), 2);
        assert_eq!(h.handler.count("start_managers"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_dropped_while_session_is_down() {
        let h = harness(Some(ShardInfo::new(0, 1)), FakeFactory::default(), FakeHandler::default());
        let factory = h.factory.clone();
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            factory.fail_next(1);
            factory.platform.drop_session.notify_one();
            settle().await;

            // first re-login failed, waiting out the 200s backoff
            tx.send(run_schedule(0, 1_000)).await.unwrap();
            sleep(Duration::from_secs(300)).await;

            tx.send(run_schedule(0, 2_000)).await.unwrap();
            settle().await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert_eq!(*h.handler.schedule_runs.lock(), vec![Duration::from_millis(2_000)]);
        assert_eq!(h.handler.count("arm_scheduler"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_start_init_takes_restart_path() {
        let h = harness(Some(ShardInfo::new(0, 2)), FakeFactory::default(), FakeHandler::default());
        let tx = h.tx.clone();

        let script = async move {
            tx.send(CoordinationMessage::StartInit { shard_id: 0 }).await.unwrap();
            settle().await;
            tx.send(CoordinationMessage::StartInit { shard_id: 0 }).await.unwrap();
            settle().await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert_eq!(h.factory.created(), 2);
        assert_eq!(h.handler.count("initialize"), 1);
        assert_eq!(h.handler.count("arm_scheduler"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_logins_escalate_then_recover() {
        let mut h = harness(
            Some(ShardInfo::new(0, 1)),
            FakeFactory::failing_first(5),
            FakeHandler::default(),
        );
        let metrics = h.runtime.metrics();
        let tx = h.tx.clone();

        let script = async move {
            // five failures, 200s apart
            sleep(Duration::from_secs(5 * 200 + 10)).await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert_eq!(metrics.connect_failures(), 5);
        assert_eq!(metrics.escalations(), 1);
        assert_eq!(metrics.retry_counter(), 0);
        assert_eq!(metrics.sessions_ready(), 1);

        let sent = h.outbound.drain();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], OutboundMessage::Kill);
        assert!(matches!(sent[1], OutboundMessage::InitComplete { .. }));
        assert!(matches!(sent[2], OutboundMessage::MergeLinkRegistry { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_cancels_pending_retry() {
        let h = harness(None, FakeFactory::failing_first(100), FakeHandler::default());
        let metrics = h.runtime.metrics();
        let tx = h.tx.clone();

        let script = async move {
            sleep(Duration::from_secs(450)).await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        let attempts = metrics.connect_attempts();
        sleep(Duration::from_secs(10_000)).await;
        assert_eq!(metrics.connect_attempts(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_closed_ends_runtime() {
        let h = harness(Some(ShardInfo::new(0, 2)), FakeFactory::default(), FakeHandler::default());
        drop(h.tx);
        let exit = h.runtime.run().await;
        assert_eq!(exit.unwrap(), Exit::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_keeps_running_after_inbound_closes() {
        let h = harness(None, FakeFactory::failing_first(2), FakeHandler::default());
        let metrics = h.runtime.metrics();
        drop(h.tx);

        let outcome = tokio::time::timeout(Duration::from_secs(3600), h.runtime.run()).await;

        assert!(outcome.is_err(), "runtime stopped: {:?}", outcome);
        assert_eq!(metrics.connect_failures(), 2);
        assert_eq!(metrics.sessions_ready(), 1);
        assert_eq!(h.handler.count("initialize"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sole_member_keeps_running_after_inbound_closes() {
        let h = harness(Some(ShardInfo::new(0, 1)), FakeFactory::default(), FakeHandler::default());
        let metrics = h.runtime.metrics();
        drop(h.tx);

        let outcome = tokio::time::timeout(Duration::from_secs(60), h.runtime.run()).await;

        assert!(outcome.is_err());
        assert_eq!(metrics.sessions_ready(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_transport_is_fatal() {
        let mut h = harness(Some(ShardInfo::new(1, 3)), FakeFactory::default(), FakeHandler::default());
        let transport = tokio::spawn(async {
            sleep(Duration::from_secs(5)).await;
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin broken",
            )))
        });

        let exit = h.runtime.run_guarded_with_transport(transport).await;

        assert_eq!(
            exit,
            Exit::Fault("Transport failed: I/O error: stdin broken".to_string())
        );
        assert_eq!(
            h.outbound.drain(),
            vec![OutboundMessage::BroadcastTerminate, OutboundMessage::Kill]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_reported_after_inbound_closes() {
        let mut h = harness(Some(ShardInfo::new(0, 2)), FakeFactory::default(), FakeHandler::default());
        // the reader drops its sender before its error is joined
        drop(h.tx);
        let transport = tokio::spawn(async {
            sleep(Duration::from_secs(1)).await;
            Err(Error::ChannelClosed)
        });

        let exit = h.runtime.run_guarded_with_transport(transport).await;

        assert!(exit.is_fault());
        assert_eq!(
            h.outbound.drain(),
            vec![OutboundMessage::BroadcastTerminate, OutboundMessage::Kill]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_transport_end_is_not_a_fault() {
        let mut h = harness(None, FakeFactory::default(), FakeHandler::default());
        let transport = tokio::spawn(async { Ok(()) });
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run_guarded_with_transport(transport), script);

        assert_eq!(exit, Exit::Shutdown);
        assert!(h.outbound.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_in_spawned_task_reaches_fault_hook() {
        let handler = FakeHandler {
            panic_in_scheduler_task: true,
            ..Default::default()
        };
        let mut h = harness(Some(ShardInfo::new(0, 1)), FakeFactory::default(), handler);
        let guard = h.runtime.fault_guard();
        guard.install_panic_hook();
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert!(guard.is_reported());
        let sent = h.outbound.drain();
        assert!(sent.contains(&OutboundMessage::BroadcastTerminate), "{:?}", sent);
        assert!(sent.contains(&OutboundMessage::Kill), "{:?}", sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_waits_for_running_schedule_cycle() {
        let handler = FakeHandler {
            schedule_delay: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let h = harness(Some(ShardInfo::new(0, 1)), FakeFactory::default(), handler);
        let tx = h.tx.clone();

        let script = async move {
            settle().await;
            tx.send(run_schedule(0, 1_000)).await.unwrap();
            tx.send(CoordinationMessage::Terminate).await.unwrap();
        };
        let started = tokio::time::Instant::now();
        let (exit, ()) = tokio::join!(h.runtime.run(), script);

        assert_eq!(exit.unwrap(), Exit::Shutdown);
        assert!(started.elapsed() >= Duration::from_secs(3600));
        assert_eq!(h.handler.count("run_schedule"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_failure_is_fatal_and_stops_fleet() {
        let handler = FakeHandler {
            fail_init: true,
            ..Default::default()
        };
        let mut h = harness(Some(ShardInfo::new(2, 4)), FakeFactory::default(), handler);

        h.tx.send(CoordinationMessage::StartInit { shard_id: 2 }).await.unwrap();
        let exit = h.runtime.run_guarded().await;

        assert!(exit.is_fault());
        assert_eq!(exit, Exit::Fault("Handler error: database unreachable".to_string()));
        assert_eq!(
            h.outbound.drain(),
            vec![OutboundMessage::BroadcastTerminate, OutboundMessage::Kill]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_caught_as_fault() {
        let handler = FakeHandler {
            panic_init: true,
            ..Default::default()
        };
        let mut h = harness(None, FakeFactory::default(), handler);

        let exit = h.runtime.run_guarded().await;

        assert_eq!(exit, Exit::Fault("initialize exploded".to_string()));
        // not orchestrated, nobody to notify
        assert!(h.outbound.drain().is_empty());
    }
}
