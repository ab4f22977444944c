use crate::error::Error;
use crate::session::Session;
use crate::state::{InitSnapshot, StateView};
use std::future::Future;
use std::time::Duration;

/// Trait that users implement to plug their application into the runtime.
///
/// The runtime owns login, reconnection and coordination with the
/// orchestrator. The handler owns everything those events trigger: loading
/// tenants, serving commands, polling feeds on a schedule.
///
/// # Example
///
/// ```ignore
/// struct FeedHandler { db: Pool, schedules: Mutex<Option<ScheduleManager>> }
///
/// impl ShardHandler for FeedHandler {
///     type Session = GatewaySession;
///
///     async fn initialize(&self, session: &GatewaySession, state: &StateView) -> Result<InitSnapshot, Error> {
///         let tenants = self.db.load_tenants(|id| session.owns_entity(id)).await?;
///         Ok(InitSnapshot { links: links_of(&tenants), entities: tenants })
///     }
///
///     async fn arm_scheduler(&self, session: &GatewaySession) {
///         *self.schedules.lock().await = Some(ScheduleManager::new(session));
///     }
///
///     async fn run_schedule(&self, refresh_interval: Duration) {
///         if let Some(s) = &*self.schedules.lock().await { s.run(refresh_interval).await }
///     }
/// }
/// ```
pub trait ShardHandler: Send + Sync + 'static {
    /// The platform session this handler works against
    type Session: Session;

    /// One-time initialization after the first successful login.
    ///
    /// Returns the tenant snapshot reported to the orchestrator. An error here
    /// is treated as an unhandled fault and takes the process down.
    fn initialize(
        &self,
        session: &Self::Session,
        state: &StateView,
    ) -> impl Future<Output = Result<InitSnapshot, Error>> + Send;

    /// Create the scheduler for the current session.
    ///
    /// Called after initialization and again after every later login, since
    /// the previous scheduler was bound to a dropped session.
    fn arm_scheduler(&self, session: &Self::Session) -> impl Future<Output = ()> + Send;

    /// Run one scheduling cycle with the orchestrator-supplied interval.
    ///
    /// Awaited inline by the message loop: nothing else, including a
    /// `terminate`, is processed until it returns. Long polling work should be
    /// spawned and this should return promptly.
    fn run_schedule(&self, refresh_interval: Duration) -> impl Future<Output = ()> + Send;

    /// Start listening for commands. Called once, before initialization, when
    /// commands are enabled.
    fn enable_commands(&self, _session: &Self::Session) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Start long-lived managers once initialization has completed
    fn start_managers(&self, _session: &Self::Session) -> impl Future<Output = ()> + Send {
        async {}
    }
}
