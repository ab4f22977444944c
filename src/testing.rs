//! Scripted fakes for the session and handler traits.

use crate::error::Error;
use crate::handler::ShardHandler;
use crate::message::{EntityRecord, Notice};
use crate::session::{Delivery, Session, SessionFactory, SessionIdentity};
use crate::state::{InitSnapshot, StateView};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Platform-side state shared by every session a factory creates
#[derive(Debug, Default)]
pub struct FakePlatform {
    /// Entities the logged-in session holds
    pub owned: Mutex<HashSet<String>>,
    /// channel id -> message ids present in it
    pub channels: Mutex<HashMap<String, HashSet<String>>>,
    /// Every edit-or-send performed
    pub deliveries: Mutex<Vec<(Notice, Delivery)>>,
    /// Activities set, in order
    pub activities: Mutex<Vec<Option<String>>>,
    /// Signal the current ready session to drop
    pub drop_session: Notify,
}

impl FakePlatform {
    pub fn own(&self, ids: &[&str]) {
        self.owned.lock().extend(ids.iter().map(|s| s.to_string()));
    }

    pub fn add_channel(&self, channel_id: &str, message_ids: &[&str]) {
        self.channels.lock().insert(
            channel_id.to_string(),
            message_ids.iter().map(|s| s.to_string()).collect(),
        );
    }
}

pub struct FakeSession {
    outcome: Result<(), String>,
    platform: Arc<FakePlatform>,
}

impl Session for FakeSession {
    async fn connect(&mut self) -> Result<SessionIdentity, Error> {
        match &self.outcome {
            Ok(()) => Ok(SessionIdentity {
                user_id: "1".to_string(),
                username: "feedbot".to_string(),
            }),
            Err(reason) => Err(Error::ConnectionFailed(reason.clone())),
        }
    }

    async fn closed(&mut self) -> Error {
        self.platform.drop_session.notified().await;
        Error::ConnectionFailed("session dropped".to_string())
    }

    fn owns_entity(&self, entity_id: &str) -> bool {
        self.platform.owned.lock().contains(entity_id)
    }

    async fn edit_or_send(&self, notice: &Notice) -> Result<Delivery, Error> {
        let delivery = match self.platform.channels.lock().get_mut(&notice.channel_id) {
            None => Delivery::ChannelMissing,
            Some(messages) if messages.contains(&notice.message_id) => Delivery::Edited,
            Some(messages) => {
                messages.insert(format!("new-{}", notice.message_id));
                Delivery::Sent
            }
        };
        self.platform.deliveries.lock().push((notice.clone(), delivery));
        Ok(delivery)
    }

    async fn set_activity(&self, activity: Option<&str>) {
        self.platform
            .activities
            .lock()
            .push(activity.map(str::to_string));
    }
}

/// Creates sessions whose login outcomes follow a script; once the script
/// runs out every login succeeds.
#[derive(Default)]
pub struct FakeFactory {
    pub platform: Arc<FakePlatform>,
    script: Mutex<VecDeque<Result<(), String>>>,
    pub created: AtomicUsize,
}

impl FakeFactory {
    pub fn failing_first(failures: usize) -> Self {
        let factory = Self::default();
        factory.script.lock().extend(
            (0..failures).map(|i| Err(format!("gateway unavailable ({})", i + 1))),
        );
        factory
    }

    /// Make the next `failures` logins fail
    pub fn fail_next(&self, failures: usize) {
        self.script
            .lock()
            .extend((0..failures).map(|_| Err("gateway unavailable".to_string())));
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    fn create(&self) -> FakeSession {
        self.created.fetch_add(1, Ordering::SeqCst);
        FakeSession {
            outcome: self.script.lock().pop_front().unwrap_or(Ok(())),
            platform: self.platform.clone(),
        }
    }
}

/// Records every call the runtime makes
#[derive(Default)]
pub struct FakeHandler {
    pub snapshot: InitSnapshot,
    pub fail_init: bool,
    pub panic_init: bool,
    /// `arm_scheduler` spawns a task that panics
    pub panic_in_scheduler_task: bool,
    /// `run_schedule` takes this long to return
    pub schedule_delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
    pub schedule_runs: Mutex<Vec<Duration>>,
}

impl FakeHandler {
    pub fn with_snapshot(entities: &[&str], links: &[&str]) -> Self {
        Self {
            snapshot: InitSnapshot {
                entities: entities.iter().map(|id| EntityRecord::new(*id)).collect(),
                links: links.iter().map(|l| l.to_string()).collect(),
            },
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

impl ShardHandler for FakeHandler {
    type Session = FakeSession;

    async fn initialize(
        &self,
        _session: &FakeSession,
        _state: &StateView,
    ) -> Result<InitSnapshot, Error> {
        self.calls.lock().push("initialize".to_string());
        if self.panic_init {
            panic!("initialize exploded");
        }
        if self.fail_init {
            return Err(Error::Handler("database unreachable".to_string()));
        }
        Ok(self.snapshot.clone())
    }

    async fn arm_scheduler(&self, _session: &FakeSession) {
        self.calls.lock().push("arm_scheduler".to_string());
        if self.panic_in_scheduler_task {
            tokio::spawn(async { panic!("schedule manager crashed") });
        }
    }

    async fn run_schedule(&self, refresh_interval: Duration) {
        self.calls.lock().push("run_schedule".to_string());
        self.schedule_runs.lock().push(refresh_interval);
        if let Some(delay) = self.schedule_delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn enable_commands(&self, _session: &FakeSession) {
        self.calls.lock().push("enable_commands".to_string());
    }

    async fn start_managers(&self, _session: &FakeSession) {
        self.calls.lock().push("start_managers".to_string());
    }
}

impl SessionFactory for Arc<FakeFactory> {
    type Session = FakeSession;

    fn create(&self) -> FakeSession {
        FakeFactory::create(self)
    }
}

impl ShardHandler for Arc<FakeHandler> {
    type Session = FakeSession;

    async fn initialize(
        &self,
        session: &FakeSession,
        state: &StateView,
    ) -> Result<InitSnapshot, Error> {
        FakeHandler::initialize(self, session, state).await
    }

    async fn arm_scheduler(&self, session: &FakeSession) {
        FakeHandler::arm_scheduler(self, session).await
    }

    async fn run_schedule(&self, refresh_interval: Duration) {
        FakeHandler::run_schedule(self, refresh_interval).await
    }

    async fn enable_commands(&self, session: &FakeSession) {
        FakeHandler::enable_commands(self, session).await
    }

    async fn start_managers(&self, session: &FakeSession) {
        FakeHandler::start_managers(self, session).await
    }
}
