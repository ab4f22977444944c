use crate::error::Error;
use crate::message::Notice;
use std::future::Future;

/// Lifecycle of a single connection attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

/// Who the platform says we are once logged in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub username: String,
}

/// Outcome of editing-or-posting a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The referenced message existed and was edited
    Edited,
    /// The message was gone; a new one was posted to the channel
    Sent,
    /// This session cannot see the channel
    ChannelMissing,
}

/// Client for the remote real-time platform.
///
/// One value represents one login. The runtime never reconnects a session in
/// place; after a failure it is dropped and the [`SessionFactory`] makes a new
/// one.
///
/// # Example
///
/// ```ignore
/// struct GatewaySession { /* client */ }
///
/// impl Session for GatewaySession {
///     async fn connect(&mut self) -> Result<SessionIdentity, Error> {
///         self.client.login(&self.token).await.map_err(|e| Error::ConnectionFailed(e.to_string()))
///     }
///     async fn closed(&mut self) -> Error { self.client.wait_disconnect().await.into() }
///     fn owns_entity(&self, id: &str) -> bool { self.client.guilds().contains(id) }
///     async fn edit_or_send(&self, notice: &Notice) -> Result<Delivery, Error> { /* ... */ }
/// }
/// ```
pub trait Session: Send + Sync + 'static {
    /// Log in. Resolves once the session is ready or the attempt failed.
    fn connect(&mut self) -> impl Future<Output = Result<SessionIdentity, Error>> + Send;

    /// Resolves when a ready session drops. Only polled after `connect` succeeded.
    fn closed(&mut self) -> impl Future<Output = Error> + Send;

    /// Whether this session currently holds the connection for `entity_id`
    fn owns_entity(&self, entity_id: &str) -> bool;

    /// Edit the referenced message, or post to the channel if the message is gone
    fn edit_or_send(&self, notice: &Notice) -> impl Future<Output = Result<Delivery, Error>> + Send;

    /// Set the presence activity shown on the platform
    fn set_activity(&self, _activity: Option<&str>) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Creates a fresh [`Session`] for every login attempt
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    fn create(&self) -> Self::Session;
}

/// A session together with its observed lifecycle state.
///
/// Owned by the reconnect supervisor while connecting, handed to the runtime
/// once [`SessionState::Ready`].
#[derive(Debug)]
pub struct SessionHandle<S> {
    session: S,
    state: SessionState,
    identity: Option<SessionIdentity>,
    attempt: u32,
}

impl<S: Session> SessionHandle<S> {
    pub(crate) fn new(session: S, attempt: u32) -> Self {
        Self {
            session,
            state: SessionState::Disconnected,
            identity: None,
            attempt,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    /// Login attempt number (1-based) that produced this handle
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_inner(self) -> S {
        self.session
    }

    pub(crate) async fn connect(&mut self) -> Result<(), Error> {
        self.state = SessionState::Connecting;
        match self.session.connect().await {
            Ok(identity) => {
                self.identity = Some(identity);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = SessionState::Failed;
    }

    /// Wait for a ready session to drop
    pub(crate) async fn closed(&mut self) -> Error {
        let reason = self.session.closed().await;
        self.state = SessionState::Disconnected;
        reason
    }
}
