use crate::handler::ShardHandler;
use crate::ipc::OrchestratorLink;
use crate::message::{CoordinationMessage, Notice, OutboundMessage};
use crate::metrics::Metrics;
use crate::session::{Delivery, Session};
use crate::shard::ShardTag;
use crate::state::{InitPhase, InitSnapshot, StateView, StateWriter};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Follow-up the runtime must perform after a message was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    /// Nothing beyond the state change
    None,
    /// The orchestrator told this shard to log in
    EstablishSession,
    /// The fleet is shutting down
    Shutdown,
}

/// Applies coordination messages, one at a time, in arrival order.
///
/// Holds the only [`StateWriter`]. `dispatch` takes `&mut self`, so two
/// messages can never be applied concurrently.
pub struct CoordinationRouter<H: ShardHandler> {
    state: StateWriter,
    handler: Arc<H>,
    link: OrchestratorLink,
    metrics: Arc<Metrics>,
    shard_id: Option<u32>,
    tag: ShardTag,
    scheduler_armed: bool,
}

impl<H: ShardHandler> CoordinationRouter<H> {
    pub fn new(
        state: StateWriter,
        handler: Arc<H>,
        link: OrchestratorLink,
        metrics: Arc<Metrics>,
        shard_id: Option<u32>,
    ) -> Self {
        Self {
            state,
            handler,
            link,
            metrics,
            shard_id,
            tag: ShardTag(shard_id),
            scheduler_armed: false,
        }
    }

    /// Read handle to the state this router writes
    pub fn view(&self) -> StateView {
        self.state.view()
    }

    /// Whether `run_schedule` messages are forwarded yet
    pub fn is_scheduler_armed(&self) -> bool {
        self.scheduler_armed
    }

    pub(crate) fn set_scheduler_armed(&mut self, armed: bool) {
        self.scheduler_armed = armed;
    }

    /// Load the result of local initialization and mark this shard initialized
    pub(crate) fn apply_snapshot(&mut self, snapshot: &InitSnapshot) {
        self.state.apply_snapshot(snapshot);
        self.state.set_init_phase(InitPhase::Local);
    }

    /// Apply one inbound message.
    ///
    /// `session` is the ready session, if any; entity-scoped messages are
    /// checked against it and dropped when this shard does not hold the entity.
    pub async fn dispatch(
        &mut self,
        message: CoordinationMessage,
        session: Option<&H::Session>,
    ) -> RouterAction {
        trace!("{}Dispatching {}", self.tag, message.kind());
        self.metrics.record_message_dispatched();

        match message {
            CoordinationMessage::StartInit { shard_id } => {
                if self.is_self(shard_id) {
                    return RouterAction::EstablishSession;
                }
                self.drop_message("start_init", "addressed to another shard");
            }

            CoordinationMessage::InitComplete => {
                self.state.set_init_phase(InitPhase::Fleet);
                debug!("{}Fleet initialization complete", self.tag);
            }

            CoordinationMessage::RunSchedule {
                shard_id,
                refresh_interval,
            } => {
                if !self.is_self(shard_id) {
                    self.drop_message("run_schedule", "addressed to another shard");
                } else if !self.scheduler_armed {
                    self.drop_message("run_schedule", "scheduler not armed");
                } else {
                    self.metrics.record_schedule_run();
                    self.handler.run_schedule(refresh_interval).await;
                }
            }

            CoordinationMessage::UpdateEntity { entity } => {
                if owns(session, &entity.id) {
                    self.state.upsert_entity(entity);
                } else {
                    self.drop_message("update_entity", "entity not owned");
                }
            }

            CoordinationMessage::DeleteEntity { entity_id } => {
                if owns(session, &entity_id) {
                    self.state.remove_entity(&entity_id);
                } else {
                    self.drop_message("delete_entity", "entity not owned");
                }
            }

            CoordinationMessage::UpdateFailedLinks { failed_links } => {
                self.state.replace_failed_links(failed_links);
            }

            CoordinationMessage::UpdateBlocklists(blocklists) => {
                self.state.replace_blocklists(blocklists);
            }

            CoordinationMessage::UpdateLinkRegistry { links } => {
                self.state.replace_link_registry(links);
            }

            CoordinationMessage::MergeLinkRegistry { links } => {
                let added = self.state.merge_link_registry(links);
                trace!("{}Merged {} new links", self.tag, added);
            }

            CoordinationMessage::UpdateOverrides(overrides) => {
                self.state.replace_overrides(overrides);
            }

            CoordinationMessage::TerminalAction(notice) => match session {
                Some(session) => self.terminal_action(session, &notice).await,
                None => self.drop_message("terminal_action", "no session"),
            },

            CoordinationMessage::Terminate => {
                info!("{}Received terminate instruction", self.tag);
                return RouterAction::Shutdown;
            }
        }

        RouterAction::None
    }

    async fn terminal_action(&self, session: &H::Session, notice: &Notice) {
        match session.edit_or_send(notice).await {
            Ok(Delivery::ChannelMissing) => {
                self.drop_message("terminal_action", "channel not found");
            }
            Ok(delivery) => {
                self.metrics.record_terminal_action();
                info!(
                    "{}Notice {:?} in channel {}, requesting process kill",
                    self.tag, delivery, notice.channel_id
                );
                if let Err(e) = self.link.send(OutboundMessage::Kill) {
                    self.metrics.record_outbound_failure();
                    warn!("{}Failed to send kill request: {}", self.tag, e);
                }
            }
            Err(e) => {
                warn!(
                    "{}Failed to deliver notice to channel {}: {}",
                    self.tag, notice.channel_id, e
                );
            }
        }
    }

    fn is_self(&self, shard_id: u32) -> bool {
        self.shard_id == Some(shard_id)
    }

    fn drop_message(&self, kind: &str, reason: &str) {
        self.metrics.record_message_dropped();
        debug!("{}Ignoring {}: {}", self.tag, kind, reason);
    }
}

fn owns<S: Session>(session: Option<&S>, entity_id: &str) -> bool {
    session.is_some_and(|s| s.owns_entity(entity_id))
}
