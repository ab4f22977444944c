use crate::ipc::OrchestratorLink;
use crate::message::OutboundMessage;
use crate::shard::ShardTag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Process-wide fault reporting for one shard.
///
/// The first report logs the fault and asks the orchestrator to terminate
/// every shard and kill this one. Later reports are ignored, so a panic seen
/// by both the panic hook and [`ShardRuntime::run_guarded`](crate::ShardRuntime::run_guarded)
/// is only announced once.
///
/// # Example
///
/// ```ignore
/// let runtime = ShardRuntime::new(config, factory, handler, inbound, link);
/// runtime.fault_guard().install_panic_hook();
/// let exit = runtime.run_guarded().await;
/// ```
#[derive(Debug, Clone)]
pub struct FaultGuard {
    tag: ShardTag,
    link: OrchestratorLink,
    reported: Arc<AtomicBool>,
}

impl FaultGuard {
    pub fn new(tag: ShardTag, link: OrchestratorLink) -> Self {
        Self {
            tag,
            link,
            reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a fault has been reported
    pub fn is_reported(&self) -> bool {
        self.reported.load(Ordering::SeqCst)
    }

    /// Report a fault. Returns `false` if one was already reported.
    pub fn report(&self, detail: &str) -> bool {
        if self.reported.swap(true, Ordering::SeqCst) {
            return false;
        }

        error!("{}Fatal Error: {}", self.tag, detail);
        if self.link.is_attached() {
            for message in [OutboundMessage::BroadcastTerminate, OutboundMessage::Kill] {
                if let Err(e) = self.link.send(message) {
                    warn!("{}Could not reach orchestrator: {}", self.tag, e);
                    break;
                }
            }
        }
        true
    }

    /// Wait for queued reports to reach the transport
    pub async fn flush(&self) {
        if let Err(e) = self.link.flush().await {
            warn!("{}Failed to flush orchestrator link: {}", self.tag, e);
        }
    }

    /// Report every panic in the process, on any thread or task, through this
    /// guard. The previously installed hook still runs afterwards.
    pub fn install_panic_hook(&self) {
        let guard = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            guard.report(&info.to_string());
            previous(info);
        }));
    }
}
