//! A shard process speaking the coordination protocol over stdin/stdout.
//!
//! The "platform" here is local: login always succeeds, every entity named in
//! `DEMO_ENTITIES` is owned, and notices are only logged. Useful for driving
//! an orchestrator end to end without a real gateway.
//!
//! ```text
//! SHARD_ID=0 SHARD_COUNT=1 DEMO_ENTITIES=g1,g2 cargo run --example stdio_shard
//! ```
//!
//! Logs go to stderr; stdout carries the protocol.

use shard_runtime::{
    ipc, Delivery, EntityRecord, Error, InitSnapshot, Notice, Session, SessionFactory,
    SessionIdentity, ShardHandler, ShardInfo, ShardRuntime, ShardRuntimeConfig, StateView,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct LocalSession {
    entities: Arc<HashSet<String>>,
}

impl Session for LocalSession {
    async fn connect(&mut self) -> Result<SessionIdentity, Error> {
        Ok(SessionIdentity {
            user_id: "0".to_string(),
            username: "local-shard".to_string(),
        })
    }

    async fn closed(&mut self) -> Error {
        std::future::pending::<()>().await;
        Error::ChannelClosed
    }

    fn owns_entity(&self, entity_id: &str) -> bool {
        self.entities.contains(entity_id)
    }

    async fn edit_or_send(&self, notice: &Notice) -> Result<Delivery, Error> {
        info!(
            "notice for {}/{}: {}",
            notice.channel_id, notice.message_id, notice.text
        );
        Ok(Delivery::Edited)
    }

    async fn set_activity(&self, activity: Option<&str>) {
        info!("activity set to {:?}", activity);
    }
}

struct LocalFactory {
    entities: Arc<HashSet<String>>,
}

impl SessionFactory for LocalFactory {
    type Session = LocalSession;

    fn create(&self) -> LocalSession {
        LocalSession {
            entities: self.entities.clone(),
        }
    }
}

struct LoggingHandler;

impl ShardHandler for LoggingHandler {
    type Session = LocalSession;

    async fn initialize(
        &self,
        session: &LocalSession,
        _state: &StateView,
    ) -> Result<InitSnapshot, Error> {
        let mut ids: Vec<_> = session.entities.iter().cloned().collect();
        ids.sort();
        Ok(InitSnapshot {
            links: ids.iter().map(|id| format!("https://feeds.local/{}", id)).collect(),
            entities: ids.into_iter().map(EntityRecord::new).collect(),
        })
    }

    async fn arm_scheduler(&self, _session: &LocalSession) {
        info!("scheduler armed");
    }

    async fn run_schedule(&self, refresh_interval: Duration) {
        info!("schedule cycle, next in {:?}", refresh_interval);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shard_runtime=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let mut config = match std::env::var("SHARD_SETTINGS") {
        Ok(json) => ShardRuntimeConfig::from_json(&json)?,
        Err(_) => ShardRuntimeConfig::default(),
    };
    config.shard = ShardInfo::from_env()?;

    let entities: HashSet<String> = std::env::var("DEMO_ENTITIES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let (inbound, link, reader, writer) = ipc::stdio(config.inbound_buffer, config.shard.into());
    let factory = LocalFactory {
        entities: Arc::new(entities),
    };

    let runtime = ShardRuntime::new(config, factory, LoggingHandler, inbound, link);
    runtime.fault_guard().install_panic_hook();
    let exit = runtime.run_guarded_with_transport(reader).await;
    info!("runtime stopped: {:?}", exit);

    writer.abort();
    if exit.is_fault() {
        std::process::exit(1);
    }
    Ok(())
}
