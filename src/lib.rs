//! # shard-runtime
//!
//! Process-side runtime for one shard of a horizontally partitioned bot that
//! holds a persistent session against a real-time platform.
//!
//! ## Features
//!
//! - **Login supervision** with a fixed, refresh-derived retry delay that
//!   never gives up, plus a one-shot escalation to the orchestrator
//! - **Start gating** so fleet members log in only when told to
//! - **Replicated state** kept in sync by orchestrator broadcasts
//! - **Fault guard** that stops the whole fleet on an unhandled error
//! - **Metrics** for observability
//!
//! ## Example
//!
//! ```ignore
//! use shard_runtime::{ipc, ShardHandler, ShardInfo, ShardRuntime, ShardRuntimeConfig};
//!
//! struct FeedHandler;
//!
//! impl ShardHandler for FeedHandler {
//!     // ... implement required methods
//! }
//!
//! let config = ShardRuntimeConfig::builder()
//!     .shard(ShardInfo::from_env()?)
//!     .refresh_interval(Duration::from_secs(600))
//!     .build()?;
//!
//! let (inbound, link, reader, _writer) = ipc::stdio(config.inbound_buffer, config.shard.into());
//! let runtime = ShardRuntime::new(config, GatewayFactory, FeedHandler, inbound, link);
//! runtime.fault_guard().install_panic_hook();
//! let exit = runtime.run_guarded_with_transport(reader).await;
//! ```

mod config;
mod error;
mod fault;
mod handler;
pub mod ipc;
mod message;
mod metrics;
mod router;
mod runtime;
mod session;
mod shard;
mod state;
mod supervisor;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ReconnectConfig, ShardRuntimeConfig, ShardRuntimeConfigBuilder, MIN_BACKOFF};
pub use error::{Error, ErrorKind};
pub use fault::FaultGuard;
pub use handler::ShardHandler;
pub use ipc::{OrchestratorLink, OutboundReceiver};
pub use message::{
    Blocklists, CoordinationMessage, EntityRecord, FailedLinks, Notice, OutboundMessage, Overrides,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use router::{CoordinationRouter, RouterAction};
pub use runtime::{Exit, ShardRuntime};
pub use session::{Delivery, Session, SessionFactory, SessionHandle, SessionIdentity, SessionState};
pub use shard::{ShardInfo, ShardTag, SHARD_COUNT_ENV, SHARD_ID_ENV};
pub use state::{InitPhase, InitSnapshot, LinkRegistry, ReplicatedState, StateView, StateWriter};
pub use supervisor::{FailureReport, ReconnectSupervisor};

/// Result type for shard-runtime operations
pub type Result<T> = std::result::Result<T, Error>;
