//! Coordination messages exchanged between a shard and its orchestrator.
//!
//! Both directions are JSON objects tagged by a `"type"` field, e.g.
//! `{"type":"start_init","shard_id":2}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// Per-tenant configuration record replicated between shard and orchestrator.
///
/// Only the `id` is interpreted here; the remaining fields are carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Record with no fields besides its id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Links that failed to fetch, keyed by link. Values are opaque to the runtime.
pub type FailedLinks = BTreeMap<String, Value>;

/// Tenant- and user-level block lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocklists {
    #[serde(default)]
    pub blocked_tenants: HashSet<String>,
    #[serde(default)]
    pub blocked_users: HashSet<String>,
}

/// Per-tenant privileges granted outside the normal limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Tenants allowed to deliver through webhooks
    #[serde(default)]
    pub webhook_tenants: HashSet<String>,
    /// Tenants allowed to send cookies with requests
    #[serde(default)]
    pub cookie_tenants: HashSet<String>,
    /// Tenant id to raised feed limit
    #[serde(default)]
    pub limit_overrides: HashMap<String, u32>,
}

/// Reference to a message on the remote platform the terminal action edits,
/// plus the text to put there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub channel_id: String,
    pub message_id: String,
    pub text: String,
}

/// Messages received from the orchestrator.
///
/// Applied strictly in arrival order; later messages may depend on state set
/// by earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationMessage {
    /// Begin session establishment on the addressed shard
    StartInit { shard_id: u32 },
    /// Every shard finished local initialization
    InitComplete,
    /// Run the scheduler on the addressed shard
    RunSchedule {
        shard_id: u32,
        #[serde(rename = "refresh_interval_ms", with = "duration_ms")]
        refresh_interval: Duration,
    },
    /// Upsert a tenant record
    UpdateEntity { entity: EntityRecord },
    /// Remove a tenant record
    DeleteEntity { entity_id: String },
    /// Replace the failed-link registry
    UpdateFailedLinks { failed_links: FailedLinks },
    /// Replace both block lists
    UpdateBlocklists(Blocklists),
    /// Replace the link registry. Duplicate links collapse to their first
    /// occurrence; order is otherwise kept.
    UpdateLinkRegistry { links: Vec<String> },
    /// Union the given links into the registry
    MergeLinkRegistry { links: Vec<String> },
    /// Replace all override collections
    UpdateOverrides(Overrides),
    /// Edit or post the notice, then ask to be killed
    TerminalAction(Notice),
    /// Fleet-wide terminate broadcast
    Terminate,
}

impl CoordinationMessage {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationMessage::StartInit { .. } => "start_init",
            CoordinationMessage::InitComplete => "init_complete",
            CoordinationMessage::RunSchedule { .. } => "run_schedule",
            CoordinationMessage::UpdateEntity { .. } => "update_entity",
            CoordinationMessage::DeleteEntity { .. } => "delete_entity",
            CoordinationMessage::UpdateFailedLinks { .. } => "update_failed_links",
            CoordinationMessage::UpdateBlocklists(_) => "update_blocklists",
            CoordinationMessage::UpdateLinkRegistry { .. } => "update_link_registry",
            CoordinationMessage::MergeLinkRegistry { .. } => "merge_link_registry",
            CoordinationMessage::UpdateOverrides(_) => "update_overrides",
            CoordinationMessage::TerminalAction(_) => "terminal_action",
            CoordinationMessage::Terminate => "terminate",
        }
    }
}

/// Messages sent up to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Local initialization finished; carries the tenant snapshot
    InitComplete { entities: Vec<EntityRecord> },
    /// Ask the fleet to merge this shard's links
    MergeLinkRegistry { links: Vec<String> },
    /// Ask the orchestrator to kill this process
    Kill,
    /// Ask the orchestrator to terminate every shard
    BroadcastTerminate,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(d.as_millis()).map_err(serde::ser::Error::custom)?;
        s.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
