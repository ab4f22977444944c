//! Process-local replica of fleet-wide state.
//!
//! The store is split into a single [`StateWriter`], owned by the coordination
//! router, and any number of read-only [`StateView`] handles. Nothing else can
//! mutate it.

use crate::message::{Blocklists, EntityRecord, FailedLinks, Overrides};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How far fleet initialization has progressed, as seen by this shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitPhase {
    /// Nothing initialized yet
    #[default]
    Pending,
    /// This shard finished its own initialization
    Local,
    /// The orchestrator reported every shard initialized
    Fleet,
}

/// Ordered set of links; insertion order is preserved and duplicates are
/// dropped on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRegistry {
    links: Vec<String>,
    index: HashSet<String>,
}

impl LinkRegistry {
    /// Build a registry from a list, dropping later duplicates
    pub fn from_links(links: Vec<String>) -> Self {
        let mut registry = Self::default();
        registry.merge(links);
        registry
    }

    /// Append links not already present, in the order given
    pub fn merge(&mut self, links: impl IntoIterator<Item = String>) -> usize {
        let mut added = 0;
        for link in links {
            if self.index.insert(link.clone()) {
                self.links.push(link);
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, link: &str) -> bool {
        self.index.contains(link)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Snapshot produced by local initialization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitSnapshot {
    /// Tenant records owned by this shard
    pub entities: Vec<EntityRecord>,
    /// Links this shard polls
    pub links: Vec<String>,
}

/// Fleet-wide state replicated into this process
#[derive(Debug, Clone, Default)]
pub struct ReplicatedState {
    entities: HashMap<String, EntityRecord>,
    failed_links: FailedLinks,
    blocklists: Blocklists,
    overrides: Overrides,
    link_registry: LinkRegistry,
    init_phase: InitPhase,
}

impl ReplicatedState {
    /// Create an empty store split into its writer and a reader
    pub fn shared() -> (StateWriter, StateView) {
        let inner = Arc::new(RwLock::new(Self::default()));
        (
            StateWriter {
                inner: inner.clone(),
            },
            StateView { inner },
        )
    }

    pub fn entity(&self, id: &str) -> Option<&EntityRecord> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn failed_links(&self) -> &FailedLinks {
        &self.failed_links
    }

    pub fn blocklists(&self) -> &Blocklists {
        &self.blocklists
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    pub fn link_registry(&self) -> &LinkRegistry {
        &self.link_registry
    }

    pub fn init_phase(&self) -> InitPhase {
        self.init_phase
    }
}

/// Exclusive write handle to the replicated state.
///
/// Not `Clone`; the router holds the only one.
#[derive(Debug)]
pub struct StateWriter {
    inner: Arc<RwLock<ReplicatedState>>,
}

impl StateWriter {
    /// Read handle sharing this store
    pub fn view(&self) -> StateView {
        StateView {
            inner: self.inner.clone(),
        }
    }

    /// Insert or replace a record, keyed by its id
    pub fn upsert_entity(&mut self, record: EntityRecord) -> Option<EntityRecord> {
        self.inner.write().entities.insert(record.id.clone(), record)
    }

    pub fn remove_entity(&mut self, id: &str) -> Option<EntityRecord> {
        self.inner.write().entities.remove(id)
    }

    pub fn replace_failed_links(&mut self, failed_links: FailedLinks) {
        self.inner.write().failed_links = failed_links;
    }

    pub fn replace_blocklists(&mut self, blocklists: Blocklists) {
        self.inner.write().blocklists = blocklists;
    }

    pub fn replace_overrides(&mut self, overrides: Overrides) {
        self.inner.write().overrides = overrides;
    }

    /// Overwrite the registry. Duplicates in `links` are dropped, keeping the
    /// first occurrence.
    pub fn replace_link_registry(&mut self, links: Vec<String>) {
        self.inner.write().link_registry = LinkRegistry::from_links(links);
    }

    /// Union links into the registry; returns how many were new
    pub fn merge_link_registry(&mut self, links: Vec<String>) -> usize {
        self.inner.write().link_registry.merge(links)
    }

    /// Load the result of local initialization
    pub fn apply_snapshot(&mut self, snapshot: &InitSnapshot) {
        let mut state = self.inner.write();
        for record in &snapshot.entities {
            state.entities.insert(record.id.clone(), record.clone());
        }
        state.link_registry.merge(snapshot.links.iter().cloned());
    }

    pub fn set_init_phase(&mut self, phase: InitPhase) {
        self.inner.write().init_phase = phase;
    }
}

/// Read-only handle to the replicated state
#[derive(Debug, Clone)]
pub struct StateView {
    inner: Arc<RwLock<ReplicatedState>>,
}

impl StateView {
    /// Borrow the current state. Keep the guard short-lived; the router blocks
    /// on it.
    pub fn read(&self) -> RwLockReadGuard<'_, ReplicatedState> {
        self.inner.read()
    }

    /// Clone the full state
    pub fn snapshot(&self) -> ReplicatedState {
        self.inner.read().clone()
    }

    pub fn has_entity(&self, id: &str) -> bool {
        self.inner.read().entities.contains_key(id)
    }

    pub fn init_phase(&self) -> InitPhase {
        self.inner.read().init_phase
    }
}
