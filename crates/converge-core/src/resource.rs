//! The resource contract and the catalog arena that owns resources.
//!
//! Resources refer to each other by printable reference (`kind[name]`); the
//! catalog resolves references to stable arena indices so relationship edges
//! are plain `(index, index, label)` triples with no ownership cycles.

use crate::change::Change;
use crate::graph::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable index of a resource slot in the catalog.
pub type ResourceId = NodeId;

/// Failure of a resource call-out (evaluate, flush, callback, prefetch).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ResourceError(String);

impl ResourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The four declarable relationship forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// The peer must be applied before this resource.
    Require,
    /// This resource must be applied before the peer.
    Before,
    /// Like `before`, plus the peer subscribes to this resource's events.
    Notify,
    /// Like `require`, plus this resource subscribes to the peer's events.
    Subscribe,
}

/// A declared relationship to a peer resource, named by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Printable reference of the peer, e.g. `file[/etc/motd]`.
    pub peer: String,
    /// Event kind the edge reacts to; `None` means any event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Callback invoked on the subscriber; notify/subscribe edges default
    /// to `refresh` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl Relationship {
    pub fn new(kind: RelationshipKind, peer: impl Into<String>) -> Self {
        Self {
            kind,
            peer: peer.into(),
            event: None,
            callback: None,
        }
    }

    pub fn require(peer: impl Into<String>) -> Self {
        Self::new(RelationshipKind::Require, peer)
    }

    pub fn before(peer: impl Into<String>) -> Self {
        Self::new(RelationshipKind::Before, peer)
    }

    pub fn notify(peer: impl Into<String>) -> Self {
        Self::new(RelationshipKind::Notify, peer)
    }

    pub fn subscribe(peer: impl Into<String>) -> Self {
        Self::new(RelationshipKind::Subscribe, peer)
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }
}

/// Backend that knows how to observe and mutate one family of resources.
/// `prefetch` bulk-loads observed state and runs once per distinct name.
pub trait Provider {
    fn name(&self) -> &str;

    fn prefetch(&self) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// The capability set the engine needs from a resource.
///
/// Optional capabilities (`generate`, `eval_generate`, `flush`,
/// `mark_synced`, `remove`, callbacks) have no-op or refusing defaults, so
/// implementors only override what their kind supports.
pub trait Resource {
    /// Kind tag, e.g. `file` or `service`. Doubles as an implicit tag.
    fn kind(&self) -> &str;

    /// Name, unique within the kind.
    fn name(&self) -> &str;

    /// Printable reference, used in log lines and error messages.
    fn reference(&self) -> String {
        format!("{}[{}]", self.kind(), self.name())
    }

    /// Containers are purely aggregational and are never applied.
    fn is_container(&self) -> bool {
        false
    }

    /// Declared relationships to peers.
    fn relationships(&self) -> Vec<Relationship> {
        Vec::new()
    }

    /// References of peers this resource implicitly requires when they are
    /// present in the catalog (e.g. a file's parent directory).
    fn autorequire(&self, catalog: &Catalog) -> Vec<String> {
        let _ = catalog;
        Vec::new()
    }

    /// Explicit tag set. The kind is an implicit tag regardless.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the resource's schedule permits applying it now.
    fn scheduled(&self) -> bool {
        true
    }

    fn provider(&self) -> Option<&dyn Provider> {
        None
    }

    /// Compute the changes needed to reach the desired state. An in-sync
    /// resource returns an empty list.
    fn evaluate(&mut self) -> Result<Vec<Change>, ResourceError>;

    /// Additional resources contributed at preparation time.
    fn generate(&mut self) -> Vec<Box<dyn Resource>> {
        Vec::new()
    }

    /// Additional resources contributed while this resource is applied.
    fn eval_generate(&mut self) -> Vec<Box<dyn Resource>> {
        Vec::new()
    }

    /// Write back any state buffered during change application.
    fn flush(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Record the time this resource was last driven into sync.
    fn mark_synced(&mut self, time: DateTime<Utc>) {
        let _ = time;
    }

    /// Release any state held by a generated resource before it is dropped
    /// at cleanup.
    fn remove(&mut self) {}

    /// Invoke a named subscription callback (e.g. `refresh`, `restart`).
    /// Dispatch on the name; the default refuses every callback.
    fn call_callback(&mut self, name: &str) -> Result<(), ResourceError> {
        Err(ResourceError::new(format!(
            "{} does not support callback '{}'",
            self.reference(),
            name
        )))
    }
}

/// Arena owning every resource of a transaction.
#[derive(Default)]
pub struct Catalog {
    slots: Vec<Option<Box<dyn Resource>>>,
    parents: Vec<Option<ResourceId>>,
    index: BTreeMap<String, ResourceId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a top-level resource and return its id.
    pub fn add(&mut self, resource: Box<dyn Resource>) -> ResourceId {
        self.insert(None, resource)
    }

    /// Insert a resource contained in `parent` and return its id.
    pub fn add_child(&mut self, parent: ResourceId, resource: Box<dyn Resource>) -> ResourceId {
        self.insert(Some(parent), resource)
    }

    fn insert(&mut self, parent: Option<ResourceId>, resource: Box<dyn Resource>) -> ResourceId {
        let id = self.slots.len();
        self.index.insert(resource.reference(), id);
        self.slots.push(Some(resource));
        self.parents.push(parent);
        id
    }

    /// Remove a resource, returning it. Its id is never reused.
    pub fn remove(&mut self, id: ResourceId) -> Option<Box<dyn Resource>> {
        let resource = self.slots.get_mut(id)?.take()?;
        self.index.remove(&resource.reference());
        Some(resource)
    }

    pub fn get(&self, id: ResourceId) -> Option<&dyn Resource> {
        self.slots.get(id)?.as_deref()
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut (dyn Resource + 'static)> {
        self.slots.get_mut(id)?.as_deref_mut()
    }

    /// Resolve a printable reference to its id.
    pub fn resolve(&self, reference: &str) -> Option<ResourceId> {
        self.index.get(reference).copied()
    }

    pub fn parent(&self, id: ResourceId) -> Option<ResourceId> {
        *self.parents.get(id)?
    }

    /// Ids of live resources, in insertion order.
    pub fn ids(&self) -> Vec<ResourceId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Printable reference for a slot, usable even mid-mutation.
    pub fn reference(&self, id: ResourceId) -> String {
        match self.get(id) {
            Some(resource) => resource.reference(),
            None => format!("<removed resource {id}>"),
        }
    }

    pub fn is_container(&self, id: ResourceId) -> bool {
        self.get(id).is_some_and(Resource::is_container)
    }

    /// The non-container member closure of a container: members of nested
    /// containers are flattened in, containers themselves are not included.
    pub fn member_closure(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut members = Vec::new();
        for child in self.children(id) {
            if self.is_container(child) {
                members.extend(self.member_closure(child));
            } else {
                members.push(child);
            }
        }
        members
    }

    /// Direct children of a resource, in insertion order.
    pub fn children(&self, id: ResourceId) -> Vec<ResourceId> {
        self.parents
            .iter()
            .enumerate()
            .filter_map(|(child, parent)| {
                (*parent == Some(id) && self.get(child).is_some()).then_some(child)
            })
            .collect()
    }

    /// The distinct kinds of live resources.
    pub fn kinds(&self) -> BTreeSet<String> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.get(id).map(|r| r.kind().to_string()))
            .collect()
    }
}
