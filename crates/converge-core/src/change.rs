//! Property-level diffs and the events their application emits.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kind synthesized when a subscription callback fires.
pub const TRIGGERED: &str = "triggered";

/// An event emitted by change application or synthesized by the trigger
/// engine, used to route subscription callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub source: NodeId,
    pub message: String,
}

/// Failure of a property call-out (`sync` / `unsync`).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PropertyError(String);

impl PropertyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A single property-level state transition on a resource.
///
/// `sync` applies the desired value and `unsync` reverts to the recorded
/// prior value. Each returns one entry per applied step; `None` entries are
/// no-ops and produce no event.
pub trait Property {
    /// Property name, e.g. `content` or `ensure`.
    fn name(&self) -> &str;

    /// Printable current value, for diagnostics.
    fn is_to_s(&self) -> String;

    /// Printable desired value, for diagnostics.
    fn should_to_s(&self) -> String;

    fn sync(&mut self) -> Result<Vec<Option<String>>, PropertyError>;

    fn unsync(&mut self) -> Result<Vec<Option<String>>, PropertyError>;
}

/// A recorded diff with forward and backward application.
///
/// The owning resource is stamped by the engine when the change is recorded;
/// ownership by the transaction's change list replaces the back-pointer the
/// engine's report refers to.
pub struct Change {
    property: Box<dyn Property>,
    resource: Option<NodeId>,
    /// True once `forward` produced at least one non-null event.
    pub changed: bool,
}

impl Change {
    pub fn new(property: Box<dyn Property>) -> Self {
        Self {
            property,
            resource: None,
            changed: false,
        }
    }

    /// The owning resource, once stamped.
    pub fn resource(&self) -> Option<NodeId> {
        self.resource
    }

    /// Record the owning resource. Called by the engine when the change is
    /// appended to the transaction.
    pub fn stamp(&mut self, resource: NodeId) {
        self.resource = Some(resource);
    }

    pub fn property_name(&self) -> &str {
        self.property.name()
    }

    pub fn is_to_s(&self) -> String {
        self.property.is_to_s()
    }

    pub fn should_to_s(&self) -> String {
        self.property.should_to_s()
    }

    /// Apply the change. Returns the non-null events the property emitted.
    pub fn forward(&mut self) -> Result<Vec<Event>, PropertyError> {
        let message = format!(
            "{} changed '{}' to '{}'",
            self.property.name(),
            self.property.is_to_s(),
            self.property.should_to_s()
        );
        let steps = self.property.sync()?;
        Ok(self.events_from(steps, &message))
    }

    /// Revert the change to the recorded prior value.
    pub fn backward(&mut self) -> Result<Vec<Event>, PropertyError> {
        let message = format!(
            "{} reverted to '{}'",
            self.property.name(),
            self.property.is_to_s()
        );
        let steps = self.property.unsync()?;
        Ok(self.events_from(steps, &message))
    }

    fn events_from(&self, steps: Vec<Option<String>>, message: &str) -> Vec<Event> {
        let source = self.resource.unwrap_or_default();
        steps
            .into_iter()
            .flatten()
            .map(|kind| Event {
                kind,
                source,
                message: message.to_string(),
            })
            .collect()
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("resource", &self.resource)
            .field("property", &self.property.name())
            .field("changed", &self.changed)
            .finish()
    }
}
