//! Scripted resources and properties shared by the engine tests.
//!
//! Every call-out a [`TestResource`] receives is appended to a shared
//! [`Journal`], so tests can assert both what happened and in which order.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use converge_core::change::{Change, Property, PropertyError};
use converge_core::resource::{Catalog, Provider, Relationship, Resource, ResourceError};
use std::cell::RefCell;
use std::rc::Rc;

/// Append-only record of everything the scripted resources were asked to do.
#[derive(Default)]
pub struct Journal {
    entries: RefCell<Vec<String>>,
}

impl Journal {
    pub fn new() -> Rc<Self> {
        Rc::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.borrow().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.borrow().iter().filter(|e| *e == entry).count()
    }

    /// Index of the first occurrence, for ordering assertions.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.borrow().iter().position(|e| e == entry)
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

/// One change a scripted resource will report from `evaluate`.
#[derive(Clone)]
pub struct ChangeSpec {
    pub property: &'static str,
    pub steps: Vec<Option<String>>,
    pub fail_sync: bool,
    pub fail_unsync: bool,
}

impl ChangeSpec {
    /// A change that applies cleanly and emits one event of `kind`.
    pub fn emitting(kind: &str) -> Self {
        Self {
            property: "ensure",
            steps: vec![Some(kind.to_string())],
            fail_sync: false,
            fail_unsync: false,
        }
    }

    /// A change whose application produces only null steps.
    pub fn silent() -> Self {
        Self {
            property: "ensure",
            steps: vec![None],
            fail_sync: false,
            fail_unsync: false,
        }
    }

    /// A change whose `forward` fails.
    pub fn failing() -> Self {
        Self {
            property: "ensure",
            steps: Vec::new(),
            fail_sync: true,
            fail_unsync: false,
        }
    }

    pub fn failing_unsync(kind: &str) -> Self {
        Self {
            property: "ensure",
            steps: vec![Some(kind.to_string())],
            fail_sync: false,
            fail_unsync: true,
        }
    }

    pub fn named(mut self, property: &'static str) -> Self {
        self.property = property;
        self
    }
}

/// What a scripted resource's `evaluate` does.
pub enum Behavior {
    /// Already in the desired state: no changes.
    InSync,
    /// Out of sync: report these changes.
    Changes(Vec<ChangeSpec>),
    /// Evaluation itself blows up.
    Fail(String),
}

struct TestProperty {
    label: String,
    journal: Rc<Journal>,
    spec: ChangeSpec,
}

impl Property for TestProperty {
    fn name(&self) -> &str {
        self.spec.property
    }

    fn is_to_s(&self) -> String {
        "absent".to_string()
    }

    fn should_to_s(&self) -> String {
        "present".to_string()
    }

    fn sync(&mut self) -> Result<Vec<Option<String>>, PropertyError> {
        self.journal.record(format!("{}.sync", self.label));
        if self.spec.fail_sync {
            return Err(PropertyError::new("sync refused"));
        }
        Ok(self.spec.steps.clone())
    }

    fn unsync(&mut self) -> Result<Vec<Option<String>>, PropertyError> {
        self.journal.record(format!("{}.unsync", self.label));
        if self.spec.fail_unsync {
            return Err(PropertyError::new("unsync refused"));
        }
        Ok(self.spec.steps.clone())
    }
}

pub struct TestProvider {
    pub name: String,
    pub journal: Rc<Journal>,
    pub fail: bool,
}

impl Provider for TestProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefetch(&self) -> Result<(), ResourceError> {
        self.journal.record(format!("provider.{}.prefetch", self.name));
        if self.fail {
            return Err(ResourceError::new("prefetch refused"));
        }
        Ok(())
    }
}

/// A fully scripted resource.
pub struct TestResource {
    kind: String,
    name: String,
    journal: Rc<Journal>,
    behavior: Behavior,
    relationships: Vec<Relationship>,
    tags: Vec<String>,
    scheduled: bool,
    container: bool,
    autorequires: Vec<String>,
    callbacks: Vec<String>,
    fail_callbacks: bool,
    eval_children: Vec<TestResource>,
    gen_children: Vec<TestResource>,
    provider: Option<TestProvider>,
}

impl TestResource {
    pub fn new(kind: &str, name: &str, journal: &Rc<Journal>) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            journal: Rc::clone(journal),
            behavior: Behavior::InSync,
            relationships: Vec::new(),
            tags: Vec::new(),
            scheduled: true,
            container: false,
            autorequires: Vec::new(),
            callbacks: Vec::new(),
            fail_callbacks: false,
            eval_children: Vec::new(),
            gen_children: Vec::new(),
            provider: None,
        }
    }

    /// One clean change emitting an event of `kind`.
    pub fn changing(mut self, kind: &str) -> Self {
        self.behavior = Behavior::Changes(vec![ChangeSpec::emitting(kind)]);
        self
    }

    pub fn with_changes(mut self, specs: Vec<ChangeSpec>) -> Self {
        self.behavior = Behavior::Changes(specs);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.behavior = Behavior::Fail(message.to_string());
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn unscheduled(mut self) -> Self {
        self.scheduled = false;
        self
    }

    pub fn as_container(mut self) -> Self {
        self.container = true;
        self
    }

    pub fn with_autorequire(mut self, peer: &str) -> Self {
        self.autorequires.push(peer.to_string());
        self
    }

    /// Accept a named callback (e.g. `refresh`, `restart`).
    pub fn with_callback(mut self, name: &str) -> Self {
        self.callbacks.push(name.to_string());
        self
    }

    pub fn failing_callbacks(mut self) -> Self {
        self.fail_callbacks = true;
        self
    }

    pub fn with_eval_child(mut self, child: TestResource) -> Self {
        self.eval_children.push(child);
        self
    }

    pub fn with_gen_child(mut self, child: TestResource) -> Self {
        self.gen_children.push(child);
        self
    }

    pub fn with_provider(mut self, name: &str, fail: bool) -> Self {
        self.provider = Some(TestProvider {
            name: name.to_string(),
            journal: Rc::clone(&self.journal),
            fail,
        });
        self
    }

    pub fn boxed(self) -> Box<dyn Resource> {
        Box::new(self)
    }
}

impl Resource for TestResource {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_container(&self) -> bool {
        self.container
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.relationships.clone()
    }

    fn autorequire(&self, _catalog: &Catalog) -> Vec<String> {
        self.autorequires.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn scheduled(&self) -> bool {
        self.scheduled
    }

    fn provider(&self) -> Option<&dyn Provider> {
        self.provider.as_ref().map(|p| p as &dyn Provider)
    }

    fn evaluate(&mut self) -> Result<Vec<Change>, ResourceError> {
        self.journal.record(format!("{}.evaluate", self.name));
        match &self.behavior {
            Behavior::InSync => Ok(Vec::new()),
            Behavior::Changes(specs) => Ok(specs
                .iter()
                .map(|spec| {
                    Change::new(Box::new(TestProperty {
                        label: format!("{}.{}", self.name, spec.property),
                        journal: Rc::clone(&self.journal),
                        spec: spec.clone(),
                    }))
                })
                .collect()),
            Behavior::Fail(message) => Err(ResourceError::new(message.clone())),
        }
    }

    fn generate(&mut self) -> Vec<Box<dyn Resource>> {
        std::mem::take(&mut self.gen_children)
            .into_iter()
            .map(TestResource::boxed)
            .collect()
    }

    fn eval_generate(&mut self) -> Vec<Box<dyn Resource>> {
        std::mem::take(&mut self.eval_children)
            .into_iter()
            .map(TestResource::boxed)
            .collect()
    }

    fn flush(&mut self) -> Result<(), ResourceError> {
        self.journal.record(format!("{}.flush", self.name));
        Ok(())
    }

    fn mark_synced(&mut self, _time: DateTime<Utc>) {
        self.journal.record(format!("{}.synced", self.name));
    }

    fn remove(&mut self) {
        self.journal.record(format!("{}.remove", self.name));
    }

    fn call_callback(&mut self, name: &str) -> Result<(), ResourceError> {
        self.journal.record(format!("{}.{}", self.name, name));
        if self.fail_callbacks {
            return Err(ResourceError::new(format!("{name} refused")));
        }
        if self.callbacks.iter().any(|c| c == name) {
            Ok(())
        } else {
            Err(ResourceError::new(format!(
                "{} does not support callback '{}'",
                self.reference(),
                name
            )))
        }
    }
}
