//! A single transaction: sequential evaluation of a sorted catalog with
//! event routing, failure propagation, cleanup, and rollback.

use crate::relationship::{self, PrepareError};
use crate::report::{LogLevel, ReportSink, ResourceMetrics, log_to};
use chrono::Utc;
use converge_core::change::{Change, Event};
use converge_core::config::TransactionConfig;
use converge_core::graph::{Direction, Edge, Graph};
use converge_core::resource::{Catalog, Resource, ResourceId};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// One run of the engine over a catalog.
///
/// Call order: [`evaluate`](Self::evaluate), then
/// [`generate_report`](Self::generate_report); [`rollback`](Self::rollback)
/// is an independent entry point consuming the recorded changes. A
/// transaction is not reentrant: evaluating twice is undefined.
pub struct Transaction<'a> {
    pub(crate) catalog: Catalog,
    pub(crate) config: TransactionConfig,
    pub(crate) report: &'a mut dyn ReportSink,
    pub(crate) relgraph: Graph,
    pub(crate) sorted: Vec<ResourceId>,
    pub(crate) cursor: usize,
    pub(crate) failures: BTreeMap<ResourceId, u32>,
    pub(crate) targets: BTreeMap<ResourceId, Vec<Edge>>,
    pub(crate) triggered: BTreeMap<ResourceId, BTreeMap<String, u32>>,
    pub(crate) changes: Vec<Change>,
    pub(crate) generated: Vec<ResourceId>,
    pub(crate) metrics: ResourceMetrics,
    pub(crate) time_metrics: BTreeMap<String, f64>,
}

impl<'a> Transaction<'a> {
    pub fn new(
        catalog: Catalog,
        config: TransactionConfig,
        report: &'a mut dyn ReportSink,
    ) -> Self {
        Self {
            catalog,
            config,
            report,
            relgraph: Graph::new(),
            sorted: Vec::new(),
            cursor: 0,
            failures: BTreeMap::new(),
            targets: BTreeMap::new(),
            triggered: BTreeMap::new(),
            changes: Vec::new(),
            generated: Vec::new(),
            metrics: ResourceMetrics::default(),
            time_metrics: BTreeMap::new(),
        }
    }

    /// Drive every resource through evaluation, in topological order.
    /// Recoverable failures are absorbed into the failure table and the
    /// report; only preparation errors surface here. Dynamically generated
    /// resources are removed before returning, on every path.
    pub fn evaluate(&mut self) -> Result<Vec<Event>, PrepareError> {
        self.report.open();
        if let Err(e) = self.prepare() {
            self.report.close();
            self.cleanup();
            return Err(e);
        }

        let mut events = Vec::new();
        self.cursor = 0;
        while self.cursor < self.sorted.len() {
            let id = self.sorted[self.cursor];
            events.extend(self.eval_resource(id));
            self.cursor += 1;
        }

        self.report.close();
        self.cleanup();
        Ok(events)
    }

    /// Prefetch providers, run pre-evaluation generation to a fixed point,
    /// then build the relationship graph and its ordering.
    fn prepare(&mut self) -> Result<(), PrepareError> {
        self.prefetch();
        self.generate();
        let (graph, sorted) = relationship::build(&self.catalog)?;
        self.relgraph = graph;
        self.sorted = sorted;
        Ok(())
    }

    /// Call the class-level prefetch once per distinct provider name, in
    /// catalog order. A prefetch failure is logged and does not stop the
    /// run.
    fn prefetch(&mut self) {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for id in self.catalog.ids() {
            let Some(resource) = self.catalog.get(id) else {
                continue;
            };
            let Some(provider) = resource.provider() else {
                continue;
            };
            if !seen.insert(provider.name().to_string()) {
                continue;
            }
            if let Err(e) = provider.prefetch() {
                let message = format!("Provider {} prefetch failed: {}", provider.name(), e);
                log_to(self.report, LogLevel::Warning, &resource.reference(), &message);
            }
        }
    }

    /// Fixed point of pre-evaluation generation: keep asking new resources
    /// to generate until a pass contributes nothing.
    fn generate(&mut self) {
        let mut pending = self.catalog.ids();
        while !pending.is_empty() {
            let mut made: Vec<(ResourceId, Box<dyn Resource>)> = Vec::new();
            for id in pending {
                let Some(resource) = self.catalog.get_mut(id) else {
                    continue;
                };
                for child in resource.generate() {
                    made.push((id, child));
                }
            }
            pending = made
                .into_iter()
                .map(|(parent, child)| {
                    let id = self.catalog.add_child(parent, child);
                    self.generated.push(id);
                    id
                })
                .collect();
        }
    }

    /// Evaluate one resource: filter, apply, deliver triggers, route the
    /// emitted events into subscription edges.
    fn eval_resource(&mut self, id: ResourceId) -> Vec<Event> {
        let reference = self.catalog.reference(id);
        if !self.tagged(id) {
            log_to(
                self.report,
                LogLevel::Debug,
                &reference,
                &format!("Not tagged with {}", self.config.tags),
            );
            return Vec::new();
        }
        if !self.scheduled(id) {
            log_to(self.report, LogLevel::Debug, &reference, "Not scheduled");
            return Vec::new();
        }
        self.metrics.scheduled += 1;

        let kind = self
            .catalog
            .get(id)
            .map(|r| r.kind().to_string())
            .unwrap_or_default();
        let start = Instant::now();
        let mut events = self.apply(id);
        *self.time_metrics.entry(kind).or_default() += start.elapsed().as_secs_f64();

        events.extend(self.trigger(id));

        for edge in self.relgraph.matching_edges(&events) {
            self.targets.entry(edge.target).or_default().push(edge);
        }
        events
    }

    /// Whether the configured tag filter admits this resource.
    fn tagged(&self, id: ResourceId) -> bool {
        if self.config.ignoretags {
            return true;
        }
        let tags = self.config.tag_list();
        if tags.is_empty() {
            return true;
        }
        let Some(resource) = self.catalog.get(id) else {
            return false;
        };
        let own = resource.tags();
        tags.iter().any(|t| t == resource.kind() || own.contains(t))
    }

    fn scheduled(&self, id: ResourceId) -> bool {
        self.config.ignoreschedules || self.catalog.get(id).is_some_and(|r| r.scheduled())
    }

    /// Apply one resource: skip on failed dependencies, run eval-time
    /// generation, evaluate, and drive each change forward.
    fn apply(&mut self, id: ResourceId) -> Vec<Event> {
        let reference = self.catalog.reference(id);

        // A failure anywhere upstream blocks the whole subtree.
        let dependencies = self.relgraph.reversal().tree_from_vertex(id);
        let failed: Vec<ResourceId> = dependencies
            .keys()
            .copied()
            .filter(|&d| d != id && self.failure_count(d) > 0)
            .collect();
        if !failed.is_empty() {
            for d in failed {
                let message = format!(
                    "Dependency {} has {} failures",
                    self.catalog.reference(d),
                    self.failure_count(d)
                );
                log_to(self.report, LogLevel::Warning, &reference, &message);
            }
            log_to(
                self.report,
                LogLevel::Warning,
                &reference,
                "Skipping because of failed dependencies",
            );
            self.metrics.skipped += 1;
            return Vec::new();
        }

        self.eval_generate(id);

        let changes = {
            let Some(resource) = self.catalog.get_mut(id) else {
                return Vec::new();
            };
            match resource.evaluate() {
                Ok(changes) => changes,
                Err(e) => {
                    log_to(
                        self.report,
                        LogLevel::Err,
                        &reference,
                        &format!("Failed to retrieve current state: {e}"),
                    );
                    if self.config.trace {
                        log_to(self.report, LogLevel::Debug, &reference, &format!("{e:?}"));
                    }
                    *self.failures.entry(id).or_default() += 1;
                    return Vec::new();
                }
            }
        };

        if changes.is_empty() {
            return Vec::new();
        }
        self.metrics.out_of_sync += 1;

        let mut events = Vec::new();
        for mut change in changes {
            change.stamp(id);
            let index = self.changes.len();
            self.changes.push(change);
            match self.changes[index].forward() {
                Ok(applied) => {
                    if !applied.is_empty() {
                        self.changes[index].changed = true;
                        self.metrics.applied += 1;
                        events.extend(applied);
                    }
                }
                Err(e) => {
                    let change = &self.changes[index];
                    let message = format!(
                        "change from {} to {} failed: {}",
                        change.is_to_s(),
                        change.should_to_s(),
                        e
                    );
                    log_to(self.report, LogLevel::Err, &reference, &message);
                    if self.config.trace {
                        log_to(self.report, LogLevel::Debug, &reference, &format!("{e:?}"));
                    }
                    *self.failures.entry(id).or_default() += 1;
                }
            }
        }

        // The resource produced changes: stamp the sync time and let it
        // write back buffered state.
        let now = Utc::now();
        let flushed = match self.catalog.get_mut(id) {
            Some(resource) => {
                resource.mark_synced(now);
                resource.flush()
            }
            None => Ok(()),
        };
        if let Err(e) = flushed {
            log_to(
                self.report,
                LogLevel::Err,
                &reference,
                &format!("Could not flush: {e}"),
            );
            *self.failures.entry(id).or_default() += 1;
        }

        events
    }

    /// Insert resources contributed mid-apply: each child inherits the
    /// generator's incident edges and runs later in this same pass.
    fn eval_generate(&mut self, id: ResourceId) {
        let children = match self.catalog.get_mut(id) {
            Some(resource) => resource.eval_generate(),
            None => return,
        };
        if children.is_empty() {
            return;
        }

        let outbound: Vec<Edge> = self
            .relgraph
            .adjacent_edges(id, Direction::Out)
            .into_iter()
            .cloned()
            .collect();
        let inbound: Vec<Edge> = self
            .relgraph
            .adjacent_edges(id, Direction::In)
            .into_iter()
            .cloned()
            .collect();

        let mut insert_at = (self.cursor + 1).min(self.sorted.len());
        for child in children {
            let child_id = self.catalog.add_child(id, child);
            self.relgraph.add_vertex(child_id);
            for edge in &outbound {
                self.relgraph
                    .add_edge(child_id, edge.target, edge.label.clone());
            }
            for edge in &inbound {
                self.relgraph
                    .add_edge(edge.source, child_id, edge.label.clone());
            }
            self.sorted.insert(insert_at, child_id);
            insert_at += 1;
            self.generated.push(child_id);
        }
    }

    /// Remove every generated resource from the catalog and the graph,
    /// giving each its `remove` hook first.
    fn cleanup(&mut self) {
        for id in std::mem::take(&mut self.generated) {
            if let Some(mut resource) = self.catalog.remove(id) {
                resource.remove();
            }
            self.relgraph.remove_vertex(id);
        }
    }

    /// Revert recorded changes in strict reverse insertion order. Only
    /// changes that actually applied are reverted; a failed reversal is
    /// logged and dropped. Reversal events are routed and triggered like
    /// forward ones.
    pub fn rollback(&mut self) -> Vec<Event> {
        self.report.open();
        self.targets.clear();
        self.triggered.clear();

        let mut events = Vec::new();
        for index in (0..self.changes.len()).rev() {
            if !self.changes[index].changed {
                continue;
            }
            let Some(id) = self.changes[index].resource() else {
                continue;
            };
            let reference = self.catalog.reference(id);
            match self.changes[index].backward() {
                Ok(reverted) => {
                    for edge in self.relgraph.matching_edges(&reverted) {
                        self.targets.entry(edge.target).or_default().push(edge);
                    }
                    events.extend(reverted);
                    events.extend(self.trigger(id));
                }
                Err(e) => {
                    log_to(
                        self.report,
                        LogLevel::Err,
                        &reference,
                        &format!("rollback failed: {e}"),
                    );
                    if self.config.trace {
                        log_to(self.report, LogLevel::Debug, &reference, &format!("{e:?}"));
                    }
                }
            }
        }
        self.report.close();
        events
    }

    /// Emit the final metric groups into the report sink and stamp it.
    pub fn generate_report(&mut self) {
        self.metrics.total = self.sorted.len() as u64;
        let failed = self.failures.values().filter(|&&c| c > 0).count() as u64;
        self.report
            .new_metric("resources", self.metrics.as_values(failed));

        // Only aggregate time is emitted; per-kind entries stay internal.
        let kinds = self.catalog.kinds();
        let total: f64 = self.time_metrics.values().sum();
        let mut times: BTreeMap<String, f64> = self
            .time_metrics
            .iter()
            .filter(|(name, _)| !kinds.contains(*name))
            .map(|(name, secs)| (name.clone(), *secs))
            .collect();
        times.insert("total".to_string(), total);
        self.report.new_metric("time", times);

        self.report.new_metric(
            "changes",
            BTreeMap::from([("total".to_string(), self.changes.len() as f64)]),
        );
        self.report.set_time(Utc::now());
    }

    // Accessors, mostly for callers inspecting the outcome.

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn relationship_graph(&self) -> &Graph {
        &self.relgraph
    }

    /// The evaluation order, including resources inserted mid-run.
    pub fn sorted_resources(&self) -> &[ResourceId] {
        &self.sorted
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn metrics(&self) -> &ResourceMetrics {
        &self.metrics
    }

    pub fn failure_count(&self, id: ResourceId) -> u32 {
        self.failures.get(&id).copied().unwrap_or(0)
    }

    /// Subscription edges routed to a resource so far.
    pub fn targets_for(&self, id: ResourceId) -> &[Edge] {
        self.targets.get(&id).map_or(&[], Vec::as_slice)
    }

    /// How many times a callback fired on a resource.
    pub fn triggered_count(&self, id: ResourceId, callback: &str) -> u32 {
        self.triggered
            .get(&id)
            .and_then(|calls| calls.get(callback))
            .copied()
            .unwrap_or(0)
    }
}
