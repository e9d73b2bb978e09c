//! Upward-recursive delivery of routed subscription edges.
//!
//! When a resource finishes applying, its accumulated subscription edges
//! are delivered to it and to every ancestor up the container chain, so a
//! subscriber buried in a container still sees events routed to its
//! enclosing scope.

use crate::report::{LogLevel, log_to};
use crate::transaction::Transaction;
use converge_core::change::{Event, TRIGGERED};
use converge_core::resource::ResourceId;

impl Transaction<'_> {
    /// Deliver accumulated subscription edges to `child` and each of its
    /// ancestors, bottom-up. Returns the synthesized `triggered` events.
    pub fn trigger(&mut self, child: ResourceId) -> Vec<Event> {
        let mut events = Vec::new();
        let mut next = Some(child);
        while let Some(id) = next {
            self.trigger_one(id, &mut events);
            next = self.catalog.parent(id);
        }
        events
    }

    /// Fire the callbacks routed to a single resource. Edges without a
    /// callback are ordering-only and contribute nothing here. Within one
    /// resource, callbacks run in insertion order of their first
    /// contributing edge.
    fn trigger_one(&mut self, id: ResourceId, events: &mut Vec<Event>) {
        let callbacks: Vec<(String, usize)> = {
            let Some(edges) = self.targets.get(&id) else {
                return;
            };
            let mut grouped: Vec<(String, usize)> = Vec::new();
            for edge in edges {
                let Some(callback) = &edge.label.callback else {
                    continue;
                };
                match grouped.iter_mut().find(|(name, _)| name == callback) {
                    Some((_, count)) => *count += 1,
                    None => grouped.push((callback.clone(), 1)),
                }
            }
            grouped
        };
        if callbacks.is_empty() {
            return;
        }

        let reference = self.catalog.reference(id);
        for (callback, subscriptions) in callbacks {
            log_to(
                self.report,
                LogLevel::Info,
                &reference,
                &format!("Triggering '{callback}' from {subscriptions} dependencies"),
            );
            let outcome = match self.catalog.get_mut(id) {
                Some(resource) => resource.call_callback(&callback),
                None => continue,
            };
            match outcome {
                Ok(()) => self.metrics.restarted += 1,
                Err(e) => {
                    log_to(
                        self.report,
                        LogLevel::Err,
                        &reference,
                        &format!("Failed to call {callback}: {e}"),
                    );
                    if self.config.trace {
                        log_to(self.report, LogLevel::Debug, &reference, &format!("{e:?}"));
                    }
                    self.metrics.failed_restarts += 1;
                }
            }
            events.push(Event {
                kind: TRIGGERED.to_string(),
                source: id,
                message: format!("Triggered '{callback}'"),
            });
            *self
                .triggered
                .entry(id)
                .or_default()
                .entry(callback)
                .or_default() += 1;
        }
    }
}
