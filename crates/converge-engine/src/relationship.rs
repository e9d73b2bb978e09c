//! Builds the relationship graph a transaction evaluates over.
//!
//! Declared relationships become labeled edges, container-incident edges are
//! spliced onto the containers' member closures, auto-required edges fill in
//! where nothing is declared, and the result is topologically sorted.

use converge_core::graph::{EdgeLabel, EventFilter, Graph, GraphError};
use converge_core::resource::{Catalog, RelationshipKind, ResourceId};
use std::collections::BTreeMap;

/// Callback a notify/subscribe edge carries when none is declared.
pub const REFRESH: &str = "refresh";

/// Fatal failures while preparing the relationship graph. Nothing has been
/// applied when one of these is raised.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("{source_ref} declares a relationship to unknown resource '{peer}'")]
    UnresolvedReference { source_ref: String, peer: String },
    #[error("dependency cycle detected: {0}")]
    Cycle(String),
}

/// Build the relationship graph and its topological ordering.
pub fn build(catalog: &Catalog) -> Result<(Graph, Vec<ResourceId>), PrepareError> {
    let mut graph = Graph::new();

    // Declared edges, containers included for now
    for id in catalog.ids() {
        graph.add_vertex(id);
        let Some(resource) = catalog.get(id) else {
            continue;
        };
        for declared in resource.relationships() {
            let Some(peer) = catalog.resolve(&declared.peer) else {
                return Err(PrepareError::UnresolvedReference {
                    source_ref: resource.reference(),
                    peer: declared.peer,
                });
            };
            let (source, target) = match declared.kind {
                RelationshipKind::Require | RelationshipKind::Subscribe => (peer, id),
                RelationshipKind::Before | RelationshipKind::Notify => (id, peer),
            };
            let label = match declared.kind {
                // Subscription edges react to any event unless narrowed,
                // and always carry a callback.
                RelationshipKind::Notify | RelationshipKind::Subscribe => EdgeLabel {
                    event: declared.event.map_or(EventFilter::Any, EventFilter::Kind),
                    callback: Some(declared.callback.unwrap_or_else(|| REFRESH.to_string())),
                },
                // Ordering edges react to nothing unless an event was
                // declared explicitly.
                RelationshipKind::Require | RelationshipKind::Before => EdgeLabel {
                    event: declared.event.map_or(EventFilter::None, EventFilter::Kind),
                    callback: declared.callback,
                },
            };
            graph.add_edge(source, target, label);
        }
    }

    // Splice containers onto their member closures
    let members: BTreeMap<ResourceId, Vec<ResourceId>> = catalog
        .ids()
        .into_iter()
        .filter(|&id| catalog.is_container(id))
        .map(|id| (id, catalog.member_closure(id)))
        .collect();
    graph.splice(&members);

    // Auto-required edges, only where nothing connects the pair yet.
    // References to resources absent from the catalog are not an error: a
    // resource only auto-requires peers that happen to be managed.
    for id in graph.vertices().to_vec() {
        let Some(resource) = catalog.get(id) else {
            continue;
        };
        for peer_ref in resource.autorequire(catalog) {
            if let Some(peer) = catalog.resolve(&peer_ref)
                && graph.contains(peer)
                && !graph.has_edge(peer, id)
            {
                graph.add_edge(peer, id, EdgeLabel::default());
            }
        }
    }

    let sorted = graph.topsort().map_err(|e| match e {
        GraphError::Cycle(cycle) => PrepareError::Cycle(render_cycle(catalog, &cycle)),
    })?;

    Ok((graph, sorted))
}

/// Render a cycle as `a[x] -> b[y] -> a[x]` for the error message.
fn render_cycle(catalog: &Catalog, cycle: &[ResourceId]) -> String {
    let mut names: Vec<String> = cycle.iter().map(|&id| catalog.reference(id)).collect();
    if let Some(first) = names.first().cloned() {
        names.push(first);
    }
    names.join(" -> ")
}
