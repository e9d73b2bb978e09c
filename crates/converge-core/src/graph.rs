//! Labeled directed multigraph over catalog resource slots.
//!
//! Vertices are [`NodeId`] arena indices; edges carry an [`EdgeLabel`] with
//! an event filter and an optional subscription callback. Iteration
//! order is deterministic: vertices and edges come back in insertion order,
//! and `topsort` breaks ties by vertex insertion order.

use crate::change::Event;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Index of a resource slot in the catalog arena.
pub type NodeId = usize;

/// Direction of an adjacency query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Which events an edge reacts to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFilter {
    /// Ordering-only edge: reacts to no events.
    #[default]
    None,
    /// The wildcard: reacts to every event.
    Any,
    /// Reacts to events of one kind.
    Kind(String),
}

impl EventFilter {
    /// Whether this filter admits an event of the given kind.
    pub fn matches(&self, kind: &str) -> bool {
        match self {
            EventFilter::None => false,
            EventFilter::Any => true,
            EventFilter::Kind(event) => event == kind,
        }
    }
}

/// Label on a relationship edge.
///
/// The default label is pure ordering: no event filter, no callback. A
/// callback-bearing label expresses a subscription on the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLabel {
    #[serde(default)]
    pub event: EventFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl EdgeLabel {
    /// A wildcard subscription label invoking `callback` on the target.
    pub fn subscription(callback: impl Into<String>) -> Self {
        Self {
            event: EventFilter::Any,
            callback: Some(callback.into()),
        }
    }
}

/// A directed labeled edge between two catalog resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub label: EdgeLabel,
}

/// Errors from graph algorithms.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The graph is not a DAG; the payload is one offending cycle, in edge
    /// order.
    #[error("dependency cycle detected among vertices {0:?}")]
    Cycle(Vec<NodeId>),
}

/// Labeled directed multigraph with deterministic iteration order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    vertices: Vec<NodeId>,
    /// Vertex membership and insertion rank, used for topsort tie-breaks.
    rank: BTreeMap<NodeId, usize>,
    next_rank: usize,
    edges: Vec<Edge>,
    /// Performance index: vertex to edge indices, rebuilt after removals.
    out_index: BTreeMap<NodeId, Vec<usize>>,
    in_index: BTreeMap<NodeId, Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, v: NodeId) {
        if self.rank.contains_key(&v) {
            return;
        }
        self.rank.insert(v, self.next_rank);
        self.next_rank += 1;
        self.vertices.push(v);
    }

    /// Insert an edge, adding missing endpoints. Parallel edges are kept.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, label: EdgeLabel) {
        self.add_vertex(source);
        self.add_vertex(target);
        let index = self.edges.len();
        self.edges.push(Edge {
            source,
            target,
            label,
        });
        self.out_index.entry(source).or_default().push(index);
        self.in_index.entry(target).or_default().push(index);
    }

    /// Remove a vertex and every edge incident to it.
    pub fn remove_vertex(&mut self, v: NodeId) {
        if self.rank.remove(&v).is_none() {
            return;
        }
        self.vertices.retain(|x| *x != v);
        self.edges.retain(|e| e.source != v && e.target != v);
        self.rebuild_index();
    }

    /// Remove every edge from `source` to `target`.
    pub fn remove_edge(&mut self, source: NodeId, target: NodeId) {
        self.edges
            .retain(|e| !(e.source == source && e.target == target));
        self.rebuild_index();
    }

    pub fn contains(&self, v: NodeId) -> bool {
        self.rank.contains_key(&v)
    }

    /// Vertices in insertion order.
    pub fn vertices(&self) -> &[NodeId] {
        &self.vertices
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Whether at least one edge runs from `source` to `target`.
    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.out_index
            .get(&source)
            .into_iter()
            .flatten()
            .any(|&i| self.edges[i].target == target)
    }

    /// Edges incident to `v` in the given direction, in insertion order.
    pub fn adjacent_edges(&self, v: NodeId, direction: Direction) -> Vec<&Edge> {
        let index = match direction {
            Direction::Out => &self.out_index,
            Direction::In => &self.in_index,
        };
        index
            .get(&v)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
            .collect()
    }

    /// Neighbor vertices of `v` in the given direction, in insertion order.
    /// A vertex appears once per incident edge.
    pub fn adjacent(&self, v: NodeId, direction: Direction) -> Vec<NodeId> {
        self.adjacent_edges(v, direction)
            .into_iter()
            .map(|e| match direction {
                Direction::Out => e.target,
                Direction::In => e.source,
            })
            .collect()
    }

    /// A copy of this graph with every edge flipped. Does not mutate self.
    pub fn reversal(&self) -> Graph {
        let mut graph = Graph::new();
        for &v in &self.vertices {
            graph.add_vertex(v);
        }
        for edge in &self.edges {
            graph.add_edge(edge.target, edge.source, edge.label.clone());
        }
        graph
    }

    /// The DFS tree rooted at `root`: every reachable vertex mapped to its
    /// DFS parent (`None` for the root itself). The keys are exactly the
    /// reachable set.
    pub fn tree_from_vertex(&self, root: NodeId) -> BTreeMap<NodeId, Option<NodeId>> {
        let mut tree = BTreeMap::new();
        if !self.contains(root) {
            return tree;
        }
        tree.insert(root, None);
        let mut stack = vec![root];
        while let Some(v) = stack.pop() {
            for &i in self.out_index.get(&v).into_iter().flatten() {
                let target = self.edges[i].target;
                if !tree.contains_key(&target) {
                    tree.insert(target, Some(v));
                    stack.push(target);
                }
            }
        }
        tree
    }

    /// Kahn's algorithm with ties broken by vertex insertion order, so the
    /// result is stable across runs with identical inputs.
    pub fn topsort(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: BTreeMap<NodeId, usize> =
            self.vertices.iter().map(|&v| (v, 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(&edge.target) {
                *d += 1;
            }
        }

        let mut ready: BTreeSet<(usize, NodeId)> = self
            .vertices
            .iter()
            .copied()
            .filter(|v| in_degree[v] == 0)
            .map(|v| (self.rank[&v], v))
            .collect();

        let mut sorted = Vec::with_capacity(self.vertices.len());
        while let Some(&(rank, v)) = ready.iter().next() {
            ready.remove(&(rank, v));
            sorted.push(v);
            for &i in self.out_index.get(&v).into_iter().flatten() {
                let target = self.edges[i].target;
                if let Some(d) = in_degree.get_mut(&target) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert((self.rank[&target], target));
                    }
                }
            }
        }

        if sorted.len() != self.vertices.len() {
            let remaining: BTreeSet<NodeId> = self
                .vertices
                .iter()
                .copied()
                .filter(|v| in_degree[v] > 0)
                .collect();
            return Err(GraphError::Cycle(self.find_cycle(&remaining)));
        }
        Ok(sorted)
    }

    /// Walk predecessors within `remaining` until a vertex repeats. After a
    /// stalled Kahn pass every remaining vertex has a predecessor in the
    /// remaining set, so the walk always closes a cycle.
    fn find_cycle(&self, remaining: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let Some(&start) = remaining.iter().next() else {
            return Vec::new();
        };
        let mut path = Vec::new();
        let mut position: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut current = start;
        loop {
            if let Some(&at) = position.get(&current) {
                let mut cycle = path[at..].to_vec();
                cycle.reverse();
                return cycle;
            }
            position.insert(current, path.len());
            path.push(current);
            let previous = self
                .in_index
                .get(&current)
                .into_iter()
                .flatten()
                .map(|&i| self.edges[i].source)
                .find(|s| remaining.contains(s));
            match previous {
                Some(s) => current = s,
                None => return path,
            }
        }
    }

    /// For each event, the edges whose source is the event's source and
    /// whose label matches the event kind (or is the wildcard). An edge is
    /// returned once per matching emission.
    pub fn matching_edges(&self, events: &[Event]) -> Vec<Edge> {
        let mut matched = Vec::new();
        for event in events {
            for &i in self.out_index.get(&event.source).into_iter().flatten() {
                let edge = &self.edges[i];
                if edge.label.event.matches(&event.kind) {
                    matched.push(edge.clone());
                }
            }
        }
        matched
    }

    /// Remove each container vertex, redistributing its incident edges onto
    /// its member closure: an inbound `x -> c` becomes `x -> m` for every
    /// member m, an outbound `c -> y` becomes `m -> y`. An edge between two
    /// containers expands to the cross product of both closures.
    pub fn splice(&mut self, members: &BTreeMap<NodeId, Vec<NodeId>>) {
        let expand = |v: NodeId| -> Vec<NodeId> {
            members.get(&v).cloned().unwrap_or_else(|| vec![v])
        };

        let old = std::mem::take(&mut self.edges);
        for edge in old {
            if !members.contains_key(&edge.source) && !members.contains_key(&edge.target) {
                self.edges.push(edge);
                continue;
            }
            for &source in &expand(edge.source) {
                for &target in &expand(edge.target) {
                    self.edges.push(Edge {
                        source,
                        target,
                        label: edge.label.clone(),
                    });
                }
            }
        }

        for &container in members.keys() {
            self.rank.remove(&container);
            self.vertices.retain(|v| *v != container);
        }
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.out_index.clear();
        self.in_index.clear();
        for (i, edge) in self.edges.iter().enumerate() {
            self.out_index.entry(edge.source).or_default().push(i);
            self.in_index.entry(edge.target).or_default().push(i);
        }
    }
}
