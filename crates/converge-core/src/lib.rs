//! Core data model for the converge transaction engine.
//!
//! Provides the labeled relationship multigraph ([`graph::Graph`]), the
//! resource contract and catalog arena, the change/event model, and
//! transaction configuration.

pub mod change;
pub mod config;
pub mod graph;
pub mod resource;
