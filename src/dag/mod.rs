// src/dag/mod.rs

//! Image dependency graph.
//!
//! - [`node`] holds node identity and adjacency.
//! - [`graph`] is the node arena with lookups and cycle detection.
//! - [`builder`] inserts definitions one at a time, resolving forward
//!   references through a pending table and rejecting cycles up front.

pub mod builder;
pub mod graph;
pub mod node;

pub use builder::GraphBuilder;
pub use graph::{Graph, ImageGraph};
pub use node::{Node, NodeId};
