//! Dependency graph over ecosystem projects
//!
//! Built on petgraph. Edges come from pinned manifest requirements between
//! projects; the graph yields release levels and dependent sets.

pub mod release_graph;

pub use release_graph::ReleaseGraph;
