//! Trellis Workflow
//!
//! This crate provides the loaded activity graph for trellis. A loaded
//! workflow is the validated, immutable form of a `WorkflowDef` that the
//! engine interprets.
//!
//! Key differences from `trellis-config`:
//! - The activity tree is flattened into a node arena keyed by activity id
//! - Activity ids are unique
//! - Every Fork is paired with the Join that closes it
//! - Parent, children and Fork/Join lookups are precomputed once at load time

mod error;
mod graph;
mod node;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use node::{Node, NodeType};
pub use trellis_config::JoinMode;
pub use workflow::Workflow;
