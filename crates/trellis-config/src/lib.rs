//! Trellis Config
//!
//! This crate contains the serializable workflow definition types for trellis.
//! These types describe a workflow as an activity tree before it is loaded and
//! validated into a `trellis_workflow::Workflow`.
//!
//! Definitions can be loaded from:
//! - JSON files (via the CLI, e.g. `trellis run workflow.json`)
//! - Any storage that keeps them as JSON blobs
//!
//! The engine never executes these types directly. Loading flattens the tree,
//! checks that ids are unique and pairs every Fork with its Join.

mod activity;
mod enums;
mod input;
mod workflow;

pub use activity::{ActivityDef, ActivityKind};
pub use enums::JoinMode;
pub use input::InputValue;
pub use workflow::WorkflowDef;
