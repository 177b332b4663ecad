//! Trellis State
//!
//! Everything about a running workflow instance that must survive a process
//! restart lives here: the scope tree, the execution pointers and the
//! outstanding bookmarks. No execution state is held on a call stack, so an
//! instance loaded from storage can be advanced or resumed by any process.

mod bookmark;
mod error;
mod fault;
mod instance;
mod pointer;
mod scope;

pub use bookmark::Bookmark;
pub use error::StateError;
pub use fault::{Fault, FaultKind};
pub use instance::{InstanceStatus, InstanceSummary, WorkflowInstance};
pub use pointer::{ExecutionPointer, PointerId, PointerStatus};
pub use scope::{INSTANCE_SCOPE, Scope, ScopeId, VariableStore};
