//! Trellis Workflow Engine
//!
//! This crate interprets activity graphs and hosts long-running workflow
//! instances: it advances execution pointers, forks and joins branches,
//! suspends on bookmarks and resumes when a trigger worker delivers an event.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkflowHost                          │
//! │  - one mailbox task per instance (single writer)            │
//! │  - persists through InstanceStore                           │
//! │  - keeps WorkerManager references in step with bookmarks    │
//! │  - run(deliveries) routes trigger events to bookmarks       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - advance / resume / cancel on a WorkflowInstance          │
//! │  - sequence, fork and join semantics                        │
//! │  - input resolution via ExpressionEvaluator                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ActivityRegistry                          │
//! │  - leaf activity implementations by type name               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let engine = Engine::new(ActivityRegistry::with_builtins());
//! let workflow = Workflow::load(definition)?;
//!
//! let cancel = CancellationToken::new();
//! let (mut instance, report) = engine.start(&workflow, input, &cancel).await?;
//!
//! // Later, when the awaited message arrives:
//! let bookmark_id = report.created_bookmarks[0].bookmark_id.clone();
//! engine.resume(&workflow, &mut instance, &bookmark_id, payload, &cancel).await?;
//! ```

mod activity;
mod builtins;
mod engine;
mod error;
mod events;
mod fs_store;
mod host;
mod leases;
mod memory_store;
mod store;

pub use activity::{
  Activity, ActivityContext, ActivityError, ActivityInputs, ActivityOutcome, ActivityOutputs,
  ActivityRegistry, BookmarkRequest,
};
pub use builtins::{
  AssignActivity, FailActivity, ReceiveMessageActivity, SetCorrelationIdActivity,
};
pub use engine::{Engine, StepReport};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use host::{DispatchReport, HostConfig, RecoveryReport, WorkflowHost};
pub use store::{FsInstanceStore, InMemoryInstanceStore, InstanceStore, StoreError};
