//! Trigger workers for trellis.
//!
//! A [`Worker`] listens on one [`TriggerIdentity`] (a queue or topic plus an
//! optional subscription) and is shared by every workflow instance holding a
//! bookmark on that identity. The [`WorkerManager`] reference-counts workers,
//! guarantees at most one worker per identity, and forwards inbound events
//! as [`Delivery`] messages to whoever resumes workflows.
//!
//! # Architecture
//!
//! ```text
//! TriggerTransport ──listen──▶ Worker (listen loop) ──Delivery──▶ mpsc ──▶ host
//!        ▲                          ▲
//!        └────────close─────────────┤
//!                           WorkerManager
//!                  start / stop / remove / find
//! ```

mod error;
mod event;
mod identity;
mod manager;
mod transport;
mod worker;

pub use error::TriggerError;
pub use event::{Delivery, TriggerEvent};
pub use identity::TriggerIdentity;
pub use manager::WorkerManager;
pub use transport::{InMemoryTransport, TriggerTransport};
pub use worker::{Worker, WorkerState};
