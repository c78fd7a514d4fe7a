//! Trellis Engine
//!
//! Drives a [`WorkflowGraph`](trellis_graph::WorkflowGraph) from many
//! concurrent workers without races.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     GraphHandle (Clone)                  │
//! │  - add_task / update_task / reset_task                   │
//! │  - complete_task(id, state, context) -> next tasks       │
//! └──────────────────────────────────────────────────────────┘
//!                             │ mpsc + oneshot reply
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     GraphCoordinator                     │
//! │  - owns the graph, applies commands one at a time        │
//! │  - start(cancel) runs the loop, returns the final graph  │
//! │  - emits GraphEvents through an EventNotifier            │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod coordinator;
mod error;
mod events;

pub use coordinator::{CoordinatorConfig, DEFAULT_BUFFER_SIZE, GraphCoordinator, GraphHandle};
pub use error::EngineError;
pub use events::{ChannelNotifier, EventNotifier, GraphEvent, NoopNotifier};
