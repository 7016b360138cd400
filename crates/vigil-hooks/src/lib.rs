//! vigil-hooks: In-process event buses.
//!
//! Conversation activity (transcript appends, agent turn lifecycle, session
//! discovery) and job lifecycle notifications are fanned out to subscribers
//! through typed observer registries owned by a single [`EventHub`].

pub mod events;
pub mod registry;

pub use events::{HookEvent, JobAction, JobEvent};
pub use registry::{EventBus, EventHub, Subscription};
