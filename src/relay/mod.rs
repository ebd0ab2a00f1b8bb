//! Relay core: per-stream actors, their registry, and the event router.

pub mod actor;
pub mod registry;
pub mod router;

pub use actor::{ActorDeps, ActorHandle, ActorSettings, ProcessedEvent};
pub use registry::ActorRegistry;
pub use router::EventRouter;
