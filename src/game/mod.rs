//! Game Logic Module
//!
//! The per-session crash game engine.
//!
//! ## Module Structure
//!
//! - `crash`: Crash probability curve
//! - `state`: Session record, stake validation, errors
//! - `events`: Outbound round events and the sink they flow through
//! - `engine`: Tick step and the per-round ticking task
//! - `arbiter`: Per-round lock resolving crash vs cash-out
//! - `registry`: Connection to live round mapping

pub mod arbiter;
pub mod crash;
pub mod engine;
pub mod events;
pub mod registry;
pub mod state;

// Re-export key types
pub use arbiter::Round;
pub use crash::crash_probability;
pub use engine::{EngineConfig, TickOutcome};
pub use events::{EventSink, RoundEvent};
pub use registry::SessionRegistry;
pub use state::{ConnectionId, GameError, RoundId, Session, SessionState, Stake};
