//! # Crash Game Server
//!
//! Authoritative server for a real-time "crash" game. A multiplier grows on
//! a fixed cadence until a randomly timed crash; the player may cash out at
//! any moment before it. The server alone decides the multiplier and the
//! crash point.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH GAME SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── multiplier.rs - Hundredths fixed-point multiplier       │
//! │  └── rng.rs      - Injectable random sources                 │
//! │                                                              │
//! │  game/           - Per-session engine                        │
//! │  ├── crash.rs    - Crash probability curve                   │
//! │  ├── state.rs    - Session record and errors                 │
//! │  ├── events.rs   - Round events and sinks                    │
//! │  ├── engine.rs   - Tick step and ticking task                │
//! │  ├── arbiter.rs  - Crash vs cash-out serialization           │
//! │  └── registry.rs - Connection to round mapping               │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── server.rs   - WebSocket server                          │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Each live round ticks on its own task. The ticker and the request path
//! (cash-out, disconnect) mutate a round only under that round's lock, so for
//! every round exactly one of crash, success or termination is committed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::multiplier::Multiplier;
pub use crate::core::rng::{DeterministicRng, RandomSource};
pub use crate::game::events::{EventSink, RoundEvent};
pub use crate::game::registry::SessionRegistry;
pub use crate::game::state::{ConnectionId, GameError, Session, SessionState};
pub use crate::network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds between multiplier ticks.
pub const TICK_INTERVAL_MS: u64 = 100;
