//! Network Layer
//!
//! WebSocket transport. Carries start and cash-out requests in and round
//! events out; holds no game rules of its own.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
