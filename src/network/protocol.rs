//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::core::multiplier::Multiplier;
use crate::game::events::RoundEvent;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a round.
    ///
    /// The stake is kept raw so malformed values can be rejected as an
    /// invalid stake rather than an unreadable message.
    StartGame {
        #[serde(default)]
        stake: Option<serde_json::Value>,
    },

    /// Lock in the current multiplier.
    CashOut,

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Multiplier advanced (every tick while the round is live).
    Tick { multiplier: Multiplier },

    /// Round lost.
    Crash { multiplier: Multiplier },

    /// Round won.
    Success { multiplier: Multiplier },

    /// Request rejected.
    Error(ServerError),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed.
    InvalidMessage,
    /// Stake missing, non-numeric, non-finite or not positive.
    InvalidStake,
}

impl From<RoundEvent> for ServerMessage {
    fn from(event: RoundEvent) -> Self {
        match event {
            RoundEvent::Tick(multiplier) => ServerMessage::Tick { multiplier },
            RoundEvent::Crash(multiplier) => ServerMessage::Crash { multiplier },
            RoundEvent::Success(multiplier) => ServerMessage::Success { multiplier },
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Just the `type` tag of a frame. Other fields are skipped unparsed.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Error to report for a frame that [`ClientMessage::from_json`] rejected.
///
/// A well-formed `start_game` frame can only fail on its stake (a number
/// outside the `f64` range), so it is reported as an invalid stake.
pub fn rejection_for(text: &str) -> ServerError {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) if envelope.kind == "start_game" => ServerError {
            code: ErrorCode::InvalidStake,
            message: "Invalid stake: number out of range".to_string(),
        },
        _ => ServerError {
            code: ErrorCode::InvalidMessage,
            message: "Invalid message format".to_string(),
        },
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
