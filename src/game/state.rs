//! Session State
//!
//! The authoritative record of one round for one connection, and the
//! identifiers and validated values it is built from.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::multiplier::Multiplier;

/// Opaque identity of a client channel, assigned by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Unique identifier of one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundId(pub Uuid);

impl RoundId {
    /// Fresh random round ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Game-layer errors.
///
/// None of these are fatal; each is local to one session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    /// Stake missing, non-numeric, non-finite or not positive.
    #[error("Invalid stake: {0}")]
    InvalidStake(String),

    /// A round is already active for this connection.
    #[error("Session already active for {0}")]
    DuplicateSession(ConnectionId),

    /// Cash-out with no live round to settle.
    #[error("No active round to cash out")]
    StaleCashOut,
}

/// Amount wagered, fixed for the round. Always positive and finite.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
pub struct Stake(f64);

impl Stake {
    /// A stake of one unit.
    pub const UNIT: Stake = Stake(1.0);

    /// Validate a numeric stake.
    pub fn new(value: f64) -> Result<Self, GameError> {
        if !value.is_finite() {
            return Err(GameError::InvalidStake(format!("{value} is not finite")));
        }
        if value <= 0.0 {
            return Err(GameError::InvalidStake(format!("{value} is not positive")));
        }
        Ok(Self(value))
    }

    /// Validate a stake as received on the wire.
    ///
    /// Accepts a JSON number or a numeric string; anything else, including a
    /// missing value, is rejected.
    pub fn parse(value: Option<&serde_json::Value>) -> Result<Self, GameError> {
        match value {
            None | Some(serde_json::Value::Null) => {
                Err(GameError::InvalidStake("missing".to_string()))
            }
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| GameError::InvalidStake(n.to_string()))
                .and_then(Self::new),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| GameError::InvalidStake(format!("{s:?} is not numeric")))
                .and_then(Self::new),
            Some(other) => Err(GameError::InvalidStake(format!("{other} is not numeric"))),
        }
    }

    /// Stake value.
    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Stake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round lifecycle.
///
/// ```text
/// Active ──► Crashed
///    │
///    ├─────► CashedOut
///    │
///    └─────► Terminated   (disconnect, no settlement)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Multiplier is ticking.
    Active,
    /// Round lost.
    Crashed,
    /// Round won at the captured multiplier.
    CashedOut,
    /// Connection went away before either outcome.
    Terminated,
}

impl SessionState {
    /// True for every state except `Active`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

/// One round for one connection.
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Round identifier.
    pub round_id: RoundId,
    /// Amount wagered.
    pub stake: Stake,
    /// Current (or final) multiplier.
    pub multiplier: Multiplier,
    /// Lifecycle state.
    pub state: SessionState,
    /// Ticks applied so far.
    pub ticks: u32,
    /// Informational only.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Fresh round at 1.00x.
    pub fn new(connection_id: ConnectionId, stake: Stake) -> Self {
        Self {
            connection_id,
            round_id: RoundId::new(),
            stake,
            multiplier: Multiplier::ONE,
            state: SessionState::Active,
            ticks: 0,
            created_at: Utc::now(),
        }
    }

    /// Is the round still live.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}
