//! Round Events
//!
//! Outbound notifications produced by a round, and the seam through which the
//! transport receives them.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::multiplier::Multiplier;

/// Event emitted by a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "multiplier", rename_all = "snake_case")]
pub enum RoundEvent {
    /// Multiplier advanced.
    Tick(Multiplier),
    /// Round lost at this multiplier.
    Crash(Multiplier),
    /// Round won at this multiplier.
    Success(Multiplier),
}

impl RoundEvent {
    /// Crash or success.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RoundEvent::Tick(_))
    }
}

/// Receives round events on behalf of one connection.
///
/// `emit` runs while the round's lock is held, so it must not block.
/// Delivery failures belong to the transport and are not reported back.
pub trait EventSink: Send + Sync {
    /// Deliver an event.
    fn emit(&self, event: RoundEvent);
}

impl EventSink for mpsc::UnboundedSender<RoundEvent> {
    fn emit(&self, event: RoundEvent) {
        if self.send(event).is_err() {
            debug!("Dropped {:?}: receiver closed", event);
        }
    }
}
