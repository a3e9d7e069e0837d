//! Cashout Arbiter
//!
//! A [`Round`] is the single serialization point for one session. The ticker
//! and the request path (cash-out, disconnect) both take the same lock for the
//! whole read → decide → mutate → emit sequence, so exactly one terminal
//! outcome is ever committed. The loser of a race observes a terminal state
//! and does nothing.
//!
//! Lock order: registry table before round, never the reverse. Callers must
//! drop the round lock before touching the registry.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::core::multiplier::Multiplier;
use crate::core::rng::RandomSource;
use crate::game::engine::{tick_session, TickOutcome};
use crate::game::events::{EventSink, RoundEvent};
use crate::game::state::{ConnectionId, GameError, RoundId, Session, SessionState};

/// Mutable part of a round, only reachable through the lock.
struct RoundInner {
    session: Session,
    /// Present until the first transition out of `Active`.
    ticker: Option<AbortHandle>,
}

/// One live round plus its outbound sink.
pub struct Round {
    connection_id: ConnectionId,
    round_id: RoundId,
    inner: Mutex<RoundInner>,
    sink: Arc<dyn EventSink>,
}

impl Round {
    /// Wrap a freshly created session.
    pub fn new(session: Session, sink: Arc<dyn EventSink>) -> Self {
        Self {
            connection_id: session.connection_id,
            round_id: session.round_id,
            inner: Mutex::new(RoundInner {
                session,
                ticker: None,
            }),
            sink,
        }
    }

    /// Owning connection.
    #[inline]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Round identifier.
    #[inline]
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Copy of the current session record.
    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.session.clone()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.session.state
    }

    /// Hand the round its ticker so the request path can cancel it.
    ///
    /// Ignored once the round is terminal; the ticker then stops on its own
    /// at its next tick.
    pub async fn attach_ticker(&self, handle: AbortHandle) {
        let mut inner = self.inner.lock().await;
        if inner.session.is_active() {
            inner.ticker = Some(handle);
        }
    }

    /// Apply one tick: advance, emit tick, draw, maybe crash.
    ///
    /// Called only from the round's own ticker.
    pub async fn advance(&self, rng: &mut dyn RandomSource) -> TickOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = tick_session(&mut inner.session, rng, self.sink.as_ref());
        if let TickOutcome::Crashed(_) = outcome {
            // The ticker is the caller and exits on its own.
            inner.ticker = None;
        }
        outcome
    }

    /// Settle the round at its current multiplier.
    ///
    /// Fails with [`GameError::StaleCashOut`] once the round is terminal.
    pub async fn cash_out(&self) -> Result<Multiplier, GameError> {
        let mut inner = self.inner.lock().await;
        if !inner.session.is_active() {
            debug!(
                "Cash-out for {} rejected: round already {:?}",
                self.connection_id, inner.session.state
            );
            return Err(GameError::StaleCashOut);
        }

        let multiplier = inner.session.multiplier;
        inner.session.state = SessionState::CashedOut;
        cancel(&mut inner);
        self.sink.emit(RoundEvent::Success(multiplier));
        Ok(multiplier)
    }

    /// Discard the round without settlement.
    ///
    /// Returns true only on the `Active` → `Terminated` edge.
    pub async fn terminate(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.session.is_active() {
            return false;
        }
        inner.session.state = SessionState::Terminated;
        cancel(&mut inner);
        true
    }
}

/// Abort the ticker if still attached. Safe to repeat.
fn cancel(inner: &mut RoundInner) {
    if let Some(handle) = inner.ticker.take() {
        handle.abort();
    }
}
