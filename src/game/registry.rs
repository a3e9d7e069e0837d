//! Session Registry
//!
//! Maps each connection to at most one live round. Creation is a
//! check-and-insert under the table's write lock, so two concurrent starts
//! for the same connection can never both succeed.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::multiplier::Multiplier;
use crate::core::rng::{entropy_factory, RandomFactory};
use crate::game::arbiter::Round;
use crate::game::engine::{spawn_round, EngineConfig};
use crate::game::events::EventSink;
use crate::game::state::{ConnectionId, GameError, RoundId, Session, SessionState, Stake};

/// Shared lookup table of live rounds.
///
/// Cloned into every ticker so a crash can release its own entry.
#[derive(Clone, Default)]
pub struct SessionTable {
    rounds: Arc<RwLock<BTreeMap<ConnectionId, Arc<Round>>>>,
}

impl SessionTable {
    /// Round registered for `connection_id`, if any.
    pub async fn get(&self, connection_id: ConnectionId) -> Option<Arc<Round>> {
        self.rounds.read().await.get(&connection_id).cloned()
    }

    /// Remove the entry for `connection_id` only if it still holds `round_id`.
    ///
    /// Idempotent; a newer round for the same connection is left alone.
    pub async fn release(&self, connection_id: ConnectionId, round_id: RoundId) -> bool {
        let mut rounds = self.rounds.write().await;
        match rounds.get(&connection_id) {
            Some(round) if round.round_id() == round_id => {
                rounds.remove(&connection_id);
                true
            }
            _ => false,
        }
    }

    /// Number of registered rounds.
    pub async fn len(&self) -> usize {
        self.rounds.read().await.len()
    }

    /// Whether no rounds are registered.
    pub async fn is_empty(&self) -> bool {
        self.rounds.read().await.is_empty()
    }
}

/// Owns every live round on this server.
pub struct SessionRegistry {
    table: SessionTable,
    rng_factory: RandomFactory,
    engine: EngineConfig,
}

impl SessionRegistry {
    /// Registry using production entropy and the default cadence.
    pub fn new() -> Self {
        Self::with_random(entropy_factory(), EngineConfig::default())
    }

    /// Registry with an injected random source per round.
    pub fn with_random(rng_factory: RandomFactory, engine: EngineConfig) -> Self {
        Self {
            table: SessionTable::default(),
            rng_factory,
            engine,
        }
    }

    /// Start a round for `connection_id` and begin ticking.
    ///
    /// The stake is validated first. If a round is already `Active` for this
    /// connection nothing changes and `DuplicateSession` is returned. An entry
    /// that has reached a terminal state but is not yet released is replaced.
    pub async fn create_session(
        &self,
        connection_id: ConnectionId,
        stake: f64,
        sink: Arc<dyn EventSink>,
    ) -> Result<Session, GameError> {
        let stake = Stake::new(stake)?;

        let mut rounds = self.table.rounds.write().await;
        if let Some(existing) = rounds.get(&connection_id) {
            if existing.state().await == SessionState::Active {
                debug!("Player {} already has an active game", connection_id);
                return Err(GameError::DuplicateSession(connection_id));
            }
        }

        let session = Session::new(connection_id, stake);
        let snapshot = session.clone();
        let round = Arc::new(Round::new(session, sink));
        rounds.insert(connection_id, round.clone());

        let ticker = spawn_round(
            round.clone(),
            (self.rng_factory)(),
            &self.engine,
            self.table.clone(),
        );
        round.attach_ticker(ticker.abort_handle()).await;

        info!(
            "Player {} started round {} with stake {}",
            connection_id, snapshot.round_id, stake
        );
        Ok(snapshot)
    }

    /// Current record for `connection_id`, if a round is registered.
    pub async fn get_session(&self, connection_id: ConnectionId) -> Option<Session> {
        let round = self.table.get(connection_id).await?;
        Some(round.snapshot().await)
    }

    /// Settle the connection's round at its current multiplier.
    pub async fn request_cash_out(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Multiplier, GameError> {
        let round = match self.table.get(connection_id).await {
            Some(round) => round,
            None => {
                debug!("Player {} attempted cash out but no active game", connection_id);
                return Err(GameError::StaleCashOut);
            }
        };

        let multiplier = round.cash_out().await?;
        self.table.release(connection_id, round.round_id()).await;
        info!("Player {} cashed out at {}x", connection_id, multiplier);
        Ok(multiplier)
    }

    /// Drop the connection's round, terminating it if still live.
    ///
    /// Idempotent. Returns true if a live round was discarded.
    pub async fn remove_session(&self, connection_id: ConnectionId) -> bool {
        let mut rounds = self.table.rounds.write().await;
        let Some(round) = rounds.remove(&connection_id) else {
            return false;
        };
        let terminated = round.terminate().await;
        drop(rounds);

        if terminated {
            info!("Round {} for {} terminated without settlement", round.round_id(), connection_id);
        }
        terminated
    }

    /// Connection went away.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> bool {
        self.remove_session(connection_id).await
    }

    /// Number of registered rounds.
    pub async fn active_count(&self) -> usize {
        self.table.len().await
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::fixed_factory;
    use crate::game::events::RoundEvent;
    use tokio::sync::mpsc;

    fn quiet_registry() -> SessionRegistry {
        SessionRegistry::with_random(fixed_factory(1.0), EngineConfig::default())
    }

    fn sink() -> (Arc<dyn EventSink>, mpsc::UnboundedReceiver<RoundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel::<RoundEvent>();
        (Arc::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_get() {
        let registry = quiet_registry();
        let (tx, _rx) = sink();

        let session = registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.multiplier, Multiplier::ONE);

        let found = registry.get_session(ConnectionId(1)).await.unwrap();
        assert_eq!(found.round_id, session.round_id);
        assert!(registry.get_session(ConnectionId(2)).await.is_none());
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_stake_creates_nothing() {
        let registry = quiet_registry();

        for stake in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let (tx, _rx) = sink();
            let result = registry.create_session(ConnectionId(1), stake, tx).await;
            assert!(matches!(result, Err(GameError::InvalidStake(_))));
        }
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_leaves_original_untouched() {
        let registry = quiet_registry();
        let (tx, _rx) = sink();
        let original = registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(350)).await;
        let before = registry.get_session(ConnectionId(1)).await.unwrap();

        let (tx2, mut rx2) = sink();
        let result = registry.create_session(ConnectionId(1), 50.0, tx2).await;
        assert_eq!(result.unwrap_err(), GameError::DuplicateSession(ConnectionId(1)));

        let after = registry.get_session(ConnectionId(1)).await.unwrap();
        assert_eq!(after.round_id, original.round_id);
        assert_eq!(after.stake, original.stake);
        assert_eq!(after.multiplier, before.multiplier);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cash_out_releases_entry() {
        let registry = quiet_registry();
        let (tx, mut rx) = sink();
        registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();

        assert_eq!(registry.request_cash_out(ConnectionId(1)).await, Ok(Multiplier::ONE));
        assert_eq!(rx.recv().await, Some(RoundEvent::Success(Multiplier::ONE)));
        assert!(registry.get_session(ConnectionId(1)).await.is_none());
        assert_eq!(
            registry.request_cash_out(ConnectionId(1)).await,
            Err(GameError::StaleCashOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cash_out_without_session() {
        let registry = quiet_registry();
        assert_eq!(
            registry.request_cash_out(ConnectionId(9)).await,
            Err(GameError::StaleCashOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_is_idempotent() {
        let registry = quiet_registry();
        let (tx, _rx) = sink();
        registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();

        assert!(registry.remove_session(ConnectionId(1)).await);
        assert!(!registry.remove_session(ConnectionId(1)).await);
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_round_after_settlement() {
        let registry = quiet_registry();
        let (tx, _rx) = sink();
        let first = registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();
        registry.request_cash_out(ConnectionId(1)).await.unwrap();

        let (tx, _rx) = sink();
        let second = registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();
        assert_ne!(first.round_id, second.round_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_keeps_newer_round() {
        let registry = quiet_registry();
        let (tx, _rx) = sink();
        let first = registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();
        registry.request_cash_out(ConnectionId(1)).await.unwrap();

        let (tx, _rx) = sink();
        registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();

        assert!(!registry.table.release(ConnectionId(1), first.round_id).await);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_ticks() {
        let registry = SessionRegistry::with_random(
            fixed_factory(1.0),
            EngineConfig {
                tick_interval: std::time::Duration::ZERO,
            },
        );
        let (tx, mut rx) = sink();
        registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(RoundEvent::Tick(Multiplier::from_hundredths(101))));
        assert_eq!(rx.recv().await, Some(RoundEvent::Tick(Multiplier::from_hundredths(102))));

        assert!(registry.request_cash_out(ConnectionId(1)).await.is_ok());
        assert!(registry.get_session(ConnectionId(1)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_releases_entry() {
        let registry = SessionRegistry::with_random(fixed_factory(0.0), EngineConfig::default());
        let (tx, mut rx) = sink();
        registry.create_session(ConnectionId(1), 10.0, tx).await.unwrap();

        let m = Multiplier::from_hundredths(101);
        assert_eq!(rx.recv().await, Some(RoundEvent::Tick(m)));
        assert_eq!(rx.recv().await, Some(RoundEvent::Crash(m)));

        // Ticker task ends after releasing; the sink is dropped with the round.
        assert_eq!(rx.recv().await, None);
        assert!(registry.get_session(ConnectionId(1)).await.is_none());
    }
}
