//! Multiplier Engine
//!
//! Runs one session's round end to end. Each tick:
//!
//! 1. `multiplier += 0.01`
//! 2. emit `tick(multiplier)` (always, even on the crashing tick)
//! 3. draw `r`, compute `p = crash_probability(multiplier)`
//! 4. if `r < p`: crash, emit `crash(multiplier)`, stop
//!
//! Live rounds tick on their own tokio task ([`spawn_round`]) and go through
//! the [`Round`] lock; [`run_to_completion`] drives a bare session offline
//! for replays and simulation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, info_span, Instrument};

use crate::core::multiplier::Multiplier;
use crate::core::rng::RandomSource;
use crate::game::arbiter::Round;
use crate::game::crash::should_crash;
use crate::game::events::{EventSink, RoundEvent};
use crate::game::registry::SessionTable;
use crate::game::state::{ConnectionId, Session, SessionState, Stake};
use crate::TICK_INTERVAL_MS;

/// Result of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Multiplier advanced, round still live.
    Continued(Multiplier),
    /// Round crashed at this multiplier.
    Crashed(Multiplier),
    /// Round was already terminal; nothing happened.
    Stopped,
}

/// Shortest period a ticker will run at.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Ticker configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period between ticks. Values below [`MIN_TICK_INTERVAL`] are raised to it.
    pub tick_interval: Duration,
}

impl EngineConfig {
    /// Effective period between ticks.
    #[inline]
    pub fn period(&self) -> Duration {
        self.tick_interval.max(MIN_TICK_INTERVAL)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
        }
    }
}

/// Apply one tick to `session`, emitting through `sink`.
///
/// A terminal session is left untouched and yields [`TickOutcome::Stopped`].
pub fn tick_session(
    session: &mut Session,
    rng: &mut dyn RandomSource,
    sink: &dyn EventSink,
) -> TickOutcome {
    if session.state != SessionState::Active {
        return TickOutcome::Stopped;
    }

    session.multiplier = session.multiplier.step();
    session.ticks += 1;
    let multiplier = session.multiplier;
    sink.emit(RoundEvent::Tick(multiplier));

    let draw = rng.next_unit();
    if should_crash(multiplier, draw) {
        session.state = SessionState::Crashed;
        sink.emit(RoundEvent::Crash(multiplier));
        return TickOutcome::Crashed(multiplier);
    }

    TickOutcome::Continued(multiplier)
}

/// Start the ticking task for a live round.
///
/// The first tick fires one interval after the call. The task exits on the
/// first tick that does not continue the round; a crash releases the
/// registry entry.
pub fn spawn_round(
    round: Arc<Round>,
    mut rng: Box<dyn RandomSource>,
    config: &EngineConfig,
    table: SessionTable,
) -> JoinHandle<()> {
    let period = config.period();
    let span = info_span!(
        "round",
        conn = %round.connection_id(),
        round = %round.round_id()
    );

    tokio::spawn(
        async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match round.advance(rng.as_mut()).await {
                    TickOutcome::Continued(_) => {}
                    TickOutcome::Crashed(multiplier) => {
                        info!("Player {} crashed at {}x", round.connection_id(), multiplier);
                        table.release(round.connection_id(), round.round_id()).await;
                        break;
                    }
                    TickOutcome::Stopped => break,
                }
            }
        }
        .instrument(span),
    )
}

/// Drive a session offline until it crashes or `max_ticks` have elapsed.
pub fn run_to_completion(
    mut session: Session,
    rng: &mut dyn RandomSource,
    sink: &dyn EventSink,
    max_ticks: u32,
) -> Session {
    for _ in 0..max_ticks {
        match tick_session(&mut session, rng, sink) {
            TickOutcome::Continued(_) => {}
            TickOutcome::Crashed(_) | TickOutcome::Stopped => break,
        }
    }
    session
}

/// Discards every event.
struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RoundEvent) {}
}

/// Outcome of an RTP simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtpEstimate {
    /// Rounds simulated.
    pub rounds: u32,
    /// Rounds that reached the cash-out target.
    pub wins: u32,
    /// Average payout per unit staked.
    pub rtp: f64,
}

/// Estimate the return of always cashing out at `target`.
///
/// A round wins if it reaches `target` without crashing; the tick that lands
/// on `target` still draws for a crash before a cash-out could be accepted.
pub fn estimate_rtp(rng: &mut dyn RandomSource, rounds: u32, target: Multiplier) -> RtpEstimate {
    let ticks_needed = target.hundredths().saturating_sub(Multiplier::ONE.hundredths());
    let mut wins = 0u32;

    for _ in 0..rounds {
        let mut session = Session::new(ConnectionId(0), Stake::UNIT);
        let mut survived = true;
        for _ in 0..ticks_needed {
            if let TickOutcome::Crashed(_) = tick_session(&mut session, rng, &NullSink) {
                survived = false;
                break;
            }
        }
        if survived {
            wins += 1;
        }
    }

    let rtp = if rounds == 0 {
        0.0
    } else {
        wins as f64 * target.as_f64() / rounds as f64
    };

    RtpEstimate { rounds, wins, rtp }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::{DeterministicRng, FixedRandom, ScriptedRandom};
    use tokio::sync::mpsc;

    fn new_session() -> Session {
        Session::new(ConnectionId(1), Stake::new(10.0).unwrap())
    }

    #[test]
    fn test_uncrashed_sequence_steps_by_hundredths() {
        let (tx, mut rx) = mpsc::unbounded_channel::<RoundEvent>();
        let session = run_to_completion(new_session(), &mut FixedRandom(1.0), &tx, 500);

        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.ticks, 500);
        assert_eq!(session.multiplier, Multiplier::from_hundredths(600));
        assert_eq!(session.multiplier.to_string(), "6.00");

        let mut expected = Multiplier::ONE;
        for _ in 0..500 {
            expected = expected.step();
            assert_eq!(rx.try_recv().unwrap(), RoundEvent::Tick(expected));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tick_emitted_on_crashing_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel::<RoundEvent>();
        let mut rng = ScriptedRandom::new([1.0, 1.0, 0.0], 1.0);
        let session = run_to_completion(new_session(), &mut rng, &tx, 100);

        let m = Multiplier::from_hundredths(103);
        assert_eq!(session.state, SessionState::Crashed);
        assert_eq!(session.multiplier, m);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[2], RoundEvent::Tick(m));
        assert_eq!(events[3], RoundEvent::Crash(m));
    }

    #[test]
    fn test_period_has_a_floor() {
        let zero = EngineConfig {
            tick_interval: Duration::ZERO,
        };
        assert_eq!(zero.period(), MIN_TICK_INTERVAL);
        assert_eq!(EngineConfig::default().period(), Duration::from_millis(100));
    }

    #[test]
    fn test_terminal_session_is_frozen() {
        let mut session = new_session();
        session.state = SessionState::CashedOut;

        let outcome = tick_session(&mut session, &mut FixedRandom(0.0), &NullSink);
        assert_eq!(outcome, TickOutcome::Stopped);
        assert_eq!(session.multiplier, Multiplier::ONE);
        assert_eq!(session.ticks, 0);
    }

    #[test]
    fn test_seeded_rounds_replay() {
        let a = run_to_completion(new_session(), &mut DeterministicRng::new(99), &NullSink, 10_000);
        let b = run_to_completion(new_session(), &mut DeterministicRng::new(99), &NullSink, 10_000);

        assert_eq!(a.state, SessionState::Crashed);
        assert_eq!(a.multiplier, b.multiplier);
        assert_eq!(a.ticks, b.ticks);
    }

    #[test]
    fn test_rtp_edges() {
        let at_one = estimate_rtp(&mut FixedRandom(0.0), 10, Multiplier::ONE);
        assert_eq!(at_one.wins, 10);
        assert_eq!(at_one.rtp, 1.0);

        let never = estimate_rtp(&mut FixedRandom(0.0), 10, Multiplier::from_hundredths(150));
        assert_eq!(never.wins, 0);
        assert_eq!(never.rtp, 0.0);

        let always = estimate_rtp(&mut FixedRandom(1.0), 4, Multiplier::from_hundredths(200));
        assert_eq!(always.wins, 4);
        assert_eq!(always.rtp, 2.0);
    }

    #[test]
    fn test_rtp_seeded_is_below_one() {
        let estimate = estimate_rtp(&mut DeterministicRng::new(2024), 2000, Multiplier::from_hundredths(110));
        assert!(estimate.wins > 0);
        assert!(estimate.rtp < 1.0);
    }
}
