//! Authoritative round state machine.
//!
//! ```text
//!   ┌─────────┐  countdown hits 0  ┌─────────┐  multiplier ≥ crash  ┌─────────┐
//!   │ Waiting │ ─────────────────► │ Running │ ───────────────────► │ Crashed │
//!   └─────────┘                    └─────────┘                      └─────────┘
//!        ▲                                                               │
//!        └──────────────────────── settle delay ─────────────────────────┘
//! ```
//!
//! The controller never sleeps or arms timers itself. Each phase waits on
//! exactly one [`GameTimer`]; the caller fires it and gets back a [`Step`]
//! holding the events to broadcast and the next timer to arm.

use std::time::Duration;

use serde::Serialize;

use super::history::{History, HistoryEntry};
use super::ledger::{BetLedger, BetRejected, CashOutRejected, Participant, WalletAddress};
use super::multiplier::Multiplier;
use super::outcome::{CrashSource, Draw};
use crate::config::GameConfig;
use crate::protocol::{GameSnapshot, ServerMessage};
use crate::trace::{debug, info};

/// Round phase. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Countdown; bets accepted.
    Waiting,
    /// Multiplier climbing; cash-outs accepted.
    Running,
    /// Round over; settling before the next countdown.
    Crashed,
}

impl Phase {
    /// The only phase this one may advance to.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Waiting => Self::Running,
            Self::Running => Self::Crashed,
            Self::Crashed => Self::Waiting,
        }
    }
}

/// Timer events driving the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameTimer {
    /// One countdown step while Waiting.
    Countdown,
    /// One multiplier step while Running.
    MultiplierTick,
    /// End of the pause after a crash.
    Settle,
}

impl GameTimer {
    /// Phase in which this timer is meaningful.
    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::Countdown => Phase::Waiting,
            Self::MultiplierTick => Phase::Running,
            Self::Settle => Phase::Crashed,
        }
    }
}

/// Result of firing a timer.
#[derive(Debug, Default)]
pub struct Step {
    /// Events to broadcast, in order.
    pub events: Vec<ServerMessage>,
    /// Timer to arm next; `None` if the fired timer was ignored.
    pub next: Option<(GameTimer, Duration)>,
}

/// Owns the round, its ledger, and the history of finished rounds.
pub struct RoundController<S> {
    config: GameConfig,
    source: S,
    phase: Phase,
    round_id: u64,
    countdown: u32,
    multiplier: Multiplier,
    /// Sealed at Waiting entry; becomes the crash point on Running entry.
    draw: Draw,
    commitment: Option<String>,
    ledger: BetLedger,
    history: History,
}

impl<S: CrashSource> RoundController<S> {
    /// Creates a controller with round 1 open and counting down.
    ///
    /// `config` is expected to be validated.
    pub fn new(config: GameConfig, source: S) -> Self {
        let mut controller = Self {
            ledger: BetLedger::new(config.duplicate_bets),
            history: History::with_capacity(config.history_capacity),
            countdown: config.countdown_seconds,
            config,
            source,
            phase: Phase::Crashed,
            round_id: 0,
            multiplier: Multiplier::ONE,
            draw: Draw {
                crash_point: Multiplier::ONE,
                proof: None,
            },
            commitment: None,
        };
        let _ = controller.open_round();
        controller
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn round_id(&self) -> u64 {
        self.round_id
    }

    #[must_use]
    pub const fn countdown(&self) -> u32 {
        self.countdown
    }

    #[must_use]
    pub const fn multiplier(&self) -> Multiplier {
        self.multiplier
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        self.ledger.participants()
    }

    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Hex commitment to the current round's server seed, if the source gives one.
    #[must_use]
    pub fn seed_hash(&self) -> Option<&str> {
        self.commitment.as_deref()
    }

    /// The timer the current phase is waiting on.
    #[must_use]
    pub const fn pending_timer(&self) -> (GameTimer, Duration) {
        match self.phase {
            Phase::Waiting => (GameTimer::Countdown, self.config.countdown_interval),
            Phase::Running => (GameTimer::MultiplierTick, self.config.tick_interval),
            Phase::Crashed => (GameTimer::Settle, self.config.settle_delay),
        }
    }

    /// Handles a fired timer. Timers for another phase are ignored.
    pub fn on_timer(&mut self, timer: GameTimer) -> Step {
        if timer.phase() != self.phase {
            debug!(?timer, phase = ?self.phase, "ignoring timer for another phase");
            return Step::default();
        }

        let mut events = Vec::with_capacity(2);
        match timer {
            GameTimer::Countdown => self.count_down(&mut events),
            GameTimer::MultiplierTick => self.tick(&mut events),
            GameTimer::Settle => events.push(self.open_round()),
        }
        Step {
            events,
            next: Some(self.pending_timer()),
        }
    }

    /// Adds a wager to the current round.
    ///
    /// # Errors
    ///
    /// See [`BetRejected`]. A rejected bet leaves the ledger unchanged.
    pub fn place_bet(&mut self, wallet: &str, bet: f64) -> Result<ServerMessage, BetRejected> {
        if self.phase != Phase::Waiting {
            return Err(BetRejected::WrongPhase);
        }
        let wallet = WalletAddress::parse(wallet).ok_or(BetRejected::InvalidWallet)?;
        self.ledger.place(wallet, bet)?;
        info!(
            round = self.round_id,
            wallet = self.ledger.participants().last().map(|p| p.wallet.as_str()),
            bet,
            players = self.ledger.len(),
            "bet placed"
        );
        Ok(ServerMessage::PlayerJoined {
            players: self.ledger.participants().to_vec(),
        })
    }

    /// Locks in the current multiplier for the wallet's open bet.
    ///
    /// # Errors
    ///
    /// See [`CashOutRejected`]. A rejected cash-out leaves the ledger unchanged.
    pub fn cash_out(&mut self, wallet: &str) -> Result<ServerMessage, CashOutRejected> {
        if self.phase != Phase::Running {
            return Err(CashOutRejected::WrongPhase);
        }
        let wallet = WalletAddress::parse(wallet).ok_or(CashOutRejected::InvalidWallet)?;
        let multiplier = self.multiplier;
        let entry = self.ledger.cash_out(&wallet, multiplier)?;
        info!(
            round = self.round_id,
            wallet = wallet.as_str(),
            %multiplier,
            payout = entry.payout(),
            "cashed out"
        );
        Ok(ServerMessage::PlayerCashedOut {
            wallet,
            multiplier,
            players: self.ledger.participants().to_vec(),
        })
    }

    /// Full state for a newly connected client.
    #[must_use]
    pub fn snapshot(&self) -> ServerMessage {
        ServerMessage::InitialState {
            game_state: GameSnapshot {
                status: self.phase,
                round_id: self.round_id,
                countdown: self.countdown,
                multiplier: self.multiplier,
                crash_point: self.visible_crash_point(),
                seed_hash: self.commitment.clone(),
                players: self.ledger.participants().to_vec(),
                history: self.history.snapshot(),
            },
        }
    }

    fn visible_crash_point(&self) -> Option<Multiplier> {
        match self.phase {
            Phase::Crashed => Some(self.draw.crash_point),
            Phase::Running if self.config.reveal_crash_point_at_start => Some(self.draw.crash_point),
            _ => None,
        }
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), to, "illegal phase transition");
        debug!(round = self.round_id, from = ?self.phase, to = ?to, "phase change");
        self.phase = to;
    }

    fn open_round(&mut self) -> ServerMessage {
        self.advance(Phase::Waiting);
        self.round_id += 1;
        self.ledger.clear();
        self.multiplier = Multiplier::ONE;
        self.countdown = self.config.countdown_seconds;
        self.draw = self.source.draw(self.round_id);
        self.commitment = self.draw.proof.as_ref().map(|proof| proof.commitment());

        info!(
            round = self.round_id,
            seed_hash = self.commitment.as_deref(),
            "round opened"
        );
        ServerMessage::RoundOpened {
            round_id: self.round_id,
            countdown: self.countdown,
            seed_hash: self.commitment.clone(),
        }
    }

    fn count_down(&mut self, events: &mut Vec<ServerMessage>) {
        self.countdown = self.countdown.saturating_sub(1);
        events.push(ServerMessage::Countdown {
            countdown: self.countdown,
        });
        if self.countdown == 0 {
            events.push(self.start_running());
        }
    }

    fn start_running(&mut self) -> ServerMessage {
        self.advance(Phase::Running);
        info!(
            round = self.round_id,
            players = self.ledger.len(),
            "round started"
        );
        ServerMessage::GameStarted {
            round_id: self.round_id,
            seed_hash: self.commitment.clone(),
            crash_point: self
                .config
                .reveal_crash_point_at_start
                .then_some(self.draw.crash_point),
        }
    }

    fn tick(&mut self, events: &mut Vec<ServerMessage>) {
        let crash_point = self.draw.crash_point;
        if self.multiplier >= crash_point {
            events.push(self.crash());
            return;
        }

        self.multiplier = self
            .multiplier
            .step_towards(self.config.multiplier_step, crash_point);
        events.push(ServerMessage::MultiplierUpdate {
            multiplier: self.multiplier,
            players: self.ledger.participants().to_vec(),
        });

        if self.multiplier >= crash_point {
            events.push(self.crash());
        }
    }

    fn crash(&mut self) -> ServerMessage {
        self.advance(Phase::Crashed);
        let crash_point = self.draw.crash_point;
        let server_seed = self.draw.proof.as_ref().map(|proof| proof.server_seed_hex());

        self.history.record(HistoryEntry::now(
            self.round_id,
            crash_point,
            self.ledger.len(),
            server_seed.clone(),
        ));
        self.log_settlement(crash_point);

        ServerMessage::GameCrashed {
            round_id: self.round_id,
            crash_point,
            history: self.history.snapshot(),
            server_seed,
        }
    }

    fn log_settlement(&self, crash_point: Multiplier) {
        let mut wagered = 0.0;
        let mut paid_out = 0.0;
        for participant in self.ledger.participants() {
            wagered += participant.bet;
            paid_out += participant.payout();
            debug!(
                round = self.round_id,
                wallet = participant.wallet.as_str(),
                bet = participant.bet,
                payout = participant.payout(),
                "settled"
            );
        }
        info!(
            round = self.round_id,
            %crash_point,
            players = self.ledger.len(),
            wagered,
            paid_out,
            "round crashed"
        );
    }
}
