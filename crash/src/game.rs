//! Round state and the rules of the table.
//!
//! - `round`: the `Waiting → Running → Crashed` state machine.
//! - `ledger`: bets of the current round.
//! - `outcome`: crash-point sources and seed verification.
//! - `history`: finished rounds.
//! - `multiplier`: fixed-point multiplier type shared by all of the above.
//!
//! Nothing here touches sockets or threads; the game thread in
//! `runtime::server` drives a [`RoundController`] with timer events and
//! client commands.

pub mod history;
pub mod ledger;
pub mod multiplier;
pub mod outcome;
pub mod round;

pub use history::{History, HistoryEntry};
pub use ledger::{BetLedger, BetRejected, CashOutRejected, Participant, WalletAddress};
pub use multiplier::Multiplier;
pub use outcome::{CommitReveal, CrashSource, Draw, Outcomes, SeedProof, WeightedRandom, verify};
pub use round::{GameTimer, Phase, RoundController, Step};
