//! Per-round bet ledger.
//!
//! The ledger does not know about phases; the round controller checks the
//! phase before calling in. What the ledger enforces is the shape of each
//! entry: valid wallet, positive wager, and a cash-out that happens once.

use serde::Serialize;
use thiserror::Error;

use super::multiplier::{Multiplier, serialize_or_zero};
use crate::config::DuplicateBets;

/// Longest accepted wallet identifier, in bytes. Base58 Solana keys are 32-44.
pub const MAX_WALLET_LEN: usize = 64;

/// Opaque wallet identifier supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Accepts any non-empty identifier up to [`MAX_WALLET_LEN`] bytes.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let ok = !raw.is_empty() && raw.len() <= MAX_WALLET_LEN;
        ok.then(|| Self(raw.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One wager in the current round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub wallet: WalletAddress,
    pub bet: f64,
    pub cashed_out: bool,
    #[serde(serialize_with = "serialize_or_zero")]
    pub cashout_multiplier: Option<Multiplier>,
}

impl Participant {
    fn new(wallet: WalletAddress, bet: f64) -> Self {
        Self {
            wallet,
            bet,
            cashed_out: false,
            cashout_multiplier: None,
        }
    }

    /// Amount owed to the participant: `bet * cashout_multiplier`, or zero if
    /// they rode the round into the crash.
    #[must_use]
    pub fn payout(&self) -> f64 {
        self.cashout_multiplier.map_or(0.0, |m| m.apply(self.bet))
    }
}

/// Why a bet was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BetRejected {
    #[error("bets are only accepted during the countdown")]
    WrongPhase,
    #[error("wallet address is empty or malformed")]
    InvalidWallet,
    #[error("wager must be a positive amount")]
    InvalidWager,
    #[error("wallet already has a bet in this round")]
    DuplicateBet,
}

/// Why a cash-out was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CashOutRejected {
    #[error("cash-out is only possible while the multiplier is running")]
    WrongPhase,
    #[error("wallet address is empty or malformed")]
    InvalidWallet,
    #[error("wallet has no open bet in this round")]
    NoOpenBet,
}

impl BetRejected {
    /// Stable machine-readable code for the wire.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::WrongPhase => "wrong_phase",
            Self::InvalidWallet => "invalid_wallet",
            Self::InvalidWager => "invalid_wager",
            Self::DuplicateBet => "duplicate_bet",
        }
    }
}

impl CashOutRejected {
    /// Stable machine-readable code for the wire.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::WrongPhase => "wrong_phase",
            Self::InvalidWallet => "invalid_wallet",
            Self::NoOpenBet => "no_open_bet",
        }
    }
}

/// Participants of the current round, in bet order.
#[derive(Debug)]
pub struct BetLedger {
    participants: Vec<Participant>,
    duplicates: DuplicateBets,
}

impl BetLedger {
    #[must_use]
    pub const fn new(duplicates: DuplicateBets) -> Self {
        Self {
            participants: Vec::new(),
            duplicates,
        }
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Drops every entry; called when a new round opens.
    pub fn clear(&mut self) {
        self.participants.clear();
    }

    /// Records a wager.
    ///
    /// # Errors
    ///
    /// Rejects non-positive or non-finite wagers, and repeat wallets under
    /// [`DuplicateBets::Reject`].
    pub fn place(&mut self, wallet: WalletAddress, bet: f64) -> Result<&Participant, BetRejected> {
        if !bet.is_finite() || bet <= 0.0 {
            return Err(BetRejected::InvalidWager);
        }
        if self.duplicates == DuplicateBets::Reject
            && self.participants.iter().any(|p| p.wallet == wallet)
        {
            return Err(BetRejected::DuplicateBet);
        }
        let index = self.participants.len();
        self.participants.push(Participant::new(wallet, bet));
        Ok(&self.participants[index])
    }

    /// Locks in `multiplier` for the wallet's first bet that is still riding.
    ///
    /// # Errors
    ///
    /// [`CashOutRejected::NoOpenBet`] if the wallet never bet or every one of
    /// its bets has already cashed out. The ledger is left untouched.
    pub fn cash_out(
        &mut self,
        wallet: &WalletAddress,
        multiplier: Multiplier,
    ) -> Result<&Participant, CashOutRejected> {
        let entry = self
            .participants
            .iter_mut()
            .find(|p| &p.wallet == wallet && !p.cashed_out)
            .ok_or(CashOutRejected::NoOpenBet)?;
        entry.cashed_out = true;
        entry.cashout_multiplier = Some(multiplier);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(s: &str) -> WalletAddress {
        WalletAddress::parse(s).unwrap()
    }

    #[test]
    fn placed_bet_starts_uncashed() {
        let mut ledger = BetLedger::new(DuplicateBets::Allow);
        let entry = ledger.place(wallet("A"), 10.0).unwrap().clone();
        assert_eq!(entry.wallet.as_str(), "A");
        assert_eq!(entry.bet, 10.0);
        assert!(!entry.cashed_out);
        assert_eq!(entry.cashout_multiplier, None);
        assert_eq!(entry.payout(), 0.0);
    }

    #[test]
    fn duplicate_wallet_policy() {
        let mut allow = BetLedger::new(DuplicateBets::Allow);
        allow.place(wallet("A"), 10.0).unwrap();
        allow.place(wallet("A"), 5.0).unwrap();
        assert_eq!(allow.len(), 2);

        let mut reject = BetLedger::new(DuplicateBets::Reject);
        reject.place(wallet("A"), 10.0).unwrap();
        assert_eq!(reject.place(wallet("A"), 5.0).unwrap_err(), BetRejected::DuplicateBet);
        assert_eq!(reject.len(), 1);
    }

    #[test]
    fn rejects_bad_wagers_and_wallets() {
        let mut ledger = BetLedger::new(DuplicateBets::Allow);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(ledger.place(wallet("A"), bad).unwrap_err(), BetRejected::InvalidWager);
        }
        assert!(ledger.is_empty());

        assert!(WalletAddress::parse("").is_none());
        assert!(WalletAddress::parse(&"x".repeat(MAX_WALLET_LEN + 1)).is_none());
        // 32 two-byte characters fit exactly; one more does not.
        assert!(WalletAddress::parse(&"é".repeat(MAX_WALLET_LEN / 2)).is_some());
        assert!(WalletAddress::parse(&"é".repeat(MAX_WALLET_LEN / 2 + 1)).is_none());
        assert!(WalletAddress::parse("guest player").is_some());
        assert!(WalletAddress::parse("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU").is_some());
    }

    #[test]
    fn cash_out_happens_once_per_bet() {
        let mut ledger = BetLedger::new(DuplicateBets::Allow);
        ledger.place(wallet("A"), 10.0).unwrap();
        ledger.place(wallet("A"), 4.0).unwrap();

        let first = ledger.cash_out(&wallet("A"), Multiplier::from_hundredths(150)).unwrap();
        assert_eq!(first.bet, 10.0);
        assert_eq!(first.payout(), 15.0);

        let second = ledger.cash_out(&wallet("A"), Multiplier::from_hundredths(200)).unwrap();
        assert_eq!(second.bet, 4.0);

        assert_eq!(
            ledger.cash_out(&wallet("A"), Multiplier::from_hundredths(300)).unwrap_err(),
            CashOutRejected::NoOpenBet
        );
        // The first cash-out is untouched by later attempts.
        assert_eq!(
            ledger.participants()[0].cashout_multiplier,
            Some(Multiplier::from_hundredths(150))
        );
        assert!(ledger.participants().iter().all(|p| p.cashed_out));
    }

    #[test]
    fn cash_out_for_unknown_wallet_changes_nothing() {
        let mut ledger = BetLedger::new(DuplicateBets::Allow);
        ledger.place(wallet("A"), 10.0).unwrap();
        let before = ledger.participants().to_vec();

        assert_eq!(
            ledger.cash_out(&wallet("B"), Multiplier::ONE).unwrap_err(),
            CashOutRejected::NoOpenBet
        );
        assert_eq!(ledger.participants(), before.as_slice());
    }

    #[test]
    fn participant_wire_shape() {
        let mut ledger = BetLedger::new(DuplicateBets::Allow);
        ledger.place(wallet("A"), 10.0).unwrap();
        let json = serde_json::to_value(&ledger.participants()[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"wallet": "A", "bet": 10.0, "cashedOut": false, "cashoutMultiplier": 0})
        );
    }
}
