//! Crash-point generation.
//!
//! Every source maps two uniform draws onto the same three bands:
//!
//! | odds | crash point |
//! |------|-------------|
//! | 2%   | exactly 1.00 |
//! | 3%   | uniform in [1.00, 1.50) |
//! | 95%  | uniform in [1.00, 11.00) |
//!
//! [`WeightedRandom`] draws the uniforms from an RNG and offers no proof.
//! [`CommitReveal`] derives them from `blake3(server_seed || nonce)`: the hash
//! of the seed is published before bets open and the seed itself after the
//! crash, so anyone can recompute the round with [`verify`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::multiplier::Multiplier;
use crate::config::Fairness;

/// Probability of an instant crash at exactly 1.00.
pub const INSTANT_CRASH_ODDS: f64 = 0.02;

/// Probability of the low band, [1.00, 1.50).
pub const LOW_BAND_ODDS: f64 = 0.03;

/// Width of the low band in hundredths.
const LOW_BAND_SPAN: f64 = 50.0;

/// Width of the normal band in hundredths.
const HIGH_BAND_SPAN: f64 = 1_000.0;

/// Maps a band draw and a value draw, both in [0, 1), to a crash point.
#[must_use]
pub fn crash_from_uniforms(band: f64, value: f64) -> Multiplier {
    if band < INSTANT_CRASH_ODDS {
        return Multiplier::ONE;
    }
    let base = Multiplier::ONE.hundredths();
    let span = if band < INSTANT_CRASH_ODDS + LOW_BAND_ODDS {
        LOW_BAND_SPAN
    } else {
        HIGH_BAND_SPAN
    };
    let offset = (value * span).floor().clamp(0.0, span - 1.0) as u32;
    Multiplier::from_hundredths(base + offset)
}

/// Seed material that lets a client check a round after it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedProof {
    server_seed: [u8; 32],
    nonce: u64,
}

impl SeedProof {
    #[must_use]
    pub const fn new(server_seed: [u8; 32], nonce: u64) -> Self {
        Self { server_seed, nonce }
    }

    /// Hex `blake3(server_seed)`, safe to publish before the round.
    #[must_use]
    pub fn commitment(&self) -> String {
        hex::encode(blake3::hash(&self.server_seed).as_bytes())
    }

    /// Hex server seed, published only after the crash.
    #[must_use]
    pub fn server_seed_hex(&self) -> String {
        hex::encode(self.server_seed)
    }

    #[must_use]
    pub const fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Recomputes the crash point committed to by this proof.
    #[must_use]
    pub fn crash_point(&self) -> Multiplier {
        derive_crash_point(&self.server_seed, self.nonce)
    }
}

/// The sealed result of a draw for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub crash_point: Multiplier,
    pub proof: Option<SeedProof>,
}

/// Produces one crash point per round.
pub trait CrashSource {
    /// Draws the outcome of round `nonce`.
    fn draw(&mut self, nonce: u64) -> Draw;
}

/// Naive weighted draw. Not verifiable.
pub struct WeightedRandom<R> {
    rng: R,
}

impl<R: Rng> WeightedRandom<R> {
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> CrashSource for WeightedRandom<R> {
    fn draw(&mut self, _nonce: u64) -> Draw {
        let band = self.rng.random::<f64>();
        let value = self.rng.random::<f64>();
        Draw {
            crash_point: crash_from_uniforms(band, value),
            proof: None,
        }
    }
}

/// Commit-reveal draw: a fresh random server seed per round.
pub struct CommitReveal<R> {
    rng: R,
}

impl<R: Rng> CommitReveal<R> {
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> CrashSource for CommitReveal<R> {
    fn draw(&mut self, nonce: u64) -> Draw {
        let mut server_seed = [0u8; 32];
        self.rng.fill(&mut server_seed);
        let proof = SeedProof::new(server_seed, nonce);
        Draw {
            crash_point: proof.crash_point(),
            proof: Some(proof),
        }
    }
}

/// Deterministic crash point for `(server_seed, nonce)`.
#[must_use]
pub fn derive_crash_point(server_seed: &[u8; 32], nonce: u64) -> Multiplier {
    let mut hasher = blake3::Hasher::new();
    hasher.update(server_seed);
    hasher.update(&nonce.to_le_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();

    let unit = |chunk: &[u8]| {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        // Top 53 bits give an exactly representable f64 in [0, 1).
        (u64::from_le_bytes(word) >> 11) as f64 / (1u64 << 53) as f64
    };
    crash_from_uniforms(unit(&bytes[0..8]), unit(&bytes[8..16]))
}

/// Errors from [`verify`].
#[derive(Debug, Error, PartialEq)]
pub enum VerifyError {
    #[error("server seed is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("server seed must be 32 bytes, got {0}")]
    SeedLength(usize),
    #[error("server seed does not match the published commitment")]
    CommitmentMismatch,
}

/// Checks a revealed seed against its commitment and recomputes the crash point.
///
/// # Errors
///
/// Fails if the seed is malformed or does not hash to `commitment`.
pub fn verify(server_seed_hex: &str, nonce: u64, commitment: &str) -> Result<Multiplier, VerifyError> {
    let raw = hex::decode(server_seed_hex)?;
    let server_seed: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::SeedLength(raw.len()))?;
    let proof = SeedProof::new(server_seed, nonce);
    if !proof.commitment().eq_ignore_ascii_case(commitment) {
        return Err(VerifyError::CommitmentMismatch);
    }
    Ok(proof.crash_point())
}

/// The source selected by [`Fairness`], seeded from the OS.
pub enum Outcomes {
    Weighted(WeightedRandom<StdRng>),
    CommitReveal(CommitReveal<StdRng>),
}

impl Outcomes {
    #[must_use]
    pub fn from_fairness(fairness: Fairness) -> Self {
        match fairness {
            Fairness::Weighted => Self::Weighted(WeightedRandom::new(StdRng::from_os_rng())),
            Fairness::CommitReveal => Self::CommitReveal(CommitReveal::new(StdRng::from_os_rng())),
        }
    }
}

impl CrashSource for Outcomes {
    fn draw(&mut self, nonce: u64) -> Draw {
        match self {
            Self::Weighted(source) => source.draw(nonce),
            Self::CommitReveal(source) => source.draw(nonce),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAWS: u32 = 100_000;

    #[test]
    fn band_edges() {
        assert_eq!(crash_from_uniforms(0.0, 0.99), Multiplier::ONE);
        assert_eq!(crash_from_uniforms(0.019_999, 0.5), Multiplier::ONE);
        assert_eq!(crash_from_uniforms(0.02, 0.0), Multiplier::from_hundredths(100));
        assert_eq!(crash_from_uniforms(0.049, 0.999_999), Multiplier::from_hundredths(149));
        assert_eq!(crash_from_uniforms(0.05, 0.5), Multiplier::from_hundredths(600));
        assert_eq!(crash_from_uniforms(0.999, 0.999_999_9), Multiplier::from_hundredths(1_099));
    }

    #[test]
    fn weighted_draws_follow_band_proportions() {
        let mut source = WeightedRandom::new(StdRng::seed_from_u64(7));
        let mut exact_one = 0u32;
        let mut below_one_fifty = 0u32;

        for nonce in 0..DRAWS {
            let point = source.draw(u64::from(nonce)).crash_point;
            assert!(point >= Multiplier::ONE);
            assert!(point < Multiplier::from_hundredths(1_100));
            if point == Multiplier::ONE {
                exact_one += 1;
            }
            if point < Multiplier::from_hundredths(150) {
                below_one_fifty += 1;
            }
        }

        // 2% instant + 1/50 of the low band + 1/1000 of the high band.
        let exact = f64::from(exact_one) / f64::from(DRAWS);
        assert!((0.018..0.025).contains(&exact), "exact 1.00 share was {exact}");

        // 2% + 3% + 5% of the high band (95% * 50/1000).
        let low = f64::from(below_one_fifty) / f64::from(DRAWS);
        assert!((0.088..0.107).contains(&low), "below 1.50 share was {low}");
    }

    #[test]
    fn commit_reveal_is_deterministic_and_verifiable() {
        let mut source = CommitReveal::new(StdRng::seed_from_u64(42));
        let draw = source.draw(17);
        let proof = draw.proof.clone().expect("commit-reveal always carries a proof");

        assert_eq!(proof.nonce(), 17);
        assert_eq!(proof.crash_point(), draw.crash_point);

        let verified = verify(&proof.server_seed_hex(), 17, &proof.commitment()).unwrap();
        assert_eq!(verified, draw.crash_point);
    }

    #[test]
    fn verify_rejects_tampering() {
        let proof = SeedProof::new([9u8; 32], 3);
        let commitment = proof.commitment();

        let other = SeedProof::new([8u8; 32], 3);
        assert_eq!(
            verify(&other.server_seed_hex(), 3, &commitment),
            Err(VerifyError::CommitmentMismatch)
        );
        assert_eq!(verify("abcd", 3, &commitment), Err(VerifyError::SeedLength(2)));
        assert!(matches!(verify("zz", 3, &commitment), Err(VerifyError::InvalidHex(_))));
    }

    #[test]
    fn nonce_changes_the_outcome_stream() {
        let seed = [1u8; 32];
        let distinct: std::collections::HashSet<_> =
            (0..64).map(|nonce| derive_crash_point(&seed, nonce)).collect();
        assert!(distinct.len() > 16, "nonces should spread over many crash points");
    }

    #[test]
    fn derived_points_follow_band_proportions() {
        let seed = [0x5au8; 32];
        let exact_one = (0..u64::from(DRAWS))
            .filter(|&nonce| derive_crash_point(&seed, nonce) == Multiplier::ONE)
            .count();
        let exact = exact_one as f64 / f64::from(DRAWS);
        assert!((0.018..0.025).contains(&exact), "exact 1.00 share was {exact}");
    }
}
