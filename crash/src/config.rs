//! Server and game configuration.
//!
//! [`GameConfig`] holds round timing and table policy. The defaults are the
//! production table: a 5 second countdown at one step per second, a 0.01x
//! multiplier step every 100ms, and a 3 second pause after each crash.
//!
//! Every timer the game thread arms must fit in one rotation of its timing
//! wheel, which bounds each interval by [`MAX_TIMER_DELAY`].

use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::game::Multiplier;

/// Port used when neither `--port` nor `$PORT` is given.
pub const DEFAULT_PORT: u16 = 3001;

/// Environment variable holding the listen port.
pub const PORT_ENV: &str = "PORT";

/// Longest single timer the game thread can arm.
pub const MAX_TIMER_DELAY: Duration = Duration::from_millis(4_095);

/// How crash points are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Seed hash published before bets, seed revealed after the crash.
    #[default]
    CommitReveal,
    /// Plain weighted RNG draw with nothing to verify.
    Weighted,
}

impl FromStr for Fairness {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit-reveal" => Ok(Self::CommitReveal),
            "weighted" => Ok(Self::Weighted),
            other => Err(ConfigError::UnknownFairness(other.to_owned())),
        }
    }
}

/// Whether one wallet may hold several bets in the same round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateBets {
    #[default]
    Allow,
    Reject,
}

/// Invalid configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be between 1ms and {max_ms}ms, got {got_ms}ms")]
    IntervalOutOfRange {
        name: &'static str,
        got_ms: u128,
        max_ms: u128,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("unknown fairness mode {0:?} (expected commit-reveal or weighted)")]
    UnknownFairness(String),
}

/// Round timing and table policy.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Countdown steps before the multiplier starts.
    ///
    /// **Default**: 5
    pub countdown_seconds: u32,

    /// Time between countdown steps.
    ///
    /// **Default**: 1s
    pub countdown_interval: Duration,

    /// Time between multiplier steps.
    ///
    /// **Default**: 100ms
    pub tick_interval: Duration,

    /// Multiplier increase per tick.
    ///
    /// **Default**: 0.01x
    pub multiplier_step: Multiplier,

    /// Pause between a crash and the next countdown.
    ///
    /// **Default**: 3s
    pub settle_delay: Duration,

    /// Finished rounds kept in history.
    ///
    /// **Default**: 50
    pub history_capacity: usize,

    /// **Default**: [`DuplicateBets::Allow`]
    pub duplicate_bets: DuplicateBets,

    /// **Default**: [`Fairness::CommitReveal`]
    pub fairness: Fairness,

    /// Include the crash point in `game_started`. Leaks the outcome to every
    /// client before anyone can cash out; kept only for legacy clients.
    ///
    /// **Default**: false
    pub reveal_crash_point_at_start: bool,
}

impl GameConfig {
    /// # Panics
    ///
    /// Panics if the values fail [`GameConfig::validate`].
    #[must_use]
    fn new_validated(
        countdown_seconds: u32,
        countdown_interval: Duration,
        tick_interval: Duration,
        settle_delay: Duration,
    ) -> Self {
        let config = Self {
            countdown_seconds,
            countdown_interval,
            tick_interval,
            multiplier_step: Multiplier::CENT,
            settle_delay,
            history_capacity: 50,
            duplicate_bets: DuplicateBets::default(),
            fairness: Fairness::default(),
            reveal_crash_point_at_start: false,
        };
        if let Err(e) = config.validate() {
            panic!("invalid preset: {e}");
        }
        config
    }

    /// A fast table for demos and tests: short countdown and settle pause.
    #[must_use]
    pub fn accelerated() -> Self {
        Self::new_validated(
            3,
            Duration::from_millis(20),
            Duration::from_millis(5),
            Duration::from_millis(40),
        )
    }

    /// Checks every interval fits the timing wheel and every count is non-zero.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, interval) in [
            ("countdown_interval", self.countdown_interval),
            ("tick_interval", self.tick_interval),
            ("settle_delay", self.settle_delay),
        ] {
            if interval < Duration::from_millis(1) || interval > MAX_TIMER_DELAY {
                return Err(ConfigError::IntervalOutOfRange {
                    name,
                    got_ms: interval.as_millis(),
                    max_ms: MAX_TIMER_DELAY.as_millis(),
                });
            }
        }
        if self.countdown_seconds == 0 {
            return Err(ConfigError::Zero("countdown_seconds"));
        }
        if self.multiplier_step.hundredths() == 0 {
            return Err(ConfigError::Zero("multiplier_step"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Zero("history_capacity"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn with_countdown(mut self, steps: u32, interval: Duration) -> Self {
        self.countdown_seconds = steps;
        self.countdown_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_duplicate_bets(mut self, policy: DuplicateBets) -> Self {
        self.duplicate_bets = policy;
        self
    }

    #[must_use]
    pub const fn with_fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    #[must_use]
    pub const fn with_reveal_at_start(mut self, reveal: bool) -> Self {
        self.reveal_crash_point_at_start = reveal;
        self
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self::new_validated(
            5,
            Duration::from_secs(1),
            Duration::from_millis(100),
            Duration::from_secs(3),
        )
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            game: GameConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults with the port taken from `$PORT` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] if `$PORT` is not a valid port.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(PORT_ENV) {
            config.bind_addr.set_port(parse_port(&raw)?);
        }
        Ok(config)
    }
}

/// Parses a TCP port number.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPort`] for anything but `0..=65535`.
pub fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPort(raw.to_owned()))
}
