//! JSON wire protocol between browser clients and the game server.
//!
//! Every message is a JSON object tagged by `type`.
//!
//! ```text
//! client → server   place_bet, cash_out
//! server → client   initial_state, round_opened, countdown, game_started,
//!                   multiplier_update, game_crashed, player_joined,
//!                   player_cashed_out, error
//! ```
//!
//! `error` is only ever sent to the client whose message caused it; every
//! other server message is broadcast to the whole table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::multiplier::serialize_or_zero;
use crate::game::{HistoryEntry, Multiplier, Participant, Phase, WalletAddress};

/// A command from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    PlaceBet { wallet: String, bet: f64 },
    CashOut { wallet: String },
}

/// Full table state, sent once to each new connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub status: Phase,
    pub round_id: u64,
    pub countdown: u32,
    pub multiplier: Multiplier,
    /// Zero until the crash point may be shown.
    #[serde(serialize_with = "serialize_or_zero")]
    pub crash_point: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_hash: Option<String>,
    pub players: Vec<Participant>,
    pub history: Vec<HistoryEntry>,
}

/// An event from the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    InitialState {
        game_state: GameSnapshot,
    },
    RoundOpened {
        round_id: u64,
        countdown: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        seed_hash: Option<String>,
    },
    Countdown {
        countdown: u32,
    },
    GameStarted {
        round_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        seed_hash: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        crash_point: Option<Multiplier>,
    },
    MultiplierUpdate {
        multiplier: Multiplier,
        players: Vec<Participant>,
    },
    GameCrashed {
        round_id: u64,
        crash_point: Multiplier,
        history: Vec<HistoryEntry>,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_seed: Option<String>,
    },
    PlayerJoined {
        players: Vec<Participant>,
    },
    PlayerCashedOut {
        wallet: WalletAddress,
        multiplier: Multiplier,
        players: Vec<Participant>,
    },
    Error {
        reason: &'static str,
        message: String,
    },
}

impl ServerMessage {
    /// Wire name of the message, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InitialState { .. } => "initial_state",
            Self::RoundOpened { .. } => "round_opened",
            Self::Countdown { .. } => "countdown",
            Self::GameStarted { .. } => "game_started",
            Self::MultiplierUpdate { .. } => "multiplier_update",
            Self::GameCrashed { .. } => "game_crashed",
            Self::PlayerJoined { .. } => "player_joined",
            Self::PlayerCashedOut { .. } => "player_cashed_out",
            Self::Error { .. } => "error",
        }
    }

    /// Builds the `error` reply for a refused action.
    pub fn rejection(reason: &'static str, error: &impl std::fmt::Display) -> Self {
        Self::Error {
            reason,
            message: error.to_string(),
        }
    }
}

/// Errors while decoding or encoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON, wrong shape, or unknown `type`.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Binary frame that is not UTF-8.
    #[error("binary frame is not UTF-8 text")]
    NotText,
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Wire code used in the `error` reply.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) | Self::NotText => "malformed_message",
            Self::Encode { .. } => "internal",
        }
    }
}

/// Parses a text frame.
///
/// # Errors
///
/// [`ProtocolError::Malformed`] for anything that is not a known client message.
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Malformed)
}

/// Parses a binary frame carrying UTF-8 JSON.
///
/// # Errors
///
/// [`ProtocolError::NotText`] if the bytes are not UTF-8, otherwise as [`decode`].
pub fn decode_bytes(bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotText)?;
    decode(text)
}

/// Serializes a message once so it can be shared by every outbox.
///
/// # Errors
///
/// [`ProtocolError::Encode`] if serialization fails.
pub fn encode(message: &ServerMessage) -> Result<Arc<str>, ProtocolError> {
    serde_json::to_string(message)
        .map(Arc::from)
        .map_err(|source| ProtocolError::Encode {
            kind: message.kind(),
            source,
        })
}
