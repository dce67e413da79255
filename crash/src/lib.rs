//! Real-time server for a multiplayer crash betting game.
//!
//! Every round counts down, then a multiplier climbs from 1.00x until it hits
//! a crash point drawn before the round started. Players bet during the
//! countdown and try to cash out before the crash. All state lives on one game
//! thread; clients talk JSON over WebSocket.
//!
//! - [`game`]: round state machine, bet ledger, crash-point sources.
//! - [`protocol`]: wire messages.
//! - [`broadcast`]: per-client outboxes and fan-out.
//! - [`runtime`]: timing wheel and the server threads.
//! - [`config`]: table timing and server settings.
//! - [`sync`]: bounded lock-free queues between threads.

pub mod broadcast;
pub mod config;
pub mod game;
pub mod protocol;
pub mod runtime;
pub mod sync;

mod trace;

pub use trace::init_tracing;
