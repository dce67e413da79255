//! Threads and timers that run the table.
//!
//! - `timing`: timing wheel and typed time primitives for the game thread.
//! - `server`: listener, session and game threads behind a [`server::Server`] handle.

pub mod server;
pub mod timing;
