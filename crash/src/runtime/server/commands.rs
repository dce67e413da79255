//! Commands from session threads to the game thread.
//!
//! Sessions never touch round state. Everything a client does arrives at the
//! game thread as an [`Inbound`] on one bounded MPSC inbox, and everything it
//! receives leaves through that client's outbox.

use crate::broadcast::{Outbox, SubscriberId};
use crate::protocol::{ClientMessage, ProtocolError};
use crate::sync::mpsc;

/// Capacity of the shared command inbox.
///
/// Bets and cash-outs are tiny and the game thread drains the inbox every
/// millisecond, so this only fills under a flood of connects.
pub const INBOX_CAPACITY: usize = 1024;

/// Game-thread end of the inbox.
pub type Inbox = mpsc::Consumer<Inbound, INBOX_CAPACITY>;

/// Session end of the inbox; cloned once per session.
pub type InboxSender = mpsc::Producer<Inbound, INBOX_CAPACITY>;

/// One event from a session.
pub enum Inbound {
    /// Handshake completed. The game thread registers the outbox and replies
    /// with `initial_state`.
    Connected { id: SubscriberId, outbox: Outbox },
    /// A decoded client command.
    Message { id: SubscriberId, message: ClientMessage },
    /// A frame that could not be decoded. Answered with an `error` to `id`.
    Malformed { id: SubscriberId, error: ProtocolError },
    /// Socket closed or failed.
    Disconnected { id: SubscriberId },
}
