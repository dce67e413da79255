//! Per-connection session thread.
//!
//! A session owns one WebSocket and shuttles frames in both directions:
//! decoded client frames go into the game inbox, encoded events come out of
//! the subscriber's outbox. It never sees round state.
//!
//! The socket is blocking with a short read timeout so the same thread can
//! alternate between reading and flushing the outbox.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tungstenite::handshake::HandshakeError;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::{Message, WebSocket};

use crate::broadcast::{OutboxReader, SubscriberId, outbox};
use crate::protocol::{decode, decode_bytes};
use crate::trace::{debug, trace, warn};

use super::commands::{Inbound, InboxSender};

/// How long a read waits before the session checks its outbox again.
const READ_TIMEOUT: Duration = Duration::from_millis(5);

/// A client that stops reading for this long is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A client must finish the HTTP upgrade within this long.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout while the handshake is pending; bounds shutdown latency.
const HANDSHAKE_POLL: Duration = Duration::from_millis(50);

/// How long a session waits for room in a full inbox.
const INBOX_PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Failure to establish a session.
#[derive(Debug, thiserror::Error)]
pub(super) enum SessionError {
    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),
    #[error("websocket handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("server shut down during the handshake")]
    Shutdown,
    #[error("game inbox is full")]
    InboxFull,
}

/// Why a session ended without a socket error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closed {
    ByClient,
    /// The game thread dropped our outbox for falling behind.
    Evicted,
    Shutdown,
}

pub(super) struct Session {
    id: SubscriberId,
    socket: WebSocket<TcpStream>,
    outbox: OutboxReader,
    inbox: InboxSender,
    shutdown_flag: Arc<AtomicBool>,
}

impl Session {
    /// Completes the WebSocket handshake and registers with the game thread.
    ///
    /// # Errors
    ///
    /// Fails if the handshake fails, does not finish within
    /// [`HANDSHAKE_TIMEOUT`], is cut short by shutdown, or the inbox stays full.
    pub(super) fn accept(
        id: SubscriberId,
        stream: TcpStream,
        inbox: InboxSender,
        shutdown_flag: Arc<AtomicBool>,
    ) -> Result<Self, SessionError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        stream.set_read_timeout(Some(HANDSHAKE_POLL))?;

        let deadline = minstant::Instant::now() + HANDSHAKE_TIMEOUT;
        let mut attempt = tungstenite::accept(stream);
        let socket = loop {
            match attempt {
                Ok(socket) => break socket,
                Err(HandshakeError::Failure(e)) => return Err(SessionError::Handshake(e)),
                // The poll timeout surfaces as WouldBlock, i.e. an interrupted round.
                Err(HandshakeError::Interrupted(mid)) => {
                    if shutdown_flag.load(Ordering::Relaxed) {
                        return Err(SessionError::Shutdown);
                    }
                    if minstant::Instant::now() >= deadline {
                        return Err(SessionError::HandshakeTimeout(HANDSHAKE_TIMEOUT));
                    }
                    attempt = mid.handshake();
                }
            }
        };
        socket.get_ref().set_read_timeout(Some(READ_TIMEOUT))?;

        let (producer, reader) = outbox();
        inbox
            .push_blocking(
                Inbound::Connected {
                    id,
                    outbox: producer,
                },
                INBOX_PUSH_TIMEOUT,
            )
            .map_err(|_| SessionError::InboxFull)?;

        Ok(Self {
            id,
            socket,
            outbox: reader,
            inbox,
            shutdown_flag,
        })
    }

    /// Pumps frames until the client leaves, is evicted, or the server stops.
    pub(super) fn run(mut self) {
        match self.pump() {
            Ok(Closed::Evicted) => warn!(subscriber = %self.id, "session closed: evicted"),
            Ok(reason) => debug!(subscriber = %self.id, ?reason, "session closed"),
            Err(e) => debug!(subscriber = %self.id, error = %e, "session closed on error"),
        }
        self.forward(Inbound::Disconnected { id: self.id });
    }

    fn pump(&mut self) -> Result<Closed, tungstenite::Error> {
        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                self.close(CloseCode::Away, "server shutting down");
                return Ok(Closed::Shutdown);
            }

            // Read the flag first so nothing pushed before the drop is lost.
            let evicted = self.outbox.is_disconnected();
            self.flush_outbox()?;
            if evicted {
                self.close(CloseCode::Policy, "client too slow");
                return Ok(Closed::Evicted);
            }

            match self.socket.read() {
                Ok(Message::Text(text)) => {
                    let command = match decode(&text) {
                        Ok(message) => Inbound::Message { id: self.id, message },
                        Err(error) => Inbound::Malformed { id: self.id, error },
                    };
                    self.forward(command);
                }
                Ok(Message::Binary(bytes)) => {
                    let command = match decode_bytes(&bytes) {
                        Ok(message) => Inbound::Message { id: self.id, message },
                        Err(error) => Inbound::Malformed { id: self.id, error },
                    };
                    self.forward(command);
                }
                Ok(Message::Close(_)) => return Ok(Closed::ByClient),
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(Closed::ByClient);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn flush_outbox(&mut self) -> Result<(), tungstenite::Error> {
        let mut wrote = false;
        while let Some(frame) = self.outbox.pop() {
            self.socket.write(Message::text(&*frame))?;
            wrote = true;
        }
        if wrote {
            self.socket.flush()?;
        }
        Ok(())
    }

    fn forward(&self, command: Inbound) {
        if self
            .inbox
            .push_blocking(command, INBOX_PUSH_TIMEOUT)
            .is_err()
        {
            warn!(subscriber = %self.id, "game inbox full, dropping client command");
        }
    }

    fn close(&mut self, code: CloseCode, reason: &'static str) {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if let Err(e) = self.socket.close(Some(frame)).and_then(|()| self.socket.flush()) {
            trace!(subscriber = %self.id, error = %e, "close frame not delivered");
        }
    }
}
