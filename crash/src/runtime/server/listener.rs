//! Listener thread: accepts TCP connections and starts a session thread each.

use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::broadcast::SubscriberId;
use crate::trace::{debug, info, warn};

use super::commands::InboxSender;
use super::session::Session;

/// Sleep between accept polls when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(5);

pub(super) struct Listener {
    listener: TcpListener,
    inbox: InboxSender,
    shutdown_flag: Arc<AtomicBool>,
    next_id: u64,
    sessions: Vec<JoinHandle<()>>,
}

impl Listener {
    /// `listener` must already be non-blocking.
    pub(super) fn new(
        listener: TcpListener,
        inbox: InboxSender,
        shutdown_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            listener,
            inbox,
            shutdown_flag,
            next_id: 1,
            sessions: Vec::new(),
        }
    }

    /// Accepts until shutdown, then joins every session thread.
    pub(super) fn run(&mut self) {
        while !self.shutdown_flag.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = SubscriberId::new(self.next_id);
                    self.next_id += 1;
                    debug!(subscriber = %id, %peer, "accepted connection");
                    self.spawn_session(id, stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.sessions.retain(|handle| !handle.is_finished());
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!(sessions = self.sessions.len(), "listener stopping, joining sessions");
        for handle in self.sessions.drain(..) {
            let _ = handle.join();
        }
    }

    fn spawn_session(&mut self, id: SubscriberId, stream: std::net::TcpStream) {
        let inbox = self.inbox.clone();
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let spawned = thread::Builder::new()
            .name(format!("crash-session-{}", id.get()))
            .spawn(move || match Session::accept(id, stream, inbox, shutdown_flag) {
                Ok(session) => session.run(),
                Err(e) => debug!(subscriber = %id, error = %e, "session not established"),
            });
        match spawned {
            Ok(handle) => self.sessions.push(handle),
            Err(e) => warn!(subscriber = %id, error = %e, "failed to spawn session thread"),
        }
    }
}
