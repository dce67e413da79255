//! WebSocket game server.
//!
//! # Architecture
//!
//! ```text
//!                       ┌────────────────┐
//!   TCP ──► listener ──►│ session thread │──┐ Inbound (MPSC inbox)
//!                       └────────────────┘  │
//!                              ▲            ▼
//!                              │      ┌─────────────┐
//!              outbox (SPSC) ──┴──────│ game thread │◄── timing wheel
//!                                     └─────────────┘
//! ```
//!
//! - **Listener thread**: accepts connections and spawns one session each.
//! - **Session threads**: WebSocket handshake, decode client frames, write
//!   outbox frames.
//! - **Game thread**: sole owner of the round and the subscriber registry.
//!
//! # Example
//!
//! ```no_run
//! use crash::config::ServerConfig;
//! use crash::runtime::server::Server;
//!
//! let server = Server::spawn(ServerConfig::default())?;
//! println!("listening on {}", server.local_addr());
//! // ... run until asked to stop ...
//! server.shutdown();
//! # Ok::<(), crash::runtime::server::ServerError>(())
//! ```

mod commands;
mod game_thread;
mod listener;
mod session;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::config::{ConfigError, ServerConfig};
use crate::game::{Outcomes, RoundController};
use crate::sync::mpsc;
use crate::trace::{debug, error, info};

use game_thread::GameThread;
use listener::Listener;

/// Error starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("listener socket setup failed: {0}")]
    Socket(#[source] std::io::Error),
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Handle to a running server.
///
/// Dropping the handle signals shutdown but does not wait for threads to exit.
/// Use [`Server::shutdown`] to stop and join.
pub struct Server {
    local_addr: SocketAddr,
    shutdown_flag: Arc<AtomicBool>,
    game_handle: Option<JoinHandle<()>>,
    listener_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Binds the listener and starts the game and listener threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the address cannot
    /// be bound, or a thread cannot be spawned.
    pub fn spawn(config: ServerConfig) -> Result<Self, ServerError> {
        config.game.validate()?;
        info!(
            bind_addr = %config.bind_addr,
            fairness = ?config.game.fairness,
            duplicate_bets = ?config.game.duplicate_bets,
            countdown = config.game.countdown_seconds,
            tick_ms = config.game.tick_interval.as_millis() as u64,
            "server starting"
        );

        let listener = TcpListener::bind(config.bind_addr).map_err(|source| {
            error!(bind_addr = %config.bind_addr, error = %source, "failed to bind listener");
            ServerError::Bind {
                addr: config.bind_addr,
                source,
            }
        })?;
        listener.set_nonblocking(true).map_err(ServerError::Socket)?;
        let local_addr = listener.local_addr().map_err(ServerError::Socket)?;

        let (inbox_tx, inbox_rx) = mpsc::channel();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let source = Outcomes::from_fairness(config.game.fairness);
        let controller = RoundController::new(config.game, source);
        let mut game = GameThread::new(controller, inbox_rx, Arc::clone(&shutdown_flag));

        debug!("spawning game thread");
        let game_handle = thread::Builder::new()
            .name("crash-game".into())
            .spawn(move || {
                info!("game thread started");
                game.run();
                info!("game thread exiting");
            })
            .map_err(|source| ServerError::Spawn {
                thread: "game",
                source,
            })?;

        let mut accept = Listener::new(listener, inbox_tx, Arc::clone(&shutdown_flag));
        debug!("spawning listener thread");
        let listener_handle = match thread::Builder::new()
            .name("crash-listener".into())
            .spawn(move || {
                info!("listener thread started");
                accept.run();
                info!("listener thread exiting");
            }) {
            Ok(handle) => handle,
            Err(source) => {
                shutdown_flag.store(true, Ordering::Relaxed);
                let _ = game_handle.join();
                return Err(ServerError::Spawn {
                    thread: "listener",
                    source,
                });
            }
        };

        info!(%local_addr, "server started");
        Ok(Self {
            local_addr,
            shutdown_flag,
            game_handle: Some(game_handle),
            listener_handle: Some(listener_handle),
        })
    }

    /// Address the listener is bound to; resolves port `0` to the real port.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a clone of the shutdown flag for external signal handling.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    /// Signals shutdown and waits for every thread to exit.
    ///
    /// Sessions send a close frame to their client before exiting.
    pub fn shutdown(mut self) {
        info!("server shutdown initiated");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Some(handle) = self.listener_handle.take() {
            debug!("waiting for listener and sessions to exit");
            let _ = handle.join();
        }
        if let Some(handle) = self.game_handle.take() {
            debug!("waiting for game thread to exit");
            let _ = handle.join();
        }

        info!("server shutdown complete");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }
}
