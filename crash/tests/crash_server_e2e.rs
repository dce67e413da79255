//! End-to-end tests against a real server on an ephemeral port.
//!
//! Each test spawns its own [`Server`] bound to `127.0.0.1:0` with a fast
//! table, then talks to it over WebSocket exactly like a browser client.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=crash=debug cargo test --test crash_server_e2e -- --nocapture
//! ```

use std::net::{SocketAddr, TcpStream};
use std::sync::{Once, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tungstenite::{Message, WebSocket};

use crash::config::{ConfigError, GameConfig, ServerConfig};
use crash::game::{Multiplier, verify};
use crash::runtime::server::{Server, ServerError};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(crash::init_tracing);
}

/// Reads give up after this long without any frame.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on frames skipped while waiting for a specific message.
const MAX_FRAMES: usize = 20_000;

fn fast_table() -> GameConfig {
    GameConfig::default()
        .with_countdown(3, Duration::from_millis(150))
        .with_tick_interval(Duration::from_millis(2))
        .with_settle_delay(Duration::from_millis(50))
}

fn spawn_server(game: GameConfig) -> Server {
    init_test_tracing();
    let config = ServerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        game,
    };
    Server::spawn(config).expect("server should start")
}

struct Client {
    ws: WebSocket<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("tcp connect");
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        let (ws, _response) =
            tungstenite::client(format!("ws://{addr}/"), stream).expect("websocket handshake");
        Self { ws }
    }

    fn send(&mut self, text: &str) {
        self.ws.send(Message::text(text)).expect("send");
    }

    fn recv(&mut self) -> Value {
        loop {
            match self.ws.read().expect("read") {
                Message::Text(text) => return serde_json::from_str(&text).expect("valid json"),
                Message::Close(frame) => panic!("server closed the connection: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Skips frames until one of type `kind` arrives.
    fn recv_until(&mut self, kind: &str) -> Value {
        for _ in 0..MAX_FRAMES {
            let message = self.recv();
            if message["type"] == kind {
                return message;
            }
        }
        panic!("no {kind} within {MAX_FRAMES} frames");
    }

    /// Skips frames until one of the given types arrives.
    fn recv_any(&mut self, kinds: &[&str]) -> Value {
        for _ in 0..MAX_FRAMES {
            let message = self.recv();
            if kinds.iter().any(|kind| message["type"] == *kind) {
                return message;
            }
        }
        panic!("none of {kinds:?} within {MAX_FRAMES} frames");
    }
}

#[test]
fn new_client_receives_initial_state() {
    let server = spawn_server(fast_table());
    let mut client = Client::connect(server.local_addr());

    let initial = client.recv();
    assert_eq!(initial["type"], "initial_state");
    let state = &initial["gameState"];
    assert!(
        ["waiting", "running", "crashed"].contains(&state["status"].as_str().unwrap()),
        "status was {}",
        state["status"]
    );
    assert!(state["roundId"].as_u64().unwrap() >= 1);
    assert!(state["multiplier"].as_f64().unwrap() >= 1.0);
    assert!(state["players"].is_array());
    assert!(state["history"].is_array());
    assert!(state["seedHash"].is_string(), "commit-reveal is the default");

    server.shutdown();
}

#[test]
fn full_round_is_settled_and_verifiable() {
    let server = spawn_server(fast_table());
    let mut client = Client::connect(server.local_addr());
    client.recv_until("initial_state");

    let opened = client.recv_until("round_opened");
    let round_id = opened["roundId"].as_u64().unwrap();
    let seed_hash = opened["seedHash"].as_str().unwrap().to_owned();
    assert_eq!(opened["countdown"], 3);

    client.send(r#"{"type":"place_bet","wallet":"A","bet":10}"#);
    let joined = client.recv_until("player_joined");
    assert_eq!(
        joined["players"][0],
        serde_json::json!({"wallet": "A", "bet": 10.0, "cashedOut": false, "cashoutMultiplier": 0})
    );

    let started = client.recv_until("game_started");
    assert_eq!(started["roundId"], round_id);
    assert_eq!(started["seedHash"], seed_hash.as_str());
    assert!(started.get("crashPoint").is_none(), "crash point stays hidden");

    client.send(r#"{"type":"cash_out","wallet":"A"}"#);
    let reply = client.recv_any(&["player_cashed_out", "error"]);
    if reply["type"] == "error" {
        // The round crashed before the cash-out reached the game thread.
        assert_eq!(reply["reason"], "wrong_phase");
    } else {
        assert_eq!(reply["wallet"], "A");
        assert_eq!(reply["players"][0]["cashedOut"], true);
        assert!(reply["multiplier"].as_f64().unwrap() >= 1.0);
    }

    let crashed = client.recv_until("game_crashed");
    assert_eq!(crashed["roundId"], round_id);
    let crash_point = Multiplier::from_f64(crashed["crashPoint"].as_f64().unwrap());
    assert!(crash_point >= Multiplier::ONE);
    assert!(crash_point < Multiplier::from_hundredths(1_100));

    let seed = crashed["serverSeed"].as_str().unwrap();
    assert_eq!(verify(seed, round_id, &seed_hash).unwrap(), crash_point);

    let latest = &crashed["history"][0];
    assert_eq!(latest["roundId"], round_id);
    assert_eq!(latest["players"], 1);
    assert_eq!(latest["serverSeed"], seed);

    server.shutdown();
}

#[test]
fn bets_are_broadcast_to_every_client() {
    let server = spawn_server(fast_table());
    let mut alice = Client::connect(server.local_addr());
    let mut bob = Client::connect(server.local_addr());
    alice.recv_until("initial_state");
    bob.recv_until("initial_state");

    alice.recv_until("round_opened");
    alice.send(r#"{"type":"place_bet","wallet":"alice","bet":2.5}"#);

    let seen_by_bob = bob.recv_until("player_joined");
    assert_eq!(seen_by_bob["players"][0]["wallet"], "alice");
    assert_eq!(seen_by_bob["players"][0]["bet"], 2.5);

    server.shutdown();
}

#[test]
fn bad_input_gets_private_error_and_connection_survives() {
    let server = spawn_server(fast_table());
    let mut client = Client::connect(server.local_addr());
    client.recv_until("initial_state");

    client.send("definitely not json");
    let error = client.recv_until("error");
    assert_eq!(error["reason"], "malformed_message");

    client.send(r#"{"type":"cash_out","wallet":"ghost"}"#);
    let error = client.recv_until("error");
    assert!(
        ["wrong_phase", "no_open_bet"].contains(&error["reason"].as_str().unwrap()),
        "reason was {}",
        error["reason"]
    );

    client.recv_until("round_opened");
    client.send(r#"{"type":"place_bet","wallet":"B","bet":-1}"#);
    assert_eq!(client.recv_until("error")["reason"], "invalid_wager");

    server.shutdown();
}

#[test]
fn second_server_on_same_port_fails_to_bind() {
    let first = spawn_server(fast_table());
    let config = ServerConfig {
        bind_addr: first.local_addr(),
        game: fast_table(),
    };
    assert!(matches!(Server::spawn(config), Err(ServerError::Bind { .. })));
    first.shutdown();
}

#[test]
fn invalid_table_is_rejected_before_binding() {
    let config = ServerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        game: GameConfig::default().with_settle_delay(Duration::from_secs(10)),
    };
    assert!(matches!(
        Server::spawn(config),
        Err(ServerError::Config(ConfigError::IntervalOutOfRange { name: "settle_delay", .. }))
    ));
}

#[test]
fn shutdown_closes_client_connections() {
    let server = spawn_server(fast_table());
    let mut client = Client::connect(server.local_addr());
    client.recv_until("initial_state");

    server.shutdown();

    let closed = (0..MAX_FRAMES).any(|_| match client.ws.read() {
        Ok(Message::Close(_)) => true,
        Ok(_) => false,
        Err(_) => true,
    });
    assert!(closed, "client should observe the close");
}

#[test]
fn silent_tcp_peer_does_not_block_shutdown() {
    let server = spawn_server(fast_table());
    // Connects but never sends the HTTP upgrade.
    let _silent = TcpStream::connect(server.local_addr()).expect("tcp connect");
    let mut client = Client::connect(server.local_addr());
    client.recv_until("initial_state");

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        server.shutdown();
        let _ = done_tx.send(());
    });

    assert!(
        done_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
        "shutdown must not wait for a pending handshake"
    );
}
