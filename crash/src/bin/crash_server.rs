//! Crash game server.
//!
//! # Usage
//!
//! ```sh
//! PORT=3001 crash-server
//! crash-server --bind 127.0.0.1 --port 4000 --fairness weighted
//! ```
//!
//! The port comes from `--port`, then `$PORT`, then 3001. Logging honours
//! `RUST_LOG` (default `crash=info`).
//!
//! `SIGINT`/`SIGTERM` stop the server gracefully: clients receive a close
//! frame and every thread is joined. The round in flight is not persisted.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};

use crash::config::{ConfigError, DuplicateBets, Fairness, ServerConfig, parse_port};
use crash::runtime::server::{Server, ServerError};

const USAGE: &str = "\
usage: crash-server [options]

options:
  -b, --bind <ip>          address to listen on (default 0.0.0.0)
  -p, --port <port>        port to listen on (default $PORT or 3001)
      --fairness <mode>    commit-reveal (default) or weighted
      --reject-duplicates  refuse a second bet from the same wallet in a round
      --reveal-at-start    include the crash point in game_started (legacy clients)
  -h, --help               print this help";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(CliError::Usage(msg)) => {
            eprintln!("crash-server: {msg}\n\n{USAGE}");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("crash-server: {e}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<(), CliError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(config) = parse_args(&args)? else {
        println!("{USAGE}");
        return Ok(());
    };

    crash::init_tracing();

    let server = Server::spawn(config)?;
    eprintln!("crash-server: listening on ws://{}", server.local_addr());

    let shutdown_flag = server.shutdown_flag();
    install_signal_handlers(&shutdown_flag)?;
    while !shutdown_flag.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    server.shutdown();
    eprintln!("crash-server: stopped");
    Ok(())
}

/// Makes `SIGINT` and `SIGTERM` set `flag` instead of killing the process.
fn install_signal_handlers(flag: &Arc<AtomicBool>) -> Result<(), CliError> {
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(flag)).map_err(CliError::Signal)?;
    }
    Ok(())
}

/// Builds the server configuration; `None` means `--help` was requested.
fn parse_args(args: &[String]) -> Result<Option<ServerConfig>, CliError> {
    let mut config = ServerConfig::from_env()?;
    let mut bind_ip: Option<IpAddr> = None;

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .cloned()
                .ok_or_else(|| CliError::Usage(format!("missing value for {flag}")))
        };
        match arg.as_str() {
            "--bind" | "-b" => {
                let raw = value("--bind")?;
                bind_ip = Some(
                    raw.parse()
                        .map_err(|_| CliError::Usage(format!("invalid bind address {raw:?}")))?,
                );
            }
            "--port" | "-p" => {
                let port = parse_port(&value("--port")?)?;
                config.bind_addr.set_port(port);
            }
            "--fairness" => {
                let fairness: Fairness = value("--fairness")?.parse()?;
                config.game = config.game.with_fairness(fairness);
            }
            "--reject-duplicates" => {
                config.game = config.game.with_duplicate_bets(DuplicateBets::Reject);
            }
            "--reveal-at-start" => {
                config.game = config.game.with_reveal_at_start(true);
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(CliError::Usage(format!("unknown argument {other:?}"))),
        }
    }

    if let Some(ip) = bind_ip {
        config.bind_addr = SocketAddr::new(ip, config.bind_addr.port());
    }
    Ok(Some(config))
}
