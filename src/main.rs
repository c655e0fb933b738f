//! authd entry point.
//!
//! ## Subcommands
//!
//! - `authd` or `authd serve` - run the server (default)
//! - `authd config validate` - load configuration and report problems
//! - `authd version` / `authd help`
//!
//! Shutdown is triggered by Ctrl-C or by pressing Enter on the console.

use std::process::ExitCode;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use authd::config::ServerConfig;
use authd::logging;
use authd::server;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => run_serve().await,
        "config" => match args.get(2).map(|s| s.as_str()).unwrap_or("validate") {
            "validate" => match ServerConfig::load() {
                Ok(_) => {
                    println!("configuration ok");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("configuration error: {e}");
                    ExitCode::FAILURE
                }
            },
            other => {
                eprintln!("Unknown config subcommand: {other}");
                ExitCode::FAILURE
            }
        },
        "version" | "--version" | "-V" => {
            println!("authd {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run_serve() -> ExitCode {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&config.log) {
        eprintln!("logging setup failed: {e}");
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    spawn_shutdown_triggers(cancel.clone());

    match server::run(config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

/// Ctrl-C and the console Enter key both request graceful shutdown.
fn spawn_shutdown_triggers(cancel: CancellationToken) {
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            signal_cancel.cancel();
        }
    });

    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                // EOF: console detached, keep running on signals only.
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    info!("console shutdown trigger received");
                    cancel.cancel();
                    break;
                }
            }
        }
    });
}

fn print_usage() {
    eprintln!(
        "authd {} - sign-up/sign-in socket server

USAGE:
    authd [COMMAND]

COMMANDS:
    serve              Run the server (default)
    config validate    Load configuration and report problems
    version            Print version
    help               Print this help",
        env!("CARGO_PKG_VERSION")
    );
}
