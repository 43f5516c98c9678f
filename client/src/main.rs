//! CMD Chat terminal client binary.
//!
//! Connects (optionally over TLS), performs the key-wrap handshake, and
//! keeps the session alive with an exponential reconnect backoff capped at
//! 30 seconds with ±20% jitter. A fresh keypair is generated per attempt.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod commands;
mod files;
mod history;
mod net;
mod render;
mod session;

use session::{run_once, ClientConfig, ClientError, Identity, SessionEnd};
use net::TlsSettings;
use render::RendererKind;

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Connect to a CMD Chat server
#[derive(Parser, Debug)]
#[command(name = "cmdchat-client", version, about = "CMD Chat terminal client")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 5050)]
    port: u16,

    /// Display name
    #[arg(long, default_value = "anonymous")]
    name: String,

    /// Room to join
    #[arg(long, default_value = "lobby")]
    room: String,

    /// Auth token, when the server requires one
    #[arg(long)]
    token: Option<String>,

    /// Message renderer
    #[arg(long, value_enum, default_value = "rich")]
    renderer: RendererKind,

    /// Rendered-line backlog to keep in memory
    #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u16).range(10..=1000))]
    buffer_size: u16,

    /// Connect over TLS
    #[arg(long)]
    tls: bool,

    /// Skip TLS certificate verification
    #[arg(long, requires = "tls")]
    tls_insecure: bool,

    /// Trust this CA bundle instead of the default web roots
    #[arg(long, requires = "tls")]
    ca_file: Option<std::path::PathBuf>,

    /// Append an encrypted transcript to this file
    #[arg(long, requires = "history_passphrase")]
    history_file: Option<std::path::PathBuf>,

    /// Passphrase protecting the transcript
    #[arg(long, requires = "history_file")]
    history_passphrase: Option<String>,

    /// Suppress per-retry status output while reconnecting
    #[arg(long)]
    quiet_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging stays quiet by default so it does not fight the chat output
    let level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("CMDCHAT_LOG_LEVEL").ok())
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.to_lowercase()))
        .with_target(false)
        .init();

    let mut history = match (&args.history_file, &args.history_passphrase) {
        (Some(path), Some(passphrase)) => match history::History::open(path, passphrase) {
            Ok(history) => Some(history),
            Err(e) => {
                eprintln!("history file unavailable: {e}");
                return ExitCode::from(3);
            }
        },
        _ => None,
    };

    let renderer = render::create(args.renderer);
    let mut identity = Identity {
        name: cmdchat_wire::sanitize_name(&args.name),
        room: cmdchat_wire::sanitize_room(&args.room),
    };
    let config = ClientConfig {
        host: args.host,
        port: args.port,
        token: args.token,
        buffer_size: args.buffer_size as usize,
        tls: TlsSettings {
            enabled: args.tls,
            insecure: args.tls_insecure,
            ca_file: args.ca_file,
        },
        quiet_reconnect: args.quiet_reconnect,
    };

    // Dedicated stdin feeder so the session loop can select on lines
    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut backoff = BACKOFF_START;
    loop {
        let failure = match run_once(
            &config,
            &mut identity,
            renderer.as_ref(),
            history.as_mut(),
            &mut line_rx,
        )
        .await
        {
            Ok(SessionEnd::Quit) => {
                println!("client session terminated");
                return ExitCode::SUCCESS;
            }
            Ok(SessionEnd::Disconnected) => {
                backoff = BACKOFF_START;
                "connection closed by server".to_string()
            }
            Err(ClientError::Auth) => {
                eprintln!("server rejected the auth token");
                return ExitCode::from(1);
            }
            Err(e) => e.to_string(),
        };

        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        let delay = backoff.mul_f64(jitter);
        if config.quiet_reconnect {
            println!("[status] reconnecting...");
        } else {
            println!(
                "[status] connection lost ({failure}), retrying in {:.1}s",
                delay.as_secs_f64()
            );
        }
        tokio::time::sleep(delay).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}
