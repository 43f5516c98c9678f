//! CMD Chat relay server binary.
//!
//! Accepts TCP (optionally TLS) connections and spawns one session task per
//! client. SIGINT/SIGTERM stop the accept loop, fan a shutdown signal out to
//! every session, and wait for the parallel drain before exiting.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use cmdchat_session::{run_session, ServerState, SessionConfig};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod metrics;
mod transport;

use transport::IoStream;

const EXIT_RUNTIME: u8 = 1;
const EXIT_CONFIG: u8 = 3;

/// Run the CMD Chat secure relay server
#[derive(Parser, Debug)]
#[command(name = "cmdchat-server", version, about = "CMD Chat relay server")]
struct Args {
    /// Host interface to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 5050)]
    port: u16,

    /// TLS certificate file (PEM). Enables TLS when given with --keyfile
    #[arg(long)]
    certfile: Option<std::path::PathBuf>,

    /// TLS private key file (PEM). Enables TLS when given with --certfile
    #[arg(long)]
    keyfile: Option<std::path::PathBuf>,

    /// Interval in seconds for logging basic metrics (0 disables)
    #[arg(long, default_value_t = 0)]
    metrics_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::new(config::log_level(args.log_level.as_deref()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run(args: Args) -> Result<(), u8> {
    let acceptor = match (&args.certfile, &args.keyfile) {
        (Some(cert), Some(key)) => match transport::load_acceptor(cert, key) {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                error!(error = %e, "tls configuration failed");
                return Err(EXIT_CONFIG);
            }
        },
        (None, None) => None,
        _ => {
            error!("--certfile and --keyfile must be given together");
            return Err(EXIT_CONFIG);
        }
    };

    let tokens = config::auth_tokens_from_env();
    if !tokens.is_empty() {
        info!(accepted = tokens.len(), "token auth enabled");
    }
    let state = Arc::new(ServerState::new(SessionConfig::default(), tokens));

    let listener = match TcpListener::bind((args.host.as_str(), args.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(host = %args.host, port = args.port, error = %e, "bind failed");
            return Err(EXIT_RUNTIME);
        }
    };
    let scheme = if acceptor.is_some() { "tls" } else { "tcp" };
    info!(
        "listening on {scheme}://{}:{} (v{})",
        args.host,
        args.port,
        env!("CARGO_PKG_VERSION")
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut metrics_task = None;
    if args.metrics_interval > 0 && config::metrics_enabled_in_env() {
        metrics_task = Some(metrics::spawn_metrics_loop(
            state.clone(),
            Duration::from_secs(args.metrics_interval),
            shutdown_rx.clone(),
        ));
    }

    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
        error!(error = %e, "failed to install SIGINT handler");
        EXIT_RUNTIME
    })?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        error!(error = %e, "failed to install SIGTERM handler");
        EXIT_RUNTIME
    })?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("SIGINT received");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let state = state.clone();
                let shutdown = shutdown_rx.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let stream = match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls) => IoStream::Tls(tls),
                            Err(e) => {
                                warn!(%peer, error = %e, "tls handshake failed");
                                return;
                            }
                        },
                        None => IoStream::Plain(stream),
                    };
                    let _ = run_session(state, stream, peer, shutdown).await;
                });
            }
        }
    }

    // Stop accepting, signal every session, and wait for the parallel drain.
    info!(sessions = state.registry.len(), "shutting down");
    drop(listener);
    let _ = shutdown_tx.send(true);

    let deadline = Instant::now() + state.config.drain_deadline + Duration::from_millis(500);
    while !state.registry.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if let Some(task) = metrics_task {
        task.abort();
    }
    info!("shutdown complete");
    Ok(())
}
