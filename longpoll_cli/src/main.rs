//! Demo server and client built on `longpoll_core`.

mod client;
mod server;
mod timing;

use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(version, about = "Publish/subscribe over HTTP long polling")]
struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Serve the long-poll endpoint and broadcast stdin lines to clients.
    Server(server::ServerArgs),

    /// Poll a server and push stdin lines to it.
    Client(client::ClientArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = CancellationToken::new();
    {
        let token = token.clone();
        let hits = AtomicUsize::new(0);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if hits.fetch_add(1, Ordering::Relaxed) == 0 {
                    eprintln!("Ctrl+C, shutting down (press again to force)");
                    token.cancel();
                } else {
                    eprintln!("Force exiting.");
                    std::process::exit(130);
                }
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let token = token.clone();
        tokio::spawn(async move {
            if let Ok(mut term) = signal(SignalKind::terminate()) {
                term.recv().await;
                eprintln!("SIGTERM, shutting down");
                token.cancel();
            }
        });
    }

    match Arguments::parse().command {
        Command::Server(args) => server::run(args, token).await,
        Command::Client(args) => client::run(args, token).await,
    }
}
