//! Long-poll server: prints what clients push, sends stdin lines out.

use std::net::SocketAddr;

use anyhow::Result;
use longpoll_core::{Attributes, Callbacks, ManagerBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::timing::TimingArgs;

/// Arguments for the server command.
#[derive(Debug, clap::Args)]
pub(crate) struct ServerArgs {
    /// Socket address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub(crate) socket: SocketAddr,

    /// Process identity (random UUID if omitted)
    #[arg(long)]
    pub(crate) id: Option<String>,

    /// Send stdin lines only to this peer instead of every online peer
    #[arg(long)]
    pub(crate) to: Option<String>,

    #[command(flatten)]
    pub(crate) timing: TimingArgs,
}

/// Run the server until `token` is cancelled or stdin closes.
pub(crate) async fn run(args: ServerArgs, token: CancellationToken) -> Result<()> {
    let callbacks = Callbacks::new()
        .on_up(|peer| println!("+ {peer}"))
        .on_down(|peer| println!("- {peer}"))
        .on_receive(|peer, msg| println!("{peer}: {}", String::from_utf8_lossy(msg.data())));

    let mut builder = ManagerBuilder::new(args.timing.config(args.socket)).events(callbacks);
    if let Some(id) = args.id {
        builder = builder.id(id);
    }
    let manager = builder.build();

    let addr = manager.start().await?;
    tracing::info!(id = manager.id(), %addr, "server ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        match &args.to {
            Some(peer) => {
                if let Err(e) = manager.send(peer, line, Attributes::new()).await {
                    tracing::warn!(peer_id = %peer, error = %e, "send failed");
                }
            }
            None => {
                let targeted = manager.fan_out(line, Attributes::new()).await;
                tracing::debug!(targeted, "broadcast");
            }
        }
    }

    manager.stop();
    Ok(())
}
