//! Long-poll client: polls a server, prints what it sends, pushes stdin lines.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use longpoll_core::{Attributes, Callbacks, ManagerBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::timing::TimingArgs;

/// Identity the server is registered under locally.
const SERVER_PEER: &str = "server";

/// Arguments for the client command.
#[derive(Debug, clap::Args)]
pub(crate) struct ClientArgs {
    /// Server endpoint URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080/poll")]
    pub(crate) url: String,

    /// Socket address for this process's own endpoint
    #[arg(short, long, default_value = "127.0.0.1:0")]
    pub(crate) socket: SocketAddr,

    /// Process identity (random UUID if omitted)
    #[arg(long)]
    pub(crate) id: Option<String>,

    /// Extra request header as NAME=VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME=VALUE")]
    pub(crate) headers: Vec<String>,

    #[command(flatten)]
    pub(crate) timing: TimingArgs,
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("header {raw:?} is not NAME=VALUE"))?;
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}

/// Run the client until `token` is cancelled or stdin closes.
pub(crate) async fn run(args: ClientArgs, token: CancellationToken) -> Result<()> {
    let headers = args
        .headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>>>()?;

    let callbacks = Callbacks::new()
        .on_up(|peer| println!("connected to {peer}"))
        .on_down(|peer| println!("lost {peer}"))
        .on_receive(|_, msg| println!("{}", String::from_utf8_lossy(msg.data())));

    let mut builder = ManagerBuilder::new(args.timing.config(args.socket)).events(callbacks);
    if let Some(id) = args.id {
        builder = builder.id(id);
    }
    let manager = builder.build();
    manager.start().await?;

    manager
        .add_outbound_peer(SERVER_PEER, &args.url, headers, Attributes::new())
        .await?;
    tracing::info!(id = manager.id(), url = %args.url, "client polling");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        if let Err(e) = manager.send(SERVER_PEER, line, Attributes::new()).await {
            tracing::warn!(error = %e, "send failed");
        }
    }

    manager.stop();
    Ok(())
}
