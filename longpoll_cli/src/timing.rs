//! Protocol timing flags shared by both subcommands.

use std::{net::SocketAddr, time::Duration};

use longpoll_core::{
    Config, DEFAULT_DEADLINE_SECS, DEFAULT_GC_INTERVAL_SECS, DEFAULT_PATH,
    DEFAULT_PEER_EXPIRY_SECS, DEFAULT_POLL_LENGTH_SECS, DEFAULT_QUEUE_CAPACITY,
};

#[derive(Debug, clap::Args)]
pub(crate) struct TimingArgs {
    /// Endpoint path serving poll and push
    #[arg(long, default_value = DEFAULT_PATH)]
    pub(crate) path: String,

    /// Seconds an inbound poll waits before answering 204
    #[arg(long, default_value_t = DEFAULT_POLL_LENGTH_SECS)]
    pub(crate) poll_length: u64,

    /// Seconds of inactivity before an inbound peer is evicted
    #[arg(long, default_value_t = DEFAULT_PEER_EXPIRY_SECS)]
    pub(crate) peer_expiry: u64,

    /// Seconds allowed for any single request or enqueue
    #[arg(long, default_value_t = DEFAULT_DEADLINE_SECS)]
    pub(crate) deadline: u64,

    /// Seconds between garbage collection passes
    #[arg(long, default_value_t = DEFAULT_GC_INTERVAL_SECS)]
    pub(crate) gc_interval: u64,

    /// Capacity of each inbound peer's delivery queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub(crate) queue_capacity: usize,
}

impl TimingArgs {
    pub(crate) fn config(&self, listen_addr: SocketAddr) -> Config {
        Config::default()
            .with_listen_addr(listen_addr)
            .with_path(self.path.clone())
            .with_poll_length(Duration::from_secs(self.poll_length))
            .with_peer_expiry(Duration::from_secs(self.peer_expiry))
            .with_deadline(Duration::from_secs(self.deadline))
            .with_gc_interval(Duration::from_secs(self.gc_interval))
            .with_queue_capacity(self.queue_capacity)
    }
}
