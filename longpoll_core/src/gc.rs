//! Eviction of inbound peers that stopped polling.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::manager::Shared;

/// Evict every inbound peer idle for longer than the configured expiry.
///
/// Each evicted peer goes offline (one down callback), has its queue closed,
/// and leaves the registry. Outbound peers are never touched. Returns the
/// evicted identities.
pub(crate) async fn sweep(shared: &Shared, now: Instant) -> Vec<String> {
    let expiry = shared.config.peer_expiry;
    let mut evicted = Vec::new();

    for peer in shared.registry.snapshot().await {
        let Some(queue) = peer.inbound_queue() else {
            continue;
        };

        let idle = now.saturating_duration_since(queue.last_consumed().await);
        if idle <= expiry {
            continue;
        }

        // Only the entry inspected above; a successor under the same id stays.
        if shared.registry.remove_if_same(&peer).await {
            info!(peer_id = peer.id(), idle_secs = idle.as_secs(), "evicting idle peer");
            peer.mark_offline(&shared.notifier);
            queue.close();
            evicted.push(peer.id().to_owned());
        }
    }

    evicted
}

/// Sweep every `gc_interval` until the manager stops.
pub(crate) async fn run(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.gc_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = sweep(&shared, Instant::now()).await;
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "gc pass evicted peers");
                }
            }
        }
    }

    debug!("gc loop exited");
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use url::Url;

    use super::*;
    use crate::{
        config::Config,
        events::testing::{settle, Event, Recorder},
        message::Attributes,
        peer::Peer,
    };

    fn shared(recorder: &Arc<Recorder>) -> Arc<Shared> {
        let config = Config::default()
            .with_peer_expiry(Duration::from_secs(30))
            .with_gc_interval(Duration::from_secs(10));
        Arc::new(Shared::new("me".into(), config, recorder.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_expired_inbound_peers() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared(&recorder);
        let url = Url::parse("http://remote.test/poll").expect("valid url");
        shared
            .registry
            .register(Arc::new(Peer::outbound(
                "srv".into(),
                url,
                Vec::new(),
                Attributes::new(),
            )))
            .await
            .expect("vacant");
        shared
            .registry
            .get_or_register_inbound("stale", 4, None)
            .await;

        tokio::time::advance(Duration::from_secs(20)).await;
        let (fresh, _) = shared
            .registry
            .get_or_register_inbound("fresh", 4, None)
            .await;

        tokio::time::advance(Duration::from_secs(11)).await;
        let evicted = sweep(&shared, Instant::now()).await;
        settle().await;

        assert_eq!(evicted, vec!["stale".to_string()]);
        assert!(shared.registry.contains("srv").await);
        assert!(shared.registry.contains("fresh").await);
        assert!(!shared.registry.contains("stale").await);
        assert!(fresh.is_online());
        assert_eq!(recorder.events(), vec![Event::Down("stale".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_exactly_at_expiry_survives() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared(&recorder);
        shared.registry.get_or_register_inbound("c1", 4, None).await;

        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(sweep(&shared, Instant::now()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_evicts_and_closes_queue() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared(&recorder);
        let (peer, _) = shared.registry.get_or_register_inbound("c1", 4, None).await;

        let task = tokio::spawn(run(shared.clone()));
        tokio::time::sleep(Duration::from_secs(45)).await;
        settle().await;

        assert!(!shared.registry.contains("c1").await);
        assert_eq!(recorder.count(&Event::Down("c1".into())), 1);
        assert!(peer
            .inbound_queue()
            .expect("inbound")
            .next_message()
            .await
            .is_none());

        shared.shutdown.cancel();
        task.await.expect("gc exits on shutdown");
    }
}
