//! Identity → [`Peer`] mapping.
//!
//! Peers are handed out as `Arc`s so callers never hold a shard lock across
//! network I/O. Removal by identity _and_ pointer lets background tasks act
//! on exactly the entry they inspected, never on a successor registered under
//! the same identity.

use std::{net::SocketAddr, sync::Arc};

use crate::{error::PeerError, peer::Peer, sharded_map::ShardedMap};

/// Concurrent peer registry.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    peers: ShardedMap<String, Arc<Peer>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn get(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.get_cloned(id).await
    }

    pub(crate) async fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id).await
    }

    /// Register a new peer.
    ///
    /// # Errors
    ///
    /// Returns [`PeerError::AlreadyExists`] and leaves the existing entry
    /// untouched if the identity is taken.
    pub(crate) async fn register(&self, peer: Arc<Peer>) -> Result<(), PeerError> {
        self.peers
            .insert_if_absent(peer.id().to_owned(), peer)
            .await
            .map_err(|rejected| PeerError::AlreadyExists(rejected.id().to_owned()))
    }

    /// Look up `id`, admitting it as an inbound peer if unseen.
    ///
    /// The boolean is `true` when this call created the peer.
    pub(crate) async fn get_or_register_inbound(
        &self,
        id: &str,
        capacity: usize,
        address: Option<SocketAddr>,
    ) -> (Arc<Peer>, bool) {
        self.peers
            .get_or_insert_with(id.to_owned(), || {
                Arc::new(Peer::inbound(id.to_owned(), capacity, address))
            })
            .await
    }

    pub(crate) async fn remove(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.remove(id).await
    }

    /// Remove `peer` only if it is still the registered entry for its identity.
    pub(crate) async fn remove_if_same(&self, peer: &Arc<Peer>) -> bool {
        self.peers
            .remove_if(peer.id(), |current| Arc::ptr_eq(current, peer))
            .await
            .is_some()
    }

    /// Whether `peer` is still the registered entry for its identity.
    pub(crate) async fn is_current(&self, peer: &Arc<Peer>) -> bool {
        self.peers
            .test(peer.id(), |current| Arc::ptr_eq(current, peer))
            .await
    }

    pub(crate) async fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.values().await
    }

    pub(crate) async fn ids(&self) -> Vec<String> {
        self.peers.keys().await
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::message::Attributes;

    fn outbound(id: &str) -> Arc<Peer> {
        let url = Url::parse("http://127.0.0.1:9/poll").expect("valid url");
        Arc::new(Peer::outbound(id.into(), url, Vec::new(), Attributes::new()))
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_original() {
        let registry = Registry::new();
        let first = outbound("srv");

        registry.register(first.clone()).await.expect("vacant");
        let err = registry.register(outbound("srv")).await.expect_err("taken");

        assert_eq!(err, PeerError::AlreadyExists("srv".into()));
        let current = registry.get("srv").await.expect("registered");
        assert!(Arc::ptr_eq(&current, &first));
    }

    #[tokio::test]
    async fn inbound_admission_creates_once() {
        let registry = Registry::new();

        let (a, created_a) = registry.get_or_register_inbound("c1", 4, None).await;
        let (b, created_b) = registry.get_or_register_inbound("c1", 4, None).await;

        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ids().await, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn stale_handle_cannot_remove_successor() {
        let registry = Registry::new();
        let (old, _) = registry.get_or_register_inbound("c1", 4, None).await;

        assert!(registry.remove("c1").await.is_some());
        let (new, created) = registry.get_or_register_inbound("c1", 4, None).await;
        assert!(created);

        assert!(!registry.is_current(&old).await);
        assert!(!registry.remove_if_same(&old).await);
        assert!(registry.contains("c1").await);

        assert!(registry.is_current(&new).await);
        assert!(registry.remove_if_same(&new).await);
        assert!(registry.snapshot().await.is_empty());
    }
}
