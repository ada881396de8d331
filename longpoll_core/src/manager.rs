//! The [`Manager`] façade.
//!
//! A manager owns the peer registry, serves the inbound endpoint, runs one
//! poller per outbound peer plus the garbage collector, and dispatches
//! messages to peers of either kind.

use core::sync::atomic::{AtomicBool, Ordering};
use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{PeerError, SendError, StartError, TransportError},
    events::{NoEvents, Notifier, PeerEvents},
    gc,
    http_client::{HttpClient, ReqwestHttpClient},
    inbound::InboundHandler,
    message::{Attributes, Message},
    peer::{EnqueueError, Link, Peer},
    poller,
    registry::Registry,
    server,
};

/// State shared by the manager and its background tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) id: String,
    pub(crate) config: Config,
    pub(crate) registry: Registry,
    pub(crate) notifier: Notifier,
    pub(crate) shutdown: CancellationToken,
    started: AtomicBool,
}

impl Shared {
    pub(crate) fn new(id: String, config: Config, events: Arc<dyn PeerEvents>) -> Self {
        Self {
            id,
            config,
            registry: Registry::new(),
            notifier: Notifier::new(events),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }
}

/// Builder for a [`Manager`].
pub struct ManagerBuilder<H = ReqwestHttpClient> {
    config: Config,
    id: Option<String>,
    events: Arc<dyn PeerEvents>,
    http: H,
}

impl ManagerBuilder {
    /// Start from `config`, no callbacks, a random identity and a
    /// [`ReqwestHttpClient`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            id: None,
            events: Arc::new(NoEvents),
            http: ReqwestHttpClient::new(),
        }
    }
}

impl<H: HttpClient> ManagerBuilder<H> {
    /// Use a fixed process identity instead of a random UUID.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Receive peer lifecycle and message notifications.
    #[must_use]
    pub fn events(mut self, events: impl PeerEvents) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Share an existing notification handler.
    #[must_use]
    pub fn shared_events(mut self, events: Arc<dyn PeerEvents>) -> Self {
        self.events = events;
        self
    }

    /// Talk to outbound peers through `http`.
    #[must_use]
    pub fn http_client<H2: HttpClient>(self, http: H2) -> ManagerBuilder<H2> {
        ManagerBuilder {
            config: self.config,
            id: self.id,
            events: self.events,
            http,
        }
    }

    /// Build the manager. Nothing runs until [`Manager::start`].
    #[must_use]
    pub fn build(self) -> Manager<H> {
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        Manager {
            shared: Arc::new(Shared::new(id, self.config, self.events)),
            http: self.http,
        }
    }
}

impl<H> core::fmt::Debug for ManagerBuilder<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("config", &self.config)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Registry, dispatcher and endpoint for long-poll peers.
///
/// Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct Manager<H: HttpClient = ReqwestHttpClient> {
    shared: Arc<Shared>,
    http: H,
}

impl Manager {
    /// A manager with default collaborators. See [`ManagerBuilder`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        ManagerBuilder::new(config).build()
    }
}

impl<H: HttpClient> Manager<H> {
    /// This process's identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// A handler for driving polls and pushes from a custom router.
    #[must_use]
    pub fn inbound_handler(&self) -> InboundHandler {
        InboundHandler::new(self.shared.clone())
    }

    /// Validate the configuration, bind the listener, and launch the
    /// endpoint and the garbage collector.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// * [`StartError::Config`] naming the first invalid field.
    /// * [`StartError::AlreadyStarted`] on a second call.
    /// * [`StartError::Bind`] if the listen address is unavailable.
    pub async fn start(&self) -> Result<SocketAddr, StartError> {
        self.start_with(|router| router).await
    }

    /// Like [`start`](Self::start), letting `customize` wrap the router with
    /// middleware before it is served.
    ///
    /// # Errors
    ///
    /// As [`start`](Self::start).
    pub async fn start_with<F>(&self, customize: F) -> Result<SocketAddr, StartError>
    where
        F: FnOnce(Router) -> Router,
    {
        let config = &self.shared.config;
        config.validate()?;

        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(StartError::AlreadyStarted);
        }

        let listener = match TcpListener::bind(config.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.started.store(false, Ordering::Release);
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;

        let app = customize(server::router(self.inbound_handler(), &config.path));

        tokio::spawn(gc::run(self.shared.clone()));
        tokio::spawn(server::serve(listener, app, self.shared.shutdown.clone()));

        info!(id = %self.shared.id, %local_addr, path = %config.path, "manager started");
        Ok(local_addr)
    }

    /// Stop the endpoint, the garbage collector, every poller and every
    /// suspended poll. A stopped manager cannot be restarted.
    pub fn stop(&self) {
        info!(id = %self.shared.id, "stopping manager");
        self.shared.shutdown.cancel();
    }

    /// Register an outbound peer and start polling `target_url`.
    ///
    /// `headers` are sent verbatim on every poll and push.
    ///
    /// # Errors
    ///
    /// * [`PeerError::EmptyId`] or [`PeerError::EmptyUrl`] on empty input.
    /// * [`PeerError::InvalidUrl`] if `target_url` does not parse.
    /// * [`PeerError::AlreadyExists`] if `id` is taken; the existing peer is
    ///   left untouched.
    pub async fn add_outbound_peer(
        &self,
        id: &str,
        target_url: &str,
        headers: Vec<(String, String)>,
        sticky_attributes: Attributes,
    ) -> Result<(), PeerError> {
        if id.is_empty() {
            return Err(PeerError::EmptyId);
        }
        if target_url.is_empty() {
            return Err(PeerError::EmptyUrl);
        }
        let url = Url::parse(target_url).map_err(|e| PeerError::InvalidUrl {
            url: target_url.to_owned(),
            reason: e.to_string(),
        })?;

        let peer = Arc::new(Peer::outbound(id.to_owned(), url, headers, sticky_attributes));
        self.shared.registry.register(peer.clone()).await?;

        info!(peer_id = id, url = target_url, "outbound peer added");
        tokio::spawn(poller::run(self.shared.clone(), self.http.clone(), peer));
        Ok(())
    }

    /// Unregister a peer.
    ///
    /// Its poller (if outbound) exits at the top of its next cycle; a
    /// suspended poll on its queue (if inbound) returns empty. No down
    /// callback fires.
    ///
    /// # Errors
    ///
    /// [`PeerError::NotFound`] if no such peer exists.
    pub async fn remove_peer(&self, id: &str) -> Result<(), PeerError> {
        let peer = self
            .shared
            .registry
            .remove(id)
            .await
            .ok_or_else(|| PeerError::NotFound(id.to_owned()))?;
        peer.retire();
        info!(peer_id = id, "peer removed");
        Ok(())
    }

    /// Whether a peer with this identity is registered.
    pub async fn peer_exists(&self, id: &str) -> bool {
        self.shared.registry.contains(id).await
    }

    /// Whether the peer is registered and online.
    pub async fn is_online(&self, id: &str) -> bool {
        self.shared
            .registry
            .get(id)
            .await
            .is_some_and(|peer| peer.is_online())
    }

    /// Identities of every registered peer, in no particular order.
    pub async fn peer_ids(&self) -> Vec<String> {
        self.shared.registry.ids().await
    }

    async fn peer(&self, id: &str) -> Result<Arc<Peer>, PeerError> {
        self.shared
            .registry
            .get(id)
            .await
            .ok_or_else(|| PeerError::NotFound(id.to_owned()))
    }

    /// Subscribe a peer to `topic`. Already-subscribed topics are ignored.
    ///
    /// # Errors
    ///
    /// [`PeerError::NotFound`] if no such peer exists.
    pub async fn add_topic(&self, id: &str, topic: &str) -> Result<(), PeerError> {
        self.peer(id).await?.add_topic(topic).await;
        Ok(())
    }

    /// Unsubscribe a peer from `topic`; a no-op if it was not subscribed.
    ///
    /// # Errors
    ///
    /// [`PeerError::NotFound`] if no such peer exists.
    pub async fn remove_topic(&self, id: &str, topic: &str) -> Result<(), PeerError> {
        self.peer(id).await?.remove_topic(topic).await;
        Ok(())
    }

    /// Replace a peer's subscriptions. Repeats are dropped.
    ///
    /// Concurrent writers race; the last one wins.
    ///
    /// # Errors
    ///
    /// [`PeerError::NotFound`] if no such peer exists.
    pub async fn set_topics(&self, id: &str, topics: Vec<String>) -> Result<(), PeerError> {
        self.peer(id).await?.set_topics(topics).await;
        Ok(())
    }

    /// A peer's subscriptions in the order they were added.
    ///
    /// # Errors
    ///
    /// [`PeerError::NotFound`] if no such peer exists.
    pub async fn get_topics(&self, id: &str) -> Result<Vec<String>, PeerError> {
        Ok(self.peer(id).await?.topics().await)
    }

    /// The last address an inbound peer reached us from.
    ///
    /// Always `None` for outbound peers.
    ///
    /// # Errors
    ///
    /// [`PeerError::NotFound`] if no such peer exists.
    pub async fn get_peer_address(&self, id: &str) -> Result<Option<SocketAddr>, PeerError> {
        let peer = self.peer(id).await?;
        Ok(match peer.inbound_queue() {
            Some(queue) => queue.address().await,
            None => None,
        })
    }

    /// Replace the attributes merged into every message sent to this peer.
    ///
    /// Concurrent writers race; the last one wins.
    ///
    /// # Errors
    ///
    /// [`PeerError::NotFound`] if no such peer exists.
    pub async fn set_sticky_attributes(
        &self,
        id: &str,
        attributes: Attributes,
    ) -> Result<(), PeerError> {
        self.peer(id).await?.set_sticky_attributes(attributes).await;
        Ok(())
    }

    /// Send `payload` to one peer as a fresh message.
    ///
    /// Outbound peers get a `POST`; inbound peers get the message queued,
    /// waiting up to the deadline for room.
    ///
    /// # Errors
    ///
    /// * [`SendError::NotFound`] if no such peer exists.
    /// * [`SendError::Transport`] if the `POST` fails or is not answered `200`.
    /// * [`SendError::DeadlineExceeded`] if the `POST` was not answered or the
    ///   queue stayed full within the deadline.
    /// * [`SendError::PeerClosed`] if the peer was removed meanwhile.
    pub async fn send(
        &self,
        id: &str,
        payload: impl Into<Vec<u8>>,
        attributes: Attributes,
    ) -> Result<(), SendError> {
        self.forward(id, Message::new(payload, attributes)).await
    }

    /// Serialize `value` as JSON and [`send`](Self::send) it.
    ///
    /// # Errors
    ///
    /// [`SendError::Serialization`] if `value` cannot be encoded, otherwise
    /// as [`send`](Self::send).
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        id: &str,
        value: &T,
        attributes: Attributes,
    ) -> Result<(), SendError> {
        let payload = serde_json::to_vec(value)?;
        self.send(id, payload, attributes).await
    }

    /// Dispatch an existing message, keeping its identifier and timestamp.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub async fn forward(&self, id: &str, message: Message) -> Result<(), SendError> {
        let peer = self
            .shared
            .registry
            .get(id)
            .await
            .ok_or_else(|| SendError::NotFound(id.to_owned()))?;
        deliver(&self.shared, &self.http, &peer, message).await
    }

    /// Send `payload` to every online peer.
    ///
    /// Deliveries run on detached tasks; failures are only logged. Returns
    /// the number of peers targeted.
    pub async fn fan_out(&self, payload: impl Into<Vec<u8>>, attributes: Attributes) -> usize {
        self.broadcast(payload.into(), attributes, None).await
    }

    /// Send `payload` to every online peer subscribed to `topic`.
    ///
    /// Same delivery rules as [`fan_out`](Self::fan_out).
    pub async fn fan_out_to_topic(
        &self,
        payload: impl Into<Vec<u8>>,
        attributes: Attributes,
        topic: &str,
    ) -> usize {
        self.broadcast(payload.into(), attributes, Some(topic)).await
    }

    async fn broadcast(
        &self,
        payload: Vec<u8>,
        attributes: Attributes,
        topic: Option<&str>,
    ) -> usize {
        let publish_time = Utc::now();
        let mut targeted = 0;

        for peer in self.shared.registry.snapshot().await {
            if !peer.is_online() {
                continue;
            }
            if let Some(topic) = topic {
                if !peer.is_subscribed(topic).await {
                    continue;
                }
            }

            let message = Message::published_at(payload.clone(), attributes.clone(), publish_time);
            let shared = self.shared.clone();
            let http = self.http.clone();
            tokio::spawn(async move {
                if let Err(e) = deliver(&shared, &http, &peer, message).await {
                    warn!(peer_id = peer.id(), error = %e, "fan-out delivery failed");
                }
            });
            targeted += 1;
        }

        debug!(targeted, ?topic, "fan-out dispatched");
        targeted
    }
}

/// Merge sticky attributes and hand `message` to `peer`.
async fn deliver<H: HttpClient>(
    shared: &Shared,
    http: &H,
    peer: &Peer,
    message: Message,
) -> Result<(), SendError> {
    let message = message.with_sticky(&peer.sticky_attributes().await);
    let deadline = shared.config.deadline;

    match peer.link() {
        Link::Outbound(target) => {
            let body = message.to_json()?;
            poller::push(http, &shared.id, target, body, deadline)
                .await
                .map_err(|source| match source {
                    TransportError::Timeout => SendError::DeadlineExceeded(peer.id().to_owned()),
                    source => SendError::Transport {
                        peer_id: peer.id().to_owned(),
                        source,
                    },
                })
        }
        Link::Inbound(queue) => {
            queue
                .enqueue(message, deadline)
                .await
                .map_err(|e| match e {
                    EnqueueError::Timeout => SendError::DeadlineExceeded(peer.id().to_owned()),
                    EnqueueError::Closed => SendError::PeerClosed(peer.id().to_owned()),
                })?;
            debug!(peer_id = peer.id(), queued = queue.len(), "message queued");
            Ok(())
        }
    }
}
