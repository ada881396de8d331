//! Per-counterpart state.
//!
//! A [`Peer`] is either an _outbound_ target this process polls, or an
//! _inbound_ client that polls us and drains a bounded delivery queue. Both
//! kinds share liveness, topic subscriptions and sticky attributes.

use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::net::SocketAddr;

use async_lock::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::{
    events::Notifier,
    message::{Attributes, Message},
    PEER_ID_HEADER,
};

/// A registered counterpart.
#[derive(Debug)]
pub(crate) struct Peer {
    id: String,
    online: AtomicBool,
    topics: Mutex<Vec<String>>,
    sticky_attributes: Mutex<Attributes>,
    link: Link,
}

/// How messages reach a peer.
#[derive(Debug)]
pub(crate) enum Link {
    /// We poll the peer and push to it over HTTP.
    Outbound(OutboundTarget),

    /// The peer polls us; messages wait in its queue.
    Inbound(InboundQueue),
}

impl Peer {
    /// An outbound peer. Starts offline until its first successful poll.
    pub(crate) fn outbound(
        id: String,
        url: Url,
        headers: Vec<(String, String)>,
        sticky_attributes: Attributes,
    ) -> Self {
        Self {
            id,
            online: AtomicBool::new(false),
            topics: Mutex::new(Vec::new()),
            sticky_attributes: Mutex::new(sticky_attributes),
            link: Link::Outbound(OutboundTarget {
                url,
                headers,
                remote_id: Mutex::new(None),
            }),
        }
    }

    /// An inbound peer, online from the moment it first reaches us.
    pub(crate) fn inbound(id: String, capacity: usize, address: Option<SocketAddr>) -> Self {
        Self {
            id,
            online: AtomicBool::new(true),
            topics: Mutex::new(Vec::new()),
            sticky_attributes: Mutex::new(Attributes::new()),
            link: Link::Inbound(InboundQueue::new(capacity, address)),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) const fn link(&self) -> &Link {
        &self.link
    }

    pub(crate) const fn inbound_queue(&self) -> Option<&InboundQueue> {
        match &self.link {
            Link::Inbound(queue) => Some(queue),
            Link::Outbound(_) => None,
        }
    }

    pub(crate) const fn outbound_target(&self) -> Option<&OutboundTarget> {
        match &self.link {
            Link::Outbound(target) => Some(target),
            Link::Inbound(_) => None,
        }
    }

    pub(crate) fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Flip to online, firing the up callback only on a real transition.
    pub(crate) fn mark_online(&self, notifier: &Notifier) {
        if !self.online.swap(true, Ordering::AcqRel) {
            notifier.up(&self.id);
        }
    }

    /// Flip to offline, firing the down callback only on a real transition.
    pub(crate) fn mark_offline(&self, notifier: &Notifier) {
        if self.online.swap(false, Ordering::AcqRel) {
            notifier.down(&self.id);
        }
    }

    /// Take the peer out of service without notifying anyone.
    ///
    /// Closes the inbound queue, releasing a suspended poll.
    pub(crate) fn retire(&self) {
        self.online.store(false, Ordering::Release);
        if let Some(queue) = self.inbound_queue() {
            queue.close();
        }
    }

    pub(crate) async fn topics(&self) -> Vec<String> {
        self.topics.lock().await.clone()
    }

    pub(crate) async fn add_topic(&self, topic: &str) {
        let mut topics = self.topics.lock().await;
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_owned());
        }
    }

    pub(crate) async fn remove_topic(&self, topic: &str) {
        self.topics.lock().await.retain(|t| t != topic);
    }

    /// Replace the subscriptions, dropping repeats but keeping first-seen order.
    pub(crate) async fn set_topics(&self, topics: Vec<String>) {
        let mut unique: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }
        *self.topics.lock().await = unique;
    }

    pub(crate) async fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().await.iter().any(|t| t == topic)
    }

    pub(crate) async fn sticky_attributes(&self) -> Attributes {
        self.sticky_attributes.lock().await.clone()
    }

    pub(crate) async fn set_sticky_attributes(&self, attributes: Attributes) {
        *self.sticky_attributes.lock().await = attributes;
    }
}

/// Where an outbound peer lives.
#[derive(Debug)]
pub(crate) struct OutboundTarget {
    url: Url,
    headers: Vec<(String, String)>,
    remote_id: Mutex<Option<String>>,
}

impl OutboundTarget {
    pub(crate) const fn url(&self) -> &Url {
        &self.url
    }

    /// Custom headers plus our own identity.
    pub(crate) fn request_headers(&self, local_id: &str) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        headers.push((PEER_ID_HEADER.to_owned(), local_id.to_owned()));
        headers.extend(self.headers.iter().cloned());
        headers
    }

    /// The identity the remote last announced, if any.
    #[cfg(test)]
    pub(crate) async fn remote_id(&self) -> Option<String> {
        self.remote_id.lock().await.clone()
    }

    /// Remember the identity header of a response.
    pub(crate) async fn record_remote_id(&self, seen: Option<&str>) {
        let Some(seen) = seen else { return };
        let mut remote_id = self.remote_id.lock().await;
        if remote_id.as_deref() != Some(seen) {
            tracing::debug!(
                url = %self.url,
                previous = ?remote_id.as_deref(),
                current = seen,
                "remote identity changed"
            );
            *remote_id = Some(seen.to_owned());
        }
    }
}

/// Why a message could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    /// The queue stayed full for the whole deadline.
    Timeout,

    /// The queue was closed.
    Closed,
}

/// Bounded delivery queue drained by an inbound peer's polls.
#[derive(Debug)]
pub(crate) struct InboundQueue {
    tx: async_channel::Sender<Message>,
    rx: async_channel::Receiver<Message>,
    consumer: Mutex<()>,
    last_consumed: Mutex<Instant>,
    address: Mutex<Option<SocketAddr>>,
}

impl InboundQueue {
    fn new(capacity: usize, address: Option<SocketAddr>) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            consumer: Mutex::new(()),
            last_consumed: Mutex::new(Instant::now()),
            address: Mutex::new(address),
        }
    }

    /// Queue a message, waiting at most `deadline` for room.
    pub(crate) async fn enqueue(
        &self,
        message: Message,
        deadline: Duration,
    ) -> Result<(), EnqueueError> {
        match tokio::time::timeout(deadline, self.tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EnqueueError::Closed),
            Err(_) => Err(EnqueueError::Timeout),
        }
    }

    /// Wait for the next message as the single active consumer.
    ///
    /// Returns `None` once the queue is closed and drained. Cancel-safe: a
    /// message is only taken when this future completes.
    pub(crate) async fn next_message(&self) -> Option<Message> {
        let _consumer = self.consumer.lock().await;
        self.rx.recv().await.ok()
    }

    pub(crate) fn close(&self) {
        self.tx.close();
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) async fn touch(&self) {
        *self.last_consumed.lock().await = Instant::now();
    }

    pub(crate) async fn last_consumed(&self) -> Instant {
        *self.last_consumed.lock().await
    }

    pub(crate) async fn address(&self) -> Option<SocketAddr> {
        *self.address.lock().await
    }

    pub(crate) async fn set_address(&self, address: Option<SocketAddr>) {
        if let Some(address) = address {
            *self.address.lock().await = Some(address);
        }
    }
}
