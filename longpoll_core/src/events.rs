//! Peer lifecycle and delivery notifications.
//!
//! Applications observe the manager through [`PeerEvents`]. Every
//! notification runs on its own detached task, so a slow handler never stalls
//! a poll loop or a request handler.

use core::fmt;
use std::sync::Arc;

use crate::message::Message;

/// Receives peer lifecycle and message notifications.
///
/// All methods default to doing nothing.
///
/// Each notification runs on its own task, so there is no ordering between
/// them. A peer that flaps quickly may be reported down before the matching
/// up arrives; call [`Manager::is_online`](crate::Manager::is_online) for the
/// current state.
pub trait PeerEvents: Send + Sync + 'static {
    /// A peer came online.
    fn peer_up(&self, _peer_id: &str) {}

    /// A peer went offline or was evicted.
    fn peer_down(&self, _peer_id: &str) {}

    /// A message arrived from a peer.
    fn message_received(&self, _peer_id: &str, _message: Message) {}
}

/// Ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl PeerEvents for NoEvents {}

type PeerFn = Box<dyn Fn(&str) + Send + Sync>;
type ReceiveFn = Box<dyn Fn(&str, Message) + Send + Sync>;

/// Closure-backed [`PeerEvents`].
///
/// ```
/// use longpoll_core::Callbacks;
///
/// let callbacks = Callbacks::new()
///     .on_up(|peer| println!("up: {peer}"))
///     .on_receive(|peer, msg| println!("{peer}: {:?}", msg.data()));
/// ```
#[derive(Default)]
pub struct Callbacks {
    up: Option<PeerFn>,
    down: Option<PeerFn>,
    receive: Option<ReceiveFn>,
}

impl Callbacks {
    /// No callbacks registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a peer comes online.
    #[must_use]
    pub fn on_up(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.up = Some(Box::new(f));
        self
    }

    /// Called when a peer goes offline or is evicted.
    #[must_use]
    pub fn on_down(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.down = Some(Box::new(f));
        self
    }

    /// Called for every message received from a peer.
    #[must_use]
    pub fn on_receive(mut self, f: impl Fn(&str, Message) + Send + Sync + 'static) -> Self {
        self.receive = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("up", &self.up.is_some())
            .field("down", &self.down.is_some())
            .field("receive", &self.receive.is_some())
            .finish()
    }
}

impl PeerEvents for Callbacks {
    fn peer_up(&self, peer_id: &str) {
        if let Some(f) = &self.up {
            f(peer_id);
        }
    }

    fn peer_down(&self, peer_id: &str) {
        if let Some(f) = &self.down {
            f(peer_id);
        }
    }

    fn message_received(&self, peer_id: &str, message: Message) {
        if let Some(f) = &self.receive {
            f(peer_id, message);
        }
    }
}

/// Dispatches [`PeerEvents`] on detached tokio tasks.
#[derive(Clone)]
pub(crate) struct Notifier {
    events: Arc<dyn PeerEvents>,
}

impl Notifier {
    pub(crate) fn new(events: Arc<dyn PeerEvents>) -> Self {
        Self { events }
    }

    pub(crate) fn up(&self, peer_id: &str) {
        tracing::info!(peer_id, "peer up");
        let events = self.events.clone();
        let peer_id = peer_id.to_owned();
        tokio::spawn(async move { events.peer_up(&peer_id) });
    }

    pub(crate) fn down(&self, peer_id: &str) {
        tracing::info!(peer_id, "peer down");
        let events = self.events.clone();
        let peer_id = peer_id.to_owned();
        tokio::spawn(async move { events.peer_down(&peer_id) });
    }

    pub(crate) fn received(&self, peer_id: &str, message: Message) {
        tracing::debug!(peer_id, message_id = message.message_id(), "message received");
        let events = self.events.clone();
        let peer_id = peer_id.to_owned();
        tokio::spawn(async move { events.message_received(&peer_id, message) });
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
