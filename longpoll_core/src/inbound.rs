//! Poll and push operations for peers that connect to us.
//!
//! [`InboundHandler`] is transport-agnostic: the bundled [`server`](crate::server)
//! module wires it to an `axum` route, but any router can drive it.

use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{error::HandlerError, manager::Shared, message::Message, peer::Peer};

/// The result of a successful inbound poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A queued message (`200`).
    Delivered(Message),

    /// The peer was unseen and has just been admitted (`201`).
    Created,

    /// Nothing arrived within the poll length, or the peer was removed (`204`).
    Empty,
}

/// Serves inbound polls and pushes against a manager's registry.
#[derive(Debug, Clone)]
pub struct InboundHandler {
    shared: Arc<Shared>,
}

impl InboundHandler {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// This process's identity, echoed in every response.
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.shared.id
    }

    /// Cancelled when the owning manager stops.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    async fn admit(&self, peer_id: &str, address: Option<SocketAddr>) -> (Arc<Peer>, bool) {
        let (peer, created) = self
            .shared
            .registry
            .get_or_register_inbound(peer_id, self.shared.config.queue_capacity, address)
            .await;

        if created {
            info!(peer_id, ?address, "inbound peer admitted");
            self.shared.notifier.up(peer_id);
        } else if let Some(queue) = peer.inbound_queue() {
            queue.set_address(address).await;
        }

        (peer, created)
    }

    /// Long-poll on behalf of `peer_id`.
    ///
    /// An unseen identity is admitted and answered with [`PollOutcome::Created`]
    /// at once. Otherwise this waits for the first of: a queued message, the
    /// configured poll length, or `cancel`.
    ///
    /// # Errors
    ///
    /// * [`HandlerError::MissingPeerId`] if `peer_id` is empty.
    /// * [`HandlerError::Cancelled`] if `cancel` fired first.
    pub async fn poll(
        &self,
        peer_id: &str,
        address: Option<SocketAddr>,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, HandlerError> {
        if peer_id.is_empty() {
            return Err(HandlerError::MissingPeerId);
        }

        let (peer, created) = self.admit(peer_id, address).await;
        if created {
            return Ok(PollOutcome::Created);
        }

        let poll_length = self.shared.config.poll_length;

        // An outbound peer polling us has no queue to drain.
        let Some(queue) = peer.inbound_queue() else {
            return tokio::select! {
                biased;
                () = cancel.cancelled() => Err(HandlerError::Cancelled),
                () = tokio::time::sleep(poll_length) => Ok(PollOutcome::Empty),
            };
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HandlerError::Cancelled),
            next = queue.next_message() => {
                Ok(next.map_or(PollOutcome::Empty, PollOutcome::Delivered))
            }
            () = tokio::time::sleep(poll_length) => Ok(PollOutcome::Empty),
        };
        queue.touch().await;

        debug!(peer_id, ?outcome, "poll finished");
        outcome
    }

    /// Accept a JSON message pushed by `peer_id`.
    ///
    /// Unseen identities are admitted first. The receive callback fires on a
    /// detached task; this returns without waiting for it.
    ///
    /// # Errors
    ///
    /// * [`HandlerError::MissingPeerId`] if `peer_id` is empty.
    /// * [`HandlerError::MalformedBody`] if `body` is not a valid message.
    pub async fn push(
        &self,
        peer_id: &str,
        address: Option<SocketAddr>,
        body: &[u8],
    ) -> Result<(), HandlerError> {
        if peer_id.is_empty() {
            return Err(HandlerError::MissingPeerId);
        }

        self.admit(peer_id, address).await;

        let message = Message::from_json(body)?;
        self.shared.notifier.received(peer_id, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::{
        config::Config,
        events::testing::{settle, Event, Recorder},
        message::Attributes,
    };

    fn handler(recorder: &Arc<Recorder>) -> InboundHandler {
        let config = Config::default()
            .with_poll_length(Duration::from_secs(10))
            .with_queue_capacity(8);
        InboundHandler::new(Arc::new(Shared::new("me".into(), config, recorder.clone())))
    }

    fn msg(data: &[u8]) -> Message {
        Message::new(data.to_vec(), Attributes::new())
    }

    async fn enqueue(handler: &InboundHandler, peer_id: &str, data: &[u8]) {
        let peer = handler
            .shared
            .registry
            .get(peer_id)
            .await
            .expect("registered");
        peer.inbound_queue()
            .expect("inbound")
            .enqueue(msg(data), Duration::from_secs(1))
            .await
            .expect("room");
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let cancel = CancellationToken::new();

        assert!(matches!(
            handler.poll("", None, &cancel).await,
            Err(HandlerError::MissingPeerId)
        ));
        assert!(matches!(
            handler.push("", None, b"{}").await,
            Err(HandlerError::MissingPeerId)
        ));
        assert!(handler.shared.registry.ids().await.is_empty());
    }

    #[tokio::test]
    async fn first_poll_admits_peer_once() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "10.0.0.7:4000".parse().expect("addr");

        let outcome = handler.poll("c1", Some(addr), &cancel).await.expect("poll");
        settle().await;

        assert_eq!(outcome, PollOutcome::Created);
        assert_eq!(recorder.events(), vec![Event::Up("c1".into())]);
        let peer = handler.shared.registry.get("c1").await.expect("registered");
        assert!(peer.is_online());
        assert_eq!(
            peer.inbound_queue().expect("inbound").address().await,
            Some(addr)
        );
    }

    #[tokio::test]
    async fn queued_messages_are_polled_in_order() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let cancel = CancellationToken::new();
        handler.poll("c1", None, &cancel).await.expect("admit");

        for data in [b"a", b"b", b"c"] {
            enqueue(&handler, "c1", data).await;
        }

        for expected in [b"a", b"b", b"c"] {
            match handler.poll("c1", None, &cancel).await.expect("poll") {
                PollOutcome::Delivered(msg) => assert_eq!(msg.data(), expected),
                other => panic!("expected delivery, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_poll_returns_empty_after_poll_length() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let cancel = CancellationToken::new();
        handler.poll("c1", None, &cancel).await.expect("admit");

        let started = tokio::time::Instant::now();
        let outcome = handler.poll("c1", None, &cancel).await.expect("poll");

        assert_eq!(outcome, PollOutcome::Empty);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_poll_wakes_on_send() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let cancel = CancellationToken::new();
        handler.poll("c1", None, &cancel).await.expect("admit");

        let waiting = {
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handler.poll("c1", None, &cancel).await })
        };
        settle().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        enqueue(&handler, "c1", b"wake").await;

        match waiting.await.expect("join").expect("poll") {
            PollOutcome::Delivered(msg) => assert_eq!(msg.data(), b"wake"),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_ends_poll() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let cancel = CancellationToken::new();
        handler.poll("c1", None, &cancel).await.expect("admit");

        cancel.cancel();

        assert!(matches!(
            handler.poll("c1", None, &cancel).await,
            Err(HandlerError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn removal_releases_suspended_poll() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let cancel = CancellationToken::new();
        handler.poll("c1", None, &cancel).await.expect("admit");

        let waiting = {
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handler.poll("c1", None, &cancel).await })
        };
        settle().await;

        let peer = handler
            .shared
            .registry
            .remove("c1")
            .await
            .expect("registered");
        peer.retire();

        assert_eq!(
            waiting.await.expect("join").expect("poll"),
            PollOutcome::Empty
        );
    }

    #[tokio::test(start_paused = true)]
    async fn push_admits_and_notifies() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);
        let body = msg(b"hello").to_json().expect("encode");

        handler.push("c1", None, &body).await.expect("push");
        settle().await;

        assert!(handler.shared.registry.contains("c1").await);
        assert_eq!(recorder.count(&Event::Up("c1".into())), 1);
        assert_eq!(
            recorder.count(&Event::Received("c1".into(), b"hello".to_vec())),
            1
        );

        let outcome = handler
            .poll("c1", None, &CancellationToken::new())
            .await;
        assert!(!matches!(outcome, Ok(PollOutcome::Created)));
    }

    #[tokio::test]
    async fn malformed_push_is_rejected_after_admission() {
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&recorder);

        let result = handler.push("c1", None, b"not json").await;
        settle().await;

        assert!(matches!(result, Err(HandlerError::MalformedBody(_))));
        assert!(handler.shared.registry.contains("c1").await);
        assert_eq!(recorder.count(&Event::Up("c1".into())), 1);
    }
}
