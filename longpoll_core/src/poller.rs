//! Outbound peer polling and pushing.
//!
//! Each outbound peer gets one [`run`] task. It long-polls the target with
//! `GET`, raises the receive callback for every delivered message and tracks
//! liveness:
//!
//! ```text
//!            200 / 201 / 204
//!   ┌─────────┐ ───────────► ┌────────┐
//!   │ Offline │              │ Online │
//!   └─────────┘ ◄─────────── └────────┘
//!        error, bad status, undecodable body
//!        (then sleep poll_length)
//! ```
//!
//! Pushing is a one-shot `POST` ([`push`]) and does not affect liveness.

use core::time::Duration;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    http_client::{HttpClient, HttpResponse},
    manager::Shared,
    message::Message,
    peer::{OutboundTarget, Peer},
    PEER_ID_HEADER,
};

/// What a single successful poll produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PollResult {
    /// 200: the target handed us a message.
    Delivered(Message),

    /// 201: the target admitted us as a new peer.
    Registered,

    /// 204: the poll window elapsed with nothing to deliver.
    Idle,
}

#[derive(Debug, Error)]
pub(crate) enum PollError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("undecodable message body: {0}")]
    Decode(#[from] serde_json::Error),
}

async fn exchange<H: HttpClient>(
    request: BoxFuture<'_, Result<HttpResponse, H::Error>>,
    deadline: Duration,
) -> Result<HttpResponse, TransportError> {
    match tokio::time::timeout(deadline, request).await {
        Ok(Ok(resp)) => Ok(resp),
        Ok(Err(e)) if H::is_timeout(&e) => Err(TransportError::Timeout),
        Ok(Err(e)) => Err(TransportError::Request(e.to_string())),
        Err(_) => Err(TransportError::Timeout),
    }
}

/// Issue one long-poll `GET` against `target`.
pub(crate) async fn poll_once<H: HttpClient>(
    http: &H,
    target: &OutboundTarget,
    headers: &[(String, String)],
    deadline: Duration,
) -> Result<PollResult, PollError> {
    let resp = exchange::<H>(http.get(target.url(), headers, deadline), deadline).await?;
    target.record_remote_id(resp.header(PEER_ID_HEADER)).await;

    match resp.status {
        200 => Ok(PollResult::Delivered(Message::from_json(&resp.body)?)),
        201 => Ok(PollResult::Registered),
        204 => Ok(PollResult::Idle),
        other => Err(TransportError::UnexpectedStatus(other).into()),
    }
}

/// Deliver an encoded message to `target` with a one-shot `POST`.
///
/// Only `200` counts as success.
pub(crate) async fn push<H: HttpClient>(
    http: &H,
    local_id: &str,
    target: &OutboundTarget,
    body: Vec<u8>,
    deadline: Duration,
) -> Result<(), TransportError> {
    let headers = target.request_headers(local_id);
    let resp = exchange::<H>(http.post(target.url(), &headers, body, deadline), deadline).await?;
    target.record_remote_id(resp.header(PEER_ID_HEADER)).await;

    if resp.status == 200 {
        Ok(())
    } else {
        Err(TransportError::UnexpectedStatus(resp.status))
    }
}

/// Poll `peer` until it leaves the registry or the manager stops.
pub(crate) async fn run<H: HttpClient>(shared: Arc<Shared>, http: H, peer: Arc<Peer>) {
    let Some(target) = peer.outbound_target() else {
        return;
    };
    let headers = target.request_headers(&shared.id);
    let config = &shared.config;

    info!(peer_id = peer.id(), url = %target.url(), "starting poller");

    loop {
        if !shared.registry.is_current(&peer).await {
            debug!(peer_id = peer.id(), "peer removed, poller exiting");
            break;
        }

        let result = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            result = poll_once(&http, target, &headers, config.deadline) => result,
        };

        // Removed while the request was in flight; drop the outcome.
        if !shared.registry.is_current(&peer).await {
            debug!(peer_id = peer.id(), "peer removed during poll, poller exiting");
            break;
        }

        match result {
            Ok(PollResult::Delivered(message)) => {
                peer.mark_online(&shared.notifier);
                shared.notifier.received(peer.id(), message);
            }
            Ok(PollResult::Registered | PollResult::Idle) => {
                peer.mark_online(&shared.notifier);
            }
            Err(err) => {
                warn!(peer_id = peer.id(), error = %err, "poll failed");
                peer.mark_offline(&shared.notifier);

                tokio::select! {
                    biased;
                    () = shared.shutdown.cancelled() => break,
                    () = tokio::time::sleep(config.poll_length) => {}
                }
            }
        }
    }

    info!(peer_id = peer.id(), "poller exited");
}
