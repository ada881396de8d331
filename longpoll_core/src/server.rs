//! Axum routing for the inbound endpoint.
//!
//! One path serves both verbs: `GET` polls, `POST` pushes. The caller's
//! identity comes from the `uuid` request header; every response carries ours.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::HandlerError,
    inbound::{InboundHandler, PollOutcome},
    PEER_ID_HEADER,
};

type Reply = (StatusCode, HeaderMap, Vec<u8>);

/// Build a router serving `handler` on `path`.
///
/// The router must be served with
/// [`into_make_service_with_connect_info::<SocketAddr>`](Router::into_make_service_with_connect_info)
/// for peer addresses to be recorded; without it they stay unknown.
pub fn router(handler: InboundHandler, path: &str) -> Router {
    Router::new()
        .route(path, get(handle_poll).post(handle_push))
        .with_state(handler)
}

/// Serve `app` on `listener` until `shutdown` fires.
pub(crate) async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) {
    let addr = listener.local_addr().ok();
    info!(?addr, "listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await;

    match result {
        Ok(()) => info!(?addr, "listener stopped"),
        Err(e) => error!(?addr, error = %e, "listener failed"),
    }
}

fn peer_id(headers: &HeaderMap) -> &str {
    headers
        .get(PEER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn response_headers(handler: &InboundHandler) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(handler.local_id()) {
        headers.insert(PEER_ID_HEADER, value);
    }
    headers
}

fn rejection(handler: &InboundHandler, err: &HandlerError) -> Reply {
    let status = match err {
        HandlerError::MissingPeerId | HandlerError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        HandlerError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, response_headers(handler), err.to_string().into_bytes())
}

async fn handle_poll(
    State(handler): State<InboundHandler>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Reply {
    let id = peer_id(&headers);
    let address = connect.map(|ConnectInfo(addr)| addr);
    let cancel = handler.shutdown_token();

    match handler.poll(id, address, &cancel).await {
        Ok(PollOutcome::Delivered(message)) => match message.to_json() {
            Ok(body) => {
                let mut headers = response_headers(&handler);
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                (StatusCode::OK, headers, body)
            }
            Err(e) => {
                error!(peer_id = id, error = %e, "failed to encode message");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    response_headers(&handler),
                    Vec::new(),
                )
            }
        },
        Ok(PollOutcome::Created) => (StatusCode::CREATED, response_headers(&handler), Vec::new()),
        Ok(PollOutcome::Empty) => (
            StatusCode::NO_CONTENT,
            response_headers(&handler),
            Vec::new(),
        ),
        Err(e) => {
            debug!(peer_id = id, error = %e, "poll rejected");
            rejection(&handler, &e)
        }
    }
}

async fn handle_push(
    State(handler): State<InboundHandler>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let id = peer_id(&headers);
    let address = connect.map(|ConnectInfo(addr)| addr);

    match handler.push(id, address, &body).await {
        Ok(()) => (StatusCode::OK, response_headers(&handler), Vec::new()),
        Err(e) => {
            warn!(peer_id = id, error = %e, "push rejected");
            rejection(&handler, &e)
        }
    }
}
