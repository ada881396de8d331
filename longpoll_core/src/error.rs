//! Error types for the long-poll manager.

use thiserror::Error;

/// An invalid configuration field, reported by [`Config::validate`](crate::Config::validate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The listen path is empty.
    #[error("listen path is required")]
    EmptyPath,

    /// The listen path does not start with `/`.
    #[error("listen path must start with '/': {0:?}")]
    RelativePath(String),

    /// A duration field is zero.
    #[error("{0} must be a positive duration")]
    ZeroDuration(&'static str),

    /// The delivery queue capacity is zero.
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

/// Problem while starting the manager.
#[derive(Debug, Error)]
pub enum StartError {
    /// Configuration failed validation; nothing was started.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The manager is already running.
    #[error("manager already started")]
    AlreadyStarted,

    /// The HTTP listener could not bind.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Problem with a peer registry operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// The peer identity is empty.
    #[error("peer id is required")]
    EmptyId,

    /// The outbound target URL is empty.
    #[error("target URL is required")]
    EmptyUrl,

    /// The outbound target URL does not parse.
    #[error("invalid target URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A peer with this identity is already registered.
    #[error("peer already exists: {0}")]
    AlreadyExists(String),

    /// No peer with this identity is registered.
    #[error("peer not found: {0}")]
    NotFound(String),
}

/// Failure of a single HTTP exchange with an outbound peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request could not be completed.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the deadline.
    #[error("request timed out")]
    Timeout,

    /// The remote answered with a status other than the expected one.
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

/// Problem while sending or forwarding a message to one peer.
#[derive(Debug, Error)]
pub enum SendError {
    /// No peer with this identity is registered.
    #[error("failed to send message to {0}: peer not found")]
    NotFound(String),

    /// The payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The outbound push failed.
    #[error("failed to send message to {peer_id}: {source}")]
    Transport {
        /// The destination peer.
        peer_id: String,
        /// The underlying HTTP failure.
        #[source]
        source: TransportError,
    },

    /// The inbound queue stayed full for the whole deadline.
    #[error("failed to send message to {0}: deadline exceeded")]
    DeadlineExceeded(String),

    /// The inbound queue was closed because the peer was removed.
    #[error("failed to send message to {0}: peer removed")]
    PeerClosed(String),
}

/// Problem while handling an inbound poll or push.
///
/// The routing layer maps each variant onto a status code.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request carried no identity header.
    #[error("uuid is required")]
    MissingPeerId,

    /// The push body is not a valid message.
    #[error("failed to parse message: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// The wait was cancelled before a message or the poll timer arrived.
    #[error("poll cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_field() {
        let err = ConfigError::ZeroDuration("deadline");
        assert_eq!(format!("{err}"), "deadline must be a positive duration");
    }

    #[test]
    fn send_error_mentions_peer() {
        let err = SendError::DeadlineExceeded("p1".into());
        assert_eq!(
            format!("{err}"),
            "failed to send message to p1: deadline exceeded"
        );
    }

    #[test]
    fn transport_error_wraps_status() {
        let err = SendError::Transport {
            peer_id: "srv".into(),
            source: TransportError::UnexpectedStatus(500),
        };
        assert_eq!(
            format!("{err}"),
            "failed to send message to srv: unexpected status 500"
        );
    }

    #[test]
    fn handler_error_displays() {
        assert_eq!(format!("{}", HandlerError::MissingPeerId), "uuid is required");
        assert_eq!(format!("{}", HandlerError::Cancelled), "poll cancelled");
    }
}
