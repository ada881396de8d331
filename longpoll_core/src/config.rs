//! Manager configuration.

use core::time::Duration;
use std::net::{Ipv4Addr, SocketAddr};

use crate::{
    error::ConfigError, DEFAULT_DEADLINE_SECS, DEFAULT_GC_INTERVAL_SECS, DEFAULT_PATH,
    DEFAULT_PEER_EXPIRY_SECS, DEFAULT_POLL_LENGTH_SECS, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY,
};

/// Tunables for a [`Manager`](crate::Manager).
///
/// Validated by [`Config::validate`] when the manager starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub listen_addr: SocketAddr,

    /// Path serving both `GET` (poll) and `POST` (push).
    pub path: String,

    /// How long an inbound poll waits for a message before answering 204.
    ///
    /// Also the pause between retries after a failed outbound poll.
    pub poll_length: Duration,

    /// Inactivity window after which an inbound peer is evicted.
    pub peer_expiry: Duration,

    /// Bound on any single outbound request, and on blocking enqueues.
    pub deadline: Duration,

    /// Period of the garbage collection sweep.
    pub gc_interval: Duration,

    /// Capacity of each inbound peer's delivery queue.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            path: DEFAULT_PATH.to_string(),
            poll_length: Duration::from_secs(DEFAULT_POLL_LENGTH_SECS),
            peer_expiry: Duration::from_secs(DEFAULT_PEER_EXPIRY_SECS),
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Set the listen address.
    #[must_use]
    pub const fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the endpoint path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the inbound poll length.
    #[must_use]
    pub const fn with_poll_length(mut self, poll_length: Duration) -> Self {
        self.poll_length = poll_length;
        self
    }

    /// Set the inbound peer expiry.
    #[must_use]
    pub const fn with_peer_expiry(mut self, peer_expiry: Duration) -> Self {
        self.peer_expiry = peer_expiry;
        self
    }

    /// Set the network/enqueue deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the garbage collection period.
    #[must_use]
    pub const fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    /// Set the inbound delivery queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Check every field, reporting the first one that is invalid.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::RelativePath(self.path.clone()));
        }
        if self.poll_length.is_zero() {
            return Err(ConfigError::ZeroDuration("poll_length"));
        }
        if self.peer_expiry.is_zero() {
            return Err(ConfigError::ZeroDuration("peer_expiry"));
        }
        if self.deadline.is_zero() {
            return Err(ConfigError::ZeroDuration("deadline"));
        }
        if self.gc_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("gc_interval"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(config.path, "/poll");
        assert_eq!(config.queue_capacity, 50);
    }

    #[test]
    fn reports_first_invalid_field() {
        let config = Config::default()
            .with_poll_length(Duration::ZERO)
            .with_deadline(Duration::ZERO);

        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("poll_length"))
        );
    }

    #[test]
    fn rejects_empty_and_relative_paths() {
        assert_eq!(
            Config::default().with_path("").validate(),
            Err(ConfigError::EmptyPath)
        );
        assert_eq!(
            Config::default().with_path("poll").validate(),
            Err(ConfigError::RelativePath("poll".into()))
        );
    }

    #[test]
    fn rejects_zero_expiry_gc_and_capacity() {
        assert_eq!(
            Config::default()
                .with_peer_expiry(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroDuration("peer_expiry"))
        );
        assert_eq!(
            Config::default()
                .with_gc_interval(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroDuration("gc_interval"))
        );
        assert_eq!(
            Config::default().with_queue_capacity(0).validate(),
            Err(ConfigError::ZeroQueueCapacity)
        );
    }
}
