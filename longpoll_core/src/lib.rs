//! # Long-Poll Core
//!
//! Bidirectional publish/subscribe messaging over plain HTTP using long
//! polling. Every process runs a [`Manager`] that plays both roles at once:
//!
//! - it serves a single endpoint that _inbound_ peers poll (`GET`) and push
//!   to (`POST`), and
//! - it polls the endpoints of _outbound_ peers it was told about, pushing
//!   messages to them with one-shot `POST`s.
//!
//! # Protocol
//!
//! ```text
//! ┌──────────┐                            ┌──────────┐
//! │  Client   │                            │  Server   │
//! └────┬─────┘                            └────┬─────┘
//!      │  GET /poll            uuid: c1        │
//!      │ ────────────────────────────────────► │  unseen peer
//!      │  201 Created          uuid: s1        │
//!      │ ◄──────────────────────────────────── │
//!      │                                       │
//!      │  GET /poll            uuid: c1        │
//!      │ ────────────────────────────────────► │
//!      │           ... (blocks) ...            │
//!      │  200 + Message (JSON) │ 204 (timeout) │
//!      │ ◄──────────────────────────────────── │
//!      │                                       │
//!      │  POST /poll           uuid: c1        │
//!      │  Body: Message (JSON)                 │
//!      │ ────────────────────────────────────► │
//!      │  200 OK                               │
//!      │ ◄──────────────────────────────────── │
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                        Manager                        │
//! │                                                       │
//! │  Registry: ShardedMap<String, Arc<Peer>>              │
//! │                                                       │
//! │  send() ──► Inbound peer:  [bounded queue] ──► GET    │
//! │         ──► Outbound peer: POST target                │
//! │                                                       │
//! │  poller (1 task / outbound peer) ──► GET target       │
//! │  collector (1 task) ──► evicts idle inbound peers     │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod http_client;
pub mod inbound;
pub mod manager;
pub mod message;
pub mod server;
pub mod sharded_map;

mod gc;
mod peer;
mod poller;
mod registry;

pub use config::Config;
pub use error::{ConfigError, HandlerError, PeerError, SendError, StartError, TransportError};
pub use events::{Callbacks, NoEvents, PeerEvents};
pub use http_client::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use inbound::{InboundHandler, PollOutcome};
pub use manager::{Manager, ManagerBuilder};
pub use message::{Attributes, Message};

/// Header carrying the sender's identity on every request and response.
pub const PEER_ID_HEADER: &str = "uuid";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default endpoint path serving both poll and push.
pub const DEFAULT_PATH: &str = "/poll";

/// Default time an inbound poll waits before answering 204 (10 seconds).
pub const DEFAULT_POLL_LENGTH_SECS: u64 = 10;

/// Default inactivity window before an inbound peer is evicted (30 seconds).
pub const DEFAULT_PEER_EXPIRY_SECS: u64 = 30;

/// Default bound on any single network exchange or enqueue (20 seconds).
pub const DEFAULT_DEADLINE_SECS: u64 = 20;

/// Default garbage collection period (10 seconds).
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 10;

/// Default capacity of an inbound peer's delivery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
