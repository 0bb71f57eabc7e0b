//! Client-side routing and partition-awareness core for a thin TCP client
//! of a distributed, partitioned in-memory key-value cluster.
//!
//! The crate owns the pieces below a request/response API: wire framing
//! and handshake ([`protocol`]), one session per cluster endpoint
//! ([`session`]), the pool of live sessions plus the background connector
//! ([`pool`]), the connect/reconnect/failover state machine
//! ([`router`]), and affinity-aware routing ([`affinity`]) built on
//! rendezvous partition hashing and a Java-compatible key codec
//! ([`codec`]).
//!
//! Layered the way RustyDB splits its own networking stack: transport and
//! wire concerns at the bottom, session lifecycle above that, pool and
//! router coordinating sessions, with affinity as an orthogonal routing
//! hint consulted by the router.

pub mod affinity;
pub mod codec;
pub mod config;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod router;
pub mod session;
pub mod types;

pub use config::{ClientConfig, TlsOptions};
pub use error::{ClientError, Result};
pub use router::{Router, RouterState};
pub use types::{AffinityTopologyVersion, Endpoint, NodeId, TypeCode};
