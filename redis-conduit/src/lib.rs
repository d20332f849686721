//! Async Redis client for Rust
//!
//! `redis-conduit` speaks RESP2 and RESP3 over pooled, pipelined
//! connections and hides the server topology behind one [`Client`]:
//! a standalone server, a Redis Cluster, a Sentinel-managed master or a
//! master with replicas.
//!
//! # Features
//!
//! - Streaming RESP2/RESP3 decoder and zero-copy request encoder
//! - Pipelined connections with FIFO reply matching and push routing
//! - Bounded per-endpoint connection pools
//! - Cluster slot routing with transparent MOVED and ASK handling
//! - Master discovery through Sentinel and read routing to replicas
//! - Client-side caching with server-assisted invalidation
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_conduit::{Client, Request, StandaloneConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(StandaloneConfig::new("redis://localhost:6379")).await?;
//!
//!     client.send(&Request::cmd("SET").arg("mykey").arg("myvalue")).await?;
//!     let value: Option<String> = client.query(&Request::cmd("GET").arg("mykey")).await?;
//!     println!("Value: {:?}", value);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::manual_let_else)]

pub mod cache;
pub mod client;
pub mod cluster;
pub mod command;
pub mod connection;
pub mod pool;
pub mod protocol;
pub mod replication;
pub mod request;
pub mod sentinel;
pub mod standalone;

pub use cache::{CacheConfig, CacheStats, CachingClient, ClientSideCache};
pub use client::Client;
pub use cluster::{ClusterClient, SlotTable};
pub use command::{Command, KeyPattern};
pub use connection::{Connection, ConnectionState, Connector, PushHandler, TcpConnector};
pub use pool::{ConnectionPool, PoolManager, PoolStats, PooledConnection};
pub use protocol::{Decoder, Encoder};
pub use replication::{ReplicationClient, Topology};
pub use request::{Arg, Request, ToArg};
pub use sentinel::SentinelClient;
pub use standalone::StandaloneClient;

pub use redis_conduit_core::{
    config::{
        ClusterConfig, ConnectionConfig, PoolConfig, ProtocolVersion, ReplicationConfig,
        ReplicationTopology, SentinelConfig, StandaloneConfig, TopologyConfig,
    },
    error::{RedisError, RedisResult},
    types::{Endpoint, ReplicaPolicy, Role, SlotRange},
    value::Response,
};
