//! Core types for the redis-conduit Redis client
//!
//! This crate provides the reply value type, the error taxonomy, endpoint
//! identities and the configuration structs shared by every topology mode.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{
    ClusterConfig, ConnectionConfig, PoolConfig, ProtocolVersion, ReplicationConfig,
    ReplicationTopology, SentinelConfig, StandaloneConfig, TopologyConfig,
};
pub use error::{RedisError, RedisResult};
pub use types::{Endpoint, ReplicaPolicy, Role, SlotRange};
pub use value::Response;
