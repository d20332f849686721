//! Configuration types for Redis connections
//!
//! Every topology mode has its own configuration struct composing the shared
//! [`ConnectionConfig`]; [`TopologyConfig`] selects between them.

use crate::error::{RedisError, RedisResult};
use crate::types::{Endpoint, ReplicaPolicy, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Protocol version preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// RESP2 (Redis Serialization Protocol version 2)
    Resp2,
    /// RESP3 (Redis Serialization Protocol version 3) - Redis 6.0+
    #[default]
    Resp3,
}

impl ProtocolVersion {
    /// The number sent in `HELLO <protover>`
    #[must_use]
    pub const fn as_hello_arg(self) -> &'static str {
        match self {
            Self::Resp2 => "2",
            Self::Resp3 => "3",
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resp2 => write!(f, "RESP2"),
            Self::Resp3 => write!(f, "RESP3"),
        }
    }
}

/// Configuration for connection pooling
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections per endpoint
    pub max_size: usize,
    /// Maximum number of lease requests queued while all connections are busy
    pub max_waiting: usize,
    /// How often idle connections are inspected; `None` disables the cleaner
    pub cleaner_interval: Option<Duration>,
    /// Idle connections older than this are closed by the cleaner
    pub recycle_timeout: Duration,
    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 6,
            max_waiting: 24,
            cleaner_interval: Some(Duration::from_secs(30)),
            recycle_timeout: Duration::from_secs(180),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Set the maximum pool size
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the maximum number of queued lease requests
    #[must_use]
    pub const fn with_max_waiting(mut self, max_waiting: usize) -> Self {
        self.max_waiting = max_waiting;
        self
    }

    /// Set the cleaner interval (`None` disables it)
    #[must_use]
    pub const fn with_cleaner_interval(mut self, interval: Option<Duration>) -> Self {
        self.cleaner_interval = interval;
        self
    }

    /// Set the idle recycle timeout
    #[must_use]
    pub const fn with_recycle_timeout(mut self, timeout: Duration) -> Self {
        self.recycle_timeout = timeout;
        self
    }

    /// Set the lease timeout
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Check the pool bounds
    ///
    /// # Errors
    ///
    /// Returns an error when `max_size` is zero.
    pub fn validate(&self) -> RedisResult<()> {
        if self.max_size == 0 {
            return Err(RedisError::Config("pool max_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Options shared by every topology mode
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection string (e.g., `redis://localhost:6379` or `redis://host1:6379,host2:6379`)
    pub connection_string: String,

    /// Optional ACL user name
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Database number (ignored in cluster mode)
    pub database: u8,

    /// Name announced with `CLIENT SETNAME` / `HELLO ... SETNAME`
    pub client_name: Option<String>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// How long a caller waits for a reply; `None` waits forever
    pub operation_timeout: Option<Duration>,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Maximum number of unacknowledged requests per connection
    pub max_waiting_handlers: usize,

    /// Maximum nesting depth of aggregate replies
    pub max_nested_arrays: usize,

    /// Negotiate the protocol with `HELLO` on connect
    pub protocol_negotiation: bool,

    /// Preferred protocol version
    pub protocol_version: ProtocolVersion,

    /// Pool configuration
    pub pool: PoolConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://localhost:6379".to_string(),
            username: None,
            password: None,
            database: 0,
            client_name: None,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Some(Duration::from_secs(30)),
            tcp_keepalive: Some(Duration::from_secs(60)),
            max_waiting_handlers: 2048,
            max_nested_arrays: 32,
            protocol_negotiation: true,
            protocol_version: ProtocolVersion::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Set the ACL user name
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database number
    #[must_use]
    pub const fn with_database(mut self, database: u8) -> Self {
        self.database = database;
        self
    }

    /// Set the client name
    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the per-connection in-flight bound
    #[must_use]
    pub const fn with_max_waiting_handlers(mut self, max: usize) -> Self {
        self.max_waiting_handlers = max;
        self
    }

    /// Set the reply nesting bound
    #[must_use]
    pub const fn with_max_nested_arrays(mut self, max: usize) -> Self {
        self.max_nested_arrays = max;
        self
    }

    /// Enable or disable `HELLO` negotiation
    #[must_use]
    pub const fn with_protocol_negotiation(mut self, enabled: bool) -> Self {
        self.protocol_negotiation = enabled;
        self
    }

    /// Set the preferred protocol version
    #[must_use]
    pub const fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Set the pool configuration
    #[must_use]
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parse connection endpoints from connection string.
    ///
    /// Credentials embedded in the URL take precedence; otherwise the
    /// configured username/password are attached to every endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if any address is malformed or the list is empty.
    pub fn parse_endpoints(&self) -> RedisResult<Vec<Endpoint>> {
        let conn_str = self.connection_string.trim();
        let (scheme, list) = if let Some(rest) = conn_str.strip_prefix("redis://") {
            ("redis://", rest)
        } else if let Some(rest) = conn_str.strip_prefix("rediss://") {
            ("rediss://", rest)
        } else {
            ("", conn_str)
        };

        let endpoints = list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let part = part.strip_prefix(scheme).unwrap_or(part);
                Endpoint::parse(part).map(|ep| self.attach_credentials(ep))
            })
            .collect::<RedisResult<Vec<_>>>()?;

        if endpoints.is_empty() {
            return Err(RedisError::Config("No endpoints specified".to_string()));
        }
        Ok(endpoints)
    }

    /// Give `endpoint` the configured credentials unless it carries its own
    #[must_use]
    pub fn attach_credentials(&self, endpoint: Endpoint) -> Endpoint {
        if endpoint.username.is_some() || endpoint.password.is_some() {
            endpoint
        } else {
            endpoint.with_credentials(self.username.clone(), self.password.clone())
        }
    }
}

/// A single server
#[derive(Debug, Clone, Default)]
pub struct StandaloneConfig {
    /// Shared options; the first endpoint of the connection string is used
    pub base: ConnectionConfig,
}

impl StandaloneConfig {
    /// Create from a connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            base: ConnectionConfig::new(connection_string),
        }
    }
}

/// A Redis Cluster reached through one or more seed nodes
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Shared options; the connection string lists the seed nodes
    pub base: ConnectionConfig,
    /// Redirects followed for one request before giving up
    pub max_redirects: usize,
    /// MOVED replies absorbed incrementally before a full slot refresh
    pub refresh_after_redirects: usize,
    /// Periodic background refresh of the slot table
    pub slots_refresh_interval: Option<Duration>,
    /// Replica usage for read-only commands
    pub use_replicas: ReplicaPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base: ConnectionConfig::default(),
            max_redirects: 16,
            refresh_after_redirects: 8,
            slots_refresh_interval: None,
            use_replicas: ReplicaPolicy::Never,
        }
    }
}

impl ClusterConfig {
    /// Create from a comma-separated list of seed nodes
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            base: ConnectionConfig::new(connection_string),
            ..Default::default()
        }
    }

    /// Set the redirect bound
    #[must_use]
    pub const fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Set how many MOVED replies trigger a full refresh
    #[must_use]
    pub const fn with_refresh_after_redirects(mut self, n: usize) -> Self {
        self.refresh_after_redirects = n;
        self
    }

    /// Set the periodic slot refresh interval
    #[must_use]
    pub const fn with_slots_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.slots_refresh_interval = interval;
        self
    }

    /// Set the replica policy
    #[must_use]
    pub const fn with_replicas(mut self, policy: ReplicaPolicy) -> Self {
        self.use_replicas = policy;
        self
    }
}

/// A master set monitored by Redis Sentinel
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Shared options for the data connections
    pub base: ConnectionConfig,
    /// Master set name
    pub master_name: String,
    /// Sentinel endpoints, tried in order
    pub sentinels: Vec<Endpoint>,
    /// Password for the sentinels themselves
    pub sentinel_password: Option<String>,
    /// Which node to talk to
    pub role: Role,
}

impl SentinelConfig {
    /// Create a new sentinel configuration
    #[must_use]
    pub fn new(master_name: impl Into<String>) -> Self {
        Self {
            base: ConnectionConfig::default(),
            master_name: master_name.into(),
            sentinels: Vec::new(),
            sentinel_password: None,
            role: Role::Master,
        }
    }

    /// Add a sentinel endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed.
    pub fn add_sentinel(mut self, addr: impl AsRef<str>) -> RedisResult<Self> {
        self.sentinels.push(Endpoint::parse(addr.as_ref())?);
        Ok(self)
    }

    /// Set sentinel password
    #[must_use]
    pub fn with_sentinel_password(mut self, password: impl Into<String>) -> Self {
        self.sentinel_password = Some(password.into());
        self
    }

    /// Set the target role
    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Replace the shared options
    #[must_use]
    pub fn with_base(mut self, base: ConnectionConfig) -> Self {
        self.base = base;
        self
    }
}

/// How a replicated (non-cluster) deployment is described
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationTopology {
    /// The first endpoint is the master, the rest are replicas
    Static,
    /// Ask the first reachable endpoint with `ROLE`
    #[default]
    Discover,
}

/// A master with replicas, without sentinel or cluster
#[derive(Debug, Clone, Default)]
pub struct ReplicationConfig {
    /// Shared options; the connection string lists the nodes
    pub base: ConnectionConfig,
    /// Static list or discovery
    pub topology: ReplicationTopology,
    /// Replica usage for read-only commands
    pub use_replicas: ReplicaPolicy,
}

impl ReplicationConfig {
    /// Create from a comma-separated node list
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            base: ConnectionConfig::new(connection_string),
            ..Default::default()
        }
    }

    /// Set the topology mode
    #[must_use]
    pub const fn with_topology(mut self, topology: ReplicationTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the replica policy
    #[must_use]
    pub const fn with_replicas(mut self, policy: ReplicaPolicy) -> Self {
        self.use_replicas = policy;
        self
    }
}

/// Topology mode tag selecting the per-mode configuration
#[derive(Debug, Clone)]
pub enum TopologyConfig {
    /// One server
    Standalone(StandaloneConfig),
    /// Redis Cluster
    Cluster(ClusterConfig),
    /// Sentinel-managed master set
    Sentinel(SentinelConfig),
    /// Master plus replicas
    Replication(ReplicationConfig),
}

impl TopologyConfig {
    /// Shared options of whichever mode is selected
    #[must_use]
    pub const fn base(&self) -> &ConnectionConfig {
        match self {
            Self::Standalone(c) => &c.base,
            Self::Cluster(c) => &c.base,
            Self::Sentinel(c) => &c.base,
            Self::Replication(c) => &c.base,
        }
    }
}

impl From<StandaloneConfig> for TopologyConfig {
    fn from(config: StandaloneConfig) -> Self {
        Self::Standalone(config)
    }
}

impl From<ClusterConfig> for TopologyConfig {
    fn from(config: ClusterConfig) -> Self {
        Self::Cluster(config)
    }
}

impl From<SentinelConfig> for TopologyConfig {
    fn from(config: SentinelConfig) -> Self {
        Self::Sentinel(config)
    }
}

impl From<ReplicationConfig> for TopologyConfig {
    fn from(config: ReplicationConfig) -> Self {
        Self::Replication(config)
    }
}
