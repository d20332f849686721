//! High-level Redis client
//!
//! [`Client`] picks the topology implementation from a [`TopologyConfig`]
//! and exposes one `send`/`batch` surface over all of them.

use crate::cluster::ClusterClient;
use crate::connection::{Connector, TcpConnector};
use crate::replication::ReplicationClient;
use crate::request::Request;
use crate::sentinel::SentinelClient;
use crate::standalone::StandaloneClient;
use redis_conduit_core::{
    config::TopologyConfig,
    error::{RedisError, RedisResult},
    value::Response,
};
use std::sync::Arc;
use tracing::info;

/// High-level Redis client
///
/// Automatically handles, depending on the topology:
/// - Connection pooling per endpoint
/// - MOVED and ASK redirects in cluster mode
/// - Master resolution through sentinels
/// - Read routing to replicas
#[derive(Clone, Debug)]
pub enum Client {
    /// One server
    Standalone(StandaloneClient),
    /// Redis Cluster
    Cluster(ClusterClient),
    /// Sentinel-managed master set
    Sentinel(SentinelClient),
    /// Master with replicas
    Replication(ReplicationClient),
}

/// Connector a topology uses when none is given: plain TCP, without
/// `SELECT` for cluster nodes.
pub fn default_connector(config: &TopologyConfig) -> Arc<dyn Connector> {
    match config {
        TopologyConfig::Cluster(cluster) => Arc::new(TcpConnector::for_cluster(cluster.base.clone())),
        other => Arc::new(TcpConnector::new(other.base().clone())),
    }
}

impl Client {
    /// Connect to Redis with the given configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// use redis_conduit::{Client, Request, StandaloneConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = Client::connect(StandaloneConfig::new("redis://localhost:6379")).await?;
    ///     client.send(&Request::cmd("SET").arg("key").arg("value")).await?;
    ///     let value: Option<String> = client.query(&Request::cmd("GET").arg("key")).await?;
    ///     println!("{value:?}");
    ///     Ok(())
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the topology cannot be reached.
    pub async fn connect(config: impl Into<TopologyConfig>) -> RedisResult<Self> {
        let config = config.into();
        let connector = default_connector(&config);
        Self::with_connector(config, connector).await
    }

    /// Connect with a custom connector for data connections
    ///
    /// # Errors
    ///
    /// Returns an error if the topology cannot be reached.
    pub async fn with_connector(
        config: impl Into<TopologyConfig>,
        connector: Arc<dyn Connector>,
    ) -> RedisResult<Self> {
        let client = match config.into() {
            TopologyConfig::Standalone(c) => {
                Self::Standalone(StandaloneClient::with_connector(c, connector).await?)
            }
            TopologyConfig::Cluster(c) => {
                Self::Cluster(ClusterClient::with_connector(c, connector).await?)
            }
            TopologyConfig::Sentinel(c) => {
                Self::Sentinel(SentinelClient::with_connector(c, connector).await?)
            }
            TopologyConfig::Replication(c) => {
                Self::Replication(ReplicationClient::with_connector(c, connector).await?)
            }
        };
        info!("Connected ({})", client.mode());
        Ok(client)
    }

    /// Send one request; server error replies become [`RedisError`]s
    ///
    /// # Errors
    ///
    /// Returns the server error reply or the client-side failure.
    pub async fn send(&self, request: &Request) -> RedisResult<Response> {
        self.send_raw(request).await?.into_result()
    }

    /// Send one request; server error replies come back as
    /// `Ok(Response::Error(_))`
    ///
    /// # Errors
    ///
    /// Returns client, network and topology failures only.
    pub async fn send_raw(&self, request: &Request) -> RedisResult<Response> {
        match self {
            Self::Standalone(c) => c.send(request).await,
            Self::Cluster(c) => c.send(request).await,
            Self::Sentinel(c) => c.send(request).await,
            Self::Replication(c) => c.send(request).await,
        }
    }

    /// Send one request and convert the reply
    ///
    /// # Errors
    ///
    /// Returns the request error or a [`RedisError::Type`] if the reply
    /// does not convert.
    pub async fn query<T>(&self, request: &Request) -> RedisResult<T>
    where
        T: TryFrom<Response, Error = RedisError>,
    {
        T::try_from(self.send(request).await?)
    }

    /// Send requests as pipelined writes; results are in request order
    ///
    /// # Errors
    ///
    /// The outer error means nothing was sent (for example a request with
    /// the wrong number of arguments).
    pub async fn batch(&self, requests: &[Request]) -> RedisResult<Vec<RedisResult<Response>>> {
        match self {
            Self::Standalone(c) => c.batch(requests).await,
            Self::Cluster(c) => c.batch(requests).await,
            Self::Sentinel(c) => c.batch(requests).await,
            Self::Replication(c) => c.batch(requests).await,
        }
    }

    /// Topology name, for logs
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Standalone(_) => "standalone",
            Self::Cluster(_) => "cluster",
            Self::Sentinel(_) => "sentinel",
            Self::Replication(_) => "replication",
        }
    }

    /// Close every pooled connection
    pub fn close(&self) {
        match self {
            Self::Standalone(c) => c.close(),
            Self::Cluster(c) => c.close(),
            Self::Sentinel(c) => c.close(),
            Self::Replication(c) => c.close(),
        }
    }
}

impl From<StandaloneClient> for Client {
    fn from(client: StandaloneClient) -> Self {
        Self::Standalone(client)
    }
}

impl From<ClusterClient> for Client {
    fn from(client: ClusterClient) -> Self {
        Self::Cluster(client)
    }
}
