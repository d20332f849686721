//! Single-server client

use crate::connection::{Connector, TcpConnector};
use crate::pool::{ConnectionPool, PoolStats};
use crate::request::Request;
use redis_conduit_core::{
    config::StandaloneConfig,
    error::RedisResult,
    value::Response,
};
use std::sync::Arc;
use tracing::info;

/// Client for one Redis server, backed by a connection pool
#[derive(Clone)]
pub struct StandaloneClient {
    pool: ConnectionPool,
}

impl StandaloneClient {
    /// Connect over TCP to the first endpoint of the connection string
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the first
    /// connection cannot be established.
    pub async fn connect(config: StandaloneConfig) -> RedisResult<Self> {
        let connector = Arc::new(TcpConnector::new(config.base.clone()));
        Self::with_connector(config, connector).await
    }

    /// Connect using a custom connector
    ///
    /// # Errors
    ///
    /// See [`StandaloneClient::connect`].
    pub async fn with_connector(
        config: StandaloneConfig,
        connector: Arc<dyn Connector>,
    ) -> RedisResult<Self> {
        config.base.pool.validate()?;
        let endpoint = config.base.parse_endpoints()?.remove(0);
        let pool = ConnectionPool::new(endpoint.clone(), connector, config.base.pool.clone());

        // Fail fast on unreachable servers and bad credentials
        drop(pool.get().await?);
        info!("Connected to Redis at {}", endpoint);
        Ok(Self { pool })
    }

    /// Send one request; error replies come back as `Ok(Response::Error(_))`
    ///
    /// # Errors
    ///
    /// Returns an error if no connection could be leased or the request
    /// failed on the wire.
    pub async fn send(&self, request: &Request) -> RedisResult<Response> {
        request.check_arity()?;
        let mut conn = self.pool.get().await?;
        let result = conn.send(request).await;
        if matches!(&result, Err(e) if e.is_fatal()) {
            conn.mark_broken();
        }
        result
    }

    /// Send requests as one pipelined write on a single connection
    ///
    /// # Errors
    ///
    /// The outer error means nothing was sent.
    pub async fn batch(&self, requests: &[Request]) -> RedisResult<Vec<RedisResult<Response>>> {
        for request in requests {
            request.check_arity()?;
        }
        let mut conn = self.pool.get().await?;
        let result = conn.batch(requests).await;
        match &result {
            Err(e) if e.is_fatal() => conn.mark_broken(),
            Ok(replies) if replies.iter().any(|r| matches!(r, Err(e) if e.is_fatal())) => {
                conn.mark_broken();
            }
            _ => {}
        }
        result
    }

    /// Pool counters
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Close all pooled connections
    pub fn close(&self) {
        self.pool.close();
    }
}

impl std::fmt::Debug for StandaloneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandaloneClient")
            .field("endpoint", self.pool.endpoint())
            .finish()
    }
}
