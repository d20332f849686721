//! Redis Sentinel support for high availability
//!
//! Sentinels are asked for the current address of a named master (or its
//! replicas) and requests go there through a regular pool. When the node
//! stops answering, or a demoted master rejects a write with `-READONLY`,
//! the address is resolved again and the request retried once.

use crate::connection::{Connector, TcpConnector};
use crate::pool::PoolManager;
use crate::request::Request;
use parking_lot::RwLock;
use redis_conduit_core::{
    config::{ConnectionConfig, SentinelConfig},
    error::{RedisError, RedisResult},
    types::{Endpoint, Role},
    value::Response,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A node as reported by `SENTINEL REPLICAS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Announced IP
    pub host: String,
    /// Announced port
    pub port: u16,
    /// Status flags (`slave`, `s_down`, ...)
    pub flags: Vec<String>,
}

impl NodeInfo {
    /// Parse one entry of a `SENTINEL REPLICAS` reply (flat field list or map)
    ///
    /// # Errors
    ///
    /// Returns an error if `ip` or `port` is missing.
    pub fn parse(entry: &Response) -> RedisResult<Self> {
        let field = |name: &str| {
            entry
                .field(name)
                .ok_or_else(|| RedisError::Sentinel(format!("Missing replica {name}")))
                .and_then(Response::as_string)
        };
        let host = field("ip")?;
        let port = field("port")?
            .parse::<u16>()
            .map_err(|_| RedisError::Sentinel("Invalid replica port".to_string()))?;
        let flags = field("flags")
            .map(|f| f.split(',').map(String::from).collect())
            .unwrap_or_default();
        Ok(Self { host, port, flags })
    }

    /// Subjectively or objectively down, or disconnected
    #[must_use]
    pub fn is_down(&self) -> bool {
        self.flags
            .iter()
            .any(|f| f == "s_down" || f == "o_down" || f == "disconnected")
    }
}

/// Client for a sentinel-managed master set
#[derive(Clone)]
pub struct SentinelClient {
    inner: Arc<SentinelInner>,
}

struct SentinelInner {
    config: SentinelConfig,
    /// Sentinels in query order; the last one that answered goes first
    sentinels: RwLock<Vec<Endpoint>>,
    sentinel_pools: PoolManager,
    pools: PoolManager,
    current: RwLock<Option<Endpoint>>,
    next_replica: AtomicUsize,
}

impl SentinelClient {
    /// Resolve the configured role and connect over TCP
    ///
    /// # Errors
    ///
    /// Returns an error if no sentinel is configured or none can resolve
    /// the master set.
    pub async fn connect(config: SentinelConfig) -> RedisResult<Self> {
        let connector = Arc::new(TcpConnector::new(config.base.clone()));
        Self::with_connector(config, connector).await
    }

    /// Resolve through sentinels, opening data connections with `connector`
    ///
    /// # Errors
    ///
    /// See [`SentinelClient::connect`].
    pub async fn with_connector(
        config: SentinelConfig,
        connector: Arc<dyn Connector>,
    ) -> RedisResult<Self> {
        if config.sentinels.is_empty() {
            return Err(RedisError::Config("No sentinels configured".to_string()));
        }
        config.base.pool.validate()?;

        let sentinel_base = sentinel_connection_config(&config);
        let sentinels = config
            .sentinels
            .iter()
            .map(|s| {
                if s.username.is_none() && s.password.is_none() {
                    s.clone()
                        .with_credentials(None, config.sentinel_password.clone())
                } else {
                    s.clone()
                }
            })
            .collect();

        let client = Self {
            inner: Arc::new(SentinelInner {
                sentinel_pools: PoolManager::new(
                    Arc::new(TcpConnector::new(sentinel_base)),
                    config.base.pool.clone(),
                ),
                pools: PoolManager::new(connector, config.base.pool.clone()),
                sentinels: RwLock::new(sentinels),
                current: RwLock::new(None),
                next_replica: AtomicUsize::new(0),
                config,
            }),
        };
        client.inner.resolve().await?;
        Ok(client)
    }

    /// Send one request to the resolved node.
    ///
    /// Error replies come back as `Ok(Response::Error(_))`, except that a
    /// `-READONLY` reply from a demoted master triggers one re-resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unreachable even after re-resolving.
    pub async fn send(&self, request: &Request) -> RedisResult<Response> {
        request.check_arity()?;
        let target = self.inner.target().await?;
        match self.inner.call(&target, request).await {
            Ok(reply) if self.inner.is_demoted(&reply) => {
                warn!("{} is no longer the master of {}", target, self.inner.config.master_name);
                let target = self.inner.reresolve(&target).await?;
                self.inner.call(&target, request).await
            }
            Err(e) if e.is_fatal() => {
                warn!("Lost connection to {}: {}", target, e);
                let target = self.inner.reresolve(&target).await?;
                self.inner.call(&target, request).await
            }
            other => other,
        }
    }

    /// Send requests as one pipelined write to the resolved node
    ///
    /// # Errors
    ///
    /// The outer error means nothing was sent.
    pub async fn batch(&self, requests: &[Request]) -> RedisResult<Vec<RedisResult<Response>>> {
        for request in requests {
            request.check_arity()?;
        }
        let target = self.inner.target().await?;
        match self.inner.call_batch(&target, requests).await {
            Err(e) if e.is_fatal() => {
                warn!("Lost connection to {}: {}", target, e);
                let target = self.inner.reresolve(&target).await?;
                self.inner.call_batch(&target, requests).await
            }
            other => other,
        }
    }

    /// Current master address according to the sentinels
    ///
    /// # Errors
    ///
    /// Returns an error if no sentinel knows the master set.
    pub async fn master_address(&self) -> RedisResult<Endpoint> {
        self.inner
            .query(|inner, sentinel| inner.query_master(sentinel))
            .await
    }

    /// Healthy replicas according to the sentinels
    ///
    /// # Errors
    ///
    /// Returns an error if no sentinel answers.
    pub async fn replicas(&self) -> RedisResult<Vec<Endpoint>> {
        self.inner
            .query(|inner, sentinel| inner.query_replicas(sentinel))
            .await
    }

    /// Node requests currently go to
    pub fn current(&self) -> Option<Endpoint> {
        self.inner.current.read().clone()
    }

    /// Close all pooled connections
    pub fn close(&self) {
        self.inner.pools.close();
        self.inner.sentinel_pools.close();
    }
}

impl std::fmt::Debug for SentinelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelClient")
            .field("master_name", &self.inner.config.master_name)
            .field("role", &self.inner.config.role)
            .field("current", &self.current())
            .finish()
    }
}

impl SentinelInner {
    async fn target(&self) -> RedisResult<Endpoint> {
        if let Some(current) = self.current.read().clone() {
            return Ok(current);
        }
        self.resolve().await
    }

    /// Resolve again unless another caller already moved away from `failed`
    async fn reresolve(&self, failed: &Endpoint) -> RedisResult<Endpoint> {
        {
            let current = self.current.read();
            if let Some(current) = current.as_ref() {
                if current != failed {
                    return Ok(current.clone());
                }
            }
        }
        self.data_pools().retain(|ep| ep != failed);
        self.resolve().await
    }

    async fn resolve(&self) -> RedisResult<Endpoint> {
        let target = match self.config.role {
            Role::Master => self.query(|inner, s| inner.query_master(s)).await?,
            Role::Replica => {
                let replicas = self.query(|inner, s| inner.query_replicas(s)).await?;
                if replicas.is_empty() {
                    warn!(
                        "No healthy replica of {}, using the master",
                        self.config.master_name
                    );
                    self.query(|inner, s| inner.query_master(s)).await?
                } else {
                    let n = self.next_replica.fetch_add(1, Ordering::Relaxed);
                    replicas[n % replicas.len()].clone()
                }
            }
            Role::Sentinel => self
                .sentinels
                .read()
                .first()
                .cloned()
                .ok_or_else(|| RedisError::Sentinel("No sentinels available".to_string()))?,
        };

        let previous = self.current.write().replace(target.clone());
        match previous {
            Some(previous) if previous != target => info!(
                "{} moved from {} to {}",
                self.config.master_name, previous, target
            ),
            None => info!("Resolved {} to {}", self.config.master_name, target),
            _ => {}
        }
        Ok(target)
    }

    /// Ask each sentinel in turn until one answers
    async fn query<'a, F, Fut, T>(&'a self, ask: F) -> RedisResult<T>
    where
        F: Fn(&'a Self, Endpoint) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>> + 'a,
    {
        let sentinels = self.sentinels.read().clone();
        let mut last_error = None;
        for sentinel in sentinels {
            match ask(self, sentinel.clone()).await {
                Ok(answer) => {
                    self.promote(&sentinel);
                    return Ok(answer);
                }
                Err(e) => {
                    debug!("Sentinel {} failed: {}", sentinel, e);
                    last_error = Some(e);
                }
            }
        }
        Err(RedisError::Sentinel(format!(
            "No sentinel could resolve '{}': {}",
            self.config.master_name,
            last_error.map_or_else(|| "no sentinels".to_string(), |e| e.to_string())
        )))
    }

    fn promote(&self, sentinel: &Endpoint) {
        let mut sentinels = self.sentinels.write();
        if let Some(pos) = sentinels.iter().position(|s| s == sentinel) {
            if pos > 0 {
                let found = sentinels.remove(pos);
                sentinels.insert(0, found);
            }
        }
    }

    async fn ask_sentinel(&self, sentinel: &Endpoint, request: &Request) -> RedisResult<Response> {
        let mut conn = self.sentinel_pools.get(sentinel).await?;
        match conn.send(request).await {
            Ok(reply) => reply.into_result(),
            Err(e) => {
                if e.is_fatal() {
                    conn.mark_broken();
                }
                Err(e)
            }
        }
    }

    async fn query_master(&self, sentinel: Endpoint) -> RedisResult<Endpoint> {
        let request = Request::cmd("SENTINEL")
            .arg("GET-MASTER-ADDR-BY-NAME")
            .arg(self.config.master_name.as_str());
        let reply = self.ask_sentinel(&sentinel, &request).await?;
        parse_master_addr(&reply, &self.config.master_name)
            .map(|ep| self.config.base.attach_credentials(ep))
    }

    async fn query_replicas(&self, sentinel: Endpoint) -> RedisResult<Vec<Endpoint>> {
        let request = Request::cmd("SENTINEL")
            .arg("REPLICAS")
            .arg(self.config.master_name.as_str());
        let reply = self.ask_sentinel(&sentinel, &request).await?;
        Ok(healthy_replicas(&reply)?
            .into_iter()
            .map(|ep| self.config.base.attach_credentials(ep))
            .collect())
    }

    /// Pools for the resolved node; a sentinel role talks to sentinels
    fn data_pools(&self) -> &PoolManager {
        if self.config.role == Role::Sentinel {
            &self.sentinel_pools
        } else {
            &self.pools
        }
    }

    async fn call(&self, target: &Endpoint, request: &Request) -> RedisResult<Response> {
        let mut conn = self.data_pools().get(target).await?;
        let result = conn.send(request).await;
        if matches!(&result, Err(e) if e.is_fatal()) {
            conn.mark_broken();
        }
        result
    }

    async fn call_batch(
        &self,
        target: &Endpoint,
        requests: &[Request],
    ) -> RedisResult<Vec<RedisResult<Response>>> {
        let mut conn = self.data_pools().get(target).await?;
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

    fn is_demoted(&self, reply: &Response) -> bool {
        self.config.role == Role::Master
            && matches!(reply, Response::Error(msg) if msg.starts_with("READONLY"))
    }
}

/// Sentinels have no databases and their own password
fn sentinel_connection_config(config: &SentinelConfig) -> ConnectionConfig {
    let mut base = config.base.clone();
    base.username = None;
    base.password = config.sentinel_password.clone();
    base.database = 0;
    base.client_name = None;
    base
}

/// `[host, port]`, or null when the sentinel does not know the master set
fn parse_master_addr(reply: &Response, master_name: &str) -> RedisResult<Endpoint> {
    if reply.is_null() {
        return Err(RedisError::Sentinel(format!(
            "Master '{master_name}' not found"
        )));
    }
    let items = reply.as_slice()?;
    if items.len() != 2 {
        return Err(RedisError::Sentinel(
            "Invalid GET-MASTER-ADDR-BY-NAME response".to_string(),
        ));
    }
    let host = items[0].as_string()?;
    let port = u16::try_from(items[1].as_int()?)
        .map_err(|_| RedisError::Sentinel("Invalid master port".to_string()))?;
    Ok(Endpoint::new(host, port))
}

fn healthy_replicas(reply: &Response) -> RedisResult<Vec<Endpoint>> {
    let mut out = Vec::new();
    for entry in reply.as_slice()? {
        let node = NodeInfo::parse(entry)?;
        if node.is_down() {
            debug!("Skipping replica {}:{} ({:?})", node.host, node.port, node.flags);
            continue;
        }
        out.push(Endpoint::new(node.host, node.port));
    }
    Ok(out)
}
