//! Master/replica deployments without sentinel or cluster
//!
//! The topology is either taken from the connection string (first endpoint
//! is the master) or discovered with `ROLE` from the first node that
//! answers. Writes always go to the master; read-only commands may go to
//! replicas depending on the [`ReplicaPolicy`].

use crate::connection::{Connector, TcpConnector};
use crate::pool::PoolManager;
use crate::request::Request;
use parking_lot::RwLock;
use redis_conduit_core::{
    config::{ReplicationConfig, ReplicationTopology},
    error::{RedisError, RedisResult},
    types::{Endpoint, ReplicaPolicy},
    value::Response,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Known master and replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Node accepting writes
    pub master: Endpoint,
    /// Nodes replicating from the master
    pub replicas: Vec<Endpoint>,
}

impl Topology {
    /// Node for a request under `policy`; `n` rotates between candidates.
    ///
    /// Writes always go to the master.
    pub fn pick(&self, policy: ReplicaPolicy, read_only: bool, n: usize) -> &Endpoint {
        if !read_only || self.replicas.is_empty() {
            return &self.master;
        }
        match policy {
            ReplicaPolicy::Never => &self.master,
            ReplicaPolicy::Share => match n % (self.replicas.len() + 1) {
                0 => &self.master,
                i => &self.replicas[i - 1],
            },
            ReplicaPolicy::Always => &self.replicas[n % self.replicas.len()],
        }
    }
}

/// What a node says about itself in reply to `ROLE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleReply {
    /// `["master", offset, [[ip, port, offset], ...]]`
    Master {
        /// Connected replicas
        replicas: Vec<Endpoint>,
    },
    /// `["slave", master_ip, master_port, state, offset]`
    Replica {
        /// Master the node replicates from
        master: Endpoint,
    },
    /// `["sentinel", [master names]]`
    Sentinel,
}

impl RoleReply {
    /// Parse a `ROLE` reply
    ///
    /// # Errors
    ///
    /// Returns an error for replies of unknown shape.
    pub fn parse(reply: &Response) -> RedisResult<Self> {
        let items = reply.as_slice()?;
        let kind = items
            .first()
            .ok_or_else(|| RedisError::UnexpectedResponse("empty ROLE reply".into()))?
            .as_string()?;
        match kind.as_str() {
            "master" => {
                let mut replicas = Vec::new();
                if let Some(list) = items.get(2) {
                    for entry in list.as_slice()? {
                        let fields = entry.as_slice()?;
                        if fields.len() < 2 {
                            continue;
                        }
                        let port = u16::try_from(fields[1].as_int()?).map_err(|_| {
                            RedisError::UnexpectedResponse("replica port out of range".into())
                        })?;
                        replicas.push(Endpoint::new(fields[0].as_string()?, port));
                    }
                }
                Ok(Self::Master { replicas })
            }
            "slave" | "replica" => {
                if items.len() < 3 {
                    return Err(RedisError::UnexpectedResponse(
                        "ROLE reply of a replica without master address".into(),
                    ));
                }
                let port = u16::try_from(items[2].as_int()?).map_err(|_| {
                    RedisError::UnexpectedResponse("master port out of range".into())
                })?;
                Ok(Self::Replica {
                    master: Endpoint::new(items[1].as_string()?, port),
                })
            }
            "sentinel" => Ok(Self::Sentinel),
            other => Err(RedisError::UnexpectedResponse(format!(
                "unknown role '{other}'"
            ))),
        }
    }
}

/// Client for a replicated deployment
#[derive(Clone)]
pub struct ReplicationClient {
    inner: Arc<ReplicationInner>,
}

struct ReplicationInner {
    config: ReplicationConfig,
    endpoints: Vec<Endpoint>,
    pools: PoolManager,
    topology: RwLock<Topology>,
    next: AtomicUsize,
}

impl ReplicationClient {
    /// Build the topology and connect over TCP
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or discovery finds
    /// no usable node.
    pub async fn connect(config: ReplicationConfig) -> RedisResult<Self> {
        let connector = Arc::new(TcpConnector::new(config.base.clone()));
        Self::with_connector(config, connector).await
    }

    /// Build the topology, opening connections with `connector`
    ///
    /// # Errors
    ///
    /// See [`ReplicationClient::connect`].
    pub async fn with_connector(
        config: ReplicationConfig,
        connector: Arc<dyn Connector>,
    ) -> RedisResult<Self> {
        config.base.pool.validate()?;
        let endpoints = config.base.parse_endpoints()?;
        let pools = PoolManager::new(connector, config.base.pool.clone());

        let topology = match config.topology {
            ReplicationTopology::Static => Topology {
                master: endpoints[0].clone(),
                replicas: endpoints[1..].to_vec(),
            },
            ReplicationTopology::Discover => discover(&pools, &endpoints, &config).await?,
        };
        info!(
            "Replication topology: master {}, {} replicas",
            topology.master,
            topology.replicas.len()
        );

        Ok(Self {
            inner: Arc::new(ReplicationInner {
                config,
                endpoints,
                pools,
                topology: RwLock::new(topology),
                next: AtomicUsize::new(0),
            }),
        })
    }

    /// Send one request, routing reads according to the replica policy.
    ///
    /// A failed read on a replica is retried once on the master. With
    /// discovery enabled, a `-READONLY` reply from the former master
    /// triggers rediscovery and one retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the target node is unreachable.
    pub async fn send(&self, request: &Request) -> RedisResult<Response> {
        request.check_arity()?;
        let (target, master) = self.inner.route(request.is_read_only());
        match self.inner.call(&target, request).await {
            Err(e) if e.is_fatal() && target != master => {
                warn!("Replica {} failed ({}), reading from master", target, e);
                self.inner.call(&master, request).await
            }
            Ok(Response::Error(msg))
                if msg.starts_with("READONLY")
                    && self.inner.config.topology == ReplicationTopology::Discover =>
            {
                warn!("{} refused a write, rediscovering topology", target);
                self.refresh().await?;
                let (target, _) = self.inner.route(false);
                self.inner.call(&target, request).await
            }
            other => other,
        }
    }

    /// Send requests as one pipelined write.
    ///
    /// The whole batch goes to one node: a replica only when every request
    /// is read-only.
    ///
    /// # Errors
    ///
    /// The outer error means nothing was sent.
    pub async fn batch(&self, requests: &[Request]) -> RedisResult<Vec<RedisResult<Response>>> {
        for request in requests {
            request.check_arity()?;
        }
        let read_only = requests.iter().all(Request::is_read_only);
        let (target, _) = self.inner.route(read_only);
        let mut conn = self.inner.pools.get(&target).await?;
        let result = conn.batch(requests).await;
        if matches!(&result, Err(e) if e.is_fatal()) {
            conn.mark_broken();
        }
        result
    }

    /// Rediscover master and replicas
    ///
    /// # Errors
    ///
    /// Returns an error if no node answers `ROLE`.
    pub async fn refresh(&self) -> RedisResult<()> {
        if self.inner.config.topology == ReplicationTopology::Static {
            return Ok(());
        }
        let mut candidates = vec![self.inner.topology.read().master.clone()];
        for ep in &self.inner.endpoints {
            if !candidates.contains(ep) {
                candidates.push(ep.clone());
            }
        }
        let topology = discover(&self.inner.pools, &candidates, &self.inner.config).await?;
        let previous = std::mem::replace(&mut *self.inner.topology.write(), topology.clone());
        if previous.master != topology.master {
            info!("Master changed from {} to {}", previous.master, topology.master);
        }
        let nodes: Vec<Endpoint> = std::iter::once(topology.master.clone())
            .chain(topology.replicas.iter().cloned())
            .collect();
        self.inner.pools.retain(|ep| nodes.contains(ep));
        Ok(())
    }

    /// Current topology
    pub fn topology(&self) -> Topology {
        self.inner.topology.read().clone()
    }

    /// Close all pooled connections
    pub fn close(&self) {
        self.inner.pools.close();
    }
}

impl std::fmt::Debug for ReplicationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationClient")
            .field("topology", &self.topology())
            .field("use_replicas", &self.inner.config.use_replicas)
            .finish()
    }
}

impl ReplicationInner {
    /// Target for a request, and the master to fall back to
    fn route(&self, read_only: bool) -> (Endpoint, Endpoint) {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let topology = self.topology.read();
        let target = topology.pick(self.config.use_replicas, read_only, n).clone();
        (target, topology.master.clone())
    }

    async fn call(&self, target: &Endpoint, request: &Request) -> RedisResult<Response> {
        let mut conn = self.pools.get(target).await?;
        let result = conn.send(request).await;
        if matches!(&result, Err(e) if e.is_fatal()) {
            conn.mark_broken();
        }
        result
    }
}

/// Ask nodes in order with `ROLE` until one describes the topology
async fn discover(
    pools: &PoolManager,
    candidates: &[Endpoint],
    config: &ReplicationConfig,
) -> RedisResult<Topology> {
    let mut last_error = None;
    for node in candidates {
        match role_of(pools, node).await {
            Ok(RoleReply::Master { replicas }) => {
                return Ok(Topology {
                    master: node.clone(),
                    replicas: replicas
                        .into_iter()
                        .map(|r| config.base.attach_credentials(r))
                        .collect(),
                });
            }
            Ok(RoleReply::Replica { master }) => {
                let master = config.base.attach_credentials(master);
                debug!("{} replicates from {}", node, master);
                match role_of(pools, &master).await {
                    Ok(RoleReply::Master { replicas }) => {
                        return Ok(Topology {
                            master,
                            replicas: replicas
                                .into_iter()
                                .map(|r| config.base.attach_credentials(r))
                                .collect(),
                        });
                    }
                    Ok(other) => {
                        last_error = Some(RedisError::UnexpectedResponse(format!(
                            "{master} reported role {other:?}"
                        )));
                    }
                    Err(e) => {
                        warn!("Master {} unreachable: {}", master, e);
                        return Ok(Topology {
                            master,
                            replicas: vec![node.clone()],
                        });
                    }
                }
            }
            Ok(RoleReply::Sentinel) => {
                last_error = Some(RedisError::Config(format!(
                    "{node} is a sentinel; use a sentinel configuration"
                )));
            }
            Err(e) => {
                debug!("ROLE on {} failed: {}", node, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| RedisError::Config("No endpoints specified".into())))
}

async fn role_of(pools: &PoolManager, node: &Endpoint) -> RedisResult<RoleReply> {
    let mut conn = pools.get(node).await?;
    match conn.send(&Request::cmd("ROLE")).await {
        Ok(reply) => RoleReply::parse(&reply.into_result()?),
        Err(e) => {
            if e.is_fatal() {
                conn.mark_broken();
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    fn topology() -> Topology {
        Topology {
            master: ep(6379),
            replicas: vec![ep(6380), ep(6381)],
        }
    }

    #[test]
    fn test_writes_always_go_to_master() {
        let t = topology();
        for policy in [ReplicaPolicy::Never, ReplicaPolicy::Share, ReplicaPolicy::Always] {
            for n in 0..6 {
                assert_eq!(t.pick(policy, false, n), &ep(6379));
            }
        }
    }

    #[test]
    fn test_read_policies() {
        let t = topology();
        assert_eq!(t.pick(ReplicaPolicy::Never, true, 1), &ep(6379));

        let shared: Vec<u16> = (0..3).map(|n| t.pick(ReplicaPolicy::Share, true, n).port).collect();
        assert_eq!(shared, vec![6379, 6380, 6381]);

        let always: Vec<u16> = (0..3).map(|n| t.pick(ReplicaPolicy::Always, true, n).port).collect();
        assert_eq!(always, vec![6380, 6381, 6380]);

        let lone = Topology {
            master: ep(6379),
            replicas: vec![],
        };
        assert_eq!(lone.pick(ReplicaPolicy::Always, true, 3), &ep(6379));
    }

    #[test]
    fn test_parse_master_role() {
        let reply = Response::Array(vec![
            Response::from("master"),
            Response::Integer(3129659),
            Response::Array(vec![
                Response::Array(vec![
                    Response::from("10.0.0.2"),
                    Response::from("6380"),
                    Response::from("3129242"),
                ]),
                Response::Array(vec![
                    Response::from("10.0.0.3"),
                    Response::from("6381"),
                    Response::from("3129543"),
                ]),
            ]),
        ]);
        assert_eq!(
            RoleReply::parse(&reply).unwrap(),
            RoleReply::Master {
                replicas: vec![Endpoint::new("10.0.0.2", 6380), Endpoint::new("10.0.0.3", 6381)]
            }
        );
    }

    #[test]
    fn test_parse_replica_role() {
        let reply = Response::Array(vec![
            Response::from("slave"),
            Response::from("10.0.0.1"),
            Response::Integer(6379),
            Response::from("connected"),
            Response::Integer(3167038),
        ]);
        assert_eq!(
            RoleReply::parse(&reply).unwrap(),
            RoleReply::Replica {
                master: Endpoint::new("10.0.0.1", 6379)
            }
        );
    }

    #[test]
    fn test_parse_other_roles() {
        let sentinel = Response::Array(vec![
            Response::from("sentinel"),
            Response::Array(vec![Response::from("mymaster")]),
        ]);
        assert_eq!(RoleReply::parse(&sentinel).unwrap(), RoleReply::Sentinel);
        assert!(RoleReply::parse(&Response::Array(vec![])).is_err());
        assert!(RoleReply::parse(&Response::Array(vec![Response::from("leader")])).is_err());
        assert!(RoleReply::parse(&Response::Array(vec![Response::from("slave")])).is_err());
    }
}
