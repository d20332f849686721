//! Redis Cluster support
//!
//! [`ClusterClient`] keeps a [`SlotTable`] behind an [`ArcSwap`] so routing
//! never blocks. `MOVED` replies patch a single slot in place (one atomic
//! swap); repeated redirects, connection failures and the optional periodic
//! timer trigger a full `CLUSTER SLOTS` refresh. `ASK` replies are followed
//! once with `ASKING` and leave the table alone.

mod slot;
mod slots;

pub use slot::{calculate_slot, extract_hash_tag, CLUSTER_SLOTS};
pub use slots::{SlotEntry, SlotTable};

use crate::connection::{Connection, Connector, TcpConnector};
use crate::pool::PoolManager;
use crate::request::Request;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use redis_conduit_core::{
    config::ClusterConfig,
    error::{RedisError, RedisResult},
    types::{Endpoint, ReplicaPolicy},
    value::Response,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

const TRYAGAIN_BACKOFF: Duration = Duration::from_millis(10);
const TRYAGAIN_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// Topology state of a cluster client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Fetching the slot table
    Discovering,
    /// Routing with a known slot table
    Stable,
}

/// Requests of a batch split by target node
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchGroups {
    /// Indices of requests per owning master, in first-seen node order
    pub by_node: Vec<(Endpoint, Vec<usize>)>,
    /// Requests without keys, or whose slot has no known owner
    pub unkeyed: Vec<usize>,
    /// Requests that run on every master
    pub cluster_wide: Vec<usize>,
    /// Requests whose keys span nodes, with the reason
    pub cross_slot: Vec<(usize, String)>,
}

/// Split `requests` by the master owning their keys.
///
/// A request whose own keys span nodes lands in `cross_slot` and is never
/// sent; the rest of the batch is unaffected.
pub fn group_by_node(table: &SlotTable, requests: &[Request]) -> BatchGroups {
    let mut groups = BatchGroups::default();
    for (i, request) in requests.iter().enumerate() {
        if request.command().is_cluster_wide() {
            groups.cluster_wide.push(i);
            continue;
        }
        let slot = match table.slot_for_keys(&request.keys()) {
            Ok(slot) => slot,
            Err(RedisError::CrossSlot(reason)) => {
                groups.cross_slot.push((i, reason));
                continue;
            }
            Err(e) => {
                groups.cross_slot.push((i, e.to_string()));
                continue;
            }
        };
        let owner = slot.and_then(|slot| table.master_for(slot));
        match owner {
            Some(master) => match groups.by_node.iter_mut().find(|(ep, _)| ep == master) {
                Some((_, idx)) => idx.push(i),
                None => groups.by_node.push((master.clone(), vec![i])),
            },
            None => groups.unkeyed.push(i),
        }
    }
    groups
}

/// Client for a Redis Cluster
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<ClusterInner>,
}

struct ClusterInner {
    config: ClusterConfig,
    seeds: Vec<Endpoint>,
    table: ArcSwap<SlotTable>,
    state: Mutex<ClusterState>,
    masters: PoolManager,
    replicas: PoolManager,
    /// MOVED replies since the last full refresh
    moved: AtomicUsize,
    refresh_lock: tokio::sync::Mutex<()>,
    /// Completed refreshes; lets concurrent callers share one refresh
    generation: AtomicU64,
    next_node: AtomicUsize,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

/// Where one request goes
struct Route {
    endpoint: Endpoint,
    replica: bool,
}

impl ClusterClient {
    /// Connect to a cluster over TCP and load the slot table
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no seed node
    /// answers `CLUSTER SLOTS`.
    pub async fn connect(config: ClusterConfig) -> RedisResult<Self> {
        let connector = Arc::new(TcpConnector::for_cluster(config.base.clone()));
        Self::with_connector(config, connector).await
    }

    /// Connect using a custom connector for every node
    ///
    /// # Errors
    ///
    /// See [`ClusterClient::connect`].
    pub async fn with_connector(
        config: ClusterConfig,
        connector: Arc<dyn Connector>,
    ) -> RedisResult<Self> {
        config.base.pool.validate()?;
        let seeds = config.base.parse_endpoints()?;
        if seeds.is_empty() {
            return Err(RedisError::Config("no cluster seed nodes configured".into()));
        }

        let replica_connector: Arc<dyn Connector> = Arc::new(ReadOnlyConnector {
            inner: Arc::clone(&connector),
        });
        let inner = Arc::new(ClusterInner {
            masters: PoolManager::new(connector, config.base.pool.clone()),
            replicas: PoolManager::new(replica_connector, config.base.pool.clone()),
            seeds,
            table: ArcSwap::from_pointee(SlotTable::default()),
            state: Mutex::new(ClusterState::Discovering),
            moved: AtomicUsize::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            next_node: AtomicUsize::new(0),
            refresher: Mutex::new(None),
            config,
        });

        inner.refresh(0).await?;
        if let Some(every) = inner.config.slots_refresh_interval {
            let task = tokio::spawn(periodic_refresh(Arc::downgrade(&inner), every));
            *inner.refresher.lock() = Some(task);
        }
        Ok(Self { inner })
    }

    /// Send one request to the node owning its keys.
    ///
    /// Redirects and `TRYAGAIN` are followed up to `max_redirects` times.
    /// Other error replies come back as `Ok(Response::Error(_))`.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::CrossSlot`] for keys on different nodes,
    /// [`RedisError::MaxRetriesExceeded`] when redirects do not settle, or
    /// the connection error that stopped the request.
    pub async fn send(&self, request: &Request) -> RedisResult<Response> {
        request.check_arity()?;
        if request.command().is_cluster_wide() {
            return self.inner.fan_out(request).await;
        }
        let route = self.inner.route(request)?;
        self.inner.execute(request, route).await
    }

    /// Send requests grouped by node; each group is one pipelined write.
    ///
    /// Groups run concurrently and results come back in request order.
    /// Redirected entries are re-sent individually.
    ///
    /// A request whose keys live on different nodes gets
    /// [`RedisError::CrossSlot`] in its slot and is not sent.
    ///
    /// # Errors
    ///
    /// Returns an error if a request has the wrong number of arguments.
    pub async fn batch(&self, requests: &[Request]) -> RedisResult<Vec<RedisResult<Response>>> {
        for request in requests {
            request.check_arity()?;
        }
        let groups = group_by_node(&self.inner.table.load(), requests);

        let mut tasks = Vec::with_capacity(groups.by_node.len() + 1);
        for (endpoint, indices) in groups.by_node {
            tasks.push(self.inner.run_group(requests, endpoint, indices));
        }
        if !groups.unkeyed.is_empty() {
            let endpoint = self.inner.any_master();
            tasks.push(self.inner.run_group(requests, endpoint, groups.unkeyed));
        }

        let mut results: Vec<Option<RedisResult<Response>>> =
            std::iter::repeat_with(|| None).take(requests.len()).collect();
        for group in join_all(tasks).await {
            for (i, result) in group {
                results[i] = Some(result);
            }
        }
        for (i, reason) in groups.cross_slot {
            results[i] = Some(Err(RedisError::CrossSlot(reason)));
        }
        for i in groups.cluster_wide {
            results[i] = Some(self.inner.fan_out(&requests[i]).await);
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or(Err(RedisError::ConnectionClosed)))
            .collect())
    }

    /// Reload the slot table from the cluster
    ///
    /// # Errors
    ///
    /// Returns an error if no known node answers `CLUSTER SLOTS`.
    pub async fn refresh(&self) -> RedisResult<()> {
        let seen = self.inner.generation.load(Ordering::Acquire);
        self.inner.refresh(seen).await
    }

    /// Snapshot of the current slot table
    pub fn slot_table(&self) -> Arc<SlotTable> {
        self.inner.table.load_full()
    }

    /// Current topology state
    pub fn state(&self) -> ClusterState {
        *self.inner.state.lock()
    }

    /// Master currently owning `key`
    pub fn node_for_key(&self, key: &[u8]) -> Option<Endpoint> {
        self.inner.table.load().master_for(calculate_slot(key)).cloned()
    }

    /// Close every pooled connection and stop the refresh timer
    pub fn close(&self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("seeds", &self.inner.seeds)
            .field("state", &self.state())
            .field("masters", &self.inner.table.load().masters().len())
            .finish()
    }
}

impl ClusterInner {
    fn route(&self, request: &Request) -> RedisResult<Route> {
        let table = self.table.load();
        let Some(slot) = table.slot_for_keys(&request.keys())? else {
            return Ok(Route {
                endpoint: self.any_master(),
                replica: false,
            });
        };
        let Some(entry) = table.entry(slot) else {
            return Ok(Route {
                endpoint: self.any_master(),
                replica: false,
            });
        };

        let policy = if request.is_read_only() {
            self.config.use_replicas
        } else {
            ReplicaPolicy::Never
        };
        let n = self.next_node.fetch_add(1, Ordering::Relaxed);
        let route = match policy {
            ReplicaPolicy::Never => None,
            ReplicaPolicy::Share => {
                let pick = n % (entry.replicas.len() + 1);
                entry.replicas.get(pick)
            }
            ReplicaPolicy::Always if entry.replicas.is_empty() => None,
            ReplicaPolicy::Always => entry.replicas.get(n % entry.replicas.len()),
        };
        Ok(match route {
            Some(replica) => Route {
                endpoint: replica.clone(),
                replica: true,
            },
            None => Route {
                endpoint: entry.master.clone(),
                replica: false,
            },
        })
    }

    /// Some master, rotating between calls
    fn any_master(&self) -> Endpoint {
        let masters = self.table.load().masters();
        let n = self.next_node.fetch_add(1, Ordering::Relaxed);
        if masters.is_empty() {
            return self.seeds[n % self.seeds.len()].clone();
        }
        masters[n % masters.len()].clone()
    }

    /// Endpoint named by a redirect; an empty host means the node that
    /// sent it.
    fn redirect_endpoint(&self, host: String, port: u16, from: &Endpoint) -> Endpoint {
        let host = if host.is_empty() { from.host.clone() } else { host };
        Endpoint::new(host, port).inherit_credentials(&self.seeds[0])
    }

    async fn execute(self: &Arc<Self>, request: &Request, route: Route) -> RedisResult<Response> {
        let mut target = route.endpoint;
        let mut replica = route.replica;
        let mut asking = false;
        let mut backoff = TRYAGAIN_BACKOFF;

        for _ in 0..=self.config.max_redirects {
            let reply = self.call(&target, replica, request, asking).await?;
            let Response::Error(msg) = &reply else {
                return Ok(reply);
            };
            match RedisError::from_server_message(msg) {
                RedisError::Moved { slot, host, port } => {
                    let moved_to = self.redirect_endpoint(host, port, &target);
                    debug!("MOVED slot {} from {} to {}", slot, target, moved_to);
                    self.apply_moved(slot, &moved_to);
                    target = moved_to;
                    replica = false;
                    asking = false;
                }
                RedisError::Ask { slot, host, port } => {
                    let ask = self.redirect_endpoint(host, port, &target);
                    debug!("ASK slot {} from {} to {}", slot, target, ask);
                    target = ask;
                    replica = false;
                    asking = true;
                }
                RedisError::TryAgain(_) => {
                    debug!("TRYAGAIN from {}, retrying in {:?}", target, backoff);
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(TRYAGAIN_BACKOFF_MAX);
                    asking = false;
                }
                _ => return Ok(reply),
            }
        }

        warn!(
            "Request {} still redirected after {} attempts",
            request.command().name(),
            self.config.max_redirects
        );
        Err(RedisError::MaxRetriesExceeded(self.config.max_redirects))
    }

    /// One round trip on a pooled connection
    async fn call(
        self: &Arc<Self>,
        target: &Endpoint,
        replica: bool,
        request: &Request,
        asking: bool,
    ) -> RedisResult<Response> {
        let pools = if replica { &self.replicas } else { &self.masters };
        let mut conn = match pools.get(target).await {
            Ok(conn) => conn,
            Err(e) => {
                if e.is_fatal() || matches!(e, RedisError::Timeout) {
                    self.schedule_refresh();
                }
                return Err(e);
            }
        };

        let result = if asking {
            conn.batch(&[Request::cmd("ASKING"), request.clone()])
                .await
                .and_then(|mut replies| replies.pop().unwrap_or(Err(RedisError::ConnectionClosed)))
        } else {
            conn.send(request).await
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                conn.mark_broken();
                self.schedule_refresh();
            }
        }
        result
    }

    fn apply_moved(self: &Arc<Self>, slot: u16, master: &Endpoint) {
        self.table
            .rcu(|table| Arc::new(table.with_moved(slot, master)));
        let moved = self.moved.fetch_add(1, Ordering::AcqRel) + 1;
        let threshold = self.config.refresh_after_redirects;
        if threshold > 0 && moved >= threshold {
            self.moved.store(0, Ordering::Release);
            info!("{} MOVED replies since last refresh, reloading slots", moved);
            self.schedule_refresh();
        }
    }

    /// Run every group member on `endpoint` as one pipelined write
    async fn run_group(
        self: &Arc<Self>,
        requests: &[Request],
        endpoint: Endpoint,
        indices: Vec<usize>,
    ) -> Vec<(usize, RedisResult<Response>)> {
        let batch: Vec<Request> = indices.iter().map(|&i| requests[i].clone()).collect();
        let replies = match self.masters.get(&endpoint).await {
            Ok(mut conn) => match conn.batch(&batch).await {
                Ok(replies) => {
                    if replies.iter().any(|r| matches!(r, Err(e) if e.is_fatal())) {
                        conn.mark_broken();
                        self.schedule_refresh();
                    }
                    replies
                }
                Err(e) => batch.iter().map(|_| Err(e.duplicate())).collect(),
            },
            Err(e) => batch.iter().map(|_| Err(e.duplicate())).collect(),
        };

        let mut out = Vec::with_capacity(indices.len());
        for (&i, reply) in indices.iter().zip(replies) {
            let reply = match reply {
                Ok(Response::Error(msg)) => match RedisError::from_server_message(&msg) {
                    RedisError::Moved { slot, host, port } => {
                        let moved_to = self.redirect_endpoint(host, port, &endpoint);
                        self.apply_moved(slot, &moved_to);
                        self.resend(&requests[i], moved_to, false).await
                    }
                    RedisError::Ask { host, port, .. } => {
                        let ask = self.redirect_endpoint(host, port, &endpoint);
                        self.resend(&requests[i], ask, true).await
                    }
                    RedisError::TryAgain(_) => match self.route(&requests[i]) {
                        Ok(route) => self.execute(&requests[i], route).await,
                        Err(e) => Err(e),
                    },
                    _ => Ok(Response::Error(msg)),
                },
                other => other,
            };
            out.push((i, reply));
        }
        out
    }

    /// Follow a redirect seen inside a batch, then continue as `send` would
    async fn resend(
        self: &Arc<Self>,
        request: &Request,
        target: Endpoint,
        asking: bool,
    ) -> RedisResult<Response> {
        if asking {
            let reply = self.call(&target, false, request, true).await?;
            let redirected = matches!(&reply, Response::Error(msg) if RedisError::parse_redirect(msg).is_some());
            if !redirected {
                return Ok(reply);
            }
            let route = self.route(request)?;
            return self.execute(request, route).await;
        }
        let route = Route {
            endpoint: target,
            replica: false,
        };
        self.execute(request, route).await
    }

    /// Run a keyless cluster-wide command on every master and merge replies
    async fn fan_out(self: &Arc<Self>, request: &Request) -> RedisResult<Response> {
        let masters = self.table.load().masters();
        if masters.is_empty() {
            return Err(RedisError::Cluster("no known masters".into()));
        }
        let calls = masters.iter().map(|master| {
            let route = Route {
                endpoint: master.clone(),
                replica: false,
            };
            self.execute(request, route)
        });
        let replies = join_all(calls)
            .await
            .into_iter()
            .collect::<RedisResult<Vec<Response>>>()?;
        Ok(aggregate(replies))
    }

    /// Reload the table unless a refresh finished after `seen` was read
    async fn refresh(&self, seen: u64) -> RedisResult<()> {
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            return Ok(());
        }
        *self.state.lock() = ClusterState::Discovering;

        let mut candidates = self.table.load().masters();
        for seed in &self.seeds {
            if !candidates.contains(seed) {
                candidates.push(seed.clone());
            }
        }

        let mut last_error = None;
        for node in candidates {
            match self.load_slots(&node).await {
                Ok(table) => {
                    info!(
                        "Loaded cluster slots from {}: {} ranges on {} masters{}",
                        node,
                        table.entries().len(),
                        table.masters().len(),
                        if table.is_complete() { "" } else { " (incomplete)" }
                    );
                    let nodes = table.nodes();
                    self.masters.retain(|ep| nodes.contains(ep));
                    self.replicas.retain(|ep| nodes.contains(ep));
                    self.table.store(Arc::new(table));
                    self.moved.store(0, Ordering::Release);
                    self.generation.fetch_add(1, Ordering::AcqRel);
                    *self.state.lock() = ClusterState::Stable;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to load cluster slots from {}: {}", node, e);
                    last_error = Some(e);
                }
            }
        }

        if !self.table.load().is_empty() {
            *self.state.lock() = ClusterState::Stable;
        }
        Err(RedisError::Cluster(format!(
            "no node answered CLUSTER SLOTS: {}",
            last_error.map_or_else(|| "no candidates".to_string(), |e| e.to_string())
        )))
    }

    async fn load_slots(&self, node: &Endpoint) -> RedisResult<SlotTable> {
        let mut conn = self.masters.get(node).await?;
        let reply = match conn.send(&Request::cmd("CLUSTER").arg("SLOTS")).await {
            Ok(reply) => reply.into_result()?,
            Err(e) => {
                if e.is_fatal() {
                    conn.mark_broken();
                }
                return Err(e);
            }
        };
        let table = SlotTable::from_cluster_slots(&reply, node)?;
        if table.is_empty() {
            return Err(RedisError::Cluster(format!("{node} reported no slots")));
        }
        Ok(table)
    }

    fn schedule_refresh(self: &Arc<Self>) {
        let seen = self.generation.load(Ordering::Acquire);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.refresh(seen).await {
                warn!("Background slot refresh failed: {}", e);
            }
        });
    }

    fn shutdown(&self) {
        if let Some(task) = self.refresher.lock().take() {
            task.abort();
        }
        self.masters.close();
        self.replicas.close();
    }
}

impl Drop for ClusterInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn periodic_refresh(inner: Weak<ClusterInner>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let seen = inner.generation.load(Ordering::Acquire);
        if let Err(e) = inner.refresh(seen).await {
            warn!("Periodic slot refresh failed: {}", e);
        }
    }
}

/// Merge per-master replies of a cluster-wide command.
///
/// An error reply wins; integers are summed (`DBSIZE`), arrays are
/// concatenated (`KEYS`); anything else takes the first reply (`OK`).
fn aggregate(replies: Vec<Response>) -> Response {
    if let Some(err) = replies.iter().find(|r| r.is_error()) {
        return err.clone();
    }
    if replies.iter().all(|r| matches!(r, Response::Integer(_))) {
        return Response::Integer(
            replies
                .iter()
                .filter_map(|r| r.as_int().ok())
                .fold(0i64, i64::saturating_add),
        );
    }
    if replies.iter().all(|r| matches!(r, Response::Array(_))) {
        let mut merged = Vec::new();
        for reply in replies {
            if let Response::Array(items) = reply {
                merged.extend(items);
            }
        }
        return Response::Array(merged);
    }
    replies.into_iter().next().unwrap_or(Response::Null)
}

/// Opens replica connections in `READONLY` mode
struct ReadOnlyConnector {
    inner: Arc<dyn Connector>,
}

#[async_trait]
impl Connector for ReadOnlyConnector {
    async fn connect(&self, endpoint: &Endpoint) -> RedisResult<Connection> {
        let conn = self.inner.connect(endpoint).await?;
        conn.send(&Request::cmd("READONLY")).await?.into_result()?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_conduit_core::types::SlotRange;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("127.0.0.1", port)
    }

    fn table() -> SlotTable {
        SlotTable::new(vec![
            SlotEntry {
                range: SlotRange::new(0, 8191),
                master: ep(7000),
                replicas: vec![],
            },
            SlotEntry {
                range: SlotRange::new(8192, 16383),
                master: ep(7001),
                replicas: vec![],
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_group_by_node() {
        // bar -> 5061 (7000), foo -> 12182 (7001)
        let requests = vec![
            Request::cmd("GET").arg("foo"),
            Request::cmd("SET").arg("bar").arg("1"),
            Request::cmd("PING"),
            Request::cmd("GET").arg("foo2"),
            Request::cmd("DBSIZE"),
            Request::cmd("MGET").arg("{bar}.a").arg("{bar}.b"),
        ];
        let groups = group_by_node(&table(), &requests);
        let foo2 = if calculate_slot(b"foo2") < 8192 { 7000 } else { 7001 };

        let mut expected: Vec<(Endpoint, Vec<usize>)> = vec![(ep(7001), vec![0]), (ep(7000), vec![1, 5])];
        for (node, indices) in &mut expected {
            if node.port == foo2 {
                indices.push(3);
                indices.sort_unstable();
            }
        }
        assert_eq!(groups.by_node, expected);
        assert_eq!(groups.unkeyed, vec![2]);
        assert_eq!(groups.cluster_wide, vec![4]);
    }

    #[test]
    fn test_group_cross_slot_is_isolated() {
        let requests = vec![
            Request::cmd("GET").arg("foo"),
            Request::cmd("MGET").arg("foo").arg("bar"),
            Request::cmd("GET").arg("bar"),
        ];
        let groups = group_by_node(&table(), &requests);
        assert_eq!(groups.by_node, vec![(ep(7001), vec![0]), (ep(7000), vec![2])]);
        assert_eq!(groups.cross_slot.len(), 1);
        assert_eq!(groups.cross_slot[0].0, 1);
    }

    #[test]
    fn test_group_unknown_owner_is_unkeyed() {
        let requests = vec![Request::cmd("GET").arg("foo")];
        let groups = group_by_node(&SlotTable::default(), &requests);
        assert!(groups.by_node.is_empty());
        assert_eq!(groups.unkeyed, vec![0]);
    }

    #[test]
    fn test_aggregate() {
        assert_eq!(
            aggregate(vec![Response::Integer(2), Response::Integer(3)]),
            Response::Integer(5)
        );
        assert_eq!(
            aggregate(vec![
                Response::Array(vec![Response::from("a")]),
                Response::Array(vec![Response::from("b")]),
            ]),
            Response::Array(vec![Response::from("a"), Response::from("b")])
        );
        assert_eq!(
            aggregate(vec![Response::Simple("OK".into()), Response::Simple("OK".into())]),
            Response::Simple("OK".into())
        );
        assert!(aggregate(vec![Response::Integer(1), Response::Error("ERR x".into())]).is_error());
    }
}
