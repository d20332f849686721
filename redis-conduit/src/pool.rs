//! Connection pooling
//!
//! Each endpoint gets a [`ConnectionPool`]: an actor task that alone owns
//! the idle set and the waiter queue. Handles talk to it over a channel, so
//! no caller ever locks pool state. [`PoolManager`] keeps one pool per
//! [`Endpoint`] and is what the topology clients lease from.

use crate::connection::{Connection, Connector};
use parking_lot::RwLock;
use redis_conduit_core::{
    config::PoolConfig,
    error::{RedisError, RedisResult},
    types::Endpoint,
};
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, Interval, MissedTickBehavior};
use tracing::{debug, warn};

type LeaseTx = oneshot::Sender<RedisResult<PooledConnection>>;

enum PoolMsg {
    Acquire(LeaseTx),
    Release { conn: Connection, broken: bool },
    Created(RedisResult<Connection>),
    Stats(oneshot::Sender<PoolStats>),
    Close,
}

/// Snapshot of a pool's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections owned by the pool: idle, leased and being created
    pub total: usize,
    /// Connections ready to be leased
    pub idle: usize,
    /// Connections currently leased
    pub leased: usize,
    /// Connections being opened
    pub creating: usize,
    /// Lease requests waiting for a connection
    pub waiting: usize,
}

/// Handle to the pool of one endpoint
#[derive(Clone)]
pub struct ConnectionPool {
    tx: mpsc::UnboundedSender<PoolMsg>,
    endpoint: Endpoint,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Start a pool for `endpoint`; connections are opened lazily
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let acquire_timeout = config.acquire_timeout;
        let actor = PoolActor {
            endpoint: endpoint.clone(),
            connector,
            config,
            idle: VecDeque::new(),
            waiters: VecDeque::new(),
            total: 0,
            creating: 0,
            closed: false,
            self_tx: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));
        Self {
            tx,
            endpoint,
            acquire_timeout,
        }
    }

    /// Lease a connection.
    ///
    /// Resolves with an idle connection, a newly created one, or the next
    /// one released, in that order of preference.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::PoolExhausted`] at once when the waiter queue is
    /// full, [`RedisError::Timeout`] after the acquire timeout, or the
    /// connect error when opening a connection fails.
    pub async fn get(&self) -> RedisResult<PooledConnection> {
        let (tx, mut rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::Acquire(tx))
            .map_err(|_| closed_error())?;
        match timeout(self.acquire_timeout, &mut rx).await {
            Ok(lease) => lease.map_err(|_| closed_error())?,
            Err(_) => {
                // A lease that raced the timeout goes back through its Drop.
                rx.close();
                Err(RedisError::Timeout)
            }
        }
    }

    /// Current bookkeeping
    pub async fn stats(&self) -> PoolStats {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(PoolMsg::Stats(tx)).is_err() {
            return PoolStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Close idle connections and reject further leases
    pub fn close(&self) {
        let _ = self.tx.send(PoolMsg::Close);
    }

    /// Endpoint served by this pool
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

fn closed_error() -> RedisError {
    RedisError::Connection("pool is closed".to_string())
}

/// A leased connection; returned to its pool when dropped
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: mpsc::UnboundedSender<PoolMsg>,
    broken: bool,
    leased_at: Instant,
}

impl PooledConnection {
    /// Destroy the connection on release instead of returning it
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// How long this lease has been held
    pub fn leased_for(&self) -> Duration {
        self.leased_at.elapsed()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let broken = self.broken;
            if let Err(mpsc::error::SendError(PoolMsg::Release { conn, .. })) =
                self.pool.send(PoolMsg::Release { conn, broken })
            {
                conn.close();
            }
        }
    }
}

struct Idle {
    conn: Connection,
    since: Instant,
}

struct PoolActor {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    idle: VecDeque<Idle>,
    waiters: VecDeque<LeaseTx>,
    /// Idle + leased + creating
    total: usize,
    creating: usize,
    closed: bool,
    self_tx: mpsc::WeakUnboundedSender<PoolMsg>,
}

impl PoolActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PoolMsg>) {
        let mut cleaner = self.config.cleaner_interval.map(|every| {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                () = tick(&mut cleaner) => self.evict_stale(),
            }
        }
        debug!("Pool for {} stopped", self.endpoint);
    }

    fn handle(&mut self, msg: PoolMsg) {
        match msg {
            PoolMsg::Acquire(tx) => self.acquire(tx),
            PoolMsg::Release { conn, broken } => self.release(conn, broken),
            PoolMsg::Created(result) => self.created(result),
            PoolMsg::Stats(tx) => {
                let _ = tx.send(self.stats());
            }
            PoolMsg::Close => self.close(),
        }
    }

    fn acquire(&mut self, tx: LeaseTx) {
        if self.closed {
            let _ = tx.send(Err(closed_error()));
            return;
        }
        self.waiters.retain(|w| !w.is_closed());

        while let Some(Idle { conn, .. }) = self.idle.pop_front() {
            if conn.is_usable() {
                self.hand_over(tx, conn);
                return;
            }
            self.total -= 1;
        }

        if self.total < self.config.max_size {
            self.waiters.push_back(tx);
            self.spawn_create();
            return;
        }

        if self.waiters.len().saturating_sub(self.creating) >= self.config.max_waiting {
            let _ = tx.send(Err(RedisError::PoolExhausted {
                max_waiting: self.config.max_waiting,
            }));
            return;
        }
        self.waiters.push_back(tx);
    }

    fn release(&mut self, conn: Connection, broken: bool) {
        if broken || self.closed || !conn.is_usable() {
            debug!(
                "Discarding connection {} to {} on release",
                conn.id(),
                self.endpoint
            );
            conn.close();
            self.total -= 1;
            self.replace_for_waiters();
            return;
        }
        self.offer(conn);
    }

    fn created(&mut self, result: RedisResult<Connection>) {
        self.creating -= 1;
        match result {
            Ok(conn) => {
                debug!("Pool for {} opened connection {}", self.endpoint, conn.id());
                if self.closed {
                    self.total -= 1;
                    conn.close();
                } else {
                    self.offer(conn);
                }
            }
            Err(e) => {
                warn!("Failed to open connection to {}: {}", self.endpoint, e);
                self.total -= 1;
                self.waiters.retain(|w| !w.is_closed());
                if let Some(waiter) = self.waiters.pop_front() {
                    let _ = waiter.send(Err(e));
                }
                self.replace_for_waiters();
            }
        }
    }

    /// Give a usable connection to the oldest live waiter, or park it
    fn offer(&mut self, conn: Connection) {
        let mut conn = conn;
        while let Some(waiter) = self.waiters.pop_front() {
            match self.lease(conn) {
                Some(lease) => match waiter.send(Ok(lease)) {
                    Ok(()) => return,
                    Err(Ok(mut lease)) => match lease.conn.take() {
                        Some(c) => conn = c,
                        None => return,
                    },
                    Err(Err(_)) => return,
                },
                None => return,
            }
        }
        self.idle.push_back(Idle {
            conn,
            since: Instant::now(),
        });
    }

    fn hand_over(&mut self, tx: LeaseTx, conn: Connection) {
        match self.lease(conn) {
            Some(lease) => {
                if let Err(Ok(mut lease)) = tx.send(Ok(lease)) {
                    if let Some(conn) = lease.conn.take() {
                        self.idle.push_front(Idle {
                            conn,
                            since: Instant::now(),
                        });
                    }
                }
            }
            None => {
                let _ = tx.send(Err(closed_error()));
            }
        }
    }

    fn lease(&mut self, conn: Connection) -> Option<PooledConnection> {
        match self.self_tx.upgrade() {
            Some(pool) => Some(PooledConnection {
                conn: Some(conn),
                pool,
                broken: false,
                leased_at: Instant::now(),
            }),
            None => {
                self.total -= 1;
                conn.close();
                None
            }
        }
    }

    /// Open connections for waiters that no pending creation will serve
    fn replace_for_waiters(&mut self) {
        if self.closed {
            return;
        }
        self.waiters.retain(|w| !w.is_closed());
        while self.waiters.len() > self.creating && self.total < self.config.max_size {
            self.spawn_create();
        }
    }

    fn spawn_create(&mut self) {
        self.total += 1;
        self.creating += 1;
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let pool = self.self_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&endpoint).await;
            match pool.upgrade() {
                Some(pool) => {
                    if let Err(mpsc::error::SendError(PoolMsg::Created(Ok(conn)))) =
                        pool.send(PoolMsg::Created(result))
                    {
                        conn.close();
                    }
                }
                None => {
                    if let Ok(conn) = result {
                        conn.close();
                    }
                }
            }
        });
    }

    fn evict_stale(&mut self) {
        let recycle = self.config.recycle_timeout;
        let before = self.idle.len();
        self.idle.retain(|idle| {
            let keep = idle.conn.is_usable() && idle.since.elapsed() < recycle;
            if !keep {
                idle.conn.close();
            }
            keep
        });
        let evicted = before - self.idle.len();
        if evicted > 0 {
            self.total -= evicted;
            debug!("Evicted {} idle connections to {}", evicted, self.endpoint);
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.total -= self.idle.len();
        for idle in self.idle.drain(..) {
            idle.conn.close();
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(closed_error()));
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.total,
            idle: self.idle.len(),
            leased: self.total - self.idle.len() - self.creating,
            creating: self.creating,
            waiting: self.waiters.iter().filter(|w| !w.is_closed()).count(),
        }
    }
}

async fn tick(cleaner: &mut Option<Interval>) {
    match cleaner {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// One pool per endpoint, created on first use
pub struct PoolManager {
    pools: RwLock<HashMap<Endpoint, ConnectionPool>>,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
}

impl PoolManager {
    /// Create a manager opening connections through `connector`
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            connector,
            config,
        }
    }

    /// Pool for `endpoint`, starting it if needed
    pub fn pool(&self, endpoint: &Endpoint) -> ConnectionPool {
        if let Some(pool) = self.pools.read().get(endpoint) {
            return pool.clone();
        }
        self.pools
            .write()
            .entry(endpoint.clone())
            .or_insert_with(|| {
                debug!("Creating pool for {}", endpoint);
                ConnectionPool::new(
                    endpoint.clone(),
                    Arc::clone(&self.connector),
                    self.config.clone(),
                )
            })
            .clone()
    }

    /// Lease a connection to `endpoint`
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::get`].
    pub async fn get(&self, endpoint: &Endpoint) -> RedisResult<PooledConnection> {
        self.pool(endpoint).get().await
    }

    /// Endpoints with a pool
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.pools.read().keys().cloned().collect()
    }

    /// Close and forget the pools of endpoints `keep` rejects
    pub fn retain(&self, keep: impl Fn(&Endpoint) -> bool) {
        self.pools.write().retain(|endpoint, pool| {
            let kept = keep(endpoint);
            if !kept {
                debug!("Dropping pool for {}", endpoint);
                pool.close();
            }
            kept
        });
    }

    /// Close every pool
    pub fn close(&self) {
        for (_, pool) in self.pools.write().drain() {
            pool.close();
        }
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.close();
    }
}
