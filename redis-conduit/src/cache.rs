//! Client-side caching with server-assisted invalidation
//!
//! Every data connection is opened in RESP3 and switched to
//! `CLIENT TRACKING ON`. The server then sends `invalidate` push frames for
//! keys this client has read, which evict the matching entries. A `null`
//! payload (the server flushed, or lost track) clears the whole cache.
//!
//! Only read-only single-key commands with deterministic replies are
//! cached. The cache is keyed by the encoded request, so `GET k` and
//! `STRLEN k` are separate entries that are both dropped when `k` changes.

use crate::client::{default_connector, Client};
use crate::connection::{Connection, Connector, PushHandler};
use crate::protocol::Encoder;
use crate::request::Request;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use redis_conduit_core::{
    config::{ProtocolVersion, TopologyConfig},
    error::{RedisError, RedisResult},
    types::Endpoint,
    value::Response,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Read-only commands whose reply changes without the key changing
const NON_DETERMINISTIC: &[&str] = &[
    "RANDOMKEY",
    "SRANDMEMBER",
    "ZRANDMEMBER",
    "HRANDFIELD",
    "TTL",
    "PTTL",
    "EXPIRETIME",
    "PEXPIRETIME",
    "OBJECT",
    "TIME",
    "SCAN",
    "SSCAN",
    "HSCAN",
    "ZSCAN",
];

/// Client-side cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on cached replies; the oldest is evicted first
    pub max_entries: usize,
    /// Entries older than this are treated as missing
    pub max_age: Option<Duration>,
    /// Broadcasting mode: the server reports every change under `prefixes`
    /// instead of remembering which keys were read
    pub broadcast: bool,
    /// Key prefixes for broadcasting mode; other keys are not cached
    pub prefixes: Vec<String>,
    /// Do not send invalidations for writes made on the same connection
    pub no_loop: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_age: None,
            broadcast: false,
            prefixes: Vec::new(),
            no_loop: false,
        }
    }
}

impl CacheConfig {
    /// Set the entry bound
    #[must_use]
    pub const fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the maximum entry age
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Track changes by prefix (`BCAST`)
    #[must_use]
    pub fn with_broadcast(mut self, prefixes: Vec<String>) -> Self {
        self.broadcast = true;
        self.prefixes = prefixes;
        self
    }

    /// Set `NOLOOP`
    #[must_use]
    pub const fn with_no_loop(mut self, no_loop: bool) -> Self {
        self.no_loop = no_loop;
        self
    }

    /// `CLIENT TRACKING ON ...` for these settings
    pub fn tracking_request(&self) -> Request {
        let mut request = Request::cmd("CLIENT").arg("TRACKING").arg("ON");
        if self.broadcast {
            request = request.arg("BCAST");
            for prefix in &self.prefixes {
                request = request.arg("PREFIX").arg(prefix.as_str());
            }
        }
        if self.no_loop {
            request = request.arg("NOLOOP");
        }
        request
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached replies
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that went to the server
    pub misses: u64,
    /// Keys evicted by the server, plus full flushes
    pub invalidations: u64,
}

struct Entry {
    key: Bytes,
    value: Response,
    stored: Instant,
    seq: u64,
}

#[derive(Default)]
struct Store {
    entries: HashMap<Bytes, Entry>,
    /// Redis key to the requests cached for it
    by_key: HashMap<Bytes, Vec<Bytes>>,
    /// Insertion order for eviction; stale sequence numbers are skipped
    order: VecDeque<(Bytes, u64)>,
    seq: u64,
    /// Bumped on every invalidation; replies fetched across a bump are not stored
    epoch: u64,
    stats: CacheStats,
}

impl Store {
    fn remove(&mut self, id: &Bytes) {
        if let Some(entry) = self.entries.remove(id) {
            if let Some(ids) = self.by_key.get_mut(&entry.key) {
                ids.retain(|i| i != id);
                if ids.is_empty() {
                    self.by_key.remove(&entry.key);
                }
            }
        }
    }
}

/// Reply cache fed by tracked connections
pub struct ClientSideCache {
    config: CacheConfig,
    store: Mutex<Store>,
}

impl ClientSideCache {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            store: Mutex::new(Store::default()),
        }
    }

    /// Settings in use
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether `request` may be answered from the cache
    pub fn is_cacheable(&self, request: &Request) -> bool {
        let command = request.command();
        if !command.is_read_only()
            || command.is_cluster_wide()
            || NON_DETERMINISTIC
                .iter()
                .any(|name| command.name().eq_ignore_ascii_case(name))
        {
            return false;
        }
        let keys = request.keys();
        if keys.len() != 1 {
            return false;
        }
        !self.config.broadcast
            || self.config.prefixes.is_empty()
            || self
                .config
                .prefixes
                .iter()
                .any(|p| keys[0].starts_with(p.as_bytes()))
    }

    /// Cached reply for the encoded request `id`
    pub fn get(&self, id: &Bytes) -> Option<Response> {
        let mut store = self.store.lock();
        let expired = match store.entries.get(id) {
            Some(entry) => self
                .config
                .max_age
                .is_some_and(|age| entry.stored.elapsed() > age),
            None => {
                store.stats.misses += 1;
                return None;
            }
        };
        if expired {
            store.remove(id);
            store.stats.misses += 1;
            return None;
        }
        store.stats.hits += 1;
        store.entries.get(id).map(|e| e.value.clone())
    }

    /// Invalidation epoch to pass to [`ClientSideCache::insert`]
    pub fn epoch(&self) -> u64 {
        self.store.lock().epoch
    }

    /// Store a reply for `key` unless an invalidation arrived since `epoch`
    pub fn insert(&self, key: Bytes, id: Bytes, value: Response, epoch: u64) {
        if self.config.max_entries == 0 {
            return;
        }
        let mut store = self.store.lock();
        if store.epoch != epoch {
            trace!("Not caching reply fetched across an invalidation");
            return;
        }
        store.remove(&id);
        store.seq += 1;
        let seq = store.seq;
        store.by_key.entry(key.clone()).or_default().push(id.clone());
        store.order.push_back((id.clone(), seq));
        store.entries.insert(
            id,
            Entry {
                key,
                value,
                stored: Instant::now(),
                seq,
            },
        );

        while store.entries.len() > self.config.max_entries {
            let Some((oldest, seq)) = store.order.pop_front() else {
                break;
            };
            if store.entries.get(&oldest).is_some_and(|e| e.seq == seq) {
                store.remove(&oldest);
            }
        }
        if store.order.len() > self.config.max_entries.saturating_mul(2) {
            let live: Vec<(Bytes, u64)> = store
                .order
                .iter()
                .filter(|(id, seq)| store.entries.get(id).is_some_and(|e| e.seq == *seq))
                .cloned()
                .collect();
            store.order = live.into();
        }
    }

    /// Drop every reply cached for `key`
    pub fn invalidate(&self, key: &[u8]) {
        let mut store = self.store.lock();
        store.epoch += 1;
        store.stats.invalidations += 1;
        if let Some(ids) = store.by_key.remove(key) {
            for id in ids {
                store.entries.remove(&id);
            }
        }
    }

    /// Drop everything
    pub fn flush(&self) {
        let mut store = self.store.lock();
        store.epoch += 1;
        store.stats.invalidations += 1;
        store.entries.clear();
        store.by_key.clear();
        store.order.clear();
    }

    /// Apply an out-of-band frame; anything but `invalidate` is ignored
    pub fn handle_push(&self, frame: &Response) {
        let Response::Push(items) = frame else {
            return;
        };
        if !items.first().is_some_and(|kind| kind.eq_text("invalidate")) {
            trace!("Ignoring {} push frame", frame.kind());
            return;
        }
        match items.get(1) {
            None | Some(Response::Null) => {
                debug!("Server requested a full cache flush");
                self.flush();
            }
            Some(keys) => match keys.as_slice() {
                Ok(keys) => {
                    for key in keys {
                        if let Ok(key) = key.as_bytes() {
                            self.invalidate(&key);
                        }
                    }
                }
                Err(_) => self.flush(),
            },
        }
    }

    /// Counters
    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock();
        CacheStats {
            entries: store.entries.len(),
            ..store.stats
        }
    }
}

impl std::fmt::Debug for ClientSideCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSideCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Opens connections with tracking enabled and invalidations routed to a cache
pub struct TrackingConnector {
    inner: Arc<dyn Connector>,
    cache: Arc<ClientSideCache>,
}

impl TrackingConnector {
    /// Wrap `inner`
    pub fn new(inner: Arc<dyn Connector>, cache: Arc<ClientSideCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Connector for TrackingConnector {
    async fn connect(&self, endpoint: &Endpoint) -> RedisResult<Connection> {
        let conn = self.inner.connect(endpoint).await?;
        if conn.protocol() != ProtocolVersion::Resp3 {
            return Err(RedisError::Config(format!(
                "client-side caching needs RESP3, {endpoint} negotiated {}",
                conn.protocol()
            )));
        }

        let cache = Arc::downgrade(&self.cache);
        let handler: PushHandler = Arc::new(move |frame| {
            if let Some(cache) = cache.upgrade() {
                cache.handle_push(&frame);
            }
        });
        conn.on_push(handler);
        conn.send(&self.cache.config().tracking_request())
            .await?
            .into_result()?;
        // Invalidations for this connection's reads may have been missed
        // while it was being opened.
        self.cache.flush();
        debug!("Tracking enabled on connection {} to {}", conn.id(), endpoint);
        Ok(conn)
    }
}

/// [`Client`] answering repeated reads from a local cache
#[derive(Clone, Debug)]
pub struct CachingClient {
    client: Client,
    cache: Arc<ClientSideCache>,
}

impl CachingClient {
    /// Connect with tracking enabled on every data connection
    ///
    /// # Errors
    ///
    /// Returns an error if RESP3 is not configured or the topology cannot
    /// be reached.
    pub async fn connect(
        config: impl Into<TopologyConfig>,
        cache_config: CacheConfig,
    ) -> RedisResult<Self> {
        let config = config.into();
        let connector = default_connector(&config);
        Self::with_connector(config, connector, cache_config).await
    }

    /// Connect through `connector`, adding tracking on top of it
    ///
    /// # Errors
    ///
    /// See [`CachingClient::connect`].
    pub async fn with_connector(
        config: impl Into<TopologyConfig>,
        connector: Arc<dyn Connector>,
        cache_config: CacheConfig,
    ) -> RedisResult<Self> {
        let config = config.into();
        let base = config.base();
        if !base.protocol_negotiation || base.protocol_version != ProtocolVersion::Resp3 {
            return Err(RedisError::Config(
                "client-side caching needs RESP3 negotiation".into(),
            ));
        }
        let cache = Arc::new(ClientSideCache::new(cache_config));
        let tracking = Arc::new(TrackingConnector::new(connector, Arc::clone(&cache)));
        let client = Client::with_connector(config, tracking).await?;
        Ok(Self { client, cache })
    }

    /// Send one request, answering cacheable reads locally when possible
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub async fn send(&self, request: &Request) -> RedisResult<Response> {
        if !self.cache.is_cacheable(request) {
            let result = self.client.send(request).await;
            self.after_uncached(request, &result);
            return result;
        }

        let id = Encoder::encode(request);
        if let Some(hit) = self.cache.get(&id) {
            return Ok(hit);
        }
        let key = Bytes::copy_from_slice(request.keys()[0]);
        let epoch = self.cache.epoch();
        let result = self.client.send(request).await;
        match &result {
            Ok(reply) => self.cache.insert(key, id, reply.clone(), epoch),
            Err(e) if e.is_fatal() => self.cache.flush(),
            Err(_) => {}
        }
        result
    }

    /// Send requests without consulting the cache
    ///
    /// # Errors
    ///
    /// See [`Client::batch`].
    pub async fn batch(&self, requests: &[Request]) -> RedisResult<Vec<RedisResult<Response>>> {
        let result = self.client.batch(requests).await;
        for request in requests.iter().filter(|r| !r.is_read_only()) {
            for key in request.keys() {
                self.cache.invalidate(key);
            }
        }
        if let Ok(replies) = &result {
            if replies.iter().any(|r| matches!(r, Err(e) if e.is_fatal())) {
                self.cache.flush();
            }
        }
        result
    }

    /// The cache behind this client
    pub fn cache(&self) -> &Arc<ClientSideCache> {
        &self.cache
    }

    /// The uncached client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Close every pooled connection and drop cached replies
    pub fn close(&self) {
        self.client.close();
        self.cache.flush();
    }

    /// Writes drop local copies right away; with `NOLOOP` the server never
    /// reports them back. A lost connection may have lost invalidations.
    fn after_uncached(&self, request: &Request, result: &RedisResult<Response>) {
        if !request.is_read_only() {
            for key in request.keys() {
                self.cache.invalidate(key);
            }
        }
        if matches!(result, Err(e) if e.is_fatal()) {
            self.cache.flush();
        }
    }
}
