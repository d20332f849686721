//! Multiplexed connection to a single Redis node
//!
//! A [`Connection`] owns one socket. Writes go through a writer task fed by
//! an unbounded channel; a reader task decodes replies and completes the
//! pending requests strictly in the order they were written. Frames that do
//! not answer a request (pub/sub messages, invalidations) go to the push
//! handler instead.

use crate::protocol::{self, Decoder, Encoder};
use crate::request::Request;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use redis_conduit_core::{
    config::{ConnectionConfig, ProtocolVersion},
    error::{RedisError, RedisResult},
    types::Endpoint,
    value::Response,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Callback receiving out-of-band frames
pub type PushHandler = Arc<dyn Fn(Response) + Send + Sync>;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, handshake in progress
    Connecting,
    /// Accepting requests
    Ready,
    /// Closed on request; pending requests were failed
    Closing,
    /// Socket or protocol failure; terminal
    Failed,
}

type ReplyTx = oneshot::Sender<RedisResult<Response>>;
type ReplyRx = oneshot::Receiver<RedisResult<Response>>;

struct Waiter {
    tx: ReplyTx,
    /// Subscription confirmations this request expects (0 for ordinary commands)
    confirmations: usize,
    collected: Vec<Response>,
}

struct Inner {
    state: ConnectionState,
    waiting: VecDeque<Waiter>,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    protocol: ProtocolVersion,
    subscriber: bool,
    push_handler: Option<PushHandler>,
}

struct Shared {
    id: u64,
    endpoint: Endpoint,
    max_waiting_handlers: usize,
    inner: Mutex<Inner>,
}

/// A pipelined connection to one Redis node
pub struct Connection {
    shared: Arc<Shared>,
    operation_timeout: Option<Duration>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Open a TCP connection and run the handshake
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened or the handshake fails.
    pub async fn connect(endpoint: &Endpoint, config: &ConnectionConfig) -> RedisResult<Self> {
        TcpConnector::new(config.clone()).connect(endpoint).await
    }

    /// Run the handshake over an already opened stream
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    pub async fn establish<S>(
        stream: S,
        endpoint: Endpoint,
        config: &ConnectionConfig,
        select_db: bool,
    ) -> RedisResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Self::from_stream(stream, endpoint, config);
        protocol::handshake(&conn, &conn.shared.endpoint, config, select_db).await?;
        conn.shared.inner.lock().state = ConnectionState::Ready;
        debug!(
            "Connection {} to {} ready ({})",
            conn.id(),
            conn.endpoint(),
            conn.protocol()
        );
        Ok(conn)
    }

    fn from_stream<S>(stream: S, endpoint: Endpoint, config: &ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            max_waiting_handlers: config.max_waiting_handlers,
            inner: Mutex::new(Inner {
                state: ConnectionState::Connecting,
                waiting: VecDeque::new(),
                writer: Some(tx),
                protocol: ProtocolVersion::Resp2,
                subscriber: false,
                push_handler: None,
            }),
        });

        tokio::spawn(write_loop(write_half, rx, Arc::clone(&shared)));
        let reader = tokio::spawn(read_loop(
            read_half,
            Decoder::new(config.max_nested_arrays),
            Arc::clone(&shared),
        ));

        Self {
            shared,
            operation_timeout: config.operation_timeout,
            reader,
        }
    }

    /// Send one request and wait for its reply.
    ///
    /// Error replies come back as `Ok(Response::Error(_))`; only client-side
    /// failures (closed connection, backpressure, timeout) are `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be written or the reply
    /// never arrived.
    pub async fn send(&self, request: &Request) -> RedisResult<Response> {
        let mut receivers = self
            .shared
            .enqueue(Encoder::encode(request), &[confirmations(request)])?;
        match receivers.pop() {
            Some(rx) => self.wait(rx).await,
            None => Err(RedisError::ConnectionClosed),
        }
    }

    /// Send requests as one contiguous write and collect every reply.
    ///
    /// No other request on this connection is interleaved with the batch.
    ///
    /// # Errors
    ///
    /// The outer error means nothing was sent; per-request failures are
    /// reported in the returned vector.
    pub async fn batch(&self, requests: &[Request]) -> RedisResult<Vec<RedisResult<Response>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let expected: Vec<usize> = requests.iter().map(confirmations).collect();
        let receivers = self
            .shared
            .enqueue(Encoder::encode_batch(requests), &expected)?;

        let mut replies = Vec::with_capacity(receivers.len());
        for rx in receivers {
            replies.push(self.wait(rx).await);
        }
        Ok(replies)
    }

    async fn wait(&self, rx: ReplyRx) -> RedisResult<Response> {
        let reply = async { rx.await.unwrap_or(Err(RedisError::ConnectionClosed)) };
        match self.operation_timeout {
            Some(limit) => timeout(limit, reply)
                .await
                .map_err(|_| RedisError::Timeout)?,
            None => reply.await,
        }
    }

    /// Install the handler for out-of-band frames
    pub fn on_push(&self, handler: PushHandler) {
        self.shared.inner.lock().push_handler = Some(handler);
    }

    /// Close the connection, failing every pending request
    pub fn close(&self) {
        self.shared.shutdown(ConnectionState::Closing, &RedisError::ConnectionClosed);
        self.reader.abort();
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Whether new requests can be sent
    pub fn is_usable(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == ConnectionState::Ready && inner.writer.is_some()
    }

    /// Requests written but not yet answered
    pub fn in_flight(&self) -> usize {
        self.shared.inner.lock().waiting.len()
    }

    /// Protocol in use
    pub fn protocol(&self) -> ProtocolVersion {
        self.shared.inner.lock().protocol
    }

    pub(crate) fn set_protocol(&self, protocol: ProtocolVersion) {
        self.shared.inner.lock().protocol = protocol;
    }

    /// Whether the connection has active subscriptions
    pub fn is_subscriber(&self) -> bool {
        self.shared.inner.lock().subscriber
    }

    /// Node this connection talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Process-unique id, for logs
    pub fn id(&self) -> u64 {
        self.shared.id
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    /// Queue waiters and hand bytes to the writer under one lock, so that
    /// queue order always equals wire order.
    fn enqueue(&self, bytes: Bytes, expected: &[usize]) -> RedisResult<Vec<ReplyRx>> {
        let mut inner = self.inner.lock();
        match inner.state {
            ConnectionState::Connecting | ConnectionState::Ready => {}
            ConnectionState::Closing | ConnectionState::Failed => {
                return Err(RedisError::ConnectionClosed)
            }
        }
        if inner.waiting.len() + expected.len() > self.max_waiting_handlers {
            return Err(RedisError::Backpressure {
                max_waiting_handlers: self.max_waiting_handlers,
            });
        }
        let writer = inner.writer.as_ref().ok_or(RedisError::ConnectionClosed)?;
        writer.send(bytes).map_err(|_| RedisError::ConnectionClosed)?;

        let mut receivers = Vec::with_capacity(expected.len());
        for &confirmations in expected {
            let (tx, rx) = oneshot::channel();
            inner.waiting.push_back(Waiter {
                tx,
                confirmations,
                collected: Vec::new(),
            });
            receivers.push(rx);
        }
        Ok(receivers)
    }

    /// Route one decoded frame
    fn dispatch(&self, frame: RedisResult<Response>) {
        let mut inner = self.inner.lock();

        if let Ok(reply) = &frame {
            match classify(reply, &inner) {
                Frame::Reply => {}
                Frame::Message => {
                    let handler = inner.push_handler.clone();
                    drop(inner);
                    self.deliver_push(handler, frame);
                    return;
                }
                Frame::Confirmation(active) => {
                    inner.subscriber = active > 0;
                    let expects = inner
                        .waiting
                        .front()
                        .is_some_and(|w| w.confirmations > 0);
                    if !expects {
                        let handler = inner.push_handler.clone();
                        drop(inner);
                        self.deliver_push(handler, frame);
                        return;
                    }
                    if let (Some(waiter), Ok(reply)) = (inner.waiting.front_mut(), &frame) {
                        waiter.collected.push(reply.clone());
                        if waiter.collected.len() < waiter.confirmations {
                            return;
                        }
                    }
                    if let Some(mut waiter) = inner.waiting.pop_front() {
                        let reply = if waiter.collected.len() == 1 {
                            waiter.collected.remove(0)
                        } else {
                            Response::Array(std::mem::take(&mut waiter.collected))
                        };
                        let _ = waiter.tx.send(Ok(reply));
                    }
                    return;
                }
            }
        }

        match inner.waiting.pop_front() {
            Some(waiter) => {
                let _ = waiter.tx.send(frame);
            }
            None => {
                let handler = inner.push_handler.clone();
                drop(inner);
                self.deliver_push(handler, frame);
            }
        }
    }

    fn deliver_push(&self, handler: Option<PushHandler>, frame: RedisResult<Response>) {
        match (handler, frame) {
            (Some(handler), Ok(reply)) => handler(reply),
            (None, Ok(reply)) => debug!(
                "Connection {}: dropping unsolicited {} frame",
                self.id,
                reply.kind()
            ),
            (_, Err(e)) => warn!("Connection {}: unsolicited malformed frame: {}", self.id, e),
        }
    }

    /// Stop accepting requests and fail everything in flight
    fn shutdown(&self, state: ConnectionState, err: &RedisError) {
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Closing && inner.state != ConnectionState::Failed {
                if state == ConnectionState::Failed {
                    warn!("Connection {} to {} failed: {}", self.id, self.endpoint, err);
                }
                inner.state = state;
            }
            inner.writer = None;
            std::mem::take(&mut inner.waiting)
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(err.duplicate()));
        }
    }
}

enum Frame {
    Reply,
    Message,
    /// Subscription change carrying the number of active subscriptions
    Confirmation(i64),
}

const SUBSCRIPTION_KINDS: &[&str] = &[
    "subscribe",
    "unsubscribe",
    "psubscribe",
    "punsubscribe",
    "ssubscribe",
    "sunsubscribe",
];
const MESSAGE_KINDS: &[&str] = &["message", "pmessage", "smessage"];

fn classify(reply: &Response, inner: &Inner) -> Frame {
    let (items, pushed) = match reply {
        Response::Push(items) => (items, true),
        Response::Array(items) if inner.protocol == ProtocolVersion::Resp2 => (items, false),
        _ => return Frame::Reply,
    };
    let Some(kind) = items.first() else {
        return if pushed { Frame::Message } else { Frame::Reply };
    };

    if SUBSCRIPTION_KINDS.iter().any(|k| kind.eq_text(k)) {
        let expects = inner.waiting.front().is_some_and(|w| w.confirmations > 0);
        if pushed || expects || inner.subscriber {
            let active = items.get(2).and_then(|n| n.as_int().ok()).unwrap_or(0);
            return Frame::Confirmation(active);
        }
        return Frame::Reply;
    }
    if pushed || (inner.subscriber && MESSAGE_KINDS.iter().any(|k| kind.eq_text(k))) {
        return Frame::Message;
    }
    Frame::Reply
}

/// Confirmations the server sends for a (un)subscribe request
fn confirmations(request: &Request) -> usize {
    if request.command().is_pubsub() {
        request.arguments().len().max(1)
    } else {
        0
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Bytes>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        let written = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            shared.shutdown(ConnectionState::Failed, &RedisError::Io(e));
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(mut reader: R, mut decoder: Decoder, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    loop {
        decoder.buffer_mut().reserve(4096);
        match reader.read_buf(decoder.buffer_mut()).await {
            Ok(0) => {
                shared.shutdown(ConnectionState::Failed, &RedisError::ConnectionClosed);
                return;
            }
            Ok(_) => loop {
                match decoder.decode_next() {
                    Ok(Some(frame)) => shared.dispatch(frame),
                    Ok(None) => break,
                    Err(e) => {
                        shared.shutdown(ConnectionState::Failed, &e);
                        return;
                    }
                }
            },
            Err(e) => {
                shared.shutdown(ConnectionState::Failed, &RedisError::Io(e));
                return;
            }
        }
    }
}

/// Opens connections to endpoints.
///
/// Pools and topology clients only ever create connections through this
/// seam, which lets callers layer extra setup (`READONLY`, tracking) or
/// substitute transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a ready connection to `endpoint`
    async fn connect(&self, endpoint: &Endpoint) -> RedisResult<Connection>;
}

/// Plain TCP connector
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: ConnectionConfig,
    select_db: bool,
}

impl TcpConnector {
    /// Connector selecting the configured database
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            select_db: true,
        }
    }

    /// Connector for cluster nodes, which have no databases
    pub fn for_cluster(config: ConnectionConfig) -> Self {
        Self {
            config,
            select_db: false,
        }
    }

    /// Configuration used for new connections
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> RedisResult<Connection> {
        let addr = endpoint.address();
        debug!("Connecting to Redis at {}", addr);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(|e| RedisError::Connection(format!("Failed to connect to {addr}: {e}")))?;
        stream.set_nodelay(true)?;

        let stream = match self.config.tcp_keepalive {
            Some(keepalive) => {
                let socket = socket2::Socket::from(stream.into_std()?);
                socket
                    .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(keepalive))
                    .map_err(|e| {
                        RedisError::Connection(format!("Failed to set TCP keepalive: {e}"))
                    })?;
                TcpStream::from_std(socket.into())?
            }
            None => stream,
        };

        Connection::establish(stream, endpoint.clone(), &self.config, self.select_db).await
    }
}
