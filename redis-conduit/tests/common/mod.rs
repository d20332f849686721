//! In-process Redis stand-in for integration tests
//!
//! Each server listens on an ephemeral loopback port, decodes requests with
//! the crate's own decoder and answers through a handler closure. Frames
//! can also be pushed to every open connection.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use redis_conduit::{Decoder, Encoder, Endpoint, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// What the server does with one request
pub enum Reply {
    /// Answer with this frame
    Value(Response),
    /// Never answer
    Silent,
    /// Built-in behavior for handshake commands, error otherwise
    Default,
}

impl From<Response> for Reply {
    fn from(value: Response) -> Self {
        Self::Value(value)
    }
}

pub type Handler = Arc<dyn Fn(&[String]) -> Reply + Send + Sync>;

#[derive(Default)]
struct State {
    log: Mutex<Vec<Vec<String>>>,
    connections: AtomicUsize,
    writers: Mutex<Vec<mpsc::UnboundedSender<Bytes>>>,
}

pub struct MockServer {
    pub port: u16,
    state: Arc<State>,
    task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());
        let handler: Handler = Arc::new(handler);

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&accept_state), Arc::clone(&handler)));
            }
        });
        Self { port, state, task }
    }

    /// Server answering from an in-memory key space
    pub async fn kv() -> Self {
        let store = Arc::new(Mutex::new(HashMap::<String, String>::new()));
        Self::start(move |args| kv_reply(&store, args)).await
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }

    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port)
    }

    /// Every request received so far, upper-cased command first
    pub fn log(&self) -> Vec<Vec<String>> {
        self.state.log.lock().clone()
    }

    /// Requests whose command is `name`
    pub fn count(&self, name: &str) -> usize {
        self.state
            .log
            .lock()
            .iter()
            .filter(|args| args.first().is_some_and(|c| c == name))
            .count()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Send `frame` to every open connection
    pub fn push(&self, frame: &Response) {
        let bytes = encode(frame);
        self.state
            .writers
            .lock()
            .retain(|tx| tx.send(bytes.clone()).is_ok());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<State>, handler: Handler) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    state.writers.lock().push(tx.clone());

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut decoder = Decoder::new(64);
    loop {
        match reader.read_buf(decoder.buffer_mut()).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        while let Ok(Some(Ok(frame))) = decoder.decode_next() {
            let args = to_args(&frame);
            state.log.lock().push(args.clone());
            let reply = match handler(&args) {
                Reply::Value(value) => Some(value),
                Reply::Silent => None,
                Reply::Default => Some(default_reply(&args)),
            };
            if let Some(reply) = reply {
                if tx.send(encode(&reply)).is_err() {
                    return;
                }
            }
        }
    }
}

fn to_args(frame: &Response) -> Vec<String> {
    let mut args: Vec<String> = frame
        .as_slice()
        .map(|items| items.iter().filter_map(|a| a.as_string().ok()).collect())
        .unwrap_or_default();
    if let Some(first) = args.first_mut() {
        *first = first.to_ascii_uppercase();
    }
    args
}

fn encode(frame: &Response) -> Bytes {
    let mut buf = BytesMut::new();
    Encoder::encode_value(frame, &mut buf);
    buf.freeze()
}

pub fn ok() -> Response {
    Response::Simple("OK".into())
}

pub fn bulk(text: &str) -> Response {
    Response::Bulk(Bytes::copy_from_slice(text.as_bytes()))
}

pub fn error(msg: &str) -> Response {
    Response::Error(msg.into())
}

/// Handshake and housekeeping commands
pub fn default_reply(args: &[String]) -> Response {
    match args.first().map(String::as_str) {
        Some("HELLO") => {
            let proto = args.get(1).and_then(|p| p.parse().ok()).unwrap_or(2);
            Response::Map(vec![
                (bulk("server"), bulk("redis")),
                (bulk("version"), bulk("7.2.0")),
                (bulk("proto"), Response::Integer(proto)),
            ])
        }
        Some("PING") => Response::Simple("PONG".into()),
        Some("AUTH" | "SELECT" | "READONLY" | "ASKING" | "CLIENT") => ok(),
        Some(other) => error(&format!("ERR unknown command '{other}'")),
        None => error("ERR empty request"),
    }
}

pub fn kv_reply(store: &Mutex<HashMap<String, String>>, args: &[String]) -> Reply {
    let mut store = store.lock();
    match (args.first().map(String::as_str), args.len()) {
        (Some("GET"), 2) => store
            .get(&args[1])
            .map_or(Response::Null, |v| bulk(v))
            .into(),
        (Some("SET"), 3) => {
            store.insert(args[1].clone(), args[2].clone());
            ok().into()
        }
        (Some("DEL"), n) if n > 1 => {
            let removed = args[1..].iter().filter(|k| store.remove(*k).is_some()).count();
            Response::Integer(removed as i64).into()
        }
        (Some("INCR"), 2) => {
            let next = store
                .get(&args[1])
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
                + 1;
            store.insert(args[1].clone(), next.to_string());
            Response::Integer(next).into()
        }
        (Some("ECHO"), 2) => bulk(&args[1]).into(),
        (Some("DBSIZE"), 1) => Response::Integer(store.len() as i64).into(),
        _ => Reply::Default,
    }
}

/// Client logs for failing tests; filter with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or a second has passed
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
