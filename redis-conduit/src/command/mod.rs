//! Command metadata
//!
//! Every request carries a [`Command`]: its name (with the wire encoding of
//! the name precomputed), arity and the positions of its key arguments.
//! Known commands come from a static catalog; anything else can be described
//! with the builder methods and sent the same way.

mod catalog;
mod keys;

use bytes::{BufMut, Bytes, BytesMut};
use lazy_static::lazy_static;
use redis_conduit_core::error::{RedisError, RedisResult};
use std::borrow::Cow;
use std::collections::HashMap;

pub use keys::KeyPattern;

lazy_static! {
    static ref CATALOG: HashMap<&'static str, Command> = catalog::ENTRIES
        .iter()
        .map(|entry| (entry.name, Command::from_entry(entry)))
        .collect();
}

/// Metadata of one Redis command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: Cow<'static, str>,
    encoded: Bytes,
    arity: i32,
    first_key: i32,
    last_key: i32,
    step: i32,
    read_only: bool,
    cluster_wide: bool,
    pubsub: bool,
    keys: KeyPattern,
}

impl Command {
    /// Describe a command that is not in the catalog.
    ///
    /// The result accepts any number of arguments and has no keys until
    /// configured otherwise, so it is routed to an arbitrary node.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        let encoded = encode_name(&name);
        Self {
            name,
            encoded,
            arity: -1,
            first_key: 0,
            last_key: 0,
            step: 0,
            read_only: false,
            cluster_wide: false,
            pubsub: false,
            keys: KeyPattern::Fixed,
        }
    }

    fn from_entry(entry: &catalog::Entry) -> Self {
        Self {
            name: Cow::Borrowed(entry.name),
            encoded: encode_name(entry.name),
            arity: entry.arity,
            first_key: entry.first_key,
            last_key: entry.last_key,
            step: entry.step,
            read_only: entry.flags & catalog::READONLY != 0,
            cluster_wide: entry.flags & catalog::CLUSTER_WIDE != 0,
            pubsub: entry.flags & catalog::PUBSUB != 0,
            keys: entry.keys,
        }
    }

    /// Look up a catalog command by name, ignoring ASCII case
    pub fn lookup(name: &str) -> Option<&'static Self> {
        if let Some(cmd) = CATALOG.get(name) {
            return Some(cmd);
        }
        CATALOG.get(name.to_ascii_uppercase().as_str())
    }

    /// Set the arity (negative means "at least `-arity`", the name included)
    #[must_use]
    pub const fn with_arity(mut self, arity: i32) -> Self {
        self.arity = arity;
        self
    }

    /// Set fixed key positions; `last_key` may count from the end (-1 = last)
    #[must_use]
    pub const fn with_keys(mut self, first_key: i32, last_key: i32, step: i32) -> Self {
        self.first_key = first_key;
        self.last_key = last_key;
        self.step = step;
        self
    }

    /// Set a keyword-scanning strategy for keys that move around
    #[must_use]
    pub const fn with_key_pattern(mut self, keys: KeyPattern) -> Self {
        self.keys = keys;
        self
    }

    /// Mark the command as read-only (eligible for replicas and caching)
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Mark the command as one that must run on every cluster master
    #[must_use]
    pub const fn cluster_wide(mut self, cluster_wide: bool) -> Self {
        self.cluster_wide = cluster_wide;
        self
    }

    /// Command name as sent on the wire
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `$<len>\r\n<name>\r\n`
    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    /// Declared arity
    pub const fn arity(&self) -> i32 {
        self.arity
    }

    /// Position of the first key (0 = none)
    pub const fn first_key(&self) -> i32 {
        self.first_key
    }

    /// Position of the last key, negative counts from the end
    pub const fn last_key(&self) -> i32 {
        self.last_key
    }

    /// Distance between consecutive keys
    pub const fn step(&self) -> i32 {
        self.step
    }

    /// Whether the command never writes
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether keys must be found by scanning for keywords
    pub const fn is_movable(&self) -> bool {
        !matches!(self.keys, KeyPattern::Fixed)
    }

    /// Whether the command addresses no key at all
    pub const fn is_keyless(&self) -> bool {
        self.first_key <= 0 && !self.is_movable()
    }

    /// Whether the command has to run on every master of a cluster
    pub const fn is_cluster_wide(&self) -> bool {
        self.cluster_wide
    }

    /// Whether the command enters or leaves subscriber mode
    pub const fn is_pubsub(&self) -> bool {
        self.pubsub
    }

    /// Keyword strategy used for movable keys
    pub const fn key_pattern(&self) -> KeyPattern {
        self.keys
    }

    /// Check an argument count (the command name included) against the arity.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::InvalidArgument`] when the count does not match.
    pub fn check_arity(&self, argc: usize) -> RedisResult<()> {
        let ok = match usize::try_from(self.arity) {
            Ok(exact) => argc == exact,
            Err(_) => argc >= self.arity.unsigned_abs() as usize,
        };
        if ok {
            Ok(())
        } else {
            Err(RedisError::InvalidArgument(format!(
                "wrong number of arguments for '{}' command",
                self.name
            )))
        }
    }
}

fn encode_name(name: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(name.len() + 16);
    buf.put_u8(b'$');
    buf.put_slice(name.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(name.as_bytes());
    buf.put_slice(b"\r\n");
    buf.freeze()
}
