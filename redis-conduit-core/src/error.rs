//! Error types for Redis operations

use std::io;
use thiserror::Error;

/// Result type for Redis operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Comprehensive error type for Redis operations
#[derive(Error, Debug)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unrecoverable protocol error; the connection that produced it is torn down
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Reply nested deeper than the configured `max_nested_arrays`
    #[error("Protocol error: reply nesting exceeds limit of {limit}")]
    NestingTooDeep {
        /// Configured nesting limit
        limit: usize,
    },

    /// A single reply frame could not be interpreted; the connection stays usable
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Server returned an error
    #[error("Server error: {0}")]
    Server(String),

    /// MOVED redirect in cluster mode
    #[error("MOVED redirect: slot {slot} to {host}:{port}")]
    Moved {
        /// Slot number that was moved
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// ASK redirect in cluster mode
    #[error("ASK redirect: slot {slot} to {host}:{port}")]
    Ask {
        /// Slot number for temporary redirect
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// Keys of one request (or batch group) span more than one cluster node
    #[error("CROSSSLOT: {0}")]
    CrossSlot(String),

    /// Cluster asked to retry later, typically during resharding
    #[error("TRYAGAIN: {0}")]
    TryAgain(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection was closed while the request was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cluster error
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Sentinel error
    #[error("Sentinel error: {0}")]
    Sentinel(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The pool waiter queue is full
    #[error("Pool exhausted: {max_waiting} lease requests already waiting")]
    PoolExhausted {
        /// Configured waiter bound
        max_waiting: usize,
    },

    /// Too many requests are in flight on one connection
    #[error("Backpressure: {max_waiting_handlers} requests already in flight")]
    Backpressure {
        /// Configured in-flight bound
        max_waiting_handlers: usize,
    },

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({0}) exceeded")]
    MaxRetriesExceeded(usize),

    /// Unexpected response from server
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Request rejected before reaching the wire
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RedisError {
    /// Classify an error reply (`-...`) sent by the server.
    ///
    /// Cluster redirects and the cluster-specific `CROSSSLOT`/`TRYAGAIN`
    /// replies are matched by exact prefix; everything else becomes
    /// [`RedisError::Server`].
    #[must_use]
    pub fn from_server_message(msg: &str) -> Self {
        if let Some(redirect) = Self::parse_redirect(msg) {
            return redirect;
        }
        if msg.starts_with("CROSSSLOT") {
            return Self::CrossSlot(msg.to_string());
        }
        if msg.starts_with("TRYAGAIN") {
            return Self::TryAgain(msg.to_string());
        }
        Self::Server(msg.to_string())
    }

    /// Parse a Redis error message to check for MOVED or ASK redirects
    #[must_use]
    pub fn parse_redirect(msg: &str) -> Option<Self> {
        if let Some(moved) = msg.strip_prefix("MOVED ") {
            let (slot, host, port) = parse_redirect_target(moved)?;
            return Some(Self::Moved { slot, host, port });
        }
        if let Some(ask) = msg.strip_prefix("ASK ") {
            let (slot, host, port) = parse_redirect_target(ask)?;
            return Some(Self::Ask { slot, host, port });
        }
        None
    }

    /// Check if this error is a redirect (MOVED or ASK)
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        matches!(self, Self::Moved { .. } | Self::Ask { .. })
    }

    /// Get the target address from a redirect error
    #[must_use]
    pub fn redirect_target(&self) -> Option<(String, u16)> {
        match self {
            Self::Moved { host, port, .. } | Self::Ask { host, port, .. } => {
                Some((host.clone(), *port))
            }
            _ => None,
        }
    }

    /// Get the slot number from a redirect error
    #[must_use]
    pub const fn redirect_slot(&self) -> Option<u16> {
        match self {
            Self::Moved { slot, .. } | Self::Ask { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// The server rejected the request itself ("server said no").
    ///
    /// These are business-logic failures: inspecting them is safe and
    /// retrying the same request will usually fail the same way.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Server(_) | Self::Auth(_))
    }

    /// The connection that produced this error can no longer be used.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Protocol(_)
                | Self::NestingTooDeep { .. }
                | Self::Connection(_)
                | Self::ConnectionClosed
        )
    }

    /// A client, network or topology failure the caller may choose to retry.
    ///
    /// Retrying non-idempotent writes remains the caller's decision.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Connection(_)
                | Self::ConnectionClosed
                | Self::Timeout
                | Self::TryAgain(_)
                | Self::PoolExhausted { .. }
                | Self::Backpressure { .. }
                | Self::MaxRetriesExceeded(_)
        )
    }

    /// First word of a server error reply, e.g. `WRONGTYPE` or `ERR`.
    #[must_use]
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Self::Server(msg) => msg.split_whitespace().next(),
            _ => None,
        }
    }

    /// Rebuild an equivalent error for fan-out to several waiters.
    ///
    /// `io::Error` is not `Clone`, so IO failures are flattened into
    /// [`RedisError::Connection`] carrying the original message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Connection(e.to_string()),
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::NestingTooDeep { limit } => Self::NestingTooDeep { limit: *limit },
            Self::MalformedReply(m) => Self::MalformedReply(m.clone()),
            Self::Server(m) => Self::Server(m.clone()),
            Self::Moved { slot, host, port } => Self::Moved {
                slot: *slot,
                host: host.clone(),
                port: *port,
            },
            Self::Ask { slot, host, port } => Self::Ask {
                slot: *slot,
                host: host.clone(),
                port: *port,
            },
            Self::CrossSlot(m) => Self::CrossSlot(m.clone()),
            Self::TryAgain(m) => Self::TryAgain(m.clone()),
            Self::Connection(m) => Self::Connection(m.clone()),
            Self::ConnectionClosed => Self::ConnectionClosed,
            Self::Timeout => Self::Timeout,
            Self::Type(m) => Self::Type(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Cluster(m) => Self::Cluster(m.clone()),
            Self::Sentinel(m) => Self::Sentinel(m.clone()),
            Self::Auth(m) => Self::Auth(m.clone()),
            Self::PoolExhausted { max_waiting } => Self::PoolExhausted {
                max_waiting: *max_waiting,
            },
            Self::Backpressure {
                max_waiting_handlers,
            } => Self::Backpressure {
                max_waiting_handlers: *max_waiting_handlers,
            },
            Self::MaxRetriesExceeded(n) => Self::MaxRetriesExceeded(*n),
            Self::UnexpectedResponse(m) => Self::UnexpectedResponse(m.clone()),
            Self::InvalidArgument(m) => Self::InvalidArgument(m.clone()),
        }
    }
}

/// `<slot> <host>:<port>`; the host may itself contain colons (IPv6).
fn parse_redirect_target(rest: &str) -> Option<(u16, String, u16)> {
    let mut parts = rest.split_whitespace();
    let slot = parts.next()?.parse::<u16>().ok()?;
    let (host, port) = parts.next()?.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((slot, host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moved() {
        let err = RedisError::from_server_message("MOVED 3999 127.0.0.1:6381");
        assert!(err.is_redirect());
        assert_eq!(err.redirect_slot(), Some(3999));
        assert_eq!(
            err.redirect_target(),
            Some(("127.0.0.1".to_string(), 6381))
        );
        assert!(matches!(err, RedisError::Moved { .. }));
    }

    #[test]
    fn test_parse_ask_ipv6() {
        let err = RedisError::from_server_message("ASK 12 ::1:7000");
        assert!(matches!(
            err,
            RedisError::Ask { slot: 12, ref host, port: 7000 } if host == "::1"
        ));
    }

    #[test]
    fn test_malformed_redirect_is_server_error() {
        let err = RedisError::from_server_message("MOVED notaslot host:1");
        assert!(matches!(err, RedisError::Server(_)));
        assert!(err.is_server_error());
    }

    #[test]
    fn test_cluster_error_classes() {
        assert!(matches!(
            RedisError::from_server_message("CROSSSLOT Keys in request don't hash to the same slot"),
            RedisError::CrossSlot(_)
        ));
        assert!(matches!(
            RedisError::from_server_message("TRYAGAIN Multiple keys request during rehashing of slot"),
            RedisError::TryAgain(_)
        ));
    }

    #[test]
    fn test_server_code() {
        let err = RedisError::from_server_message(
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        );
        assert_eq!(err.server_code(), Some("WRONGTYPE"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_duplicate_flattens_io() {
        let err = RedisError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(matches!(err.duplicate(), RedisError::Connection(ref m) if m == "pipe"));
        assert!(err.is_fatal());
    }
}
