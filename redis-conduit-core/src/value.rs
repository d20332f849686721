//! RESP (`REdis` Serialization Protocol) reply values

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;

/// A decoded reply frame.
///
/// `Map`, `Set` and `Push` only appear when RESP3 was negotiated; RESP2
/// servers send the same information as `Array`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Simple string: +OK\r\n
    Simple(String),
    /// Error: -ERR message\r\n (also RESP3 blob errors)
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Double: ,1.23\r\n
    Double(f64),
    /// Boolean: #t\r\n
    Boolean(bool),
    /// Big number: (3492890328409238509324850943850943825024385\r\n
    BigNumber(String),
    /// Bulk string: $6\r\nfoobar\r\n
    Bulk(Bytes),
    /// Verbatim string, without its three-letter format prefix
    Verbatim(Bytes),
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<Response>),
    /// Map: %1\r\n+key\r\n:1\r\n, pairs kept in wire order
    Map(Vec<(Response, Response)>),
    /// Set: ~2\r\n+a\r\n+b\r\n
    Set(Vec<Response>),
    /// Out-of-band push: >3\r\n+message\r\n...
    Push(Vec<Response>),
    /// Null bulk string, null array or RESP3 null
    Null,
}

impl Response {
    /// Short name of the variant, used in error messages
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::BigNumber(_) => "big-number",
            Self::Bulk(_) => "bulk",
            Self::Verbatim(_) => "verbatim",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Push(_) => "push",
            Self::Null => "null",
        }
    }

    /// Convert to a string if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a string.
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::Simple(s) | Self::BigNumber(s) => Ok(s.clone()),
            Self::Bulk(b) | Self::Verbatim(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Double(d) => Ok(d.to_string()),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to string",
                self.kind()
            ))),
        }
    }

    /// Convert to an integer if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an integer.
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::Boolean(b) => Ok(i64::from(*b)),
            Self::Simple(_) | Self::Bulk(_) | Self::BigNumber(_) => {
                let s = self.as_string()?;
                s.parse::<i64>()
                    .map_err(|e| RedisError::Type(format!("Cannot parse integer '{s}': {e}")))
            }
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to integer",
                self.kind()
            ))),
        }
    }

    /// Convert to a float if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a float.
    pub fn as_float(&self) -> RedisResult<f64> {
        match self {
            Self::Double(d) => Ok(*d),
            Self::Integer(i) => Ok(*i as f64),
            Self::Simple(_) | Self::Bulk(_) => {
                let s = self.as_string()?;
                s.parse::<f64>()
                    .map_err(|e| RedisError::Type(format!("Cannot parse float '{s}': {e}")))
            }
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to float",
                self.kind()
            ))),
        }
    }

    /// Convert to bytes if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to bytes.
    pub fn as_bytes(&self) -> RedisResult<Bytes> {
        match self {
            Self::Bulk(b) | Self::Verbatim(b) => Ok(b.clone()),
            Self::Simple(s) | Self::BigNumber(s) => Ok(Bytes::from(s.clone().into_bytes())),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to bytes",
                self.kind()
            ))),
        }
    }

    /// Borrow the elements of any sequence-shaped reply (`Array`, `Set`, `Push`)
    ///
    /// # Errors
    ///
    /// Returns an error for scalar replies.
    pub fn as_slice(&self) -> RedisResult<&[Self]> {
        match self {
            Self::Array(items) | Self::Set(items) | Self::Push(items) => Ok(items),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to array",
                self.kind()
            ))),
        }
    }

    /// Key/value pairs of a `Map`, or of a flat RESP2 array holding
    /// alternating keys and values.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply has no pair structure.
    pub fn to_pairs(&self) -> RedisResult<Vec<(Self, Self)>> {
        match self {
            Self::Map(pairs) => Ok(pairs.clone()),
            Self::Array(items) if items.len() % 2 == 0 => Ok(items
                .chunks(2)
                .map(|kv| (kv[0].clone(), kv[1].clone()))
                .collect()),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to key/value pairs",
                self.kind()
            ))),
        }
    }

    /// Look up a field by name in a `Map` or flat RESP2 field/value array
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.eq_text(name))
                .map(|(_, v)| v),
            Self::Array(items) => items
                .chunks_exact(2)
                .find(|kv| kv[0].eq_text(name))
                .map(|kv| &kv[1]),
            _ => None,
        }
    }

    /// Case-insensitive comparison of a textual reply with `text`
    #[must_use]
    pub fn eq_text(&self, text: &str) -> bool {
        match self {
            Self::Simple(s) => s.eq_ignore_ascii_case(text),
            Self::Bulk(b) | Self::Verbatim(b) => b.eq_ignore_ascii_case(text.as_bytes()),
            _ => false,
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check if this is an out-of-band push frame
    #[must_use]
    pub const fn is_push(&self) -> bool {
        matches!(self, Self::Push(_))
    }

    /// Extract error message if this is an error
    #[must_use]
    pub fn into_error(self) -> Option<String> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Turn an error reply into the matching [`RedisError`], pass anything
    /// else through.
    ///
    /// # Errors
    ///
    /// Returns the classified server error for `Error` replies.
    pub fn into_result(self) -> RedisResult<Self> {
        match self {
            Self::Error(msg) => Err(RedisError::from_server_message(&msg)),
            other => Ok(other),
        }
    }
}

impl From<String> for Response {
    fn from(s: String) -> Self {
        Self::Bulk(Bytes::from(s.into_bytes()))
    }
}

impl From<&str> for Response {
    fn from(s: &str) -> Self {
        Self::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Response {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<Vec<u8>> for Response {
    fn from(b: Vec<u8>) -> Self {
        Self::Bulk(Bytes::from(b))
    }
}

impl From<Bytes> for Response {
    fn from(b: Bytes) -> Self {
        Self::Bulk(b)
    }
}

impl From<Vec<Self>> for Response {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(items)
    }
}

impl TryFrom<Response> for String {
    type Error = RedisError;

    fn try_from(value: Response) -> Result<Self, Self::Error> {
        value.as_string()
    }
}

impl TryFrom<Response> for i64 {
    type Error = RedisError;

    fn try_from(value: Response) -> Result<Self, Self::Error> {
        value.as_int()
    }
}

impl TryFrom<Response> for f64 {
    type Error = RedisError;

    fn try_from(value: Response) -> Result<Self, Self::Error> {
        value.as_float()
    }
}

impl TryFrom<Response> for Bytes {
    type Error = RedisError;

    fn try_from(value: Response) -> Result<Self, Self::Error> {
        value.as_bytes()
    }
}

impl TryFrom<Response> for bool {
    type Error = RedisError;

    fn try_from(value: Response) -> Result<Self, Self::Error> {
        match value {
            Response::Boolean(b) => Ok(b),
            Response::Integer(1) => Ok(true),
            Response::Integer(0) => Ok(false),
            Response::Simple(ref s) if s == "OK" => Ok(true),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to bool",
                value.kind()
            ))),
        }
    }
}

impl<T> TryFrom<Response> for Option<T>
where
    T: TryFrom<Response, Error = RedisError>,
{
    type Error = RedisError;

    fn try_from(value: Response) -> Result<Self, Self::Error> {
        match value {
            Response::Null => Ok(None),
            other => T::try_from(other).map(Some),
        }
    }
}

impl<T> TryFrom<Response> for Vec<T>
where
    T: TryFrom<Response, Error = RedisError>,
{
    type Error = RedisError;

    fn try_from(value: Response) -> Result<Self, Self::Error> {
        match value {
            Response::Array(items) | Response::Set(items) | Response::Push(items) => {
                items.into_iter().map(T::try_from).collect()
            }
            Response::Null => Ok(Vec::new()),
            other => Err(RedisError::Type(format!(
                "Cannot convert {} to array",
                other.kind()
            ))),
        }
    }
}
