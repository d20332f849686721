//! Streaming RESP2/RESP3 decoder
//!
//! Bytes are appended as they arrive and taken off the front one token
//! (a header line, a scalar or a length-prefixed blob) at a time.
//! Aggregates under construction live on an explicit stack, so a reply
//! spread over many reads is never re-parsed and nesting never recurses.
//! A frame is only returned once every byte of it has been seen, so chunk
//! boundaries never show through.

use bytes::{Bytes, BytesMut};
use redis_conduit_core::{
    error::{RedisError, RedisResult},
    value::Response,
};
use tracing::error;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Array,
    Set,
    Push,
    Map,
    Attribute,
}

impl Kind {
    fn from_type_byte(b: u8) -> Option<Self> {
        match b {
            b'*' => Some(Self::Array),
            b'~' => Some(Self::Set),
            b'>' => Some(Self::Push),
            b'%' => Some(Self::Map),
            b'|' => Some(Self::Attribute),
            _ => None,
        }
    }

    fn element_count(self, count: usize) -> RedisResult<usize> {
        match self {
            Self::Map | Self::Attribute => count.checked_mul(2).ok_or_else(|| {
                RedisError::Protocol(format!("map length out of range: {count}"))
            }),
            _ => Ok(count),
        }
    }

    /// Build the finished value; attributes annotate the next reply and are dropped
    fn finish(self, items: Vec<Response>) -> Option<Response> {
        Some(match self {
            Self::Array => Response::Array(items),
            Self::Set => Response::Set(items),
            Self::Push => Response::Push(items),
            Self::Map => {
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut flat = items.into_iter();
                while let (Some(k), Some(v)) = (flat.next(), flat.next()) {
                    pairs.push((k, v));
                }
                Response::Map(pairs)
            }
            Self::Attribute => return None,
        })
    }
}

/// An aggregate whose header has been read but not all of its elements
#[derive(Debug)]
struct Pending {
    kind: Kind,
    remaining: usize,
    items: Vec<Response>,
}

enum Token {
    Value(Response),
    /// Aggregate header; `None` is the `-1` null form
    Aggregate(Kind, Option<usize>),
}

/// Decodes a stream of reply bytes into [`Response`] frames
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_depth: usize,
    stack: Vec<Pending>,
    malformed: Option<String>,
    /// Bytes that must be buffered before the next token can complete
    wanted: usize,
    /// Offset already searched for CRLF in the current token
    scanned: usize,
    failed: bool,
}

impl Decoder {
    /// Create a decoder rejecting aggregates nested deeper than `max_nested_arrays`
    pub fn new(max_nested_arrays: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_depth: max_nested_arrays,
            stack: Vec::new(),
            malformed: None,
            wanted: 0,
            scanned: 0,
            failed: false,
        }
    }

    /// Append received bytes
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Buffer to read into directly (e.g. with `AsyncReadExt::read_buf`)
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether a fatal error has been hit
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Take the next complete frame off the buffer.
    ///
    /// `Ok(None)` means more bytes are needed. `Ok(Some(Err(_)))` is a frame
    /// whose content was malformed; it answers exactly one request and the
    /// stream stays usable. `Err(_)` is fatal: framing is lost and the
    /// decoder refuses further input.
    pub fn decode_next(&mut self) -> RedisResult<Option<RedisResult<Response>>> {
        if self.failed {
            return Err(RedisError::Protocol("decoder is in a failed state".into()));
        }
        match self.next_frame() {
            Ok(Some(value)) => Ok(Some(match self.malformed.take() {
                Some(msg) => Err(RedisError::MalformedReply(msg)),
                None => Ok(value),
            })),
            Ok(None) => Ok(None),
            Err(e) => {
                error!("Fatal RESP decode error: {}", e);
                self.failed = true;
                self.buf.clear();
                self.stack.clear();
                self.malformed = None;
                Err(e)
            }
        }
    }

    /// Feed a chunk and hand every frame it completes to `handler`.
    ///
    /// # Errors
    ///
    /// Returns the fatal error, after which the decoder is unusable.
    pub fn decode_chunk<F>(&mut self, chunk: &[u8], mut handler: F) -> RedisResult<()>
    where
        F: FnMut(RedisResult<Response>),
    {
        self.feed(chunk);
        while let Some(frame) = self.decode_next()? {
            handler(frame);
        }
        Ok(())
    }

    fn next_frame(&mut self) -> RedisResult<Option<Response>> {
        loop {
            let Some(token) = self.token()? else {
                return Ok(None);
            };
            let value = match token {
                Token::Value(value) => value,
                Token::Aggregate(Kind::Attribute, None) => continue,
                Token::Aggregate(_, None) => Response::Null,
                Token::Aggregate(kind, Some(count)) => {
                    if self.stack.len() + 1 > self.max_depth {
                        return Err(RedisError::NestingTooDeep {
                            limit: self.max_depth,
                        });
                    }
                    let remaining = kind.element_count(count)?;
                    if remaining > 0 {
                        self.stack.push(Pending {
                            kind,
                            remaining,
                            items: Vec::with_capacity(remaining.min(1024)),
                        });
                        continue;
                    }
                    match kind.finish(Vec::new()) {
                        Some(value) => value,
                        None => continue,
                    }
                }
            };
            if let Some(frame) = self.complete(value) {
                return Ok(Some(frame));
            }
        }
    }

    /// Attach a finished value to its parent, closing every aggregate it fills
    fn complete(&mut self, mut value: Response) -> Option<Response> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Some(value);
            };
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }
            let done = self.stack.pop()?;
            value = done.kind.finish(done.items)?;
        }
    }

    /// Take one complete token off the front of the buffer
    fn token(&mut self) -> RedisResult<Option<Token>> {
        if self.buf.is_empty() || self.buf.len() < self.wanted {
            return Ok(None);
        }
        let type_byte = self.buf[0];
        if !b"+-:,#(_$!=*~>%|".contains(&type_byte) {
            return Err(RedisError::Protocol(format!(
                "invalid RESP type byte: 0x{type_byte:02x}"
            )));
        }
        let Some(line_end) = self.find_crlf() else {
            return Ok(None);
        };

        if let Some(kind) = Kind::from_type_byte(type_byte) {
            let len = parse_length(&self.buf[1..line_end])?;
            self.consume(line_end + CRLF.len());
            return Ok(Some(Token::Aggregate(kind, len)));
        }

        if matches!(type_byte, b'$' | b'!' | b'=') {
            let Some(len) = parse_length(&self.buf[1..line_end])? else {
                self.consume(line_end + CRLF.len());
                return Ok(Some(Token::Value(Response::Null)));
            };
            let start = line_end + CRLF.len();
            let end = start
                .checked_add(len)
                .and_then(|n| n.checked_add(CRLF.len()))
                .ok_or_else(|| RedisError::Protocol(format!("invalid length: {len}")))?;
            if self.buf.len() < end {
                self.wanted = end;
                return Ok(None);
            }
            if &self.buf[end - CRLF.len()..end] != CRLF {
                return Err(RedisError::Protocol(
                    "bulk payload not terminated by CRLF".into(),
                ));
            }
            let token = self.consume(end);
            let data = token.slice(start..end - CRLF.len());
            return Ok(Some(Token::Value(blob_value(type_byte, data))));
        }

        let token = self.consume(line_end + CRLF.len());
        let value = self.scalar(type_byte, &token[1..line_end])?;
        Ok(Some(Token::Value(value)))
    }

    fn find_crlf(&mut self) -> Option<usize> {
        let from = self.scanned.max(1);
        match self.buf[from..].windows(2).position(|w| w == CRLF) {
            Some(offset) => Some(from + offset),
            None => {
                // a trailing CR may be completed by the next read
                self.scanned = self.buf.len().saturating_sub(1);
                None
            }
        }
    }

    fn consume(&mut self, n: usize) -> Bytes {
        self.wanted = 0;
        self.scanned = 0;
        self.buf.split_to(n).freeze()
    }

    /// Record a content error and keep parsing so framing stays intact
    fn poison(&mut self, msg: String) -> Response {
        self.malformed.get_or_insert(msg);
        Response::Null
    }

    fn scalar(&mut self, type_byte: u8, line: &[u8]) -> RedisResult<Response> {
        Ok(match type_byte {
            b'+' => match std::str::from_utf8(line) {
                Ok(s) => Response::Simple(s.to_string()),
                Err(e) => self.poison(format!("invalid UTF-8 in simple string: {e}")),
            },
            b'-' => Response::Error(String::from_utf8_lossy(line).into_owned()),
            b':' => match parse_int(line) {
                Some(i) => Response::Integer(i),
                None => self.poison(format!(
                    "invalid integer: {}",
                    String::from_utf8_lossy(line)
                )),
            },
            b',' => match parse_double(line) {
                Some(d) => Response::Double(d),
                None => self.poison(format!(
                    "invalid double: {}",
                    String::from_utf8_lossy(line)
                )),
            },
            b'#' => match line {
                b"t" => Response::Boolean(true),
                b"f" => Response::Boolean(false),
                other => self.poison(format!(
                    "invalid boolean: {}",
                    String::from_utf8_lossy(other)
                )),
            },
            b'(' => {
                let digits = line.strip_prefix(b"-").unwrap_or(line);
                if !digits.is_empty() && digits.iter().all(u8::is_ascii_digit) {
                    Response::BigNumber(String::from_utf8_lossy(line).into_owned())
                } else {
                    self.poison(format!(
                        "invalid big number: {}",
                        String::from_utf8_lossy(line)
                    ))
                }
            }
            _ => {
                if !line.is_empty() {
                    return Err(RedisError::Protocol("null frame with payload".into()));
                }
                Response::Null
            }
        })
    }
}

fn blob_value(type_byte: u8, data: Bytes) -> Response {
    match type_byte {
        b'!' => Response::Error(String::from_utf8_lossy(&data).into_owned()),
        b'=' if data.len() >= 4 && data[3] == b':' => Response::Verbatim(data.slice(4..)),
        b'=' => Response::Verbatim(data),
        _ => Response::Bulk(data),
    }
}

/// Declared length of a blob or aggregate; malformed lengths are fatal
fn parse_length(line: &[u8]) -> RedisResult<Option<usize>> {
    match parse_int(line) {
        Some(-1) => Ok(None),
        Some(n) if n >= 0 => usize::try_from(n)
            .map(Some)
            .map_err(|_| RedisError::Protocol(format!("length out of range: {n}"))),
        _ => Err(RedisError::Protocol(format!(
            "invalid length: {}",
            String::from_utf8_lossy(line)
        ))),
    }
}

fn parse_int(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse().ok()
}

fn parse_double(line: &[u8]) -> Option<f64> {
    match line {
        b"inf" | b"+inf" => Some(f64::INFINITY),
        b"-inf" => Some(f64::NEG_INFINITY),
        b"nan" | b"-nan" => Some(f64::NAN),
        _ => std::str::from_utf8(line).ok()?.parse().ok(),
    }
}
