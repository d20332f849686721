//! RESP encoder
//!
//! Requests always go out as an array of bulk strings. Arbitrary values can
//! be encoded too, which is what a server (or a test double) writes back.

use crate::request::{Arg, Request};
use bytes::{BufMut, Bytes, BytesMut};
use redis_conduit_core::value::Response;

const CRLF: &[u8] = b"\r\n";

/// Encodes requests and values into RESP bytes
pub struct Encoder;

impl Encoder {
    /// Encode a request into a buffer
    pub fn encode_request(request: &Request, buf: &mut BytesMut) {
        let args = request.arguments();
        buf.reserve(encoded_len(request));

        buf.put_u8(b'*');
        buf.put_slice(request.argc().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(request.command().encoded());

        for arg in args {
            match arg {
                Arg::Bulk(data) => put_blob(buf, b'$', data),
                Arg::Null => buf.put_slice(b"$-1\r\n"),
            }
        }
    }

    /// Encode a single request
    pub fn encode(request: &Request) -> Bytes {
        let mut buf = BytesMut::with_capacity(encoded_len(request));
        Self::encode_request(request, &mut buf);
        buf.freeze()
    }

    /// Encode requests back to back, as one contiguous write
    pub fn encode_batch(requests: &[Request]) -> Bytes {
        let mut buf = BytesMut::with_capacity(requests.iter().map(encoded_len).sum());
        for request in requests {
            Self::encode_request(request, &mut buf);
        }
        buf.freeze()
    }

    /// Encode a reply value.
    ///
    /// `Null` is written in its RESP2 form (`$-1`) so that either protocol
    /// version can read it back.
    pub fn encode_value(value: &Response, buf: &mut BytesMut) {
        match value {
            Response::Simple(s) => put_line(buf, b'+', s.as_bytes()),
            Response::Error(e) => put_line(buf, b'-', e.as_bytes()),
            Response::Integer(i) => put_line(buf, b':', i.to_string().as_bytes()),
            Response::Double(d) => {
                let text = if d.is_nan() {
                    "nan".to_string()
                } else if d.is_infinite() {
                    if d.is_sign_positive() { "inf" } else { "-inf" }.to_string()
                } else {
                    d.to_string()
                };
                put_line(buf, b',', text.as_bytes());
            }
            Response::Boolean(b) => put_line(buf, b'#', if *b { b"t" } else { b"f" }),
            Response::BigNumber(n) => put_line(buf, b'(', n.as_bytes()),
            Response::Bulk(data) => put_blob(buf, b'$', data),
            Response::Verbatim(data) => {
                buf.put_u8(b'=');
                buf.put_slice((data.len() + 4).to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(b"txt:");
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Response::Array(items) => put_items(buf, b'*', items),
            Response::Set(items) => put_items(buf, b'~', items),
            Response::Push(items) => put_items(buf, b'>', items),
            Response::Map(pairs) => {
                put_line(buf, b'%', pairs.len().to_string().as_bytes());
                for (k, v) in pairs {
                    Self::encode_value(k, buf);
                    Self::encode_value(v, buf);
                }
            }
            Response::Null => buf.put_slice(b"$-1\r\n"),
        }
    }
}

fn encoded_len(request: &Request) -> usize {
    let args: usize = request
        .arguments()
        .iter()
        .map(|a| a.as_bytes().len() + 16)
        .sum();
    16 + request.command().encoded().len() + args
}

fn put_line(buf: &mut BytesMut, prefix: u8, line: &[u8]) {
    buf.put_u8(prefix);
    buf.put_slice(line);
    buf.put_slice(CRLF);
}

fn put_blob(buf: &mut BytesMut, prefix: u8, data: &[u8]) {
    put_line(buf, prefix, data.len().to_string().as_bytes());
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

fn put_items(buf: &mut BytesMut, prefix: u8, items: &[Response]) {
    put_line(buf, prefix, items.len().to_string().as_bytes());
    for item in items {
        Encoder::encode_value(item, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Decoder;

    #[test]
    fn test_encode_command() {
        let req = Request::cmd("GET").arg("mykey");
        assert_eq!(&Encoder::encode(&req)[..], b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n");
    }

    #[test]
    fn test_encode_arguments() {
        let req = Request::cmd("SET")
            .arg(b"k".as_slice())
            .arg(10i64)
            .arg(true)
            .arg(None::<&str>);
        assert_eq!(
            &Encoder::encode(&req)[..],
            b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\n10\r\n$1\r\n1\r\n$-1\r\n"
        );
    }

    #[test]
    fn test_encode_batch_is_concatenation() {
        let a = Request::cmd("PING");
        let b = Request::cmd("ECHO").arg("hi");
        let batch = Encoder::encode_batch(&[a.clone(), b.clone()]);
        let mut expected = Encoder::encode(&a).to_vec();
        expected.extend_from_slice(&Encoder::encode(&b));
        assert_eq!(batch.to_vec(), expected);
    }

    #[test]
    fn test_value_round_trip() {
        let values = vec![
            Response::Simple("OK".into()),
            Response::Error("ERR nope".into()),
            Response::Integer(-7),
            Response::Bulk(Bytes::from_static(b"bin\r\nary")),
            Response::Null,
            Response::Array(vec![
                Response::Integer(1),
                Response::Array(vec![Response::from("nested"), Response::Null]),
            ]),
            Response::Double(2.5),
            Response::Boolean(false),
            Response::BigNumber("-123456789012345678901234567890".into()),
            Response::Verbatim(Bytes::from_static(b"hello")),
            Response::Map(vec![(Response::from("k"), Response::Integer(1))]),
            Response::Set(vec![Response::from("m")]),
            Response::Push(vec![Response::from("invalidate"), Response::Null]),
        ];
        for value in values {
            let mut buf = BytesMut::new();
            Encoder::encode_value(&value, &mut buf);
            let mut decoder = Decoder::new(8);
            decoder.feed(&buf);
            let decoded = decoder.decode_next().unwrap().unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(decoder.buffered(), 0);
        }
    }
}
