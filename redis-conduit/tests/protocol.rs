//! Codec behavior through the public encoder and decoder

use bytes::{Bytes, BytesMut};
use redis_conduit::{Decoder, Encoder, RedisError, Request, Response};

fn sample_frames() -> Vec<Response> {
    vec![
        Response::Simple("OK".into()),
        Response::Error("ERR boom".into()),
        Response::Integer(-42),
        Response::Bulk(Bytes::from_static(b"bin\r\nary\0")),
        Response::Bulk(Bytes::new()),
        Response::Null,
        Response::Array(vec![]),
        Response::Array(vec![
            Response::Integer(1),
            Response::Array(vec![Response::Bulk(Bytes::from_static(b"nested"))]),
        ]),
        Response::Double(1.5),
        Response::Boolean(true),
        Response::BigNumber("3492890328409238509324850943850943825024385".into()),
        Response::Verbatim(Bytes::from_static(b"some text")),
        Response::Map(vec![(
            Response::Simple("key".into()),
            Response::Set(vec![Response::Integer(1), Response::Integer(2)]),
        )]),
        Response::Push(vec![
            Response::Bulk(Bytes::from_static(b"invalidate")),
            Response::Array(vec![Response::Bulk(Bytes::from_static(b"k"))]),
        ]),
    ]
}

fn encode_all(frames: &[Response]) -> Bytes {
    let mut buf = BytesMut::new();
    for frame in frames {
        Encoder::encode_value(frame, &mut buf);
    }
    buf.freeze()
}

fn decode_in_chunks(wire: &[u8], mut sizes: impl Iterator<Item = usize>) -> Vec<Response> {
    let mut decoder = Decoder::new(32);
    let mut out = Vec::new();
    let mut rest = wire;
    while !rest.is_empty() {
        let n = sizes.next().unwrap_or(1).clamp(1, rest.len());
        let (chunk, tail) = rest.split_at(n);
        decoder
            .decode_chunk(chunk, |frame| out.push(frame.unwrap()))
            .unwrap();
        rest = tail;
    }
    assert_eq!(decoder.buffered(), 0);
    out
}

#[test]
fn test_stream_decodes_identically_for_any_chunking() {
    let frames = sample_frames();
    let wire = encode_all(&frames);

    let whole = decode_in_chunks(&wire, std::iter::once(wire.len()));
    assert_eq!(whole, frames);

    for size in [1, 2, 3, 7, 13, 64] {
        assert_eq!(
            decode_in_chunks(&wire, std::iter::repeat(size)),
            frames,
            "chunk size {size}"
        );
    }

    // irregular chunking from a fixed linear congruential sequence
    let mut state = 7u32;
    let sizes = std::iter::from_fn(move || {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        Some((state >> 16) as usize % 17 + 1)
    });
    assert_eq!(decode_in_chunks(&wire, sizes), frames);
}

#[test]
fn test_every_split_point_of_stream() {
    let frames = sample_frames();
    let wire = encode_all(&frames);
    for split in 1..wire.len() {
        let mut decoder = Decoder::new(32);
        let mut out = Vec::new();
        decoder
            .decode_chunk(&wire[..split], |f| out.push(f.unwrap()))
            .unwrap();
        decoder
            .decode_chunk(&wire[split..], |f| out.push(f.unwrap()))
            .unwrap();
        assert_eq!(out, frames, "split at {split}");
    }
}

#[test]
fn test_requests_decode_as_bulk_arrays() {
    let request = Request::cmd("set").arg("key").arg(b"\x00\xff".as_slice()).arg(12);
    let mut decoder = Decoder::new(8);
    decoder.feed(&Encoder::encode(&request));
    let frame = decoder.decode_next().unwrap().unwrap().unwrap();
    assert_eq!(
        frame,
        Response::Array(vec![
            Response::Bulk(Bytes::from_static(b"SET")),
            Response::Bulk(Bytes::from_static(b"key")),
            Response::Bulk(Bytes::from_static(b"\x00\xff")),
            Response::Bulk(Bytes::from_static(b"12")),
        ])
    );
}

#[test]
fn test_nesting_limit() {
    let mut nested = Response::Integer(1);
    for _ in 0..5 {
        nested = Response::Array(vec![nested]);
    }
    let mut buf = BytesMut::new();
    Encoder::encode_value(&nested, &mut buf);

    let mut within = Decoder::new(5);
    within.feed(&buf);
    assert_eq!(within.decode_next().unwrap().unwrap().unwrap(), nested);

    let mut beyond = Decoder::new(4);
    beyond.feed(&buf);
    assert!(matches!(
        beyond.decode_next(),
        Err(RedisError::NestingTooDeep { limit: 4 })
    ));
    assert!(beyond.is_failed());
}
