use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use redis_conduit::cluster::calculate_slot;
use redis_conduit::{Decoder, Encoder, Request, Response};

fn bench_encode_request(c: &mut Criterion) {
    c.bench_function("encode_get", |b| {
        let request = Request::cmd("GET").arg("mykey");
        b.iter(|| black_box(Encoder::encode(black_box(&request))));
    });

    c.bench_function("encode_set_with_options", |b| {
        let request = Request::cmd("SET")
            .arg("user:1000:profile")
            .arg("some moderately sized value")
            .arg("EX")
            .arg(3600);
        b.iter(|| black_box(Encoder::encode(black_box(&request))));
    });

    let mut group = c.benchmark_group("encode_batch");
    for size in [10, 100, 1000] {
        let requests: Vec<Request> = (0..size)
            .map(|i| Request::cmd("INCR").arg(format!("counter:{i}")))
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &requests, |b, requests| {
            b.iter(|| black_box(Encoder::encode_batch(black_box(requests))));
        });
    }
    group.finish();
}

fn wire(value: &Response) -> Bytes {
    let mut buf = BytesMut::new();
    Encoder::encode_value(value, &mut buf);
    buf.freeze()
}

fn decode(data: &[u8]) -> usize {
    let mut decoder = Decoder::new(32);
    let mut frames = 0;
    decoder
        .decode_chunk(data, |_| frames += 1)
        .expect("valid input");
    frames
}

fn bench_decode(c: &mut Criterion) {
    let simple = wire(&Response::Simple("OK".into()));
    c.bench_function("decode_simple_string", |b| {
        b.iter(|| black_box(decode(black_box(&simple))));
    });

    let bulk = wire(&Response::Bulk(Bytes::from(vec![b'x'; 4096])));
    c.bench_function("decode_bulk_4k", |b| {
        b.iter(|| black_box(decode(black_box(&bulk))));
    });

    let mut group = c.benchmark_group("decode_array");
    for size in [10, 100, 1000] {
        let array = wire(&Response::Array(
            (0..size)
                .map(|i| Response::Bulk(Bytes::from(format!("member:{i}"))))
                .collect(),
        ));
        group.throughput(Throughput::Bytes(array.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &array, |b, array| {
            b.iter(|| black_box(decode(black_box(array))));
        });
    }
    group.finish();

    let map = wire(&Response::Map(
        (0..50)
            .map(|i| {
                (
                    Response::Bulk(Bytes::from(format!("field:{i}"))),
                    Response::Integer(i),
                )
            })
            .collect(),
    ));
    c.bench_function("decode_map_50", |b| {
        b.iter(|| black_box(decode(black_box(&map))));
    });
}

fn bench_decode_fragmented(c: &mut Criterion) {
    let stream: Bytes = {
        let mut buf = BytesMut::new();
        for i in 0..100 {
            Encoder::encode_value(&Response::Bulk(Bytes::from(format!("value-{i}"))), &mut buf);
        }
        buf.freeze()
    };
    c.bench_function("decode_100_frames_in_16_byte_chunks", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new(32);
            let mut frames = 0;
            for chunk in stream.chunks(16) {
                decoder
                    .decode_chunk(chunk, |_| frames += 1)
                    .expect("valid input");
            }
            black_box(frames)
        });
    });
}

fn bench_decode_large_array_chunked(c: &mut Criterion) {
    let array = wire(&Response::Array(
        (0..100_000)
            .map(|i| Response::Bulk(Bytes::from(format!("member:{i}"))))
            .collect(),
    ));
    let mut group = c.benchmark_group("decode_100k_array");
    group.throughput(Throughput::Bytes(array.len() as u64));
    group.sample_size(20);
    group.bench_function("4k_chunks", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new(32);
            let mut frames = 0;
            for chunk in array.chunks(4096) {
                decoder
                    .decode_chunk(chunk, |_| frames += 1)
                    .expect("valid input");
            }
            black_box(frames)
        });
    });
    group.finish();
}

fn bench_key_slot(c: &mut Criterion) {
    c.bench_function("calculate_slot", |b| {
        b.iter(|| black_box(calculate_slot(black_box(b"user:1000:profile"))));
    });
    c.bench_function("calculate_slot_hash_tag", |b| {
        b.iter(|| black_box(calculate_slot(black_box(b"{user:1000}:profile"))));
    });
    c.bench_function("extract_keys_mset", |b| {
        let request = Request::cmd("MSET")
            .arg("a")
            .arg("1")
            .arg("b")
            .arg("2")
            .arg("c")
            .arg("3");
        b.iter(|| black_box(black_box(&request).keys().len()));
    });
}

criterion_group!(
    benches,
    bench_encode_request,
    bench_decode,
    bench_decode_fragmented,
    bench_decode_large_array_chunked,
    bench_key_slot
);
criterion_main!(benches);
