//! Performance benchmarks for gelfstream

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gelfstream::config::{CompressionMode, DatagramConfig};
use gelfstream::transport::chunk::{encode_chunk_into, encode_chunks, new_message_id, ChunkPlan};
use gelfstream::transport::compression::compress;
use gelfstream::transport::{DatagramTransport, GelfFrameCodec};
use gelfstream::types::{GelfMessage, LogLevel};
use gelfstream::ErrorReporter;
use serde_json::Value;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::Runtime;

fn sample_message(body_len: usize) -> GelfMessage {
    GelfMessage::new("bench-host", "Benchmark message")
        .with_level(LogLevel::Info)
        .with_full_message("x".repeat(body_len))
        .with_field("request_id", Value::from("req_abcdef"))
        .with_field("user_id", Value::from(67890))
}

/// Benchmark chunk planning across payload sizes
fn bench_chunk_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_planning");

    for payload_len in [1_000usize, 10_000, 100_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            payload_len,
            |b, &len| b.iter(|| ChunkPlan::for_payload(len, 1400)),
        );
    }

    group.finish();
}

/// Benchmark chunk encoding with a reused buffer versus one buffer per chunk
fn bench_chunk_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_encoding");

    for kb in [8usize, 64, 160].iter() {
        let payload = vec![0x5au8; kb * 1024];
        let plan = match ChunkPlan::for_payload(payload.len(), 1400) {
            Ok(Some(plan)) => plan,
            _ => continue,
        };
        let id = new_message_id();
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::new("reused_buffer", kb), &payload, |b, payload| {
            let mut buf = vec![0u8; plan.chunk_size];
            b.iter(|| {
                let mut total = 0;
                for seq in 0..plan.count {
                    total += encode_chunk_into(&mut buf, payload, &plan, &id, seq).len();
                }
                total
            })
        });

        group.bench_with_input(BenchmarkId::new("fresh_buffers", kb), &payload, |b, payload| {
            b.iter(|| encode_chunks(payload, &plan, &id))
        });
    }

    group.finish();
}

/// Benchmark message serialization for both wire formats
fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    let simple = GelfMessage::new("bench-host", "Test log message");
    let complex = sample_message(512);

    group.bench_function("json_simple", |b| b.iter(|| simple.to_json_bytes()));
    group.bench_function("json_complex", |b| b.iter(|| complex.to_json_bytes()));
    group.bench_function("tcp_frame_complex", |b| {
        b.iter(|| GelfFrameCodec::frame(&complex))
    });

    group.finish();
}

/// Benchmark deflate compression of serialized messages
fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");

    for body_len in [256usize, 4096, 32_768].iter() {
        let payload = match sample_message(*body_len).to_json_bytes() {
            Ok(payload) => payload,
            Err(_) => continue,
        };
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(body_len),
            &payload,
            |b, payload| b.iter(|| compress(CompressionMode::Deflate, payload.clone())),
        );
    }

    group.finish();
}

/// Benchmark end-to-end UDP delivery to a loopback collector
fn bench_udp_delivery(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (transport, _collector) = rt.block_on(async {
        let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = collector.local_addr().unwrap().port();
        let config = DatagramConfig {
            compression: CompressionMode::None,
            ..DatagramConfig::new("127.0.0.1", port)
        };
        let transport = DatagramTransport::new(config, ErrorReporter::discard()).unwrap();
        transport.connect().await.unwrap();
        (transport, collector)
    });

    let mut group = c.benchmark_group("udp_delivery");
    group.measurement_time(Duration::from_secs(10));

    for body_len in [100usize, 10_000, 60_000].iter() {
        let message = sample_message(*body_len);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(body_len),
            &message,
            |b, message| {
                b.to_async(&rt)
                    .iter(|| async { transport.deliver(message).await.unwrap() })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chunk_planning,
    bench_chunk_encoding,
    bench_serialization,
    bench_compression,
    bench_udp_delivery
);
criterion_main!(benches);
