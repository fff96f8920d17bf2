//! Fan-out benchmarks for the Huddle hub.
//!
//! Measures the cost of applying one broadcast to rooms of various sizes.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use huddle_core::{Client, Hub, HubConfig, HubEvent, Message, NoopStore};
use huddle_protocol::codec;
use std::sync::Arc;
use tokio::sync::mpsc;

fn room_with_members(members: usize) -> (Hub, Vec<mpsc::Receiver<Bytes>>) {
    let (hub, _handle) = Hub::new(HubConfig::default(), Arc::new(NoopStore::new()));
    let receivers = (0..members)
        .map(|i| {
            let (client, rx) = Client::new("bench", format!("user-{i}"), 1024);
            hub.apply(HubEvent::Register(client));
            rx
        })
        .collect();
    (hub, receivers)
}

/// Benchmark a single broadcast fanned out to N members.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for members in [1usize, 10, 100, 1000] {
        let (hub, mut receivers) = room_with_members(members);
        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                hub.apply(HubEvent::Broadcast(Message::chat(
                    "bench",
                    "user-0",
                    black_box("hello, room"),
                )));
                for rx in &mut receivers {
                    let _ = rx.try_recv();
                }
            });
        });
    }

    group.finish();
}

/// Benchmark encoding a message once.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let small = Message::chat("bench", "alice", "x".repeat(64));
    group.throughput(Throughput::Bytes(64));
    group.bench_function("64B", |b| b.iter(|| codec::encode(black_box(&small))));

    let large = Message::chat("bench", "alice", "x".repeat(4096));
    group.throughput(Throughput::Bytes(4096));
    group.bench_function("4KB", |b| b.iter(|| codec::encode(black_box(&large))));

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_encode);
criterion_main!(benches);
