//! Benchmarks for topic matching, record codecs and relay latency.
//!
//! Run with: cargo bench -p giztoy-topicrelay

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicUsize, Ordering};

use giztoy_topicrelay::protocol::{self, Packet};
use giztoy_topicrelay::topic;
use giztoy_topicrelay::{Broker, BrokerConfig, Client, ClientConfig, Datagram, Publisher, Value};
use tokio::net::{TcpListener, UdpSocket};

/// Find an available port.
fn find_port() -> u16 {
    static PORT: AtomicUsize = AtomicUsize::new(19900);
    PORT.fetch_add(1, Ordering::SeqCst) as u16
}

fn bench_matches(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic_matches");
    let topic = "building/floor3/room12/sensors/temp";

    for pattern in [
        "building/floor3/room12/sensors/temp",
        "building/+/+/sensors/temp",
        "building/#",
        "other/+/room12/sensors/temp",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(pattern), pattern, |b, pattern| {
            b.iter(|| topic::matches(black_box(pattern), black_box(topic)));
        });
    }

    group.finish();
}

fn bench_packet_codec(c: &mut Criterion) {
    let source = "127.0.0.1:40000".parse().unwrap();
    let post = protocol::create_post(source, Datagram::new("sensors/temp", Value::float(-12.5, 1).unwrap()));
    let encoded = post.encode().unwrap();

    c.bench_function("post_encode", |b| {
        let mut buf = vec![0u8; protocol::PACKET_LEN];
        b.iter(|| black_box(&post).encode_into(&mut buf).unwrap());
    });

    c.bench_function("post_decode", |b| {
        b.iter(|| Packet::decode(black_box(&encoded)).unwrap());
    });

    let datagram = Datagram::new("sensors/name", Value::String("kitchen".to_string()))
        .encode()
        .unwrap();
    c.bench_function("datagram_decode", |b| {
        b.iter(|| Datagram::decode(black_box(&datagram)).unwrap());
    });
}

/// Publish one datagram and wait for its post.
fn bench_relay_latency(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let addr = format!("127.0.0.1:{}", find_port());

    let (mut client, publisher) = rt.block_on(async {
        let listener = TcpListener::bind(&addr).await.unwrap();
        let udp = UdpSocket::bind(&addr).await.unwrap();
        let broker = Broker::new(listener, udp, BrokerConfig::new()).unwrap();
        tokio::spawn(broker.run(tokio::io::empty()));

        let mut client = Client::connect(ClientConfig::new(&addr, "bench")).await.unwrap();
        client.subscribe("bench/+").await.unwrap();
        let publisher = Publisher::connect(&addr).await.unwrap();
        (client, publisher)
    });

    c.bench_function("relay_latency", |b| {
        b.iter(|| {
            rt.block_on(async {
                publisher.publish("bench/latency", Value::Int(1)).await.unwrap();
                client.recv().await.unwrap()
            })
        });
    });
}

criterion_group!(benches, bench_matches, bench_packet_codec, bench_relay_latency);
criterion_main!(benches);
