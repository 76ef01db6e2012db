//! Benchmark for round-trip call latency over the full transport.

use std::time::Duration;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use shmrpc::{Client, Service, status};

fn bench_call_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("shmrpc_call");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add_one_u32", |b| {
        let name = format!("shmrpc_bench_{}", std::process::id());
        let service = Service::new(&name);
        service.set_request_handler(|_, request| {
            let value = u32::from_le_bytes(request.try_into().expect("4-byte request"));
            (status::SUCCESS, (value + 1).to_le_bytes().to_vec())
        });
        service.start().unwrap();

        let client = Client::connect(&name).unwrap();
        for _ in 0..100 {
            client
                .call(1, 7, &0u32.to_le_bytes(), Duration::from_secs(1))
                .unwrap();
        }

        b.iter(|| {
            black_box(
                client
                    .call(
                        1,
                        7,
                        &black_box(41u32).to_le_bytes(),
                        Duration::from_secs(1),
                    )
                    .unwrap(),
            )
        });

        client.disconnect();
        service.stop();
    });

    group.finish();
}

criterion_group!(benches, bench_call_latency);
criterion_main!(benches);
