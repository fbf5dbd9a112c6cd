//! Benchmarks for the checksum engine

use bmcfw_checksum::prelude::*;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn sample(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn bench_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc");

    for size in [100, 1000, 10000, 100000].iter() {
        let data = sample(*size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("crc32", size), &data, |b, data| {
            b.iter(|| crc32(data));
        });
        group.bench_with_input(BenchmarkId::new("crc32_ifx", size), &data, |b, data| {
            b.iter(|| crc32_ifx(data));
        });
        group.bench_with_input(BenchmarkId::new("crc16", size), &data, |b, data| {
            b.iter(|| crc16(data));
        });
        group.bench_with_input(BenchmarkId::new("crc16_table", size), &data, |b, data| {
            b.iter(|| crc16_table(data));
        });
        group.bench_with_input(BenchmarkId::new("crc8", size), &data, |b, data| {
            b.iter(|| crc8(data, 0));
        });
    }

    group.finish();
}

fn bench_block_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_fingerprint");
    let block = sample(64 * 1024);

    group.throughput(Throughput::Bytes(block.len() as u64));
    for kind in [FingerprintKind::Strong, FingerprintKind::Simple] {
        group.bench_with_input(
            BenchmarkId::new("compute", format!("{kind:?}")),
            &block,
            |b, block| {
                b.iter(|| BlockFingerprint::compute(kind, block));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_crc, bench_block_fingerprint);
criterion_main!(benches);
