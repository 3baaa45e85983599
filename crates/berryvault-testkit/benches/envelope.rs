//! Envelope encryption throughput under plain and device-sealed keys.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use berryvault_core::UserId;
use berryvault_testkit::VaultFixture;

fn bench_files(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let fixture = VaultFixture::memory();
    let envelope = fixture.vault.envelope();
    let owner = UserId(1);
    // Create the user key outside the measured loop.
    runtime
        .block_on(envelope.ensure_user_key(owner))
        .expect("user key");

    let mut group = c.benchmark_group("envelope_file");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = vec![0x5au8; size];
        let sealed = runtime
            .block_on(envelope.encrypt_file(&data, Some(owner)))
            .expect("encrypt");
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encrypt", size), &data, |b, data| {
            b.iter(|| runtime.block_on(envelope.encrypt_file(black_box(data), Some(owner))))
        });
        group.bench_with_input(BenchmarkId::new("decrypt", size), &sealed, |b, sealed| {
            b.iter(|| runtime.block_on(envelope.decrypt_file(black_box(sealed))))
        });
    }
    group.finish();
}

fn bench_values(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let fixture = VaultFixture::memory();
    let envelope = fixture.vault.envelope();
    let encrypted = runtime
        .block_on(envelope.encrypt_value("correct horse battery staple"))
        .expect("encrypt");

    c.bench_function("envelope_value_encrypt", |b| {
        b.iter(|| runtime.block_on(envelope.encrypt_value(black_box("correct horse battery staple"))))
    });
    c.bench_function("envelope_value_decrypt", |b| {
        b.iter(|| runtime.block_on(envelope.decrypt_value(black_box(&encrypted))))
    });
}

criterion_group!(benches, bench_files, bench_values);
criterion_main!(benches);
