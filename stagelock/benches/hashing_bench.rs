//! Benchmarks for content fingerprinting.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagelock::core::HashAlgorithm;
use stagelock::hashing::{ContentHasher, FingerprintCache};

fn hashing_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let row = "1200,3,2,1995,250000\n";
    std::fs::write(dir.path().join("train.csv"), row.repeat(50_000)).unwrap();
    std::fs::create_dir(dir.path().join("features")).unwrap();
    for i in 0..32 {
        std::fs::write(dir.path().join(format!("features/part-{i}.csv")), row.repeat(500)).unwrap();
    }

    for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Md5] {
        let hasher = ContentHasher::new(dir.path(), algorithm);
        c.bench_function(&format!("fingerprint_file_{algorithm}"), |b| {
            b.iter(|| hasher.fingerprint(black_box("train.csv")).unwrap());
        });
        c.bench_function(&format!("fingerprint_dir_{algorithm}"), |b| {
            b.iter(|| hasher.fingerprint(black_box("features")).unwrap());
        });
    }

    let mut cache = FingerprintCache::new(ContentHasher::new(dir.path(), HashAlgorithm::Sha256));
    c.bench_function("fingerprint_cached", |b| {
        b.iter(|| cache.get(black_box("train.csv")).unwrap());
    });
}

criterion_group!(benches, hashing_benchmark);
criterion_main!(benches);
