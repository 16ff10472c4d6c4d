use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fanout_pipeline::{
    CipherKey, Collaborators, Identity, IterSource, LetterTally, PipelineBuilder, ShiftCipher,
    WriterSink,
};
use std::sync::Arc;
use std::time::Duration;

fn text(len: usize) -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

fn benchmark_identity_throughput(c: &mut Criterion) {
    let input = text(16 * 1024);
    let mut group = c.benchmark_group("identity_16k_bytes");
    group.throughput(Throughput::Bytes(input.len() as u64));

    for capacity in [2usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let pipeline = PipelineBuilder::new()
                    .input_capacity(capacity)
                    .output_capacity(capacity)
                    .build::<u8>()
                    .expect("Build failed");

                let running = pipeline
                    .start(Collaborators::new(
                        IterSource::new(black_box(input.clone())),
                        Identity,
                        Arc::new(LetterTally::new(std::io::sink())),
                        WriterSink::new(std::io::sink()),
                    ))
                    .expect("Start failed");
                running.wait().expect("Wait failed")
            });
        });
    }
    group.finish();
}

fn benchmark_cipher_throughput(c: &mut Criterion) {
    let input = text(64 * 1024);
    let mut group = c.benchmark_group("cipher_64k_bytes");
    group.throughput(Throughput::Bytes(input.len() as u64));

    group.bench_function("capacity_64", |b| {
        b.iter(|| {
            let pipeline = PipelineBuilder::new()
                .input_capacity(64)
                .output_capacity(64)
                .build::<u8>()
                .expect("Build failed");

            let running = pipeline
                .start(Collaborators::new(
                    IterSource::new(black_box(input.clone())),
                    ShiftCipher::new(Arc::new(CipherKey::new(13))),
                    Arc::new(LetterTally::new(std::io::sink())),
                    WriterSink::new(std::io::sink()),
                ))
                .expect("Start failed");
            running.wait().expect("Wait failed")
        });
    });
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_identity_throughput, benchmark_cipher_throughput
);
criterion_main!(benches);
