//! Benchmarks for chunk framing and reassembly.
//!
//! Run with: `cargo bench -p callwire-transfer`

use bytes::Bytes;
use callwire_transfer::{CHUNK_HEADER_SIZE, Chunk, Reassembler, TransferConfig, split};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const CHUNK_SIZE: usize = 16_000;

// ============================================================================
// Chunk Framing Benchmarks
// ============================================================================

fn bench_chunk_encode(c: &mut Criterion) {
    let chunk = Chunk {
        session_id: 42,
        index: 7,
        total: 64,
        payload: Bytes::from(vec![0xAA; CHUNK_SIZE]),
    };

    let mut group = c.benchmark_group("chunk_encode");
    group.throughput(Throughput::Bytes(chunk.encoded_len() as u64));
    group.bench_function("encode_16000_bytes", |b| {
        b.iter(|| black_box(&chunk).encode())
    });
    group.finish();
}

fn bench_chunk_decode_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_decode_by_size");

    for size in [64usize, 1024, 4096, CHUNK_SIZE] {
        let encoded = Chunk {
            session_id: 1,
            index: 0,
            total: 1,
            payload: Bytes::from(vec![0x42; size]),
        }
        .encode();

        group.throughput(Throughput::Bytes((size + CHUNK_HEADER_SIZE) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, data| {
            b.iter(|| Chunk::decode(black_box(data.clone())))
        });
    }

    group.finish();
}

// ============================================================================
// Reassembly Benchmarks
// ============================================================================

/// Reassemble a payload delivered in order and in reverse
fn bench_reassembly(c: &mut Criterion) {
    let config = TransferConfig::default();
    let mut group = c.benchmark_group("reassembly");

    for payload_len in [64 * 1024usize, 1024 * 1024] {
        let payload = Bytes::from(vec![0x5A; payload_len]);
        let chunks: Vec<Chunk> = split(9, payload, CHUNK_SIZE)
            .map(Iterator::collect)
            .unwrap_or_default();

        group.throughput(Throughput::Bytes(payload_len as u64));

        group.bench_with_input(
            BenchmarkId::new("in_order", payload_len),
            &chunks,
            |b, chunks| {
                b.iter_batched(
                    || (Reassembler::new(&config), chunks.clone()),
                    |(mut reassembler, chunks)| {
                        let mut done = None;
                        for chunk in chunks {
                            done = reassembler.on_chunk_received(chunk).ok().flatten();
                        }
                        black_box(done)
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );

        group.bench_with_input(
            BenchmarkId::new("reversed", payload_len),
            &chunks,
            |b, chunks| {
                b.iter_batched(
                    || (Reassembler::new(&config), chunks.clone()),
                    |(mut reassembler, chunks)| {
                        let mut done = None;
                        for chunk in chunks.into_iter().rev() {
                            done = reassembler.on_chunk_received(chunk).ok().flatten();
                        }
                        black_box(done)
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chunk_encode,
    bench_chunk_decode_sizes,
    bench_reassembly
);
criterion_main!(benches);
