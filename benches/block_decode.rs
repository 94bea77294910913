//! Criterion benchmarks for the block decoding hot path.
//!
//! Measures payload reassembly throughput for typical MSO5000 record sizes and
//! the cost of header validation alone.
//!
//! Run with: cargo bench --bench block_decode

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use daq_driver_rigol::{BlockDecoder, BlockHeader, Transport, END_MARKER, HEADER_LEN};
use std::io::Cursor;
use std::time::Duration;

fn encode_block(len: usize) -> Vec<u8> {
    let mut block = format!("#9{len:09}").into_bytes();
    block.extend((0..len).map(|i| (i % 256) as u8));
    block.push(END_MARKER);
    block
}

/// Decode whole blocks from memory, isolating decoder overhead from the network.
fn block_decode_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_decode");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let sizes = [
        ("1K", 1_000),
        ("100K", 100_000),
        ("1M", 1_000_000),
        ("10M", 10_000_000),
    ];

    for (name, size) in sizes {
        let block = encode_block(size);
        let mut decoder = BlockDecoder::new(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("decode", name), &block, |b, block| {
            b.iter_batched(
                || Transport::new(Cursor::new(block.clone()), Duration::from_secs(1)),
                |mut transport| {
                    runtime.block_on(async {
                        let frame = decoder.decode(&mut transport).await.unwrap();
                        black_box(frame.payload.len())
                    })
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn header_parse(c: &mut Criterion) {
    let raw: [u8; HEADER_LEN] = *b"#9025000000";
    c.bench_function("header_parse", |b| {
        b.iter(|| BlockHeader::parse(black_box(&raw), 250_000_000).unwrap())
    });
}

criterion_group!(benches, block_decode_throughput, header_parse);
criterion_main!(benches);
