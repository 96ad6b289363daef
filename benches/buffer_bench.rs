//! Benchmarks for Buffer encoding and numeric access

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use node_compat::buffer::{Buffer, StringEncoding};

fn sample_bytes(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 % 251) as u8).collect()
}

/// Benchmark bytes -> text for each encoding
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let buffer = Buffer::from_vec(sample_bytes(4096)).unwrap();
    group.throughput(Throughput::Bytes(buffer.len() as u64));

    for encoding in StringEncoding::ALL {
        group.bench_function(encoding.as_str(), |b| {
            b.iter(|| black_box(buffer.to_string_with(encoding)))
        });
    }

    group.finish();
}

/// Benchmark text -> bytes for each encoding
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let buffer = Buffer::from_vec(sample_bytes(4096)).unwrap();

    for encoding in StringEncoding::ALL {
        let text = buffer.to_string_with(encoding);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_function(encoding.as_str(), |b| {
            b.iter(|| black_box(Buffer::from_string(&text, encoding).unwrap()))
        });
    }

    group.finish();
}

/// Benchmark fixed-width reads and writes across a buffer
fn bench_numeric(c: &mut Criterion) {
    let buffer = Buffer::alloc(1024).unwrap();

    c.bench_function("write_read_uint32_le", |b| {
        b.iter(|| {
            let mut offset = 0;
            while offset + 4 <= buffer.len() {
                offset = buffer.write_uint32_le(offset as u32, offset).unwrap();
            }
            let mut sum = 0u64;
            for offset in (0..buffer.len()).step_by(4) {
                sum += buffer.read_uint32_le(offset).unwrap() as u64;
            }
            black_box(sum)
        })
    });

    c.bench_function("read_double_be", |b| {
        b.iter(|| black_box(buffer.read_double_be(8).unwrap()))
    });
}

/// Benchmark recycled allocations
fn bench_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc");

    group.bench_function("alloc_4k", |b| {
        b.iter(|| black_box(Buffer::alloc(4096).unwrap()))
    });
    group.bench_function("alloc_unsafe_4k", |b| {
        b.iter(|| black_box(Buffer::alloc_unsafe(4096).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_numeric, bench_alloc);
criterion_main!(benches);
