//! Codec throughput.
//!
//! Covers:
//! - Array batches below and above the parallel encode threshold
//! - Image frames (zstd pixel stream)
//! - Cumulative profiles (base-9 step packing)
//! - Appending through a RecordStore reference, summary mirror included
//!
//! Run: cargo bench --bench codec_throughput

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use labrec::codec::ImageFrame;
use labrec::{RecordStore, RefValue, Reference, ReferenceClass, Sample, StoreConfig};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn array_samples(count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| (i as f64 * 0.5, RefValue::Number((i as f64).sin() * 100.0)))
        .collect()
}

fn profile_points(count: usize) -> Vec<[u16; 2]> {
    let mut x = 100u16;
    let mut y = 400u16;
    (0..count)
        .map(|i| {
            x = x.wrapping_add(1);
            y = match i % 3 {
                0 => y.wrapping_add(1),
                1 => y.wrapping_sub(1),
                _ => y,
            };
            [x, y]
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_array_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_encode_batch");
    for count in [100, 1_000, 10_000] {
        let samples = array_samples(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &samples, |b, samples| {
            b.iter(|| black_box(ReferenceClass::Array.encode_batch(samples)))
        });
    }
    group.finish();
}

fn bench_array_decode(c: &mut Criterion) {
    let rows = ReferenceClass::Array.encode_batch(&array_samples(10_000));
    c.bench_function("array_decode_10000", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(ReferenceClass::Array.decode(row));
            }
        })
    });
}

fn bench_image(c: &mut Criterion) {
    let frame = ImageFrame {
        width: 320,
        height: 240,
        pixels: (0..320 * 240 * 3).map(|i| (i / 97) as u8).collect(),
    };
    let value = RefValue::Image(frame);
    c.bench_function("image_encode_320x240", |b| {
        b.iter(|| black_box(ReferenceClass::Image.encode(1.0, &value)))
    });
    let row = ReferenceClass::Image.encode(1.0, &value);
    c.bench_function("image_decode_320x240", |b| {
        b.iter(|| black_box(row.as_deref().and_then(|r| ReferenceClass::Image.decode(r))))
    });
}

fn bench_cumulative_profile(c: &mut Criterion) {
    let mut group = c.benchmark_group("cumulative_profile_encode");
    for count in [64, 1_024] {
        let value = RefValue::Profile(profile_points(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &value, |b, value| {
            b.iter(|| black_box(ReferenceClass::CumulativeProfile.encode(2.0, value)))
        });
    }
    group.finish();
}

fn bench_reference_append(c: &mut Criterion) {
    let samples = array_samples(1_000);
    c.bench_function("reference_append_1000", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let store = RecordStore::create(&dir.path().join("bench.rec"), None, StoreConfig::default()).unwrap();
                (dir, store)
            },
            |(_dir, store)| {
                let temp = Reference::create(&store, "/kiln", "T", ReferenceClass::Array, None).unwrap();
                black_box(temp.append(&samples).unwrap());
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(
    benches,
    bench_array_batch,
    bench_array_decode,
    bench_image,
    bench_cumulative_profile,
    bench_reference_append,
);
criterion_main!(benches);
