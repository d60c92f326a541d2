//! Benchmarks for render-window geometry and invalidation fan-out.
//!
//! These run on every tile update and camera move, so they should stay in the
//! nanosecond range even for wide render windows.

use chunk_stream::{
  ChunkKey, RenderSize, chunks_rendering_hex, is_within_bounds, nearest_chunk_key,
  overlap_chunk_keys, render_bounds, world_to_chunk_key,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::prelude::*;

const STRIDE: i32 = 24;
const SAMPLES: usize = 1024;

fn random_cells(seed: u64) -> Vec<(i32, i32)> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..SAMPLES)
    .map(|_| (rng.gen_range(-2000..2000), rng.gen_range(-2000..2000)))
    .collect()
}

fn bench_bounds(c: &mut Criterion) {
  let mut group = c.benchmark_group("geometry");
  group.throughput(Throughput::Elements(SAMPLES as u64));
  let cells = random_cells(1);
  let size = RenderSize::new(48.0, 48.0);

  group.bench_function("render_bounds", |b| {
    b.iter(|| {
      let mut covered = 0i64;
      for &(col, row) in &cells {
        let bounds = render_bounds(black_box(row), black_box(col), size, STRIDE);
        covered += bounds.width();
      }
      covered
    })
  });

  group.bench_function("is_within_bounds", |b| {
    b.iter(|| {
      cells
        .iter()
        .filter(|&&(col, row)| is_within_bounds(black_box(col), black_box(row), 0, 0, size, STRIDE))
        .count()
    })
  });

  group.bench_function("world_to_chunk_key", |b| {
    b.iter(|| {
      let mut last = ChunkKey::new(0, 0);
      for &(x, z) in &cells {
        last = world_to_chunk_key(black_box(x as f32), black_box(z as f32), STRIDE, 1.0);
      }
      last
    })
  });

  group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
  let mut group = c.benchmark_group("overlap");
  group.throughput(Throughput::Elements(SAMPLES as u64));
  let cells = random_cells(2);

  for (width, height) in [(48.0, 48.0), (60.0, 44.0), (120.0, 96.0)] {
    let size = RenderSize::new(width, height);
    let label = format!("{width}x{height}");

    group.bench_with_input(BenchmarkId::new("overlap_chunk_keys", &label), &size, |b, &size| {
      b.iter(|| {
        let mut total = 0;
        for &(col, row) in &cells {
          let center = nearest_chunk_key(col, row, STRIDE);
          total += overlap_chunk_keys(black_box(center), size, STRIDE).len();
        }
        total
      })
    });

    group.bench_with_input(BenchmarkId::new("chunks_rendering_hex", &label), &size, |b, &size| {
      b.iter(|| {
        let mut total = 0;
        for &(col, row) in &cells {
          total += chunks_rendering_hex(black_box(col), black_box(row), size, STRIDE).len();
        }
        total
      })
    });
  }

  group.finish();
}

criterion_group!(benches, bench_bounds, bench_fan_out);
criterion_main!(benches);
