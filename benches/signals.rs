//! Benchmarks for harmonic detection and the trailing-stop engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use harmsig::prelude::*;

/// Deterministic swinging candles, one minute apart
fn generate_candles(n: usize) -> Vec<Candle> {
  let mut candles = Vec::with_capacity(n);
  let mut price = 100.0;

  for i in 0..n {
    let swing = ((i / 6) % 2) as f64 * 2.0 - 1.0;
    let change = swing * (0.5 + ((i * 7 + 13) % 10) as f64 / 20.0);
    let volatility = 0.4 + ((i * 3) % 10) as f64 / 25.0;

    let open = price;
    let close = price + change;
    let high = open.max(close) + volatility;
    let low = open.min(close) - volatility;

    let open_time = i as i64 * 60_000;
    candles.push(Candle::new(open_time, high, low, close, open_time + 59_999).with_open(open));
    price = close;
  }

  candles
}

fn bench_harmonic_scan(c: &mut Criterion) {
  let candles = generate_candles(500);
  let engine = EngineBuilder::new().with_standard_templates().build().unwrap();

  c.bench_function("harmonic_scan_500_candles", |b| {
    b.iter(|| {
      let _ = black_box(engine.scan(black_box(&candles)));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let engine = EngineBuilder::new().with_extended_templates().build().unwrap();

  let mut group = c.benchmark_group("scaling");

  for size in [100, 500, 1000, 5000].iter() {
    let candles = generate_candles(*size);

    group.bench_with_input(BenchmarkId::new("scan", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(engine.scan(black_box(&candles)));
      })
    });
  }

  group.finish();
}

fn bench_parallel_detect(c: &mut Criterion) {
  let series: Vec<Vec<Candle>> = (0..4).map(|_| generate_candles(500)).collect();
  let engine = EngineBuilder::new().with_standard_templates().build().unwrap();

  let jobs: Vec<(&str, &str, &[Candle])> = vec![
    ("SYM1", "15m", series[0].as_slice()),
    ("SYM2", "15m", series[1].as_slice()),
    ("SYM3", "15m", series[2].as_slice()),
    ("SYM4", "15m", series[3].as_slice()),
  ];

  c.bench_function("parallel_detect_4_pairs", |b| {
    b.iter(|| {
      let seen = SeenKeys::unbounded();
      let _ = black_box(scan_parallel(black_box(&engine), &seen, black_box(jobs.clone())));
    })
  });
}

fn bench_tsl(c: &mut Criterion) {
  let candles = generate_candles(1000);

  c.bench_function("tsl_replay_1000_candles", |b| {
    b.iter(|| {
      let _ = black_box(harmsig::detectors::tsl::run(black_box(&candles), Period::new_const(3)));
    })
  });
}

criterion_group!(benches, bench_harmonic_scan, bench_scaling, bench_parallel_detect, bench_tsl);

criterion_main!(benches);
