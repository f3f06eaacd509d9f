//! Criterion benchmarks for the measurement engine.
//!
//! Continuous mode measures every trace it reads, so peak search and
//! occupied bandwidth have to keep up with the trace rate at the largest
//! trace lengths the analyzer produces.
//!
//! Run with: cargo bench --bench measurement

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rsa_spectrum::measurement::{occupied_bandwidth, peak_power};
use rsa_spectrum::spectrum::{ResolvedSpectrum, SpectrumSettings};

fn resolved(points: usize) -> ResolvedSpectrum {
    let span = 40e6;
    let step = span / (points - 1) as f64;
    ResolvedSpectrum::from_settings(SpectrumSettings {
        span_hz: span,
        trace_length: points,
        actual_start_freq_hz: 1e9 - span / 2.0,
        actual_stop_freq_hz: 1e9 + span / 2.0,
        actual_freq_step_hz: step,
        actual_rbw_hz: 300e3,
        actual_vbw_hz: 300e3,
        ..Default::default()
    })
    .unwrap()
}

/// Gaussian tone over a -90 dBm floor.
fn tone(points: usize) -> Vec<f32> {
    let centre = (points / 2) as f64;
    let sigma = points as f64 / 100.0;
    (0..points)
        .map(|i| {
            let x = (i as f64 - centre) / sigma;
            let mw = 1e-2 * (-0.5 * x * x).exp() + 1e-9;
            (10.0 * mw.log10()) as f32
        })
        .collect()
}

fn bench_peak(c: &mut Criterion) {
    let mut group = c.benchmark_group("peak_power");
    for points in [801usize, 8001, 64001] {
        let spectrum = resolved(points);
        let trace = tone(points);
        let axis = spectrum.frequency_axis();
        group.throughput(Throughput::Elements(points as u64));
        group.bench_with_input(BenchmarkId::from_parameter(points), &points, |b, _| {
            b.iter(|| peak_power(black_box(&trace), black_box(&axis)).unwrap());
        });
    }
    group.finish();
}

fn bench_obw(c: &mut Criterion) {
    let mut group = c.benchmark_group("occupied_bandwidth");
    for points in [801usize, 8001, 64001] {
        let spectrum = resolved(points);
        let trace = tone(points);
        let axis = spectrum.frequency_axis();
        group.throughput(Throughput::Elements(points as u64));
        group.bench_with_input(BenchmarkId::from_parameter(points), &points, |b, _| {
            b.iter(|| {
                occupied_bandwidth(black_box(&trace), black_box(&axis), &spectrum, 0.99).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_peak, bench_obw);
criterion_main!(benches);
