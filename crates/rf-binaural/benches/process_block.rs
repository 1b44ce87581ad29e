//! Block rendering benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rf_binaural::{Binauraliser, BinauralConfig, InterpMode, FRAME_SIZE};

fn ready(num_sources: usize, interp_mode: InterpMode) -> Binauraliser {
    let b = Binauraliser::new(BinauralConfig {
        num_sources,
        interp_mode,
        ..Default::default()
    })
    .unwrap();
    b.perform_reinit().unwrap();
    for i in 0..num_sources {
        b.set_source_azimuth(i, i as f32 * 360.0 / num_sources as f32).unwrap();
    }
    b
}

fn bench_process_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_block");

    for num_sources in [1, 8, 64] {
        let b = ready(num_sources, InterpMode::Tri);
        let inputs: Vec<Vec<f32>> = (0..num_sources)
            .map(|ch| (0..FRAME_SIZE).map(|n| ((n + ch) as f32 * 0.01).sin()).collect())
            .collect();
        let slices: Vec<&[f32]> = inputs.iter().map(|x| x.as_slice()).collect();
        let mut left = vec![0.0f32; FRAME_SIZE];
        let mut right = vec![0.0f32; FRAME_SIZE];

        group.bench_with_input(BenchmarkId::new("static", num_sources), &num_sources, |bench, _| {
            bench.iter(|| {
                let mut outs = [left.as_mut_slice(), right.as_mut_slice()];
                b.process(black_box(&slices), &mut outs, FRAME_SIZE);
            })
        });
    }

    group.finish();
}

fn bench_moving_sources(c: &mut Criterion) {
    let num_sources = 16;
    let b = ready(num_sources, InterpMode::TriPs);
    let inputs = vec![vec![0.1f32; FRAME_SIZE]; num_sources];
    let slices: Vec<&[f32]> = inputs.iter().map(|x| x.as_slice()).collect();
    let mut left = vec![0.0f32; FRAME_SIZE];
    let mut right = vec![0.0f32; FRAME_SIZE];
    let mut azimuth = 0.0f32;

    c.bench_function("process_block_moving_16_trips", |bench| {
        bench.iter(|| {
            azimuth = (azimuth + 1.0) % 360.0;
            for i in 0..num_sources {
                b.set_source_azimuth(i, azimuth + i as f32).unwrap();
            }
            let mut outs = [left.as_mut_slice(), right.as_mut_slice()];
            b.process(black_box(&slices), &mut outs, FRAME_SIZE);
        })
    });
}

criterion_group!(benches, bench_process_block, bench_moving_sources);
criterion_main!(benches);
