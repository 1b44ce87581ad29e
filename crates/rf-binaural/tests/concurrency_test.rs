//! Concurrency stress tests
//!
//! An audio thread renders blocks back to back while control threads change
//! parameters and request rebuilds, and a reinit thread services them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rf_binaural::{
    Binauraliser, BinauralConfig, CodecStatus, DiffuseEqMode, InterpMode, ProcStatus,
    FRAME_SIZE,
};

const STRESS_TIME: Duration = Duration::from_millis(1500);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_process_survives_concurrent_reinit() {
    init_logger();
    let b = Arc::new(
        Binauraliser::new(BinauralConfig {
            num_sources: 8,
            ..Default::default()
        })
        .unwrap(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let rendered = Arc::new(AtomicU64::new(0));

    let audio = {
        let (b, stop, rendered) = (b.clone(), stop.clone(), rendered.clone());
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(11);
            let inputs: Vec<Vec<f32>> = (0..8)
                .map(|_| (0..FRAME_SIZE).map(|_| rng.random_range(-1.0f32..1.0)).collect())
                .collect();
            let slices: Vec<&[f32]> = inputs.iter().map(|x| x.as_slice()).collect();
            let mut left = vec![0.0f32; FRAME_SIZE];
            let mut right = vec![0.0f32; FRAME_SIZE];
            let mut blocks = 0u64;

            while !stop.load(Ordering::Relaxed) {
                let mut outs = [left.as_mut_slice(), right.as_mut_slice()];
                b.process(&slices, &mut outs, FRAME_SIZE);
                assert!(
                    left.iter().chain(&right).all(|x| x.is_finite()),
                    "non-finite output after {blocks} blocks"
                );
                if left.iter().any(|&x| x != 0.0) {
                    rendered.fetch_add(1, Ordering::Relaxed);
                }
                blocks += 1;
            }
            blocks
        })
    };

    let reinit = {
        let (b, stop) = (b.clone(), stop.clone());
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let _ = b.perform_reinit();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let control = {
        let (b, stop) = (b.clone(), stop.clone());
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(12);
            let mut step = 0u32;
            while !stop.load(Ordering::Relaxed) {
                let src = rng.random_range(0..8);
                b.set_source_azimuth(src, rng.random_range(-360.0f32..360.0)).unwrap();
                b.set_source_elevation(src, rng.random_range(-120.0f32..120.0)).unwrap();
                b.set_yaw(rng.random_range(-180.0f32..180.0));
                b.set_rotation_enabled(step % 7 < 4);
                b.set_interp_mode(if step % 2 == 0 {
                    InterpMode::Tri
                } else {
                    InterpMode::TriPs
                });
                match step % 50 {
                    10 => b.set_diffuse_eq(step % 100 == 10),
                    20 => b.set_diffuse_eq_mode(if step % 100 == 20 {
                        DiffuseEqMode::ReferenceHead
                    } else {
                        DiffuseEqMode::DiffuseField
                    }),
                    30 => b.init(if step % 100 == 30 { 44100.0 } else { 48000.0 }).unwrap(),
                    40 => b.set_num_sources(4 + (step as usize / 50) % 5),
                    _ => {}
                }
                step += 1;
                thread::sleep(Duration::from_micros(500));
            }
        })
    };

    let start = Instant::now();
    while start.elapsed() < STRESS_TIME {
        thread::sleep(Duration::from_millis(20));
    }
    stop.store(true, Ordering::SeqCst);

    control.join().unwrap();
    reinit.join().unwrap();
    let blocks = audio.join().unwrap();
    assert!(blocks > 0);

    // Settle
    while b.perform_reinit().unwrap() {}
    assert_eq!(b.codec_status(), CodecStatus::Initialised);
    assert_eq!(b.proc_status(), ProcStatus::Idle);
    assert!(rendered.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_worker_recovers_after_parameter_storm() {
    init_logger();
    let b = Arc::new(Binauraliser::new(BinauralConfig::default()).unwrap());
    b.start_worker().unwrap();

    let setters: Vec<_> = (0..3)
        .map(|t| {
            let b = b.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    match (i + t) % 4 {
                        0 => b.refresh_settings(),
                        1 => b.set_diffuse_eq(i % 8 < 4),
                        2 => b.set_num_sources(1 + i % 16),
                        _ => b.set_source_azimuth(i % 16, i as f32).unwrap(),
                    }
                }
            })
        })
        .collect();
    for s in setters {
        s.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(20);
    while b.codec_status() != CodecStatus::Initialised && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(b.codec_status(), CodecStatus::Initialised);
    b.stop_worker();
}

#[test]
fn test_drop_waits_for_background_reinit() {
    init_logger();
    for _ in 0..5 {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        b.start_worker().unwrap();
        thread::sleep(Duration::from_millis(2));
        drop(b);
    }
}
