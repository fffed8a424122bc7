//! Note Detection Benchmarks
//!
//! Measures per-frame note detection on 720p frames with an increasing
//! number of notes in the corridor, and cross-frame sample tracking.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::Instant;

use rhythm_autoplay::capture::Frame;
use rhythm_autoplay::config::Config;
use rhythm_autoplay::estimator::NoteTimeEstimator;
use rhythm_autoplay::player::{SampleTracker, TrackerParams};
use rhythm_autoplay::vision::NoteFinder;

/// Frame with `notes` note-colored boxes spread over the corridor
fn generate_frame(config: &Config, notes: usize) -> RgbImage {
    let mut image = RgbImage::from_pixel(1280, 720, Rgb([30, 20, 40]));
    let colors = config.detection.note_colors;
    for i in 0..notes {
        let y = 20 + (i as u32 * 37) % 230;
        let x = 600 + (i as u32 * 13) % 60;
        let color: Rgb<u8> = colors[i % colors.len()].into();
        for dy in 0..8 {
            for dx in 0..24 {
                image.put_pixel(x + dx, y + dy, color);
            }
        }
    }
    image
}

fn estimator(config: &Config) -> Arc<NoteTimeEstimator> {
    Arc::new(NoteTimeEstimator::new(
        config.play.speed,
        config.track.check_upper_y,
        config.track.check_lower_y,
    ))
}

/// Benchmark detection as the corridor fills up
fn bench_find_all_notes(c: &mut Criterion) {
    let config = Config::default_config();
    let mut group = c.benchmark_group("find_all_notes");
    group.throughput(Throughput::Elements(1));

    for notes in [0usize, 4, 16, 32] {
        let epoch = Instant::now();
        let frame = Frame::new(generate_frame(&config, notes), epoch);
        let mut finder = NoteFinder::new(estimator(&config), &config.track, &config.detection, epoch);
        // Build the corridor mask outside the measurement
        let _ = finder.find_all_notes(&frame);

        group.bench_with_input(BenchmarkId::new("720p", notes), &frame, |b, frame| {
            b.iter(|| black_box(finder.find_all_notes(black_box(frame))))
        });
    }

    group.finish();
}

/// Benchmark folding one frame of detections into the tracker
fn bench_sample_tracking(c: &mut Criterion) {
    let config = Config::default_config();
    let epoch = Instant::now();
    let estimator = estimator(&config);
    let mut finder = NoteFinder::new(Arc::clone(&estimator), &config.track, &config.detection, epoch);
    let detections = finder.find_all_notes(&Frame::new(generate_frame(&config, 16), epoch));
    let params = TrackerParams::from_config(&config.detection, &estimator, config.play.check_loop_delay_ms);

    c.bench_function("sample_tracker_observe_16", |b| {
        b.iter(|| {
            let mut tracker = SampleTracker::new(params);
            for _ in 0..10 {
                tracker.observe(black_box(&detections));
            }
            black_box(tracker.take_due(0))
        })
    });
}

criterion_group!(benches, bench_find_all_notes, bench_sample_tracking);
criterion_main!(benches);
