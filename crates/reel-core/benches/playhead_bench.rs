//! Benchmarks for the playhead translator.
//!
//! Run with: cargo bench -p reel-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reel_core::playhead::{
    buffer_offset_from_frame, clip_frame_to_seconds, refactor_frame_number,
    seconds_to_source_timestamp, timeline_to_clip_frame,
};
use reel_core::TimeBase;

fn bench_playhead_to_timestamp(c: &mut Criterion) {
    c.bench_function("playhead_to_timestamp_forward", |bencher| {
        bencher.iter(|| {
            let frame = timeline_to_clip_frame(black_box(86_400), 120, 3_000);
            let secs = clip_frame_to_seconds(frame, 29.97, 1.0, 1.0, false, 200_000);
            seconds_to_source_timestamp(secs, TimeBase::MPEG_90K, 0)
        });
    });

    c.bench_function("playhead_to_timestamp_reverse", |bencher| {
        bencher.iter(|| {
            let frame = timeline_to_clip_frame(black_box(86_400), 120, 3_000);
            let secs = clip_frame_to_seconds(frame, 29.97, 1.5, 1.0, true, 200_000);
            seconds_to_source_timestamp(secs, TimeBase::MPEG_90K, 0)
        });
    });
}

fn bench_nest_translation(c: &mut Criterion) {
    c.bench_function("refactor_frame_number_24_to_30", |bencher| {
        bencher.iter(|| refactor_frame_number(black_box(172_800), 24.0, 30.0));
    });

    c.bench_function("buffer_offset_from_frame", |bencher| {
        bencher.iter(|| buffer_offset_from_frame(30.0, black_box(54_000), 1_000, 48_000));
    });
}

criterion_group!(benches, bench_playhead_to_timestamp, bench_nest_translation);
criterion_main!(benches);
