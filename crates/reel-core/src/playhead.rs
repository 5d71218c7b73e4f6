//! Playhead translator.
//!
//! Pure functions that move a position between the three coordinate spaces
//! the cache works in:
//!
//! - **sequence frames**: the playhead, counted at the sequence frame rate
//! - **clip frames**: frames into the clip's source, at the sequence rate
//! - **source ticks**: timestamps in the decoded stream's time base
//!
//! None of these functions touch shared state, so the cache worker and the
//! consumer can both call them without coordination.

use crate::audio_format::FRAME_BYTES;
use crate::time::TimeBase;

/// Map a sequence playhead onto a frame index into the clip's source.
/// Playheads before the clip start clamp to its first frame.
#[inline]
pub fn timeline_to_clip_frame(playhead: i64, clip_in_with_transition: i64, timeline_in_with_transition: i64) -> i64 {
    (playhead - timeline_in_with_transition).max(0) + clip_in_with_transition
}

/// Inverse of [`timeline_to_clip_frame`] for playheads at or after the clip start.
#[inline]
pub fn clip_frame_to_timeline(clip_frame: i64, clip_in_with_transition: i64, timeline_in_with_transition: i64) -> i64 {
    clip_frame - clip_in_with_transition + timeline_in_with_transition
}

/// Convert a clip frame to seconds of source media.
///
/// In reverse the frame is first reflected about the clip's maximum length,
/// so frame 0 maps to the last frame of the source.
#[inline]
pub fn clip_frame_to_seconds(
    clip_frame: i64,
    sequence_frame_rate: f64,
    clip_speed: f64,
    media_speed: f64,
    reverse: bool,
    max_length: i64,
) -> f64 {
    let frame = if reverse {
        max_length - clip_frame - 1
    } else {
        clip_frame
    };
    (frame as f64 / sequence_frame_rate) * clip_speed * media_speed
}

/// Convert seconds of source media to a timestamp in the stream's time base.
/// Negative stream start times are ignored.
#[inline]
pub fn seconds_to_source_timestamp(seconds: f64, time_base: TimeBase, source_start_time: i64) -> i64 {
    let inverse = time_base.denominator as f64 / time_base.numerator as f64;
    (seconds * inverse).round() as i64 + source_start_time.max(0)
}

/// Re-express a frame number counted at `source_rate` as one counted at
/// `target_rate`.
#[inline]
pub fn refactor_frame_number(frame: i64, source_rate: f64, target_rate: f64) -> i64 {
    if source_rate == target_rate {
        return frame;
    }
    ((frame as f64 / source_rate) * target_rate).round() as i64
}

/// Clip-relative time in seconds at `playhead`, ignoring speed.
#[inline]
pub fn timecode(playhead: i64, clip_in_with_transition: i64, timeline_in_with_transition: i64, sequence_frame_rate: f64) -> f64 {
    (playhead - timeline_in_with_transition + clip_in_with_transition) as f64 / sequence_frame_rate
}

/// Byte position in the mix buffer that corresponds to sequence `frame`,
/// given that byte 0 was `origin_frame`. Frames before the origin map to 0.
#[inline]
pub fn buffer_offset_from_frame(frame_rate: f64, frame: i64, origin_frame: i64, sample_rate: u32) -> u64 {
    let samples = (((frame - origin_frame) as f64 / frame_rate) * sample_rate as f64).floor();
    if samples <= 0.0 {
        return 0;
    }
    samples as u64 * FRAME_BYTES as u64
}

/// Seconds of audio held in `bytes` of mix-buffer data.
#[inline]
pub fn bytes_to_seconds(bytes: u64, sample_rate: u32) -> f64 {
    (bytes / FRAME_BYTES as u64) as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_playhead_inside_clip() {
        let frame = timeline_to_clip_frame(150, 0, 100);
        assert_eq!(frame, 50);
        let seconds = clip_frame_to_seconds(frame, 30.0, 1.0, 1.0, false, 2000);
        assert!((seconds - 50.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_playhead_reverse_reflects() {
        let seconds = clip_frame_to_seconds(50, 30.0, 1.0, 1.0, true, 2000);
        assert!((seconds - 1949.0 / 30.0).abs() < 1e-9);
        assert!((seconds - 64.9667).abs() < 1e-4);
    }

    #[test]
    fn test_playhead_before_clip_clamps() {
        assert_eq!(timeline_to_clip_frame(40, 12, 100), 12);
    }

    #[test]
    fn test_speed_scales_seconds() {
        let seconds = clip_frame_to_seconds(60, 30.0, 2.0, 0.5, false, 1000);
        assert!((seconds - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_seconds_to_timestamp() {
        assert_eq!(seconds_to_source_timestamp(1.0, TimeBase::MPEG_90K, 0), 90_000);
        assert_eq!(seconds_to_source_timestamp(1.0, TimeBase::MPEG_90K, 3_600), 93_600);
        assert_eq!(seconds_to_source_timestamp(1.0, TimeBase::MPEG_90K, -500), 90_000);
        assert_eq!(seconds_to_source_timestamp(0.5, TimeBase::new(1001, 30000), 0), 15);
    }

    #[test]
    fn test_refactor_frame_number() {
        assert_eq!(refactor_frame_number(48, 24.0, 30.0), 60);
        assert_eq!(refactor_frame_number(77, 29.97, 29.97), 77);
        assert_eq!(refactor_frame_number(10, 30.0, 24.0), 8);
    }

    #[test]
    fn test_timecode() {
        assert!((timecode(130, 30, 100, 30.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_offset() {
        // half a second at 48k stereo s16
        assert_eq!(buffer_offset_from_frame(30.0, 115, 100, 48_000), 24_000 * 4);
        assert_eq!(buffer_offset_from_frame(30.0, 90, 100, 48_000), 0);
        assert!((bytes_to_seconds(96_000, 48_000) - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_clip_frame_round_trip(
            timeline_in in -10_000i64..10_000,
            offset in 0i64..1_000_000,
            clip_in in -10_000i64..10_000,
        ) {
            let playhead = timeline_in + offset;
            let clip_frame = timeline_to_clip_frame(playhead, clip_in, timeline_in);
            prop_assert_eq!(clip_frame_to_timeline(clip_frame, clip_in, timeline_in), playhead);
        }

        #[test]
        fn prop_reverse_reflection_matches_forward(
            max_length in 1i64..1_000_000,
            frac in 0.0f64..1.0,
            rate in prop::sample::select(vec![23.976, 24.0, 25.0, 29.97, 30.0, 60.0]),
            clip_speed in 0.1f64..8.0,
            media_speed in 0.1f64..4.0,
        ) {
            let f = ((max_length as f64 * frac) as i64).min(max_length - 1);
            let reversed = clip_frame_to_seconds(f, rate, clip_speed, media_speed, true, max_length);
            let forward = clip_frame_to_seconds(max_length - 1 - f, rate, clip_speed, media_speed, false, max_length);
            prop_assert_eq!(reversed, forward);
        }

        #[test]
        fn prop_timestamps_monotonic_in_playhead(
            a in 0i64..100_000,
            b in 0i64..100_000,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let ts = |p: i64| {
                let secs = clip_frame_to_seconds(timeline_to_clip_frame(p, 0, 0), 30.0, 1.0, 1.0, false, 0);
                seconds_to_source_timestamp(secs, TimeBase::MPEG_90K, 0)
            };
            prop_assert!(ts(lo) <= ts(hi));
        }
    }
}
