//! Timeline placement feeding the playhead translator.

use proptest::prelude::*;
use reel_core::playhead::{
    clip_frame_to_seconds, clip_frame_to_timeline, seconds_to_source_timestamp, timeline_to_clip_frame,
};
use reel_core::{FrameRate, TimeBase};
use reel_timeline::{ClipConfig, Sequence, TransitionKind};

fn sequence_with_cut() -> (Sequence, reel_timeline::ClipId, reel_timeline::ClipId) {
    let mut sequence = Sequence::new("cut", FrameRate::FPS_30);
    let mut first = ClipConfig::new("a", None, 0, 100, -1);
    first.clip_in = 20;
    let mut second = ClipConfig::new("b", None, 100, 200, -1);
    second.clip_in = 20;
    let a = sequence.add_clip(first).unwrap();
    let b = sequence.add_clip(second).unwrap();
    (sequence, a, b)
}

#[test]
fn playhead_maps_to_source_timestamp() {
    // a clip at frame 100, 12 frames into its source, reading 90 kHz media
    let clip_frame = timeline_to_clip_frame(130, 12, 100);
    let seconds = clip_frame_to_seconds(clip_frame, 30.0, 1.0, 1.0, false, 1_000);
    assert_eq!(seconds_to_source_timestamp(seconds, TimeBase::MPEG_90K, 0), 126_000);
}

#[test]
fn shared_transition_widens_both_clips() {
    let (mut sequence, a, b) = sequence_with_cut();
    sequence
        .add_transition(TransitionKind::CrossDissolve, a, Some(b), 10, false)
        .unwrap();

    let first = sequence.placement(a).unwrap();
    let second = sequence.placement(b).unwrap();
    assert_eq!(first.timeline_out, 110);
    assert_eq!(second.timeline_in, 90);
    assert_eq!(second.clip_in, 10);
    assert!(first.closing.is_some());
    assert!(second.opening.is_some());
}

#[test]
fn removing_parent_drops_shared_transition() {
    let (mut sequence, a, b) = sequence_with_cut();
    sequence
        .add_transition(TransitionKind::CrossDissolve, a, Some(b), 10, false)
        .unwrap();
    sequence.remove_clip(a).unwrap();
    assert_eq!(sequence.placement(b).map(|p| p.timeline_in), Some(100));
    assert!(sequence.clip(b).is_some_and(|c| c.opening_transition.is_none()));
}

proptest! {
    #[test]
    fn placement_round_trips_through_translator(
        timeline_in in 0i64..500,
        length in 2i64..300,
        clip_in in 0i64..100,
        step in 0i64..1_000,
    ) {
        let mut sequence = Sequence::new("prop", FrameRate::FPS_30);
        let mut config = ClipConfig::new("a", None, timeline_in, timeline_in + length, -1);
        config.clip_in = clip_in;
        let id = sequence.add_clip(config).unwrap();
        let placement = sequence.placement(id).unwrap();

        let playhead = timeline_in + step % length;
        let clip_frame = timeline_to_clip_frame(playhead, placement.clip_in, placement.timeline_in);
        prop_assert_eq!(clip_frame - clip_in, playhead - timeline_in);
        prop_assert_eq!(clip_frame_to_timeline(clip_frame, placement.clip_in, placement.timeline_in), playhead);

        // reversed, every frame of the source span stays inside it
        let max_length = clip_in + length;
        let seconds = clip_frame_to_seconds(clip_frame, 30.0, 1.0, 1.0, true, max_length);
        prop_assert!(seconds >= 0.0);
        prop_assert!(seconds <= (max_length - 1) as f64 / 30.0);
    }
}
