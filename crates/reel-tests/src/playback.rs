//! End-to-end frame cache scenarios against the synthetic source.

use reel_core::{FrameRate, PlaybackConfig};
use reel_media::{synthetic_media, SyntheticOpener};
use reel_playback::{ClipEvent, FrameLookup, PlaybackSession};
use reel_timeline::{ClipConfig, ClipId, Footage, MediaRef, Sequence};
use std::sync::Arc;
use std::time::Duration;

fn video_sequence(seconds: u32, length: i64, configure: impl FnOnce(&mut ClipConfig)) -> (Sequence, ClipId) {
    let footage = Arc::new(Footage::new(synthetic_media("clip.mov", seconds)));
    let mut sequence = Sequence::new("main", FrameRate::FPS_30);
    let mut config = ClipConfig::new("v", Some(MediaRef::footage(footage, 0)), 0, length, -1);
    configure(&mut config);
    let id = sequence.add_clip(config).unwrap();
    (sequence, id)
}

fn session(opener: SyntheticOpener) -> PlaybackSession {
    PlaybackSession::new(FrameRate::FPS_30, PlaybackConfig::default(), Arc::new(opener)).unwrap()
}

/// Look up `playhead` until the cache has it or the attempts run out.
fn wait_for_frame(session: &mut PlaybackSession, clip: ClipId, playhead: i64) -> Option<i64> {
    for _ in 0..400 {
        if let FrameLookup::Ready(frame) = session.frame(clip, playhead) {
            return Some(frame.pts);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn worker_plays_forward_in_order() {
    let (sequence, id) = video_sequence(10, 300, |_| {});
    let mut session = session(SyntheticOpener::new());
    for playhead in 0..45 {
        session.handle_media(&sequence, playhead, true);
        assert_eq!(wait_for_frame(&mut session, id, playhead), Some(playhead));
    }
}

#[test]
fn worker_plays_reverse_from_the_end() {
    let (sequence, id) = video_sequence(2, 60, |c| c.reverse = true);
    let mut session = session(SyntheticOpener::new());
    for playhead in 0..40 {
        session.handle_media(&sequence, playhead, true);
        assert_eq!(wait_for_frame(&mut session, id, playhead), Some(59 - playhead));
    }
}

#[test]
fn double_speed_skips_every_other_frame() {
    let (sequence, id) = video_sequence(10, 100, |c| c.speed = 2.0);
    let mut session = session(SyntheticOpener::new().with_keyframe_interval(1));
    session.handle_media(&sequence, 0, false);
    session.frame(id, 0);
    for playhead in 0..20 {
        assert_eq!(wait_for_frame(&mut session, id, playhead), Some(playhead * 2));
    }
}

#[test]
fn seek_far_ahead_recovers() {
    let (sequence, id) = video_sequence(10, 300, |_| {});
    let mut session = session(SyntheticOpener::new());
    session.handle_media(&sequence, 0, true);
    assert_eq!(wait_for_frame(&mut session, id, 0), Some(0));
    assert_eq!(wait_for_frame(&mut session, id, 250), Some(250));
    assert_eq!(wait_for_frame(&mut session, id, 20), Some(20));
}

#[test]
fn open_failure_is_reported() {
    let (sequence, id) = video_sequence(10, 300, |_| {});
    let mut session = session(SyntheticOpener::failing());
    let events = session.events();
    session.handle_media(&sequence, 0, true);

    match events.recv_timeout(Duration::from_secs(5)) {
        Ok(ClipEvent::OpenFailed { clip, .. }) => assert_eq!(clip, id),
        other => panic!("expected an open failure, got {:?}", other),
    }
    assert!(session.frame(id, 0).texture_failed());
}

#[test]
fn closing_session_joins_workers() {
    let (sequence, id) = video_sequence(10, 300, |_| {});
    let mut session = session(SyntheticOpener::new());
    let events = session.events();
    session.handle_media(&sequence, 0, true);
    assert_eq!(wait_for_frame(&mut session, id, 0), Some(0));
    session.close();

    let closed: Vec<ClipEvent> = events.try_iter().filter(|e| matches!(e, ClipEvent::Closed { .. })).collect();
    assert_eq!(closed, vec![ClipEvent::Closed { clip: id }]);
    assert!(session.frame(id, 0).texture_failed());
}
