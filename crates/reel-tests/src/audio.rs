//! Mixing decoded audio into the shared buffer.

use reel_audio::{mix_into, MixBuffer};
use reel_core::audio_format::FRAME_BYTES;
use reel_core::{FrameRate, PlaybackConfig};
use reel_media::{synthetic_media, SyntheticOpener};
use reel_playback::PlaybackSession;
use reel_timeline::{ClipConfig, Footage, MediaRef, Sequence, TransitionKind};
use std::sync::Arc;

fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}

fn stereo(value: i16) -> Vec<u8> {
    let s = value.to_le_bytes();
    vec![s[0], s[1], s[0], s[1]]
}

#[test]
fn mixing_saturates_instead_of_wrapping() {
    let mut dst = stereo(30_000);
    mix_into(&mut dst, &stereo(10_000));
    assert_eq!(samples(&dst), vec![32_767, 32_767]);
}

#[test]
fn two_writers_sum_at_the_same_position() {
    let buffer = MixBuffer::new(64).unwrap();
    let (mut a, mut b) = (0u64, 0u64);
    buffer.write(&mut a, &stereo(1_000), None);
    buffer.write(&mut b, &stereo(-300), None);

    let mut out = vec![0u8; FRAME_BYTES];
    buffer.consume(&mut out);
    assert_eq!(samples(&out), vec![700, 700]);
}

fn audio_session(sequence: &Sequence) -> PlaybackSession {
    let mut session = PlaybackSession::new(FrameRate::FPS_30, PlaybackConfig::default(), Arc::new(SyntheticOpener::new())).unwrap();
    session.sync_clips(sequence);
    session.start_playback(0);
    session
}

#[test]
fn reverse_clip_plays_its_audio_backward() {
    let footage = Arc::new(Footage::new(synthetic_media("tone.mov", 2)));
    let mut sequence = Sequence::new("rev", FrameRate::FPS_30);
    let mut config = ClipConfig::new("a", Some(MediaRef::footage(footage, 1)), 0, 60, 0);
    config.reverse = true;
    sequence.add_clip(config).unwrap();

    let mut session = audio_session(&sequence);
    session.handle_media(&sequence, 0, false);

    let mut out = vec![0u8; 3 * FRAME_BYTES];
    session.read_audio(&mut out);
    let heard = samples(&out);
    // the ramp counts samples, so backward playback counts down
    assert_eq!(heard[0] - heard[2], 1);
    assert_eq!(heard[2] - heard[4], 1);
}

#[test]
fn opening_fade_starts_silent() {
    let footage = Arc::new(Footage::new(synthetic_media("tone.mov", 10)));
    let mut sequence = Sequence::new("fade", FrameRate::FPS_30);
    let config = ClipConfig::new("a", Some(MediaRef::footage(footage, 1)), 0, 300, 0);
    let id = sequence.add_clip(config).unwrap();
    sequence
        .add_transition(TransitionKind::LinearFade, id, None, 30, true)
        .unwrap();

    let mut session = audio_session(&sequence);
    session.handle_media(&sequence, 0, false);

    let mut out = vec![0u8; 48_000 * FRAME_BYTES / 2];
    session.read_audio(&mut out);
    let heard = samples(&out);
    // a one second linear fade scales sample n of the ramp by n / 48000
    assert_eq!(heard[2 * 100], 0);
    assert!((8_300..8_400).contains(&heard[2 * 20_000]), "got {}", heard[2 * 20_000]);
}
