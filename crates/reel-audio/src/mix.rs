//! Sample mixing on interleaved signed 16-bit little-endian stereo.

use reel_core::audio_format::{BYTES_PER_SAMPLE, FRAME_BYTES};

/// Additive mix clamped to the 16-bit range, so overlapping clips get
/// louder instead of averaging.
#[inline]
pub fn mix_sample(existing: i16, incoming: i16) -> i16 {
    existing.saturating_add(incoming)
}

/// Mix `src` into `dst` sample by sample. Stops at the shorter block; a
/// trailing odd byte is ignored.
pub fn mix_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst
        .chunks_exact_mut(BYTES_PER_SAMPLE)
        .zip(src.chunks_exact(BYTES_PER_SAMPLE))
    {
        let mixed = mix_sample(i16::from_le_bytes([d[0], d[1]]), i16::from_le_bytes([s[0], s[1]]));
        d.copy_from_slice(&mixed.to_le_bytes());
    }
}

/// Scale a block by a gain moving linearly from `from` at the first sample
/// frame to `to` at the end of the block.
pub fn apply_gain_ramp(bytes: &mut [u8], from: f64, to: f64) {
    let frames = bytes.len() / FRAME_BYTES;
    if frames == 0 || (from == 1.0 && to == 1.0) {
        return;
    }
    let step = (to - from) / frames as f64;
    for (i, frame) in bytes.chunks_exact_mut(FRAME_BYTES).enumerate() {
        let gain = from + step * i as f64;
        for sample in frame.chunks_exact_mut(BYTES_PER_SAMPLE) {
            let value = i16::from_le_bytes([sample[0], sample[1]]) as f64 * gain;
            let scaled = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            sample.copy_from_slice(&scaled.to_le_bytes());
        }
    }
}

#[inline]
pub fn samples_to_bytes(sample_frames: usize) -> usize {
    sample_frames * FRAME_BYTES
}

#[inline]
pub fn bytes_to_samples(bytes: usize) -> usize {
    bytes / FRAME_BYTES
}
