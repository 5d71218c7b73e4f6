//! Reel Core - Foundation types for the playback cache
//!
//! This crate provides the fundamental types shared by every Reel crate:
//! - Error type and `Result` alias
//! - Time representation (FrameRate, TimeBase)
//! - Decoded frame buffers and pixel formats
//! - Playback configuration (queue windows, seeking behaviour)
//! - The playhead translator: pure sequence-frame <-> source-timestamp math

pub mod config;
pub mod error;
pub mod frame;
pub mod playhead;
pub mod time;

pub use config::{PlaybackConfig, QueueUnit, QueueWindow};
pub use error::{ReelError, Result};
pub use frame::{DecodedFrame, FrameBuffer, PixelFormat, SharedFrame};
pub use time::{FrameRate, TimeBase};

/// Audio sample layout constants. Every audio path in Reel carries
/// interleaved signed 16-bit little-endian stereo.
pub mod audio_format {
    /// Output channel count.
    pub const CHANNELS: usize = 2;

    /// Bytes per sample per channel.
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Bytes per interleaved sample frame.
    pub const FRAME_BYTES: usize = CHANNELS * BYTES_PER_SAMPLE;

    /// Sample frames read per audio decode chunk.
    pub const CHUNK_SAMPLES: usize = 2048;
}
