//! The seam between a decode session and whatever produces raw frames.

use crate::error::DecodeResult;
use crate::filter::FilterGraph;
use crate::probe::StreamInfo;
use reel_core::audio_format::FRAME_BYTES;
use reel_core::DecodedFrame;
use std::path::Path;

/// A block of interleaved s16le stereo samples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioChunk {
    /// Source timestamp of the first sample, in stream ticks.
    pub pts: i64,
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn new(pts: i64, data: Vec<u8>) -> Self {
        Self { pts, data }
    }

    /// Number of interleaved sample frames in the chunk.
    pub fn sample_frames(&self) -> usize {
        self.data.len() / FRAME_BYTES
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One unit of decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Video(DecodedFrame),
    Audio(AudioChunk),
}

impl RawFrame {
    pub fn pts(&self) -> i64 {
        match self {
            Self::Video(frame) => frame.pts,
            Self::Audio(chunk) => chunk.pts,
        }
    }
}

/// Everything a source needs to start decoding one stream.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub stream: StreamInfo,
    pub graph: FilterGraph,
    pub threads: usize,
    /// Combined clip and footage speed. Audio chunk timestamps advance by
    /// `samples * speed / output_rate` seconds.
    pub speed: f64,
}

/// Produces raw frames for one stream.
///
/// After `seek(ts)` the next frame returned is the first frame at or after
/// the nearest seek point at or before `ts`; sources with coarse seek points
/// may therefore return frames earlier than `ts`.
pub trait FrameSource: Send {
    /// Flush buffered output and reposition at or before `ts`.
    fn seek(&mut self, ts: i64) -> DecodeResult<()>;

    /// Decode the next frame. `DecodeError::EndOfStream` at end of input.
    fn next_frame(&mut self) -> DecodeResult<RawFrame>;

    /// Release decoder resources. Must be idempotent.
    fn close(&mut self);
}

/// Creates frame sources. Shared by every clip in a playback session.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path, options: &SourceOptions) -> DecodeResult<Box<dyn FrameSource>>;
}
