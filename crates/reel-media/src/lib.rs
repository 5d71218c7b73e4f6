//! Reel Media - FFmpeg integration for clip decoding
//!
//! This crate handles:
//! - Media file probing (`ffprobe` JSON)
//! - Filter graph construction (deinterlace, pixel format, tempo)
//! - Frame sources: the ffmpeg sidecar process and a synthetic generator
//! - Decode sessions with keyframe seek compensation and reverse audio

pub mod error;
pub mod ffmpeg;
pub mod filter;
pub mod probe;
pub mod session;
pub mod source;
pub mod synthetic;

pub use error::{DecodeError, DecodeResult};
pub use ffmpeg::{FfmpegOpener, FfmpegSource};
pub use filter::{AudioFilterGraph, FilterGraph, TempoPlan, VideoFilterGraph};
pub use probe::{AudioStream, FieldOrder, MediaInfo, StreamInfo, StreamKind, VideoStream};
pub use session::{DecodeSession, SessionOptions};
pub use source::{AudioChunk, FrameSource, RawFrame, SourceOpener, SourceOptions};
pub use synthetic::{synthetic_media, SyntheticAudio, SyntheticOpener, SyntheticSource};
