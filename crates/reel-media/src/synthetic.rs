//! A frame source that generates media instead of decoding it.
//!
//! Video is colour bars rotated by frame index, audio is a sample-index ramp
//! or a sine tone. Seeks land on keyframe boundaries like a real demuxer, so
//! the session's seek compensation is exercised without ffmpeg installed.

use crate::error::{DecodeError, DecodeResult};
use crate::filter::FilterGraph;
use crate::probe::{AudioStream, FieldOrder, MediaInfo, StreamInfo, StreamKind, VideoStream};
use crate::source::{AudioChunk, FrameSource, RawFrame, SourceOpener, SourceOptions};
use reel_core::audio_format::{CHUNK_SAMPLES, FRAME_BYTES};
use reel_core::{DecodedFrame, FrameBuffer, FrameRate, PixelFormat, TimeBase};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Waveform produced for audio streams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyntheticAudio {
    /// Both channels carry the output sample index modulo 2^15.
    Ramp,
    /// A sine tone at the given frequency.
    Tone { hz: f64 },
}

impl SyntheticAudio {
    fn sample(self, index: i64, rate: u32) -> i16 {
        match self {
            Self::Ramp => (index.rem_euclid(32_768)) as i16,
            Self::Tone { hz } => {
                let t = index as f64 / rate as f64;
                ((t * hz * std::f64::consts::TAU).sin() * 8_000.0) as i16
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    Video {
        width: u32,
        height: u32,
        format: PixelFormat,
        /// Output frames between seek points.
        keyframe_interval: i64,
    },
    Audio {
        rate: u32,
    },
}

/// Generated stand-in for a decoder.
#[derive(Debug)]
pub struct SyntheticSource {
    layout: Layout,
    audio: SyntheticAudio,
    time_base: reel_core::TimeBase,
    start_time: i64,
    speed: f64,
    /// Ticks per video frame.
    frame_duration: i64,
    /// Output units (frames or sample frames) in the stream.
    total: i64,
    position: i64,
    fail_at: Option<i64>,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(options: &SourceOptions, audio: SyntheticAudio, keyframe_interval: i64) -> DecodeResult<Self> {
        let stream = &options.stream;
        let tb = stream.time_base;
        let duration = stream.duration.unwrap_or(0).max(0);

        let (layout, frame_duration, total) = match &options.graph {
            FilterGraph::Video(graph) => {
                let video = stream.video().ok_or_else(|| DecodeError::DecodeFailed("video graph on a non-video stream".into()))?;
                let fields = graph.fields_per_frame();
                let frame_duration = (tb.frame_duration(video.frame_rate) / fields).max(1);
                let total = if stream.infinite_length {
                    1
                } else {
                    duration / frame_duration
                };
                let layout = Layout::Video {
                    width: video.width,
                    height: video.height,
                    format: graph.output,
                    keyframe_interval: keyframe_interval.max(1) * fields,
                };
                (layout, frame_duration, total)
            }
            FilterGraph::Audio(graph) => {
                let rate = graph.output_rate;
                let secs = tb.to_seconds(duration);
                let total = (secs * rate as f64 / options.speed).floor() as i64;
                (Layout::Audio { rate }, 1, total)
            }
        };

        Ok(Self {
            layout,
            audio,
            time_base: tb,
            start_time: stream.start_time,
            speed: options.speed,
            frame_duration,
            total,
            position: 0,
            fail_at: None,
            closed: false,
        })
    }

    /// Fail with `DecodeFailed` once output reaches `pts`.
    pub fn with_failure_at(mut self, pts: i64) -> Self {
        self.fail_at = Some(pts);
        self
    }

    fn pts_of(&self, position: i64) -> i64 {
        match self.layout {
            Layout::Video { .. } => self.start_time + position * self.frame_duration,
            Layout::Audio { rate } => {
                let secs = position as f64 * self.speed / rate as f64;
                self.start_time + self.time_base.from_seconds(secs)
            }
        }
    }

    fn position_of(&self, ts: i64) -> i64 {
        let offset = (ts - self.start_time).max(0);
        match self.layout {
            Layout::Video { .. } => offset / self.frame_duration,
            Layout::Audio { rate } => {
                let secs = self.time_base.to_seconds(offset);
                (secs * rate as f64 / self.speed).floor() as i64
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn seek(&mut self, ts: i64) -> DecodeResult<()> {
        if self.closed {
            return Err(DecodeError::DecodeFailed("seek on a closed source".into()));
        }
        let target = self.position_of(ts).min(self.total);
        let granule = match self.layout {
            Layout::Video {
                keyframe_interval, ..
            } => keyframe_interval,
            Layout::Audio { .. } => CHUNK_SAMPLES as i64,
        };
        self.position = target - target.rem_euclid(granule);
        Ok(())
    }

    fn next_frame(&mut self) -> DecodeResult<RawFrame> {
        if self.closed || self.position >= self.total {
            return Err(DecodeError::EndOfStream);
        }
        let pts = self.pts_of(self.position);
        if self.fail_at.is_some_and(|fail| pts >= fail) {
            return Err(DecodeError::DecodeFailed(format!("corrupt packet at {}", pts)));
        }

        match self.layout {
            Layout::Video {
                width,
                height,
                format,
                ..
            } => {
                let buffer = FrameBuffer::test_pattern(width, height, format, self.position as u32);
                self.position += 1;
                Ok(RawFrame::Video(DecodedFrame::new(buffer, pts, self.frame_duration)))
            }
            Layout::Audio { rate } => {
                let count = (self.total - self.position).min(CHUNK_SAMPLES as i64);
                let mut data = Vec::with_capacity(count as usize * FRAME_BYTES);
                for i in 0..count {
                    let sample = self.audio.sample(self.position + i, rate).to_le_bytes();
                    data.extend_from_slice(&sample);
                    data.extend_from_slice(&sample);
                }
                self.position += count;
                Ok(RawFrame::Audio(AudioChunk::new(pts, data)))
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Opens [`SyntheticSource`]s and counts how many were opened.
#[derive(Debug)]
pub struct SyntheticOpener {
    pub audio: SyntheticAudio,
    pub keyframe_interval: i64,
    pub fail_at: Option<i64>,
    pub fail_open: bool,
    opened: AtomicUsize,
}

impl SyntheticOpener {
    pub fn new() -> Self {
        Self {
            audio: SyntheticAudio::Ramp,
            keyframe_interval: 12,
            fail_at: None,
            fail_open: false,
            opened: AtomicUsize::new(0),
        }
    }

    /// An opener whose every open fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn with_audio(mut self, audio: SyntheticAudio) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_keyframe_interval(mut self, frames: i64) -> Self {
        self.keyframe_interval = frames;
        self
    }

    pub fn with_failure_at(mut self, pts: i64) -> Self {
        self.fail_at = Some(pts);
        self
    }

    /// Number of sources opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(&self, path: &Path, options: &SourceOptions) -> DecodeResult<Box<dyn FrameSource>> {
        if self.fail_open {
            return Err(DecodeError::open_failed(path, "synthetic open failure"));
        }
        let mut source = SyntheticSource::new(options, self.audio, self.keyframe_interval)?;
        if let Some(pts) = self.fail_at {
            source = source.with_failure_at(pts);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(source))
    }
}

/// Stream layout of a generated file: 30 fps video on stream 0 and 48 kHz
/// stereo audio on stream 1, both `seconds` long.
pub fn synthetic_media(path: impl AsRef<Path>, seconds: u32) -> MediaInfo {
    let seconds = i64::from(seconds);
    let video = StreamInfo {
        index: 0,
        codec: "rawvideo".into(),
        time_base: TimeBase::new(1, 30),
        start_time: 0,
        duration: Some(seconds * 30),
        infinite_length: false,
        kind: StreamKind::Video(VideoStream {
            width: 64,
            height: 36,
            frame_rate: FrameRate::FPS_30,
            pixel_format: "rgb24".into(),
            field_order: FieldOrder::Progressive,
        }),
    };
    let audio = StreamInfo {
        index: 1,
        codec: "pcm_s16le".into(),
        time_base: TimeBase::new(1, 48_000),
        start_time: 0,
        duration: Some(seconds * 48_000),
        infinite_length: false,
        kind: StreamKind::Audio(AudioStream {
            sample_rate: 48_000,
            channels: 2,
        }),
    };
    MediaInfo {
        path: path.as_ref().to_path_buf(),
        format: "synthetic".into(),
        duration_seconds: Some(seconds as f64),
        streams: vec![video, audio],
    }
}
