//! Filter graph descriptions for decoded streams.
//!
//! Graphs are plain values rendered to ffmpeg filter strings, so the chain a
//! clip will decode through can be inspected and tested without a decoder.

use crate::probe::{FieldOrder, StreamInfo, StreamKind, VideoStream};
use reel_core::PixelFormat;
use smallvec::SmallVec;

/// Output pixel formats the video chain may normalize to, in preference order.
pub const PIXEL_FORMAT_CANDIDATES: [PixelFormat; 2] = [PixelFormat::Rgb24, PixelFormat::Rgba8];

/// Codecs decoded single-threaded when multithreading is disabled for images.
const IMAGE_CODECS: &[&str] = &["png", "apng", "tiff", "psd"];

/// Pick the candidate format that keeps the source's alpha, if it has any.
pub fn best_pixel_format(source_has_alpha: bool) -> PixelFormat {
    PIXEL_FORMAT_CANDIDATES
        .iter()
        .copied()
        .find(|f| f.has_alpha() == source_has_alpha)
        .unwrap_or(PixelFormat::Rgb24)
}

/// Decode thread count for a codec.
pub fn decode_threads(codec: &str, disable_multithreading_for_images: bool) -> usize {
    if disable_multithreading_for_images && IMAGE_CODECS.contains(&codec) {
        1
    } else {
        num_cpus::get()
    }
}

/// Video chain: optional deinterlace, then pixel format normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFilterGraph {
    pub deinterlace: Option<FieldOrder>,
    pub output: PixelFormat,
}

impl VideoFilterGraph {
    pub fn for_stream(stream: &VideoStream) -> Self {
        Self {
            deinterlace: stream
                .field_order
                .is_interlaced()
                .then_some(stream.field_order),
            output: best_pixel_format(stream.has_alpha()),
        }
    }

    /// Frames emitted per source frame. The deinterlacer outputs one frame per field.
    pub fn fields_per_frame(&self) -> i64 {
        if self.deinterlace.is_some() {
            2
        } else {
            1
        }
    }

    pub fn to_filter_string(&self) -> String {
        let mut filters = Vec::with_capacity(2);
        if let Some(order) = self.deinterlace {
            let parity = if order == FieldOrder::TopFirst { 0 } else { 1 };
            filters.push(format!("yadif=mode=3:parity={}", parity));
        }
        filters.push(format!("format={}", self.output.ffmpeg_name()));
        filters.join(",")
    }
}

/// How an audio stream is brought to the clip's playback speed.
#[derive(Debug, Clone, PartialEq)]
pub enum TempoPlan {
    /// Speed 1.0.
    Passthrough,
    /// Pitch-preserving time stretch as a cascade of `atempo` stages.
    Stretch(SmallVec<[f64; 4]>),
    /// Straight sample-rate change; played back at the device rate this
    /// shifts pitch along with speed.
    Resample { rate: u32 },
}

impl TempoPlan {
    /// Build the plan for `speed` at the mix buffer rate `output_rate`.
    ///
    /// The stretch cascade uses whole stages of 2.0 (or 0.5 when slowing
    /// down) and one fractional stage for the remainder, since a single
    /// `atempo` stage only accepts ratios in [0.5, 2.0].
    pub fn new(speed: f64, maintain_pitch: bool, output_rate: u32) -> Self {
        if speed == 1.0 || speed <= 0.0 || !speed.is_finite() {
            return Self::Passthrough;
        }
        if !maintain_pitch {
            return Self::Resample {
                rate: (output_rate as f64 / speed).round() as u32,
            };
        }

        let base: f64 = if speed > 1.0 { 2.0 } else { 0.5 };
        let mut speed_log = speed.ln() / base.ln();
        if (speed_log - speed_log.round()).abs() < 1e-9 {
            speed_log = speed_log.round();
        }
        let whole = speed_log.floor();
        let fraction = base.powf(speed_log - whole);

        let mut stages: SmallVec<[f64; 4]> = SmallVec::new();
        for _ in 0..whole as usize {
            stages.push(base);
        }
        if (fraction - 1.0).abs() > 1e-9 {
            stages.push(fraction);
        }
        Self::Stretch(stages)
    }

    /// Product of the stretch stages: the effective speed.
    pub fn ratio(&self, output_rate: u32) -> f64 {
        match self {
            Self::Passthrough => 1.0,
            Self::Stretch(stages) => stages.iter().product(),
            Self::Resample { rate } => output_rate as f64 / *rate as f64,
        }
    }
}

/// Audio chain: resample, optional tempo stages, then s16 stereo.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFilterGraph {
    /// Rate of the mix buffer the clip is played into.
    pub output_rate: u32,
    pub tempo: TempoPlan,
}

impl AudioFilterGraph {
    pub fn new(speed: f64, maintain_pitch: bool, output_rate: u32) -> Self {
        Self {
            output_rate,
            tempo: TempoPlan::new(speed, maintain_pitch, output_rate),
        }
    }

    /// Sample rate of the data leaving the chain.
    pub fn pipe_rate(&self) -> u32 {
        match self.tempo {
            TempoPlan::Resample { rate } => rate,
            _ => self.output_rate,
        }
    }

    pub fn to_filter_string(&self) -> String {
        let mut filters = vec![format!("aresample={}", self.pipe_rate())];
        if let TempoPlan::Stretch(stages) = &self.tempo {
            filters.extend(stages.iter().map(|s| format!("atempo={}", s)));
        }
        filters.push("aformat=sample_fmts=s16:channel_layouts=stereo".to_string());
        filters.join(",")
    }
}

/// The chain a stream decodes through.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterGraph {
    Video(VideoFilterGraph),
    Audio(AudioFilterGraph),
}

impl FilterGraph {
    /// Build the chain appropriate to `stream`.
    pub fn for_stream(stream: &StreamInfo, speed: f64, maintain_pitch: bool, audio_rate: u32) -> Self {
        match &stream.kind {
            StreamKind::Video(video) => Self::Video(VideoFilterGraph::for_stream(video)),
            StreamKind::Audio(_) => Self::Audio(AudioFilterGraph::new(speed, maintain_pitch, audio_rate)),
        }
    }

    pub fn to_filter_string(&self) -> String {
        match self {
            Self::Video(v) => v.to_filter_string(),
            Self::Audio(a) => a.to_filter_string(),
        }
    }
}
