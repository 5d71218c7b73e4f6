//! Media file probing to get stream layout without decoding.
//!
//! Runs `ffprobe` once per imported file and keeps the parsed result on the
//! footage item, so clips can size their queues and compute their lengths
//! before a decoder is ever started.

use crate::error::{DecodeError, DecodeResult};
use reel_core::{FrameRate, TimeBase};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error};

/// Codecs whose files hold a single still frame.
const STILL_IMAGE_CODECS: &[&str] = &["png", "apng", "tiff", "psd", "bmp", "mjpeg", "webp", "jpegls"];

/// Pixel format prefixes that carry an alpha channel.
const ALPHA_PIX_FMT_PREFIXES: &[&str] = &["rgba", "bgra", "argb", "abgr", "yuva", "gbrap", "ya", "pal8"];

/// Field order of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldOrder {
    #[default]
    Progressive,
    TopFirst,
    BottomFirst,
}

impl FieldOrder {
    /// Map ffprobe's `field_order` value. Anything interlaced that isn't
    /// top-coded-top-displayed is treated as bottom first.
    pub fn from_ffprobe(value: &str) -> Self {
        match value {
            "tt" => Self::TopFirst,
            "bb" | "tb" | "bt" => Self::BottomFirst,
            _ => Self::Progressive,
        }
    }

    pub fn is_interlaced(self) -> bool {
        !matches!(self, Self::Progressive)
    }
}

/// Information about a video stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub pixel_format: String,
    pub field_order: FieldOrder,
}

impl VideoStream {
    pub fn has_alpha(&self) -> bool {
        ALPHA_PIX_FMT_PREFIXES
            .iter()
            .any(|prefix| self.pixel_format.starts_with(prefix))
    }
}

/// Information about an audio stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamKind {
    Video(VideoStream),
    Audio(AudioStream),
}

/// One decodable stream of a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub codec: String,
    pub time_base: TimeBase,
    /// First timestamp of the stream, in ticks.
    pub start_time: i64,
    /// Stream length in ticks, when the container reports it.
    pub duration: Option<i64>,
    /// Single-frame sources (stills) that can be shown at any length.
    pub infinite_length: bool,
    pub kind: StreamKind,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, StreamKind::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Audio(_))
    }

    pub fn video(&self) -> Option<&VideoStream> {
        match &self.kind {
            StreamKind::Video(v) => Some(v),
            StreamKind::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioStream> {
        match &self.kind {
            StreamKind::Audio(a) => Some(a),
            StreamKind::Video(_) => None,
        }
    }

    /// Whether the stream is interlaced and will be deinterlaced on decode.
    pub fn interlaced(&self) -> bool {
        self.video().is_some_and(|v| v.field_order.is_interlaced())
    }

    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.video().map(|v| v.frame_rate)
    }

    /// Stream length in seconds.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration.map(|d| self.time_base.to_seconds(d))
    }
}

/// Information about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    /// Container format
    pub format: String,
    /// Container duration in seconds
    pub duration_seconds: Option<f64>,
    pub streams: Vec<StreamInfo>,
}

// ── ffprobe JSON ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    field_order: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    time_base: Option<String>,
    start_pts: Option<i64>,
    duration_ts: Option<i64>,
    duration: Option<String>,
    nb_frames: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

impl MediaInfo {
    /// Probe a media file with `ffprobe`.
    pub fn probe<P: AsRef<Path>>(path: P) -> DecodeResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DecodeError::open_failed(path, "file not found"));
        }

        let ffprobe = which::which("ffprobe")
            .map_err(|e| DecodeError::open_failed(path, format!("ffprobe not found: {}", e)))?;

        debug!("Probing {}", path.display());
        let output = Command::new(ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()
            .map_err(|e| DecodeError::open_failed(path, format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("ffprobe failed for {}: {}", path.display(), stderr.trim());
            return Err(DecodeError::open_failed(path, stderr.trim()));
        }

        Self::from_ffprobe_json(path, &output.stdout)
    }

    /// Parse the JSON document printed by
    /// `ffprobe -print_format json -show_streams -show_format`.
    pub fn from_ffprobe_json(path: &Path, data: &[u8]) -> DecodeResult<Self> {
        let raw: ProbeOutput = serde_json::from_slice(data)
            .map_err(|e| DecodeError::stream_info_failed(path, format!("invalid ffprobe output: {}", e)))?;

        let format = raw
            .format
            .as_ref()
            .and_then(|f| f.format_name.clone())
            .unwrap_or_default();
        let duration_seconds = raw
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok());

        let streams: Vec<StreamInfo> = raw
            .streams
            .into_iter()
            .filter_map(|s| convert_stream(s, &format, duration_seconds))
            .collect();

        if streams.is_empty() {
            return Err(DecodeError::stream_info_failed(path, "no audio or video streams"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            format,
            duration_seconds,
            streams,
        })
    }

    /// Look up a stream by its container index.
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.index == index)
    }

    pub fn has_video(&self) -> bool {
        self.streams.iter().any(StreamInfo::is_video)
    }

    pub fn has_audio(&self) -> bool {
        self.streams.iter().any(StreamInfo::is_audio)
    }

    pub fn primary_video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is_video())
    }

    pub fn primary_audio(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is_audio())
    }
}

fn convert_stream(s: ProbeStream, format: &str, container_duration: Option<f64>) -> Option<StreamInfo> {
    let time_base = s
        .time_base
        .as_deref()
        .and_then(TimeBase::parse_ratio)
        .unwrap_or_default();
    let codec = s.codec_name.clone().unwrap_or_default();

    let mut duration = s.duration_ts.or_else(|| {
        s.duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .or(container_duration)
            .map(|secs| time_base.from_seconds(secs))
    });

    let kind = match s.codec_type.as_deref()? {
        "video" => {
            let frame_rate = s
                .avg_frame_rate
                .as_deref()
                .and_then(FrameRate::parse_ratio)
                .or_else(|| s.r_frame_rate.as_deref().and_then(FrameRate::parse_ratio))
                .unwrap_or_default();
            StreamKind::Video(VideoStream {
                width: s.width.unwrap_or(0),
                height: s.height.unwrap_or(0),
                frame_rate,
                pixel_format: s.pix_fmt.clone().unwrap_or_default(),
                field_order: s
                    .field_order
                    .as_deref()
                    .map(FieldOrder::from_ffprobe)
                    .unwrap_or_default(),
            })
        }
        "audio" => StreamKind::Audio(AudioStream {
            sample_rate: s.sample_rate.as_deref().and_then(|r| r.parse().ok()).unwrap_or(0),
            channels: s.channels.unwrap_or(2),
        }),
        _ => return None,
    };

    let single_frame = s.nb_frames.as_deref().map_or(true, |n| n == "1" || n == "0");
    let image_container = format == "image2" || format.ends_with("_pipe");
    let infinite_length = matches!(kind, StreamKind::Video(_))
        && STILL_IMAGE_CODECS.contains(&codec.as_str())
        && image_container
        && single_frame;
    if infinite_length {
        duration = None;
    }

    Some(StreamInfo {
        index: s.index,
        codec,
        time_base,
        start_time: s.start_pts.unwrap_or(0),
        duration,
        infinite_length,
        kind,
    })
}
