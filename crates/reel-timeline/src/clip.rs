//! Clip types for the timeline.

use reel_core::FrameRate;
use reel_media::{MediaInfo, StreamInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::transition::TransitionId;

/// Stable handle of a clip in a [`crate::Sequence`]. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClipId(pub u32);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

/// Kind of track, derived from the sign of the track index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// Negative track indices hold video, the rest audio.
    pub fn from_track(track: i32) -> Self {
        if track < 0 {
            Self::Video
        } else {
            Self::Audio
        }
    }
}

/// An imported media file.
#[derive(Debug, Clone, PartialEq)]
pub struct Footage {
    pub path: PathBuf,
    pub info: MediaInfo,
    /// Footage-level speed, multiplied with the clip speed.
    pub speed: f64,
}

impl Footage {
    pub fn new(info: MediaInfo) -> Self {
        Self {
            path: info.path.clone(),
            info,
            speed: 1.0,
        }
    }
}

/// A sequence placed as a clip inside another sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NestedSequence {
    pub frame_rate: FrameRate,
    /// Last frame of the nested sequence's content.
    pub end_frame: i64,
}

/// What a clip plays.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaRef {
    Footage {
        footage: Arc<Footage>,
        stream_index: usize,
    },
    Sequence(NestedSequence),
}

impl MediaRef {
    pub fn footage(footage: Arc<Footage>, stream_index: usize) -> Self {
        Self::Footage {
            footage,
            stream_index,
        }
    }

    /// The referenced stream, for footage media.
    pub fn stream(&self) -> Option<&StreamInfo> {
        match self {
            Self::Footage {
                footage,
                stream_index,
            } => footage.info.stream(*stream_index),
            Self::Sequence(_) => None,
        }
    }

    /// Footage speed; nested sequences always play at 1.0.
    pub fn media_speed(&self) -> f64 {
        match self {
            Self::Footage { footage, .. } => footage.speed,
            Self::Sequence(_) => 1.0,
        }
    }
}

/// Placement and playback settings of one clip.
///
/// Timeline positions (`timeline_in`, `timeline_out`) are sequence frames;
/// `clip_in` is the offset into the source in clip frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipConfig {
    pub name: String,
    pub media: Option<MediaRef>,
    pub timeline_in: i64,
    pub timeline_out: i64,
    pub clip_in: i64,
    pub track: i32,
    pub speed: f64,
    pub reverse: bool,
    pub maintain_audio_pitch: bool,
    pub autoscale: bool,
    pub enabled: bool,
    pub opening_transition: Option<TransitionId>,
    pub closing_transition: Option<TransitionId>,
}

impl ClipConfig {
    /// A clip spanning `timeline_in..timeline_out` with default settings.
    pub fn new(name: impl Into<String>, media: Option<MediaRef>, timeline_in: i64, timeline_out: i64, track: i32) -> Self {
        Self {
            name: name.into(),
            media,
            timeline_in,
            timeline_out,
            clip_in: 0,
            track,
            speed: 1.0,
            reverse: false,
            maintain_audio_pitch: false,
            autoscale: true,
            enabled: true,
            opening_transition: None,
            closing_transition: None,
        }
    }

    pub fn track_kind(&self) -> TrackKind {
        TrackKind::from_track(self.track)
    }

    pub fn length(&self) -> i64 {
        self.timeline_out - self.timeline_in
    }

    /// Footage speed of the media, 1.0 without footage.
    pub fn media_speed(&self) -> f64 {
        self.media.as_ref().map_or(1.0, MediaRef::media_speed)
    }

    /// Whether the clip decodes through a cache worker.
    pub fn uses_cacher(&self) -> bool {
        matches!(self.media, Some(MediaRef::Footage { .. }))
    }
}
