//! Playback configuration: queue windows and decode behaviour switches.
//!
//! Persisted as JSON next to the other user preferences. A missing file is
//! not an error; the defaults apply.

use crate::error::{ReelError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Unit a queue window is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueUnit {
    Frames,
    Seconds,
}

/// Amount of decoded video to keep on one side of the playhead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueWindow {
    pub size: f64,
    pub unit: QueueUnit,
}

impl QueueWindow {
    pub const fn frames(size: f64) -> Self {
        Self {
            size,
            unit: QueueUnit::Frames,
        }
    }

    pub const fn seconds(size: f64) -> Self {
        Self {
            size,
            unit: QueueUnit::Seconds,
        }
    }

    /// Number of frames this window spans for a stream playing at
    /// `frame_rate` with footage speed `media_speed`.
    pub fn frame_count(&self, frame_rate: f64, media_speed: f64) -> usize {
        let size = self.size.max(0.0);
        let frames = match self.unit {
            QueueUnit::Frames => size.ceil(),
            QueueUnit::Seconds => (frame_rate * media_speed * size).ceil(),
        };
        if frames.is_finite() && frames > 0.0 {
            frames as usize
        } else {
            0
        }
    }
}

/// User-tunable playback settings consumed by the clip cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Look-behind window kept after the playhead has passed.
    pub previous_queue: QueueWindow,
    /// Look-ahead window decoded before the playhead reaches it.
    pub upcoming_queue: QueueWindow,
    /// Keep showing the current frame on an inexact seek instead of
    /// discarding it while the cache resets.
    pub fast_seeking: bool,
    /// Decode image codecs single-threaded.
    pub disable_multithreading_for_images: bool,
    /// Mix buffer sample rate in Hz.
    pub audio_rate: u32,
    /// Mix buffer capacity in bytes.
    pub audio_buffer_bytes: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            previous_queue: QueueWindow::frames(3.0),
            upcoming_queue: QueueWindow::seconds(0.5),
            fast_seeking: false,
            disable_multithreading_for_images: false,
            audio_rate: 48_000,
            // one second of stereo s16
            audio_buffer_bytes: 48_000 * crate::audio_format::FRAME_BYTES,
        }
    }
}

impl PlaybackConfig {
    /// Number of decoded frames a clip may hold at once.
    ///
    /// Interlaced sources are deinterlaced to one frame per field, so their
    /// queues are twice as long. Still images only ever need one frame.
    pub fn max_queue_size(
        &self,
        frame_rate: f64,
        media_speed: f64,
        interlaced: bool,
        infinite_length: bool,
    ) -> usize {
        if infinite_length {
            return 1;
        }
        let mut size = self.upcoming_queue.frame_count(frame_rate, media_speed)
            + self.previous_queue.frame_count(frame_rate, media_speed);
        if interlaced {
            size *= 2;
        }
        size.max(1)
    }

    /// Default config file location: `<config dir>/reel/playback.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("reel").join("playback.json"))
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| {
            ReelError::Serialization(format!("Failed to serialize playback config: {}", e))
        })
    }

    /// Deserialize from JSON bytes. Missing fields take their defaults.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| ReelError::Serialization(format!("Invalid playback config: {}", e)))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No playback config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        let config = Self::from_json(&data)?;
        debug!("Loaded playback config from {}", path.display());
        Ok(config)
    }

    /// Save to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
