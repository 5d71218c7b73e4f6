//! Decoded video frames held in CPU memory.

use crate::error::{ReelError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Packed pixel formats produced by the decode filter graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGB (24 bits per pixel)
    #[default]
    Rgb24,
    /// 8-bit RGBA (32 bits per pixel)
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba8 => 4,
        }
    }

    /// Whether the format carries an alpha channel.
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8)
    }

    /// Name of the format on the ffmpeg command line.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Rgb24 => "rgb24",
            Self::Rgba8 => "rgba",
        }
    }

    /// Calculate total bytes needed for a tightly packed frame.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// A packed video frame in CPU memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Pixel format
    pub format: PixelFormat,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes per row
    pub stride: usize,
    /// Raw pixel data
    pub data: Vec<u8>,
}

impl FrameBuffer {
    /// Create a zeroed frame buffer.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            format,
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            data: vec![0u8; format.frame_size(width, height)],
        }
    }

    /// Wrap tightly packed pixel data read from a decoder.
    pub fn from_packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = format.frame_size(width, height);
        if data.len() != expected {
            return Err(ReelError::InvalidParameter(format!(
                "{}x{} {:?} frame needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            format,
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            data,
        })
    }

    /// Total memory usage of this frame in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len()
    }

    /// Get a row of pixel data.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        let end = start + self.width as usize * self.format.bytes_per_pixel();
        &self.data[start..end]
    }

    /// Create a colour bar frame. `shift` rotates the bars so consecutive
    /// frames are distinguishable.
    pub fn test_pattern(width: u32, height: u32, format: PixelFormat, shift: u32) -> Self {
        const BARS: [[u8; 3]; 8] = [
            [255, 255, 255], // White
            [255, 255, 0],   // Yellow
            [0, 255, 255],   // Cyan
            [0, 255, 0],     // Green
            [255, 0, 255],   // Magenta
            [255, 0, 0],     // Red
            [0, 0, 255],     // Blue
            [0, 0, 0],       // Black
        ];

        let mut frame = Self::new(width, height, format);
        let bpp = format.bytes_per_pixel();
        if width == 0 {
            return frame;
        }
        for y in 0..height as usize {
            let row = &mut frame.data[y * frame.stride..(y + 1) * frame.stride];
            for x in 0..width as usize {
                let bar = ((x * 8 / width as usize) + shift as usize) % 8;
                let px = &mut row[x * bpp..(x + 1) * bpp];
                px[..3].copy_from_slice(&BARS[bar]);
                if bpp == 4 {
                    px[3] = 255;
                }
            }
        }
        frame
    }
}

/// A decoded frame together with its presentation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub buffer: FrameBuffer,
    /// Presentation timestamp in source time-base ticks.
    pub pts: i64,
    /// Ticks until the next frame.
    pub duration: i64,
}

impl DecodedFrame {
    pub fn new(buffer: FrameBuffer, pts: i64, duration: i64) -> Self {
        Self {
            buffer,
            pts,
            duration,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.buffer.format
    }
}

/// Arc-wrapped decoded frame, shared between the cache worker and the consumer.
pub type SharedFrame = Arc<DecodedFrame>;
