//! Time representation shared by the sequence and the source streams.
//!
//! Sequence positions are integer frame numbers at a `FrameRate`; source
//! positions are integer ticks of a stream's `TimeBase`. The conversions
//! between the two live in [`crate::playhead`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame rate as a rational number (e.g., 24000/1001 for 23.976 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    /// Numerator (e.g., 24000)
    pub numerator: u32,
    /// Denominator (e.g., 1001)
    pub denominator: u32,
}

impl FrameRate {
    /// Create a new frame rate.
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Convert to frames per second as f64.
    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }

    /// Parse an ffprobe-style ratio such as `30000/1001` or a bare `25`.
    /// Returns `None` for malformed input and for `0/0`.
    pub fn parse_ratio(s: &str) -> Option<Self> {
        let (num, den) = match s.split_once('/') {
            Some((n, d)) => (n.trim().parse().ok()?, d.trim().parse().ok()?),
            None => (s.trim().parse().ok()?, 1),
        };
        if num == 0 || den == 0 {
            return None;
        }
        Some(Self::new(num, den))
    }

    /// Common frame rates
    pub const FPS_23_976: Self = Self::new(24000, 1001);
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_50: Self = Self::new(50, 1);
    pub const FPS_59_94: Self = Self::new(60000, 1001);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.to_fps_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}

/// The tick unit of a source stream: one tick lasts `numerator / denominator`
/// seconds. All decoded timestamps are expressed in ticks of their stream's
/// time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub numerator: i32,
    pub denominator: i32,
}

impl TimeBase {
    #[inline]
    pub const fn new(numerator: i32, denominator: i32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Millisecond ticks, the container default.
    pub const MILLIS: Self = Self::new(1, 1000);

    /// MPEG-TS 90 kHz clock.
    pub const MPEG_90K: Self = Self::new(1, 90_000);

    /// Parse an ffprobe-style `1/90000` time base.
    pub fn parse_ratio(s: &str) -> Option<Self> {
        let (num, den) = s.split_once('/')?;
        let num: i32 = num.trim().parse().ok()?;
        let den: i32 = den.trim().parse().ok()?;
        if num <= 0 || den <= 0 {
            return None;
        }
        Some(Self::new(num, den))
    }

    /// Duration of one tick in seconds.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Number of ticks in one second, rounded to the nearest tick.
    #[inline]
    pub fn ticks_per_second(self) -> i64 {
        (self.denominator as f64 / self.numerator as f64).round() as i64
    }

    /// Number of ticks in a quarter second.
    #[inline]
    pub fn quarter_second(self) -> i64 {
        self.ticks_per_second() >> 2
    }

    /// Seconds represented by `ticks`.
    #[inline]
    pub fn to_seconds(self, ticks: i64) -> f64 {
        ticks as f64 * self.to_f64()
    }

    /// Nearest tick for `seconds`.
    #[inline]
    pub fn from_seconds(self, seconds: f64) -> i64 {
        (seconds / self.to_f64()).round() as i64
    }

    /// Ticks covered by one frame at `rate`, at least one.
    pub fn frame_duration(self, rate: FrameRate) -> i64 {
        let fps = rate.to_fps_f64();
        if fps <= 0.0 {
            return 1;
        }
        self.from_seconds(1.0 / fps).max(1)
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MILLIS
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_23_976() {
        let rate = FrameRate::FPS_23_976;
        let fps = rate.to_fps_f64();
        assert!((fps - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_frame_rate_parse() {
        assert_eq!(FrameRate::parse_ratio("30000/1001"), Some(FrameRate::FPS_29_97));
        assert_eq!(FrameRate::parse_ratio("25"), Some(FrameRate::FPS_25));
        assert_eq!(FrameRate::parse_ratio("0/0"), None);
        assert_eq!(FrameRate::parse_ratio("abc"), None);
    }

    #[test]
    fn test_frame_rate_display() {
        assert_eq!(FrameRate::FPS_24.to_string(), "24 fps");
        assert_eq!(FrameRate::FPS_29_97.to_string(), "29.970 fps");
    }

    #[test]
    fn test_time_base_ticks() {
        assert_eq!(TimeBase::MPEG_90K.ticks_per_second(), 90_000);
        assert_eq!(TimeBase::MPEG_90K.quarter_second(), 22_500);
        assert_eq!(TimeBase::new(1001, 30000).ticks_per_second(), 30);
    }

    #[test]
    fn test_time_base_seconds_round_trip() {
        let tb = TimeBase::new(1, 48_000);
        assert_eq!(tb.from_seconds(1.5), 72_000);
        assert!((tb.to_seconds(72_000) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_time_base_parse() {
        assert_eq!(TimeBase::parse_ratio("1/90000"), Some(TimeBase::MPEG_90K));
        assert_eq!(TimeBase::parse_ratio("0/1"), None);
        assert_eq!(TimeBase::parse_ratio("90000"), None);
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(TimeBase::MPEG_90K.frame_duration(FrameRate::FPS_30), 3000);
        assert_eq!(TimeBase::new(1, 30).frame_duration(FrameRate::FPS_30), 1);
    }
}
