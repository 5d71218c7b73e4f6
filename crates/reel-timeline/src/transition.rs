//! Transitions between clips.
//!
//! A transition sits on the opening or closing edge of its parent clip. When
//! it joins two clips it also names a secondary clip by id; ownership stays
//! with the sequence arena.

use reel_core::{ReelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clip::ClipId;

/// Stable handle of a transition in a [`crate::Sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub u32);

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transition#{}", self.0)
    }
}

/// Which edge of a clip a transition covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionEdge {
    Opening,
    Closing,
}

/// Per-pixel recipe for the compositor at one point of a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelOp {
    /// `outgoing * (1 - mix) + incoming * mix`.
    Blend { mix: f32 },
    /// Scale the clip's contribution.
    Opacity(f32),
    /// Mix toward a solid colour; `amount` peaks mid-transition.
    Tint { colour: [u8; 3], amount: f32 },
    /// Cube face rotation in degrees, 0 to 90.
    Rotate { angle: f32 },
}

/// The built-in transition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransitionKind {
    CrossDissolve,
    LinearFade,
    ExponentialFade,
    LogarithmicFade,
    Cube,
    DipToColour { colour: [u8; 3] },
}

impl TransitionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CrossDissolve => "Cross Dissolve",
            Self::LinearFade => "Linear Fade",
            Self::ExponentialFade => "Exponential Fade",
            Self::LogarithmicFade => "Logarithmic Fade",
            Self::Cube => "Cube",
            Self::DipToColour { .. } => "Dip to Colour",
        }
    }

    /// Pixel recipe at `progress` in [0, 1].
    pub fn apply(&self, progress: f64) -> PixelOp {
        let p = progress.clamp(0.0, 1.0) as f32;
        match *self {
            Self::CrossDissolve => PixelOp::Blend { mix: p },
            Self::LinearFade => PixelOp::Opacity(p),
            Self::ExponentialFade => PixelOp::Opacity(p * p),
            Self::LogarithmicFade => PixelOp::Opacity(p.sqrt()),
            Self::Cube => PixelOp::Rotate { angle: p * 90.0 },
            Self::DipToColour { colour } => PixelOp::Tint {
                colour,
                amount: 1.0 - (2.0 * p - 1.0).abs(),
            },
        }
    }

    /// Audio gain at `progress` for a clip fading in.
    pub fn audio_gain(&self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            Self::CrossDissolve | Self::LinearFade => p,
            Self::ExponentialFade => p * p,
            Self::LogarithmicFade => p.sqrt(),
            Self::Cube | Self::DipToColour { .. } => 1.0,
        }
    }
}

/// A transition instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub parent: ClipId,
    pub secondary: Option<ClipId>,
    length: i64,
}

impl Transition {
    pub fn new(kind: TransitionKind, parent: ClipId, secondary: Option<ClipId>, length: i64) -> Result<Self> {
        let mut transition = Self {
            kind,
            parent,
            secondary,
            length: 1,
        };
        transition.set_length(length)?;
        Ok(transition)
    }

    /// Length in sequence frames on one side of the cut.
    pub fn true_length(&self) -> i64 {
        self.length
    }

    /// Total span: both sides of the cut when a secondary clip is attached.
    pub fn length(&self) -> i64 {
        if self.secondary.is_some() {
            self.length * 2
        } else {
            self.length
        }
    }

    pub fn set_length(&mut self, length: i64) -> Result<()> {
        if length <= 0 {
            return Err(ReelError::InvalidParameter(format!(
                "transition length must be positive, got {}",
                length
            )));
        }
        self.length = length;
        Ok(())
    }
}
