//! Reel Timeline - Clip placement model
//!
//! Implements the timeline side the playback cache consumes:
//! - Clip configuration (media reference, in/out points, speed, reverse)
//! - Transitions as a closed set of kinds with id-based clip relations
//! - The clip arena (`Sequence`) with edit operations

pub mod clip;
pub mod sequence;
pub mod transition;

pub use clip::{ClipConfig, ClipId, Footage, MediaRef, NestedSequence, TrackKind};
pub use sequence::{ClipPlacement, Sequence, TransitionSpan};
pub use transition::{PixelOp, Transition, TransitionEdge, TransitionId, TransitionKind};
