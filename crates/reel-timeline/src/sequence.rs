//! The clip arena.
//!
//! Clips and transitions live in id-keyed maps; transitions refer to their
//! clips by id and clips to their transitions the same way, so no ownership
//! cycle exists between a clip, its transition, and the clip on the other
//! side of the cut.

use reel_core::{FrameRate, ReelError, Result};
use std::collections::BTreeMap;
use tracing::debug;

use crate::clip::{ClipConfig, ClipId, TrackKind};
use crate::transition::{Transition, TransitionEdge, TransitionId, TransitionKind};

/// A transition's span in clip time, used for audio gain ramps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionSpan {
    pub kind: TransitionKind,
    pub edge: TransitionEdge,
    /// Clip-relative seconds.
    pub start: f64,
    pub end: f64,
}

impl TransitionSpan {
    /// Gain at clip time `seconds`. Unity outside the span's fading side.
    pub fn gain_at(&self, seconds: f64) -> f64 {
        let length = self.end - self.start;
        if length <= 0.0 {
            return 1.0;
        }
        let progress = ((seconds - self.start) / length).clamp(0.0, 1.0);
        match self.edge {
            TransitionEdge::Opening => self.kind.audio_gain(progress),
            TransitionEdge::Closing => self.kind.audio_gain(1.0 - progress),
        }
    }

    /// Whether a block covering `[start, end)` seconds needs this span's gain.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        match self.edge {
            TransitionEdge::Opening => start < self.end,
            TransitionEdge::Closing => end > self.start,
        }
    }
}

/// Timeline bounds of a clip with its transitions applied.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipPlacement {
    pub timeline_in: i64,
    pub timeline_out: i64,
    pub clip_in: i64,
    pub opening: Option<TransitionSpan>,
    pub closing: Option<TransitionSpan>,
}

impl ClipPlacement {
    /// Placement of a clip without transitions.
    pub fn plain(config: &ClipConfig) -> Self {
        Self {
            timeline_in: config.timeline_in,
            timeline_out: config.timeline_out,
            clip_in: config.clip_in,
            opening: None,
            closing: None,
        }
    }

    pub fn length(&self) -> i64 {
        self.timeline_out - self.timeline_in
    }
}

/// A timeline: the arena of clips and transitions.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub name: String,
    pub frame_rate: FrameRate,
    clips: BTreeMap<ClipId, ClipConfig>,
    transitions: BTreeMap<TransitionId, Transition>,
    next_clip: u32,
    next_transition: u32,
}

impl Sequence {
    pub fn new(name: impl Into<String>, frame_rate: FrameRate) -> Self {
        Self {
            name: name.into(),
            frame_rate,
            clips: BTreeMap::new(),
            transitions: BTreeMap::new(),
            next_clip: 0,
            next_transition: 0,
        }
    }

    fn not_found(id: ClipId) -> ReelError {
        ReelError::NotFound(format!("{} is not in the sequence", id))
    }

    /// Add a clip. Transition references on `config` are dropped; attach
    /// transitions with [`Sequence::add_transition`].
    pub fn add_clip(&mut self, mut config: ClipConfig) -> Result<ClipId> {
        validate_bounds(config.timeline_in, config.timeline_out, config.clip_in)?;
        validate_speed(config.speed)?;
        config.opening_transition = None;
        config.closing_transition = None;

        let id = ClipId(self.next_clip);
        self.next_clip += 1;
        debug!("Added {} '{}' at {}..{}", id, config.name, config.timeline_in, config.timeline_out);
        self.clips.insert(id, config);
        Ok(id)
    }

    /// Remove a clip. Transitions it owns are removed; transitions where it
    /// is the secondary clip lose their secondary.
    pub fn remove_clip(&mut self, id: ClipId) -> Result<ClipConfig> {
        let config = self.clips.get(&id).ok_or_else(|| Self::not_found(id))?;
        let attached: Vec<TransitionId> = config
            .opening_transition
            .into_iter()
            .chain(config.closing_transition)
            .collect();

        for tid in attached {
            let owned = self.transitions.get(&tid).is_some_and(|t| t.parent == id);
            if owned {
                self.remove_transition(tid)?;
            } else if let Some(transition) = self.transitions.get_mut(&tid) {
                transition.secondary = None;
            }
        }

        let removed = self.clips.remove(&id).ok_or_else(|| Self::not_found(id))?;
        debug!("Removed {} '{}'", id, removed.name);
        Ok(removed)
    }

    pub fn clip(&self, id: ClipId) -> Option<&ClipConfig> {
        self.clips.get(&id)
    }

    /// Mutable access for settings that don't affect transitions. Placement
    /// changes go through the edit operations.
    pub fn clip_mut(&mut self, id: ClipId) -> Option<&mut ClipConfig> {
        self.clips.get_mut(&id)
    }

    pub fn clips(&self) -> impl Iterator<Item = (ClipId, &ClipConfig)> {
        self.clips.iter().map(|(id, c)| (*id, c))
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    /// Attach a transition to `parent`.
    ///
    /// A transition shared with `secondary` always sits on the parent's
    /// closing edge and the secondary's opening edge.
    pub fn add_transition(
        &mut self,
        kind: TransitionKind,
        parent: ClipId,
        secondary: Option<ClipId>,
        length: i64,
        opening: bool,
    ) -> Result<TransitionId> {
        if opening && secondary.is_some() {
            return Err(ReelError::InvalidParameter(
                "a shared transition must sit on the parent's closing edge".into(),
            ));
        }
        let transition = Transition::new(kind, parent, secondary, length)?;

        let parent_clip = self.clips.get(&parent).ok_or_else(|| Self::not_found(parent))?;
        let parent_slot = if opening {
            parent_clip.opening_transition
        } else {
            parent_clip.closing_transition
        };
        if parent_slot.is_some() {
            return Err(ReelError::Timeline(format!("{} already has a transition on that edge", parent)));
        }
        if let Some(sid) = secondary {
            if sid == parent {
                return Err(ReelError::InvalidParameter("a clip cannot transition into itself".into()));
            }
            let secondary_clip = self.clips.get(&sid).ok_or_else(|| Self::not_found(sid))?;
            if secondary_clip.opening_transition.is_some() {
                return Err(ReelError::Timeline(format!("{} already has an opening transition", sid)));
            }
        }

        let id = TransitionId(self.next_transition);
        self.next_transition += 1;
        if let Some(clip) = self.clips.get_mut(&parent) {
            if opening {
                clip.opening_transition = Some(id);
            } else {
                clip.closing_transition = Some(id);
            }
        }
        if let Some(clip) = secondary.and_then(|sid| self.clips.get_mut(&sid)) {
            clip.opening_transition = Some(id);
        }
        debug!("Added {} ({}) to {}", id, kind.name(), parent);
        self.transitions.insert(id, transition);
        Ok(id)
    }

    /// Remove a transition and clear every clip reference to it.
    pub fn remove_transition(&mut self, id: TransitionId) -> Result<Transition> {
        let transition = self
            .transitions
            .remove(&id)
            .ok_or_else(|| ReelError::NotFound(format!("{} is not in the sequence", id)))?;
        for clip in self.clips.values_mut() {
            if clip.opening_transition == Some(id) {
                clip.opening_transition = None;
            }
            if clip.closing_transition == Some(id) {
                clip.closing_transition = None;
            }
        }
        Ok(transition)
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.get(&id)
    }

    pub fn transition_mut(&mut self, id: TransitionId) -> Option<&mut Transition> {
        self.transitions.get_mut(&id)
    }

    fn opening(&self, config: &ClipConfig) -> Option<&Transition> {
        config.opening_transition.and_then(|t| self.transitions.get(&t))
    }

    fn closing(&self, config: &ClipConfig) -> Option<&Transition> {
        config.closing_transition.and_then(|t| self.transitions.get(&t))
    }

    /// Extension into earlier frames from a shared opening transition.
    fn opening_extension(&self, config: &ClipConfig) -> i64 {
        self.opening(config)
            .filter(|t| t.secondary.is_some())
            .map_or(0, Transition::true_length)
    }

    pub fn clip_in_with_transition(&self, id: ClipId) -> Option<i64> {
        let config = self.clips.get(&id)?;
        Some(config.clip_in - self.opening_extension(config))
    }

    pub fn timeline_in_with_transition(&self, id: ClipId) -> Option<i64> {
        let config = self.clips.get(&id)?;
        Some(config.timeline_in - self.opening_extension(config))
    }

    pub fn timeline_out_with_transition(&self, id: ClipId) -> Option<i64> {
        let config = self.clips.get(&id)?;
        let extension = self
            .closing(config)
            .filter(|t| t.secondary.is_some())
            .map_or(0, Transition::true_length);
        Some(config.timeline_out + extension)
    }

    /// Transition-adjusted bounds and audio gain spans of a clip.
    pub fn placement(&self, id: ClipId) -> Option<ClipPlacement> {
        let config = self.clips.get(&id)?;
        let clip_in = self.clip_in_with_transition(id)?;
        let timeline_in = self.timeline_in_with_transition(id)?;
        let timeline_out = self.timeline_out_with_transition(id)?;
        let rate = self.frame_rate.to_fps_f64();
        let length = timeline_out - timeline_in;

        let opening = self.opening(config).map(|t| TransitionSpan {
            kind: t.kind,
            edge: TransitionEdge::Opening,
            start: clip_in as f64 / rate,
            end: (clip_in + t.length()) as f64 / rate,
        });
        let closing = self.closing(config).map(|t| TransitionSpan {
            kind: t.kind,
            edge: TransitionEdge::Closing,
            start: (clip_in + length - t.length()) as f64 / rate,
            end: (clip_in + length) as f64 / rate,
        });

        Some(ClipPlacement {
            timeline_in,
            timeline_out,
            clip_in,
            opening,
            closing,
        })
    }

    /// Last frame any clip occupies.
    pub fn end_frame(&self) -> i64 {
        self.clips.values().map(|c| c.timeline_out).max().unwrap_or(0)
    }

    fn clip_entry(&mut self, id: ClipId) -> Result<&mut ClipConfig> {
        self.clips.get_mut(&id).ok_or_else(|| Self::not_found(id))
    }

    /// Shift a clip by `delta` frames, optionally onto another track of the
    /// same kind.
    pub fn move_clip(&mut self, id: ClipId, delta: i64, new_track: Option<i32>) -> Result<()> {
        let clip = self.clip_entry(id)?;
        if clip.timeline_in + delta < 0 {
            return Err(ReelError::InvalidParameter(format!(
                "moving {} by {} would start before frame 0",
                id, delta
            )));
        }
        if let Some(track) = new_track {
            if TrackKind::from_track(track) != clip.track_kind() {
                return Err(ReelError::InvalidParameter(format!(
                    "track {} holds a different kind of media than {}",
                    track, id
                )));
            }
            clip.track = track;
        }
        clip.timeline_in += delta;
        clip.timeline_out += delta;
        Ok(())
    }

    /// Move the in point by `delta` frames, adjusting the source offset to
    /// match. Positive deltas shorten the clip.
    pub fn trim_in(&mut self, id: ClipId, delta: i64) -> Result<()> {
        let clip = self.clip_entry(id)?;
        let timeline_in = clip.timeline_in + delta;
        let clip_in = clip.clip_in + delta;
        validate_bounds(timeline_in, clip.timeline_out, clip_in)?;
        clip.timeline_in = timeline_in;
        clip.clip_in = clip_in;
        Ok(())
    }

    /// Move the out point by `delta` frames.
    pub fn trim_out(&mut self, id: ClipId, delta: i64) -> Result<()> {
        let clip = self.clip_entry(id)?;
        let timeline_out = clip.timeline_out + delta;
        validate_bounds(clip.timeline_in, timeline_out, clip.clip_in)?;
        clip.timeline_out = timeline_out;
        Ok(())
    }

    /// Split a clip at timeline `frame`. The original keeps the part before
    /// the cut and its opening transition; the new clip takes the rest and
    /// the closing transition.
    pub fn split(&mut self, id: ClipId, frame: i64) -> Result<ClipId> {
        let original = self.clips.get(&id).ok_or_else(|| Self::not_found(id))?;
        if frame <= original.timeline_in || frame >= original.timeline_out {
            return Err(ReelError::InvalidParameter(format!(
                "split point {} is outside {}..{} of {}",
                frame, original.timeline_in, original.timeline_out, id
            )));
        }

        let mut tail = original.clone();
        tail.clip_in += frame - original.timeline_in;
        tail.timeline_in = frame;
        tail.opening_transition = None;
        let closing = tail.closing_transition;

        let new_id = ClipId(self.next_clip);
        self.next_clip += 1;
        self.clips.insert(new_id, tail);

        if let Some(head) = self.clips.get_mut(&id) {
            head.timeline_out = frame;
            head.closing_transition = None;
        }
        if let Some(transition) = closing.and_then(|t| self.transitions.get_mut(&t)) {
            if transition.parent == id {
                transition.parent = new_id;
            }
        }
        debug!("Split {} at {} into {}", id, frame, new_id);
        Ok(new_id)
    }

    /// Change speed, keeping the same source span: the timeline length and
    /// source offset scale by `old / new`.
    pub fn set_speed(&mut self, id: ClipId, speed: f64) -> Result<()> {
        validate_speed(speed)?;
        let clip = self.clip_entry(id)?;
        let ratio = clip.speed / speed;
        let length = ((clip.length() as f64 * ratio).round() as i64).max(1);
        clip.clip_in = (clip.clip_in as f64 * ratio).round() as i64;
        clip.timeline_out = clip.timeline_in + length;
        clip.speed = speed;
        Ok(())
    }
}

fn validate_bounds(timeline_in: i64, timeline_out: i64, clip_in: i64) -> Result<()> {
    if timeline_in < 0 || clip_in < 0 {
        return Err(ReelError::InvalidParameter(format!(
            "clip bounds must not be negative (in {}, clip in {})",
            timeline_in, clip_in
        )));
    }
    if timeline_out <= timeline_in {
        return Err(ReelError::InvalidParameter(format!(
            "clip out {} must follow clip in {}",
            timeline_out, timeline_in
        )));
    }
    Ok(())
}

fn validate_speed(speed: f64) -> Result<()> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(ReelError::InvalidParameter(format!("speed must be positive, got {}", speed)));
    }
    Ok(())
}
