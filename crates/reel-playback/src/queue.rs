//! Time-ordered store of decoded video frames.
//!
//! Frames are kept in decode order; lookups scan by timestamp. The queue
//! holds a handful of frames, so linear scans beat keeping it sorted. It
//! carries no lock of its own: the owning clip guards it.

use reel_core::{QueueUnit, QueueWindow, SharedFrame};

/// Direction the playhead moves through the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayDirection {
    #[default]
    Forward,
    Reverse,
}

impl PlayDirection {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Self::Reverse
        } else {
            Self::Forward
        }
    }

    /// Whether `pts` has already been played relative to `anchor`.
    fn is_behind(self, pts: i64, anchor: i64) -> bool {
        match self {
            Self::Forward => pts < anchor,
            Self::Reverse => pts > anchor,
        }
    }
}

/// Bounded set of decoded frames for one clip.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: Vec<SharedFrame>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, frame: SharedFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedFrame> {
        self.frames.iter()
    }

    /// Index of the frame closest to `target` without passing it: the
    /// greatest pts at or before `target` going forward, the smallest pts at
    /// or after it in reverse.
    pub fn nearest_index(&self, target: i64, direction: PlayDirection) -> Option<usize> {
        let candidates = self.frames.iter().enumerate();
        match direction {
            PlayDirection::Forward => candidates
                .filter(|(_, f)| f.pts <= target)
                .max_by_key(|(_, f)| f.pts)
                .map(|(i, _)| i),
            PlayDirection::Reverse => candidates
                .filter(|(_, f)| f.pts >= target)
                .min_by_key(|(_, f)| f.pts)
                .map(|(i, _)| i),
        }
    }

    pub fn nearest(&self, target: i64, direction: PlayDirection) -> Option<SharedFrame> {
        self.nearest_index(target, direction)
            .map(|i| SharedFrame::clone(&self.frames[i]))
    }

    fn remove_where(&mut self, pick: impl Fn(&[SharedFrame]) -> Option<usize>) -> Option<SharedFrame> {
        pick(&self.frames).map(|i| self.frames.remove(i))
    }

    /// Remove the frame with the smallest pts.
    pub fn evict_earliest(&mut self) -> Option<SharedFrame> {
        self.remove_where(|frames| {
            frames
                .iter()
                .enumerate()
                .min_by_key(|(_, f)| f.pts)
                .map(|(i, _)| i)
        })
    }

    /// Remove the frame with the largest pts.
    pub fn evict_latest(&mut self) -> Option<SharedFrame> {
        self.remove_where(|frames| {
            frames
                .iter()
                .enumerate()
                .max_by_key(|(_, f)| f.pts)
                .map(|(i, _)| i)
        })
    }

    /// Remove the frame furthest behind `target` for the play direction.
    /// In reverse, when nothing is behind the target yet, the frame furthest
    /// ahead goes instead.
    pub fn evict_furthest_past(&mut self, target: i64, direction: PlayDirection) -> Option<SharedFrame> {
        match direction {
            PlayDirection::Forward => self.evict_earliest(),
            PlayDirection::Reverse => {
                if self.frames.iter().any(|f| f.pts > target) {
                    self.evict_latest()
                } else {
                    self.evict_earliest()
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn min_pts(&self) -> Option<i64> {
        self.frames.iter().map(|f| f.pts).min()
    }

    pub fn max_pts(&self) -> Option<i64> {
        self.frames.iter().map(|f| f.pts).max()
    }

    pub fn has_frame_at_or_after(&self, ts: i64) -> bool {
        self.frames.iter().any(|f| f.pts >= ts)
    }

    /// Smallest pts strictly after `pts`.
    pub fn next_pts_after(&self, pts: i64) -> Option<i64> {
        self.frames.iter().map(|f| f.pts).filter(|&p| p > pts).min()
    }

    /// Drop frames that fell out of the look-behind window of the frame at
    /// `anchor`. The anchor frame itself is always kept. Returns the number
    /// of frames removed.
    pub fn prune_behind(&mut self, anchor: i64, direction: PlayDirection, window: QueueWindow, ticks_per_second: i64) -> usize {
        let before = self.frames.len();
        match window.unit {
            QueueUnit::Seconds => {
                let reach = (ticks_per_second as f64 * window.size.max(0.0)).round() as i64;
                self.frames.retain(|f| {
                    f.pts == anchor
                        || match direction {
                            PlayDirection::Forward => f.pts > anchor - reach,
                            PlayDirection::Reverse => f.pts < anchor + reach,
                        }
                });
            }
            QueueUnit::Frames => {
                let keep = window.size.max(0.0).ceil() as usize;
                let mut behind = self.frames.iter().filter(|f| direction.is_behind(f.pts, anchor)).count();
                while behind > keep {
                    let removed = match direction {
                        PlayDirection::Forward => self.evict_earliest(),
                        PlayDirection::Reverse => self.evict_latest(),
                    };
                    if removed.is_none() {
                        break;
                    }
                    behind -= 1;
                }
            }
        }
        before - self.frames.len()
    }
}
