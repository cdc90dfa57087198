//! Smoothing of remote entities between sparse snapshots
//!
//! Remote entities are drawn [`INTERPOLATION_DELAY_MS`](shared::INTERPOLATION_DELAY_MS)
//! in the past so that there is usually a snapshot on each side of the time
//! being rendered. Snapshots arrive on the unreliable channel and may be out
//! of order; the history is re-sorted whenever the newest arrival is older
//! than the one before it.

use shared::entity::wrap_coordinate;
use shared::{Snapshot, WORLD_HALF_EXTENT};
use std::f32::consts::PI;

/// Upper bound on buffered snapshots per entity
pub const MAX_HISTORY: usize = 64;

/// Rendered position and heading of a remote entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub ori: f32,
}

impl Pose {
    fn of(snapshot: &Snapshot) -> Self {
        Self {
            x: snapshot.x,
            y: snapshot.y,
            ori: snapshot.ori,
        }
    }
}

/// Wraps an angle difference once into (-π, π]
pub fn shortest_angle(delta: f32) -> f32 {
    if delta > PI {
        delta - 2.0 * PI
    } else if delta <= -PI {
        delta + 2.0 * PI
    } else {
        delta
    }
}

/// Blends two coordinates of the wrapped world along the shorter side
fn lerp_wrapped(from: f32, to: f32, t: f32) -> f32 {
    let delta = wrap_coordinate(to - from, WORLD_HALF_EXTENT);
    wrap_coordinate(from + delta * t, WORLD_HALF_EXTENT)
}

#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    history: Vec<Snapshot>,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a snapshot. Returns false for a frame that is already buffered.
    pub fn push(&mut self, snapshot: Snapshot) -> bool {
        if self.history.iter().any(|s| s.frame == snapshot.frame) {
            return false;
        }

        self.history.push(snapshot);
        let len = self.history.len();
        if len >= 2 && self.history[len - 1].frame < self.history[len - 2].frame {
            self.history.sort_by_key(|s| (s.timestamp_ms, s.frame));
        }

        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn history(&self) -> &[Snapshot] {
        &self.history
    }

    pub fn newest(&self) -> Option<Pose> {
        self.history.last().map(Pose::of)
    }

    /// Pose at server time `target_ms`, or `None` before the first snapshot.
    ///
    /// Snapshots no longer needed for `target_ms` are dropped, so targets are
    /// expected to move forward.
    pub fn sample(&mut self, target_ms: u64) -> Option<Pose> {
        if self.history.is_empty() {
            return None;
        }

        while self.history.len() > 2 && self.history[1].timestamp_ms < target_ms {
            self.history.remove(0);
        }

        let oldest = &self.history[0];
        if self.history.len() < 2 || target_ms <= oldest.timestamp_ms {
            return Some(Pose::of(oldest));
        }

        let mut index = 0;
        while index < self.history.len() - 1 && self.history[index + 1].timestamp_ms <= target_ms {
            index += 1;
        }
        if index >= self.history.len() - 1 {
            return self.newest();
        }

        let s1 = &self.history[index];
        let s2 = &self.history[index + 1];

        let span = s2.timestamp_ms - s1.timestamp_ms;
        let t = if span > 0 {
            ((target_ms - s1.timestamp_ms) as f32 / span as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Some(Pose {
            x: lerp_wrapped(s1.x, s2.x, t),
            y: lerp_wrapped(s1.y, s2.y, t),
            ori: s1.ori + shortest_angle(s2.ori - s1.ori) * t,
        })
    }
}
