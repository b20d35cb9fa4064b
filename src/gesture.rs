//! Per-gesture state, the bounded trajectory ring and the gesture phase machine.
//!
//! A gesture is one continuous button-down to button-up interaction:
//!
//! ```text
//! Idle -> (button down) -> Sampling -> (thresholds met AND payload confirmed)
//!      -> Dragging -> (button up) -> Cooldown -> Idle
//! ```
//!
//! A gesture that never gets a confirmed payload goes straight from
//! `Sampling` back to `Idle` on button up.

use crate::event::Point;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of points kept in a trajectory.
pub const TRAJECTORY_CAPACITY: usize = 100;

/// Bounded, time-ordered ring of recent pointer positions.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryRing {
    points: VecDeque<Point>,
}

impl Default for TrajectoryRing {
    fn default() -> Self {
        Self::new()
    }
}

impl TrajectoryRing {
    /// Create an empty ring with its full capacity preallocated.
    pub fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(TRAJECTORY_CAPACITY),
        }
    }

    /// Append a point, evicting the oldest one when full.
    pub fn push(&mut self, point: Point) {
        if self.points.len() == TRAJECTORY_CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// Remove all points, keeping the allocation.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Number of points held.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the ring holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Oldest retained point.
    pub fn first(&self) -> Option<Point> {
        self.points.front().copied()
    }

    /// Newest point.
    pub fn last(&self) -> Option<Point> {
        self.points.back().copied()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Point> + '_ {
        self.points.iter()
    }

    /// Copy the points into a contiguous vector.
    pub fn to_vec(&self) -> Vec<Point> {
        self.points.iter().copied().collect()
    }
}

/// Mutable record of one gesture.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GestureState {
    /// Monotonic identifier of the gesture, 0 before the first gesture.
    pub gesture_id: u64,
    /// Whether a button is currently held for this gesture.
    pub in_progress: bool,
    /// Where the button went down.
    pub start_point: Point,
    /// Most recent pointer position.
    pub last_point: Point,
    /// Timestamp of button down (ms since epoch).
    pub start_time_ms: u64,
    /// Timestamp of the last move (ms since epoch).
    pub last_move_ms: u64,
    /// Cumulative path length.
    pub total_distance: f64,
    /// Number of move samples recorded.
    pub move_count: u32,
    /// Set once the payload source confirmed a non-empty file list.
    pub payload_confirmed: bool,
    /// Set once the gesture cleared the click-rejection thresholds.
    pub thresholds_met: bool,
    /// Recent positions.
    pub trajectory: TrajectoryRing,
    /// Turns sharper than 45 degrees.
    pub direction_changes: u32,
    /// Fastest segment speed (px/ms).
    pub max_velocity: f64,
    /// Mean segment speed (px/ms).
    pub avg_velocity: f64,
    /// Derived: the path loops back on itself.
    pub has_circular_motion: bool,
    /// Derived: the path changes direction often.
    pub has_zigzag_pattern: bool,
}

impl GestureState {
    /// Reset for a new gesture starting at `point`.
    pub fn begin(&mut self, gesture_id: u64, point: Point, timestamp_ms: u64) {
        self.gesture_id = gesture_id;
        self.in_progress = true;
        self.start_point = point;
        self.last_point = point;
        self.start_time_ms = timestamp_ms;
        self.last_move_ms = timestamp_ms;
        self.total_distance = 0.0;
        self.move_count = 0;
        self.payload_confirmed = false;
        self.thresholds_met = false;
        self.trajectory.clear();
        self.trajectory.push(point);
        self.direction_changes = 0;
        self.max_velocity = 0.0;
        self.avg_velocity = 0.0;
        self.has_circular_motion = false;
        self.has_zigzag_pattern = false;
    }

    /// Record one move sample. Returns the segment length.
    pub fn record_move(&mut self, point: Point, timestamp_ms: u64) -> f64 {
        let segment = self.last_point.distance_to(point);
        let dt = timestamp_ms.saturating_sub(self.last_move_ms);

        self.total_distance += segment;
        self.move_count += 1;
        self.last_point = point;
        self.last_move_ms = timestamp_ms;
        self.trajectory.push(point);

        if dt > 0 {
            let velocity = segment / dt as f64;
            self.max_velocity = self.max_velocity.max(velocity);
        }
        let elapsed = self.elapsed_ms();
        if elapsed > 0 {
            self.avg_velocity = self.total_distance / elapsed as f64;
        }
        segment
    }

    /// Mark the gesture finished (button up).
    pub fn end(&mut self, point: Point, timestamp_ms: u64) {
        self.in_progress = false;
        self.last_point = point;
        self.last_move_ms = self.last_move_ms.max(timestamp_ms);
    }

    /// Milliseconds between button down and the last move.
    pub fn elapsed_ms(&self) -> u64 {
        self.last_move_ms.saturating_sub(self.start_time_ms)
    }

    /// Straight-line distance from the start point to the last point.
    pub fn displacement(&self) -> f64 {
        self.start_point.distance_to(self.last_point)
    }
}

/// Click-rejection thresholds a gesture must clear before the payload
/// source is consulted. These are tuning values, not invariants.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GestureThresholds {
    /// Minimum cumulative path length (px).
    pub min_distance: f64,
    /// Minimum time since button down (ms).
    pub min_duration_ms: u64,
    /// Minimum number of move samples.
    pub min_moves: u32,
    /// Minimum straight-line distance from the start point (px).
    pub min_displacement: f64,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self::conservative()
    }
}

impl GestureThresholds {
    /// Rejects most accidental clicks: 25px, 50ms, 5 moves, 20px away.
    pub const fn conservative() -> Self {
        Self {
            min_distance: 25.0,
            min_duration_ms: 50,
            min_moves: 5,
            min_displacement: 20.0,
        }
    }

    /// Detects drags almost immediately: 3px, 10ms, 1 move.
    pub const fn responsive() -> Self {
        Self {
            min_distance: 3.0,
            min_duration_ms: 10,
            min_moves: 1,
            min_displacement: 0.0,
        }
    }

    /// Whether `state` has cleared every threshold.
    pub fn is_met(&self, state: &GestureState) -> bool {
        state.in_progress
            && state.total_distance >= self.min_distance
            && state.elapsed_ms() >= self.min_duration_ms
            && state.move_count >= self.min_moves
            && state.displacement() >= self.min_displacement
    }
}

/// Where the engine is in the gesture lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum GesturePhase {
    /// No button held.
    Idle = 0,
    /// Button held, no confirmed payload yet.
    Sampling = 1,
    /// Button held with a confirmed file payload.
    Dragging = 2,
    /// Drag ended; waiting for trailing payload updates.
    Cooldown = 3,
}

impl GesturePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => GesturePhase::Sampling,
            2 => GesturePhase::Dragging,
            3 => GesturePhase::Cooldown,
            _ => GesturePhase::Idle,
        }
    }
}

/// Lock-free holder of the current [`GesturePhase`].
#[derive(Debug)]
pub struct AtomicPhase(AtomicU8);

impl Default for AtomicPhase {
    fn default() -> Self {
        Self::new(GesturePhase::Idle)
    }
}

impl AtomicPhase {
    /// Create with an initial phase.
    pub const fn new(phase: GesturePhase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    /// Current phase.
    pub fn load(&self) -> GesturePhase {
        GesturePhase::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`; fails if the phase is no longer `from`.
    pub fn transition(&self, from: GesturePhase, to: GesturePhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Unconditionally set the phase, returning the previous one.
    pub fn swap(&self, to: GesturePhase) -> GesturePhase {
        GesturePhase::from_u8(self.0.swap(to as u8, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_ring_is_bounded() {
        let mut ring = TrajectoryRing::new();
        for i in 0..250 {
            ring.push(Point::new(i as f64, 0.0));
        }
        assert_eq!(ring.len(), TRAJECTORY_CAPACITY);
        assert_eq!(ring.first(), Some(Point::new(150.0, 0.0)));
        assert_eq!(ring.last(), Some(Point::new(249.0, 0.0)));
    }

    #[test]
    fn test_record_move_accumulates() {
        let mut state = GestureState::default();
        state.begin(1, Point::new(0.0, 0.0), 1_000);
        state.record_move(Point::new(3.0, 4.0), 1_010);
        state.record_move(Point::new(6.0, 8.0), 1_020);

        assert_eq!(state.move_count, 2);
        assert!((state.total_distance - 10.0).abs() < 1e-9);
        assert_eq!(state.elapsed_ms(), 20);
        assert!((state.max_velocity - 0.5).abs() < 1e-9);
        assert!((state.avg_velocity - 0.5).abs() < 1e-9);
        assert_eq!(state.trajectory.len(), 3);
    }

    #[test]
    fn test_begin_resets_previous_gesture() {
        let mut state = GestureState::default();
        state.begin(1, Point::new(0.0, 0.0), 0);
        state.record_move(Point::new(50.0, 0.0), 10);
        state.payload_confirmed = true;

        state.begin(2, Point::new(5.0, 5.0), 100);
        assert_eq!(state.gesture_id, 2);
        assert_eq!(state.move_count, 0);
        assert_eq!(state.total_distance, 0.0);
        assert!(!state.payload_confirmed);
        assert_eq!(state.trajectory.to_vec(), vec![Point::new(5.0, 5.0)]);
    }

    #[test]
    fn test_thresholds_reject_clicks() {
        let thresholds = GestureThresholds::conservative();
        let mut state = GestureState::default();
        state.begin(1, Point::new(0.0, 0.0), 0);
        state.record_move(Point::new(2.0, 0.0), 5);
        assert!(!thresholds.is_met(&state));

        for i in 1..=5 {
            state.record_move(Point::new(2.0 + i as f64 * 6.0, 0.0), 5 + i * 10);
        }
        assert!(thresholds.is_met(&state));

        state.end(Point::new(32.0, 0.0), 60);
        assert!(!thresholds.is_met(&state));
    }

    #[test]
    fn test_phase_transitions() {
        let phase = AtomicPhase::default();
        assert_eq!(phase.load(), GesturePhase::Idle);
        assert!(phase.transition(GesturePhase::Idle, GesturePhase::Sampling));
        assert!(!phase.transition(GesturePhase::Idle, GesturePhase::Dragging));
        assert!(phase.transition(GesturePhase::Sampling, GesturePhase::Dragging));
        assert_eq!(phase.swap(GesturePhase::Cooldown), GesturePhase::Dragging);
        assert_eq!(phase.load(), GesturePhase::Cooldown);
    }
}
