//! Trajectory analysis.
//!
//! The analyzer runs on its own thread and consumes copies of gesture state
//! sent by the capture layer, so it never contends with the hot write path.
//! Its output is advisory: nothing in the delivery path waits for it.

use crate::error::{Error, Result};
use crate::event::Point;
use crate::gesture::GestureState;
use std::f64::consts::FRAC_PI_4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Turns sharper than this count as a direction change (45 degrees).
pub const DIRECTION_CHANGE_ANGLE: f64 = FRAC_PI_4;
/// Minimum cumulative path length for the closed-loop circular rule.
pub const CIRCULAR_MIN_PATH: f64 = 100.0;
/// Maximum first-to-last distance for the closed-loop circular rule.
pub const CIRCULAR_MAX_CLOSURE: f64 = 50.0;
/// Direction changes per trajectory point above which a path is a zigzag.
pub const ZIGZAG_RATIO: f64 = 0.3;

/// Turns below this magnitude are treated as straight (about 1 degree).
const STRAIGHT_EPSILON: f64 = 0.0175;
/// Fewer measurable turns than this never trigger the steady-turn rule.
const MIN_TURN_SAMPLES: usize = 8;

/// Result of analyzing one trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrajectoryAnalysis {
    /// Gesture this analysis belongs to.
    pub gesture_id: u64,
    /// Turns sharper than 45 degrees.
    pub direction_changes: u32,
    /// Number of trajectory points analyzed.
    pub points: usize,
    /// Cumulative path length used for the circular rule.
    pub path_length: f64,
    /// Distance between the first and last trajectory points.
    pub closure_distance: f64,
    /// The path loops back or turns steadily one way.
    pub has_circular_motion: bool,
    /// The path changes direction often.
    pub has_zigzag_pattern: bool,
}

/// Signed turn angle at `p2` in radians, in `(-PI, PI]`.
///
/// Positive values turn counter-clockwise in a y-up frame.
pub fn turn_angle(p1: Point, p2: Point, p3: Point) -> f64 {
    let v1x = p2.x - p1.x;
    let v1y = p2.y - p1.y;
    let v2x = p3.x - p2.x;
    let v2y = p3.y - p2.y;

    let dot = v1x * v2x + v1y * v2y;
    let cross = v1x * v2y - v1y * v2x;
    cross.atan2(dot)
}

/// Classify a trajectory.
///
/// `path_length` is the cumulative distance of the whole gesture, which may
/// be longer than the retained points when the ring has evicted some.
pub fn analyze(points: &[Point], path_length: f64) -> TrajectoryAnalysis {
    let mut analysis = TrajectoryAnalysis {
        points: points.len(),
        path_length,
        ..Default::default()
    };
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        analysis.closure_distance = first.distance_to(*last);
    }

    let mut measured = 0usize;
    let mut steady_left = 0usize;
    let mut steady_right = 0usize;

    for w in points.windows(3) {
        // Repeated points carry no direction.
        if w[0] == w[1] || w[1] == w[2] {
            continue;
        }
        let angle = turn_angle(w[0], w[1], w[2]);
        measured += 1;

        if angle.abs() > DIRECTION_CHANGE_ANGLE {
            analysis.direction_changes += 1;
        } else if angle > STRAIGHT_EPSILON {
            steady_left += 1;
        } else if angle < -STRAIGHT_EPSILON {
            steady_right += 1;
        }
    }

    let closed_loop =
        path_length > CIRCULAR_MIN_PATH && analysis.closure_distance <= CIRCULAR_MAX_CLOSURE;
    let steady_turn =
        measured >= MIN_TURN_SAMPLES && steady_left.max(steady_right) * 2 > measured;
    analysis.has_circular_motion = closed_loop || steady_turn;

    analysis.has_zigzag_pattern = !points.is_empty()
        && analysis.direction_changes as f64 / points.len() as f64 > ZIGZAG_RATIO;

    analysis
}

/// Analyze a gesture and write the derived fields into it.
pub fn finalize(state: &mut GestureState) -> TrajectoryAnalysis {
    let points = state.trajectory.to_vec();
    let mut analysis = analyze(&points, state.total_distance);
    analysis.gesture_id = state.gesture_id;

    state.direction_changes = analysis.direction_changes;
    state.has_circular_motion = analysis.has_circular_motion;
    state.has_zigzag_pattern = analysis.has_zigzag_pattern;
    analysis
}

/// Latest analysis results, readable from any thread.
#[derive(Debug, Default)]
pub struct AnalysisStore {
    current: Mutex<Option<TrajectoryAnalysis>>,
    last_gesture: Mutex<Option<GestureState>>,
}

impl AnalysisStore {
    /// Analysis of the most recent snapshot of the gesture in progress.
    pub fn current(&self) -> Option<TrajectoryAnalysis> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Finalized state of the most recently completed gesture.
    pub fn last_gesture(&self) -> Option<GestureState> {
        self.last_gesture
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, state: GestureState, analysis: TrajectoryAnalysis, finished: bool) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(analysis);
        if finished {
            *self.last_gesture.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);
        }
    }
}

/// Observer notified after each analysis.
pub(crate) type AnalysisObserver = Arc<dyn Fn(&GestureState, &TrajectoryAnalysis) + Send + Sync>;

enum AnalyzerMsg {
    Snapshot { state: Box<GestureState>, finished: bool },
    Shutdown,
}

/// Cloneable, non-blocking handle for queueing snapshots.
#[derive(Clone)]
pub(crate) struct SnapshotSender(SyncSender<AnalyzerMsg>);

impl SnapshotSender {
    /// Queue `state`. Drops the snapshot if the analyzer is behind.
    pub(crate) fn submit(&self, state: GestureState, finished: bool) -> bool {
        let msg = AnalyzerMsg::Snapshot {
            state: Box::new(state),
            finished,
        };
        match self.0.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Handle to the background analysis thread.
pub(crate) struct AnalyzerHandle {
    sender: SyncSender<AnalyzerMsg>,
    thread: Option<JoinHandle<()>>,
}

impl AnalyzerHandle {
    /// Spawn the analysis loop with a queue of `depth` pending snapshots.
    pub(crate) fn spawn(
        depth: usize,
        store: Arc<AnalysisStore>,
        observer: AnalysisObserver,
        stopping: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(depth.max(1));
        let thread = thread::Builder::new()
            .name("dragwatch-analyzer".into())
            .spawn(move || run(receiver, store, observer, stopping))
            .map_err(|e| Error::ThreadCreateFailed(format!("analyzer: {e}")))?;

        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    /// A sender for the capture path.
    pub(crate) fn sender(&self) -> SnapshotSender {
        SnapshotSender(self.sender.clone())
    }

    /// Stop the loop and wait for it to exit.
    pub(crate) fn shutdown(mut self) {
        // A full queue still drains; send blocks only until the loop takes one.
        let _ = self.sender.send(AnalyzerMsg::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("analyzer thread panicked");
        }
    }
}

fn run(
    receiver: Receiver<AnalyzerMsg>,
    store: Arc<AnalysisStore>,
    observer: AnalysisObserver,
    stopping: Arc<AtomicBool>,
) {
    while let Ok(msg) = receiver.recv() {
        let (mut state, finished) = match msg {
            AnalyzerMsg::Snapshot { state, finished } => (*state, finished),
            AnalyzerMsg::Shutdown => break,
        };
        if stopping.load(Ordering::SeqCst) {
            continue;
        }

        let analysis = finalize(&mut state);
        if finished {
            log::debug!(
                "gesture {} finished: {} direction changes, circular={}, zigzag={}",
                analysis.gesture_id,
                analysis.direction_changes,
                analysis.has_circular_motion,
                analysis.has_zigzag_pattern
            );
        }
        observer(&state, &analysis);
        store.record(state, analysis, finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(radius: f64, steps: usize, turns: f64) -> Vec<Point> {
        (0..=steps)
            .map(|i| {
                let t = turns * std::f64::consts::TAU * i as f64 / steps as f64;
                Point::new(radius * t.cos(), radius * t.sin())
            })
            .collect()
    }

    fn path_length(points: &[Point]) -> f64 {
        points.windows(2).map(|w| w[0].distance_to(w[1])).sum()
    }

    #[test]
    fn test_turn_angle_sign_and_magnitude() {
        let origin = Point::new(0.0, 0.0);
        let right = Point::new(10.0, 0.0);
        let angle = turn_angle(origin, right, Point::new(10.0, 10.0));
        assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        let angle = turn_angle(origin, right, Point::new(10.0, -10.0));
        assert!((angle + std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert!(turn_angle(origin, right, Point::new(20.0, 0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_closed_loop_is_circular() {
        // Out 80 units and most of the way back: 150 traveled, ends 10 from start.
        let mut points: Vec<Point> = (0..=8).map(|i| Point::new(i as f64 * 10.0, 0.0)).collect();
        points.extend((1..=7).map(|i| Point::new(80.0 - i as f64 * 10.0, 1.0)));
        let length = path_length(&points);
        assert!(length >= 150.0);

        let analysis = analyze(&points, length);
        assert!(analysis.closure_distance <= CIRCULAR_MAX_CLOSURE);
        assert!(analysis.has_circular_motion);
    }

    #[test]
    fn test_full_circle_is_circular() {
        let points = circle(40.0, 40, 1.0);
        let analysis = analyze(&points, path_length(&points));
        assert!(analysis.has_circular_motion);
        assert!(!analysis.has_zigzag_pattern);
        assert_eq!(analysis.direction_changes, 0);
    }

    #[test]
    fn test_steady_arc_is_circular_without_closing() {
        // Half a circle: ends far from the start but turns steadily one way.
        let points = circle(100.0, 30, 0.5);
        let analysis = analyze(&points, path_length(&points));
        assert!(analysis.closure_distance > CIRCULAR_MAX_CLOSURE);
        assert!(analysis.has_circular_motion);
    }

    #[test]
    fn test_straight_line_is_neither() {
        let points: Vec<Point> = (0..30).map(|i| Point::new(i as f64 * 5.0, 0.0)).collect();
        let analysis = analyze(&points, path_length(&points));
        assert!(!analysis.has_circular_motion);
        assert!(!analysis.has_zigzag_pattern);
        assert_eq!(analysis.direction_changes, 0);
    }

    #[test]
    fn test_zigzag_detection() {
        let points: Vec<Point> = (0..20)
            .map(|i| Point::new(i as f64 * 10.0, if i % 2 == 0 { 0.0 } else { 15.0 }))
            .collect();
        let analysis = analyze(&points, path_length(&points));
        assert_eq!(analysis.direction_changes, 18);
        assert!(analysis.has_zigzag_pattern);
    }

    #[test]
    fn test_repeated_points_are_ignored() {
        let p = Point::new(1.0, 1.0);
        let analysis = analyze(&[p, p, p, p], 0.0);
        assert_eq!(analysis.direction_changes, 0);
        assert!(!analysis.has_circular_motion);
    }

    #[test]
    fn test_finalize_writes_derived_fields() {
        let mut state = GestureState::default();
        state.begin(3, Point::new(0.0, 0.0), 0);
        for (i, p) in circle(40.0, 40, 1.0).into_iter().enumerate().skip(1) {
            state.record_move(p, i as u64 * 5);
        }
        let analysis = finalize(&mut state);
        assert_eq!(analysis.gesture_id, 3);
        assert!(state.has_circular_motion);
        assert_eq!(state.direction_changes, analysis.direction_changes);
    }

    #[test]
    fn test_analyzer_thread_records_finished_gesture() {
        let store = Arc::new(AnalysisStore::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let observer: AnalysisObserver = Arc::new(move |state, _| {
            seen_clone.lock().unwrap().push(state.gesture_id);
        });
        let handle =
            AnalyzerHandle::spawn(4, store.clone(), observer, Arc::new(AtomicBool::new(false)))
                .unwrap();

        let mut state = GestureState::default();
        state.begin(9, Point::new(0.0, 0.0), 0);
        state.record_move(Point::new(10.0, 0.0), 10);
        assert!(handle.sender().submit(state, true));
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![9]);
        assert_eq!(store.last_gesture().map(|g| g.gesture_id), Some(9));
        assert_eq!(store.current().map(|a| a.gesture_id), Some(9));
    }
}
