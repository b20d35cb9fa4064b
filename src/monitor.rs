//! The monitoring engine.
//!
//! A [`Monitor`] owns four execution contexts:
//!
//! - the OS hook callback (or the host calling [`Monitor::feed`]), which
//!   updates atomics and the double-buffered gesture state and enqueues work
//!   without ever blocking,
//! - the poll thread, which queries the payload source,
//! - the dispatch thread, which delivers to the [`Consumer`],
//! - the analyzer thread, which classifies trajectory snapshots.
//!
//! `stop()` raises one stop flag, removes the hook and joins every thread
//! before returning, so no consumer callback runs afterwards.

use crate::analyzer::{
    AnalysisObserver, AnalysisStore, AnalyzerHandle, SnapshotSender, TrajectoryAnalysis,
};
use crate::batcher::{
    BatchSender, BatcherHandle, Consumer, Envelope, PerformanceCounters, PerformanceMetrics,
};
use crate::buffer::DoubleBuffer;
use crate::config::{CaptureMode, MonitorConfig};
use crate::error::{ErrorCode, Result};
use crate::event::{Button, ButtonTransition, PositionSample, RawEvent, RawEventKind};
use crate::gesture::{AtomicPhase, GesturePhase, GestureState};
use crate::payload::{
    DescriptorList, DraggedItemDescriptor, Extractor, NullPayloadSource, PayloadSource,
};
use crate::platform;
use crate::poller::{self, PollPhase, PollerHandle, PollerSignal};
use crate::registry::InputSink;
use crate::state::{ButtonMask, button_to_mask};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Attempts for gesture begin/end updates before the sample counts as dropped.
const TRANSITION_ATTEMPTS: usize = 3;

/// State shared by the capture path, the poller and the public API.
pub(crate) struct Shared {
    pub(crate) config: MonitorConfig,
    pub(crate) buttons: ButtonMask,
    pub(crate) phase: AtomicPhase,
    pub(crate) poll_phase: AtomicU8,
    pub(crate) gesture: DoubleBuffer<GestureState>,
    next_gesture_id: AtomicU64,
    /// Gesture whose payload was confirmed most recently (0 for none).
    pub(crate) confirmed_gesture: AtomicU64,
    pub(crate) items: DescriptorList,
    pub(crate) counters: Arc<PerformanceCounters>,
    pub(crate) stopping: Arc<AtomicBool>,
    monitoring: AtomicBool,
    pub(crate) source: Arc<dyn PayloadSource>,
    pub(crate) extractor: Extractor,
    pub(crate) analysis: Arc<AnalysisStore>,
}

impl Shared {
    pub(crate) fn new(config: MonitorConfig, source: Arc<dyn PayloadSource>) -> Self {
        let extractor = Extractor::new(config.strategies.clone());
        Self {
            config,
            buttons: ButtonMask::new(),
            phase: AtomicPhase::default(),
            poll_phase: AtomicU8::new(PollPhase::Idle as u8),
            gesture: DoubleBuffer::new(GestureState::default()),
            next_gesture_id: AtomicU64::new(0),
            confirmed_gesture: AtomicU64::new(0),
            items: DescriptorList::new(),
            counters: Arc::new(PerformanceCounters::default()),
            stopping: Arc::new(AtomicBool::new(false)),
            monitoring: AtomicBool::new(false),
            source,
            extractor,
            analysis: Arc::new(AnalysisStore::default()),
        }
    }

    /// Forget everything about the previous run.
    fn reset(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        self.buttons.reset();
        self.phase.swap(GesturePhase::Idle);
        self.poll_phase.store(PollPhase::Idle as u8, Ordering::SeqCst);
        self.confirmed_gesture.store(0, Ordering::SeqCst);
        self.items.clear();
        let _ = self.gesture.try_update(|g| g.in_progress = false);
    }
}

/// The capture layer: turns raw events into gesture updates and batcher work.
///
/// Everything here runs inside the OS hook callback, so it only touches
/// atomics, the double buffer and non-blocking channel sends.
pub(crate) struct Capture {
    shared: Arc<Shared>,
    batch: BatchSender,
    poller: Sender<PollerSignal>,
    analyzer: SnapshotSender,
}

impl InputSink for Capture {
    fn on_event(&self, event: RawEvent) {
        let shared = &*self.shared;
        if shared.stopping.load(Ordering::SeqCst) {
            return;
        }
        shared.counters.record_processed();

        match event.kind {
            RawEventKind::Pressed(button) => self.on_press(button, &event),
            RawEventKind::Released(button) => self.on_release(button, &event),
            RawEventKind::Moved => self.on_move(&event),
        }
    }
}

impl Capture {
    /// Apply `f` to the gesture state, retrying briefly on contention.
    fn update<R>(&self, mut f: impl FnMut(&mut GestureState) -> R) -> Option<R> {
        for _ in 0..TRANSITION_ATTEMPTS {
            if let Ok(result) = self.shared.gesture.try_update(&mut f) {
                return Some(result);
            }
        }
        self.shared.counters.record_dropped(1);
        None
    }

    fn push_transition(&self, event: &RawEvent) {
        let states = self.shared.buttons.states();
        self.batch.send(Envelope::Button(ButtonTransition {
            left_down: states.left,
            right_down: states.right,
            timestamp_ms: event.timestamp_ms,
        }));
        self.batch.position(PositionSample {
            x: event.point.x,
            y: event.point.y,
            timestamp_ms: event.timestamp_ms,
            buttons: Some(states),
        });
    }

    fn on_press(&self, button: Button, event: &RawEvent) {
        let mask = button_to_mask(button);
        if mask == 0 || self.shared.buttons.set(mask) & mask != 0 {
            return;
        }
        if matches!(button, Button::Left | Button::Right) {
            self.push_transition(event);
        }
        if button == Button::Left {
            self.begin_gesture(event);
        }
    }

    fn begin_gesture(&self, event: &RawEvent) {
        let shared = &*self.shared;
        // Items of the previous drag must not leak into this gesture.
        shared.items.preempt_pending_clear();

        let id = shared.next_gesture_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.update(|g| g.begin(id, event.point, event.timestamp_ms));

        if shared.phase.swap(GesturePhase::Sampling) == GesturePhase::Dragging {
            // The release of the previous drag was never observed.
            self.batch.send(Envelope::DragEnd {
                gesture: shared.confirmed_gesture.load(Ordering::SeqCst),
            });
        }
        let _ = self.poller.send(PollerSignal::GestureStarted {
            gesture: id,
            at: Instant::now(),
        });
    }

    fn on_move(&self, event: &RawEvent) {
        let shared = &*self.shared;
        self.batch.position(PositionSample {
            x: event.point.x,
            y: event.point.y,
            timestamp_ms: event.timestamp_ms,
            buttons: None,
        });

        if !shared.buttons.is_pressed(Button::Left)
            || !matches!(
                shared.phase.load(),
                GesturePhase::Sampling | GesturePhase::Dragging
            )
        {
            return;
        }

        let confirmed = shared.confirmed_gesture.load(Ordering::SeqCst);
        let thresholds = shared.config.thresholds;
        let every = shared.config.analysis_every.max(1);

        let outcome = shared.gesture.try_update(|g| {
            if !g.in_progress {
                return None;
            }
            g.record_move(event.point, event.timestamp_ms);
            g.payload_confirmed = confirmed == g.gesture_id;

            let newly_met = !g.thresholds_met && thresholds.is_met(g);
            if newly_met {
                g.thresholds_met = true;
            }
            let snapshot = (g.move_count % every == 0).then(|| g.clone());
            Some((g.gesture_id, newly_met, snapshot))
        });

        match outcome {
            Ok(Some((id, newly_met, snapshot))) => {
                if newly_met {
                    let _ = self.poller.send(PollerSignal::ThresholdsMet(id));
                }
                if let Some(state) = snapshot
                    && !self.analyzer.submit(state, false)
                {
                    shared.counters.record_dropped(1);
                }
            }
            Ok(None) => {}
            Err(_) => shared.counters.record_dropped(1),
        }
    }

    fn on_release(&self, button: Button, event: &RawEvent) {
        let shared = &*self.shared;
        let mask = button_to_mask(button);
        if mask == 0 || shared.buttons.unset(mask) & mask == 0 {
            return;
        }
        if matches!(button, Button::Left | Button::Right) {
            self.push_transition(event);
        }
        if button != Button::Left {
            return;
        }

        let confirmed = shared.confirmed_gesture.load(Ordering::SeqCst);
        let finished = self
            .update(|g| {
                if g.in_progress {
                    g.end(event.point, event.timestamp_ms);
                    g.payload_confirmed = confirmed == g.gesture_id;
                    Some(g.clone())
                } else {
                    None
                }
            })
            .flatten();
        let gesture = match &finished {
            Some(state) => state.gesture_id,
            None => shared.gesture.read(|g| g.gesture_id),
        };

        let dragged = shared
            .phase
            .transition(GesturePhase::Dragging, GesturePhase::Cooldown);
        if dragged {
            shared.items.schedule_clear(shared.config.clear_delay());
            self.batch.send(Envelope::DragEnd {
                gesture: shared.confirmed_gesture.load(Ordering::SeqCst),
            });
        } else {
            shared
                .phase
                .transition(GesturePhase::Sampling, GesturePhase::Idle);
        }
        let _ = self
            .poller
            .send(PollerSignal::GestureEnded { gesture, dragged });

        if let Some(state) = finished
            && !self.analyzer.submit(state, true)
        {
            shared.counters.record_dropped(1);
        }
    }
}

struct Running {
    capture: Arc<Capture>,
    hook: Option<platform::HookHandle>,
    poller: PollerHandle,
    batcher: BatcherHandle,
    analyzer: AnalyzerHandle,
}

impl Running {
    fn shutdown(self, shared: &Shared) -> Result<()> {
        shared.stopping.store(true, Ordering::SeqCst);

        let hook_result = match self.hook {
            Some(hook) => hook.stop(),
            None => Ok(()),
        };
        self.poller.shutdown();
        self.batcher.shutdown();
        self.analyzer.shutdown();
        drop(self.capture);

        shared.monitoring.store(false, Ordering::SeqCst);
        shared.phase.swap(GesturePhase::Idle);
        shared.buttons.reset();
        shared.items.clear();
        hook_result
    }
}

/// System-wide pointer and file drag monitor.
///
/// # Example
///
/// ```no_run
/// use dragwatch::{Monitor, MonitorConfig, MonitorEvent};
///
/// let monitor = Monitor::new(MonitorConfig::default(), |event: MonitorEvent| {
///     if let MonitorEvent::Dragging(items) = event {
///         for item in items {
///             println!("dragging {}", item.path.display());
///         }
///     }
/// })
/// .expect("invalid config");
///
/// monitor.start().expect("failed to start monitoring");
/// // ...
/// monitor.stop().unwrap();
/// ```
pub struct Monitor {
    shared: Arc<Shared>,
    consumer: Arc<dyn Consumer>,
    running: Mutex<Option<Running>>,
    last_error: Mutex<Option<(ErrorCode, String)>>,
}

impl Monitor {
    /// Create a monitor reading drag payloads from the OS.
    ///
    /// In [`CaptureMode::Manual`] there is no OS payload source; use
    /// [`Monitor::with_payload_source`] to supply one.
    pub fn new<C: Consumer>(config: MonitorConfig, consumer: C) -> Result<Self> {
        let source: Arc<dyn PayloadSource> = match config.capture {
            CaptureMode::System => platform::system_payload_source(),
            CaptureMode::Manual => Arc::new(NullPayloadSource),
        };
        Self::with_payload_source(config, consumer, source)
    }

    /// Create a monitor reading drag payloads from `source`.
    pub fn with_payload_source<C: Consumer>(
        config: MonitorConfig,
        consumer: C,
        source: Arc<dyn PayloadSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config, source)),
            consumer: Arc::new(consumer),
            running: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    /// Start monitoring. Does nothing if already running.
    ///
    /// In [`CaptureMode::System`] this checks input monitoring permission
    /// (prompting once per process where the OS supports it) and installs
    /// the OS hook. Failures are returned, reported once through
    /// [`Consumer::on_error`] and kept as [`Monitor::last_error`].
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Ok(());
        }

        match self.launch() {
            Ok(run) => {
                *running = Some(run);
                self.shared.monitoring.store(true, Ordering::SeqCst);
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
                log::info!("monitoring started ({:?} capture)", self.shared.config.capture);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to start monitoring: {e}");
                let code = e.code();
                let message = e.to_string();
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some((code, message.clone()));
                let consumer = &self.consumer;
                let _ = panic::catch_unwind(AssertUnwindSafe(|| consumer.on_error(code, &message)));
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<Running> {
        let shared = &self.shared;
        if shared.config.capture == CaptureMode::System {
            platform::ensure_permission()?;
        }
        shared.reset();

        let consumer = self.consumer.clone();
        let observer: AnalysisObserver = Arc::new(move |gesture, analysis| {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                consumer.on_gesture_analyzed(gesture, analysis)
            }));
            if delivered.is_err() {
                log::warn!("consumer panicked in on_gesture_analyzed");
            }
        });
        let analyzer = AnalyzerHandle::spawn(
            shared.config.analysis_queue_depth,
            shared.analysis.clone(),
            observer,
            shared.stopping.clone(),
        )?;

        let batcher = match BatcherHandle::spawn(
            shared.config.batch,
            self.consumer.clone(),
            shared.counters.clone(),
            shared.stopping.clone(),
        ) {
            Ok(batcher) => batcher,
            Err(e) => {
                shared.stopping.store(true, Ordering::SeqCst);
                analyzer.shutdown();
                return Err(e);
            }
        };

        let poller = match PollerHandle::spawn(shared.clone(), batcher.sender()) {
            Ok(poller) => poller,
            Err(e) => {
                shared.stopping.store(true, Ordering::SeqCst);
                batcher.shutdown();
                analyzer.shutdown();
                return Err(e);
            }
        };

        let capture = Arc::new(Capture {
            shared: shared.clone(),
            batch: batcher.sender(),
            poller: poller.sender(),
            analyzer: analyzer.sender(),
        });
        let mut run = Running {
            capture,
            hook: None,
            poller,
            batcher,
            analyzer,
        };

        if shared.config.capture == CaptureMode::System {
            match platform::install_hook(run.capture.clone()) {
                Ok(hook) => run.hook = Some(hook),
                Err(e) => {
                    let _ = run.shutdown(shared);
                    return Err(e);
                }
            }
        }
        Ok(run)
    }

    /// Stop monitoring and wait for every engine thread to exit.
    ///
    /// Idempotent: stopping a monitor that is not running does nothing.
    pub fn stop(&self) -> Result<()> {
        let run = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(run) = run else {
            return Ok(());
        };
        let result = run.shutdown(&self.shared);
        log::info!("monitoring stopped");
        result
    }

    /// Feed a raw event through the capture path.
    ///
    /// This is how events enter in [`CaptureMode::Manual`]; in system mode it
    /// injects a synthetic event alongside the OS ones. Returns `false` when
    /// the monitor is not running.
    pub fn feed(&self, event: RawEvent) -> bool {
        let capture = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|run| run.capture.clone());
        match capture {
            Some(capture) => {
                capture.on_event(event);
                true
            }
            None => false,
        }
    }

    /// Whether the monitor is running.
    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::SeqCst)
    }

    /// Whether a drag with a confirmed file payload is in progress.
    pub fn has_active_drag(&self) -> bool {
        self.shared.phase.load() == GesturePhase::Dragging
    }

    /// Current gesture phase.
    pub fn gesture_phase(&self) -> GesturePhase {
        self.shared.phase.load()
    }

    /// Current poll phase.
    pub fn poll_phase(&self) -> PollPhase {
        poller::load_phase(&self.shared.poll_phase)
    }

    /// Items of the current drag, or of the one that just ended until the
    /// deferred clear runs.
    pub fn dragged_files(&self) -> Vec<DraggedItemDescriptor> {
        self.shared.items.snapshot()
    }

    /// Number of items [`Monitor::dragged_files`] would return.
    pub fn dragged_file_count(&self) -> usize {
        self.shared.items.len()
    }

    /// Counter snapshot.
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.shared.counters.snapshot()
    }

    /// The last fatal start error, cleared by a successful start.
    pub fn last_error(&self) -> Option<(ErrorCode, String)> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Analyzed state of the most recently completed gesture.
    pub fn last_gesture(&self) -> Option<GestureState> {
        self.shared.analysis.last_gesture()
    }

    /// Latest analysis of the gesture in progress (or the last one).
    pub fn current_analysis(&self) -> Option<TrajectoryAnalysis> {
        self.shared.analysis.current()
    }

    /// The active configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::MonitorEvent;
    use crate::event::{Point, now_ms};
    use crate::payload::{ItemKind, MemoryPayloadSource};
    use std::thread;
    use std::time::Duration;

    type Events = Arc<Mutex<Vec<MonitorEvent>>>;

    fn manual_monitor(
        config: MonitorConfig,
    ) -> (Monitor, Arc<MemoryPayloadSource>, Events) {
        let source = Arc::new(MemoryPayloadSource::new());
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let monitor = Monitor::with_payload_source(
            config.with_capture(CaptureMode::Manual),
            move |e: MonitorEvent| sink.lock().unwrap().push(e),
            source.clone(),
        )
        .unwrap();
        (monitor, source, events)
    }

    fn count(events: &Events, pred: impl Fn(&MonitorEvent) -> bool) -> usize {
        events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    fn settle() {
        thread::sleep(Duration::from_millis(80));
    }

    /// Button down at the origin, then five 5px steps to the right, 10ms apart.
    fn drag_to_threshold(monitor: &Monitor, t0: u64) {
        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0).at(t0));
        thread::sleep(Duration::from_millis(10));
        for i in 1..=5u64 {
            monitor.feed(RawEvent::moved(i as f64 * 5.0, 0.0).at(t0 + i * 10));
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_end_to_end_file_drag() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let (monitor, source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        let t0 = now_ms();
        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0).at(t0));
        thread::sleep(Duration::from_millis(10));
        for i in 1..=6u64 {
            monitor.feed(RawEvent::moved(i as f64 * 5.0, 0.0).at(t0 + i * 10));
            if i == 3 {
                source.set_paths([file.clone()]);
            }
            thread::sleep(Duration::from_millis(10));
        }
        settle();
        assert!(monitor.has_active_drag());
        assert_eq!(monitor.dragged_file_count(), 1);

        monitor.feed(RawEvent::released(Button::Left, 30.0, 0.0).at(t0 + 100));
        settle();
        monitor.stop().unwrap();

        assert_eq!(count(&events, |e| matches!(e, MonitorEvent::DragStart)), 1);
        assert_eq!(count(&events, |e| matches!(e, MonitorEvent::DragEnd)), 1);

        let dragging: Vec<Vec<DraggedItemDescriptor>> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Dragging(items) => Some(items.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(dragging.len(), 1);
        assert_eq!(dragging[0].len(), 1);
        assert_eq!(dragging[0][0].name, "a.txt");
        assert_eq!(dragging[0][0].kind, ItemKind::File);
        assert!(dragging[0][0].exists);

        // Start, items and end arrive in that order.
        let order: Vec<usize> = events
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                matches!(
                    e,
                    MonitorEvent::DragStart | MonitorEvent::Dragging(_) | MonitorEvent::DragEnd
                )
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(order.len(), 3);
        assert!(matches!(events.lock().unwrap()[order[0]], MonitorEvent::DragStart));
        assert!(matches!(events.lock().unwrap()[order[2]], MonitorEvent::DragEnd));
    }

    #[test]
    fn test_payload_right_after_press_is_confirmed() {
        let (monitor, source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        for round in 0..20u64 {
            let t0 = now_ms();
            monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0).at(t0));
            source.set_paths([format!("/tmp/dragwatch-{round}.txt")]);
            for i in 1..=6u64 {
                monitor.feed(RawEvent::moved(i as f64 * 5.0, 0.0).at(t0 + i * 10));
                thread::sleep(Duration::from_millis(10));
            }
            settle();
            monitor.feed(RawEvent::released(Button::Left, 30.0, 0.0).at(t0 + 100));
            settle();
        }
        monitor.stop().unwrap();

        assert_eq!(count(&events, |e| matches!(e, MonitorEvent::DragStart)), 20);
        assert_eq!(count(&events, |e| matches!(e, MonitorEvent::DragEnd)), 20);
    }

    #[test]
    fn test_release_without_later_move_keeps_confirmation() {
        let (monitor, source, _events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        let t0 = now_ms();
        drag_to_threshold(&monitor, t0);
        source.set_paths(["/tmp/a.txt"]);
        settle();
        assert!(monitor.has_active_drag());

        // No move between confirmation and release.
        monitor.feed(RawEvent::released(Button::Left, 25.0, 0.0).at(t0 + 120));
        settle();
        monitor.stop().unwrap();

        let last = monitor.last_gesture().unwrap();
        assert!(!last.in_progress);
        assert!(last.payload_confirmed);
    }

    #[test]
    fn test_position_delivery_is_capped_at_sixty_per_second() {
        let (monitor, _source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        // 1,000 moves spread evenly over one second.
        let started = Instant::now();
        for i in 0..1000u64 {
            monitor.feed(RawEvent::moved(i as f64, 0.0));
            let next = started + Duration::from_micros(990 * (i + 1));
            thread::sleep(next.saturating_duration_since(Instant::now()));
        }
        settle();
        monitor.stop().unwrap();

        let xs: Vec<f64> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Position(p) => Some(p.x),
                _ => None,
            })
            .collect();
        assert!(xs.len() <= 60, "{} positions delivered", xs.len());
        assert_eq!(xs.last(), Some(&999.0));
    }

    #[test]
    fn test_pointer_drag_without_payload_never_starts_a_drag() {
        let (monitor, _source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        let t0 = now_ms();
        drag_to_threshold(&monitor, t0);
        for i in 6..=20u64 {
            monitor.feed(RawEvent::moved(i as f64 * 5.0, 0.0).at(t0 + i * 10));
        }
        settle();
        assert_eq!(monitor.gesture_phase(), GesturePhase::Sampling);
        assert_eq!(monitor.poll_phase(), PollPhase::Active);

        monitor.feed(RawEvent::released(Button::Left, 100.0, 0.0).at(t0 + 250));
        settle();
        assert_eq!(monitor.gesture_phase(), GesturePhase::Idle);
        monitor.stop().unwrap();

        assert_eq!(count(&events, |e| matches!(e, MonitorEvent::DragStart)), 0);
        assert_eq!(count(&events, |e| matches!(e, MonitorEvent::DragEnd)), 0);
        assert!(monitor.dragged_files().is_empty());
    }

    #[test]
    fn test_click_is_not_a_gesture() {
        let (monitor, source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        let t0 = now_ms();
        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0).at(t0));
        thread::sleep(Duration::from_millis(20));
        source.set_paths(["/tmp/a.txt"]);
        monitor.feed(RawEvent::moved(1.0, 0.0).at(t0 + 5));
        settle();
        monitor.feed(RawEvent::released(Button::Left, 1.0, 0.0).at(t0 + 10));
        settle();
        monitor.stop().unwrap();

        assert_eq!(count(&events, |e| matches!(e, MonitorEvent::DragStart)), 0);
    }

    #[test]
    fn test_button_transitions_delivered_in_order() {
        let (monitor, _source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        for i in 0..50u64 {
            let button = if i % 2 == 0 { Button::Left } else { Button::Right };
            monitor.feed(RawEvent::pressed(button, 0.0, 0.0).at(i * 2));
            monitor.feed(RawEvent::released(button, 0.0, 0.0).at(i * 2 + 1));
        }
        // Repeated presses and unknown buttons are not transitions.
        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0).at(1000));
        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0).at(1001));
        monitor.feed(RawEvent::pressed(Button::Unknown(8), 0.0, 0.0).at(1002));
        monitor.feed(RawEvent::released(Button::Left, 0.0, 0.0).at(1003));
        settle();
        monitor.stop().unwrap();

        let transitions: Vec<ButtonTransition> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::ButtonChanged(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(transitions.len(), 102);
        for (i, t) in transitions.iter().take(100).enumerate() {
            let pair = i as u64 / 2;
            let down = i % 2 == 0;
            assert_eq!(t.timestamp_ms, i as u64);
            if pair % 2 == 0 {
                assert_eq!((t.left_down, t.right_down), (down, false));
            } else {
                assert_eq!((t.left_down, t.right_down), (false, down));
            }
        }
        assert_eq!(transitions[100].timestamp_ms, 1000);
        assert_eq!(transitions[101].timestamp_ms, 1003);
    }

    #[test]
    fn test_positions_carry_buttons_only_from_transitions() {
        let (monitor, _source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();
        monitor.feed(RawEvent::moved(5.0, 5.0));
        settle();
        monitor.feed(RawEvent::pressed(Button::Right, 6.0, 6.0));
        settle();
        monitor.stop().unwrap();

        let positions: Vec<PositionSample> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Position(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].buttons, None);
        let buttons = positions[1].buttons.unwrap();
        assert!(buttons.right && !buttons.left);
    }

    #[test]
    fn test_deferred_clear_after_drag_end() {
        let config = MonitorConfig::default().with_clear_delay(Duration::from_millis(300));
        let (monitor, source, _events) = manual_monitor(config);
        monitor.start().unwrap();

        let t0 = now_ms();
        drag_to_threshold(&monitor, t0);
        source.set_paths(["/tmp/dragwatch-missing/report.pdf"]);
        settle();
        assert!(monitor.has_active_drag());

        monitor.feed(RawEvent::released(Button::Left, 25.0, 0.0).at(t0 + 120));
        assert!(!monitor.has_active_drag());
        assert_eq!(monitor.dragged_files().len(), 1);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(monitor.dragged_files()[0].name, "report.pdf");

        thread::sleep(Duration::from_millis(350));
        assert!(monitor.dragged_files().is_empty());
        assert_eq!(monitor.dragged_file_count(), 0);
        monitor.stop().unwrap();
    }

    #[test]
    fn test_new_gesture_preempts_deferred_clear() {
        let config = MonitorConfig::default().with_clear_delay(Duration::from_secs(5));
        let (monitor, source, _events) = manual_monitor(config);
        monitor.start().unwrap();

        let t0 = now_ms();
        drag_to_threshold(&monitor, t0);
        source.set_paths(["/tmp/a.txt"]);
        settle();
        monitor.feed(RawEvent::released(Button::Left, 25.0, 0.0).at(t0 + 120));
        assert_eq!(monitor.dragged_file_count(), 1);

        monitor.feed(RawEvent::pressed(Button::Left, 40.0, 40.0).at(t0 + 200));
        assert_eq!(monitor.dragged_file_count(), 0);
        assert!(monitor.dragged_files().is_empty());
        assert_eq!(monitor.gesture_phase(), GesturePhase::Sampling);
        monitor.stop().unwrap();
    }

    #[test]
    fn test_finished_gesture_is_analyzed() {
        let (monitor, _source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();

        let t0 = now_ms();
        monitor.feed(RawEvent::pressed(Button::Left, 40.0, 0.0).at(t0));
        for i in 1..=40u64 {
            let t = std::f64::consts::TAU * i as f64 / 40.0;
            let p = Point::new(40.0 * t.cos(), 40.0 * t.sin());
            monitor.feed(RawEvent::moved(p.x, p.y).at(t0 + i * 5));
        }
        monitor.feed(RawEvent::released(Button::Left, 40.0, 0.0).at(t0 + 205));
        settle();
        monitor.stop().unwrap();

        let last = monitor.last_gesture().unwrap();
        assert!(last.has_circular_motion);
        assert!(!last.in_progress);
        assert_eq!(last.move_count, 40);
        assert!(monitor.current_analysis().is_some());
        assert!(count(&events, |e| matches!(e, MonitorEvent::GestureAnalyzed(_))) >= 1);
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let (monitor, _source, events) = manual_monitor(MonitorConfig::default());
        assert!(monitor.stop().is_ok());
        monitor.start().unwrap();
        monitor.start().unwrap();
        assert!(monitor.is_monitoring());

        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0));
        monitor.stop().unwrap();
        assert!(monitor.stop().is_ok());
        assert!(!monitor.is_monitoring());

        let seen = events.lock().unwrap().len();
        assert!(!monitor.feed(RawEvent::released(Button::Left, 0.0, 0.0)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(events.lock().unwrap().len(), seen);
    }

    #[test]
    fn test_restart_after_stop() {
        let (monitor, _source, events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();
        monitor.stop().unwrap();
        monitor.start().unwrap();
        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0));
        settle();
        monitor.stop().unwrap();
        assert_eq!(
            count(&events, |e| matches!(e, MonitorEvent::ButtonChanged(_))),
            1
        );
    }

    #[test]
    fn test_metrics_count_processed_events() {
        let (monitor, _source, _events) = manual_monitor(MonitorConfig::default());
        monitor.start().unwrap();
        for i in 0..25 {
            monitor.feed(RawEvent::moved(i as f64, 0.0));
        }
        settle();
        monitor.stop().unwrap();

        let metrics = monitor.performance_metrics();
        assert_eq!(metrics.processed, 25);
        assert!(metrics.delivered >= 1);
        assert_eq!(metrics.delivered + metrics.dropped, 25);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = MonitorConfig::default();
        config.poll.active_ms = 500;
        let result = Monitor::with_payload_source(
            config,
            |_e: MonitorEvent| {},
            Arc::new(MemoryPayloadSource::new()),
        );
        assert!(result.is_err());
    }
}
