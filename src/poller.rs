//! Adaptive payload poller.
//!
//! The poller owns every query of the payload source. It sleeps for the
//! interval of its current phase, or until the capture layer signals a
//! gesture transition, and then checks the source's change counter:
//!
//! - `Idle`: no gesture has cleared the thresholds. The change counter is
//!   sampled so the next gesture has a baseline read before its press.
//! - `Active`: a gesture cleared the thresholds. As soon as the change
//!   counter differs from that baseline, the extractor runs; a non-empty
//!   result confirms the drag.
//! - `Cooldown`: a confirmed drag just ended. Trailing payload updates still
//!   refresh the item list until the cooldown expires.

use crate::batcher::{BatchSender, Envelope};
use crate::error::{Error, Result};
use crate::gesture::GesturePhase;
use crate::monitor::Shared;
use crate::payload::DraggedItemDescriptor;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Poll rate class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum PollPhase {
    /// Slow background rate.
    Idle = 0,
    /// Aggressive rate while a gesture may become a drag.
    Active = 1,
    /// Medium rate right after a drag ended.
    Cooldown = 2,
}

impl PollPhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PollPhase::Active,
            2 => PollPhase::Cooldown,
            _ => PollPhase::Idle,
        }
    }
}

/// Gesture transitions reported by the capture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollerSignal {
    GestureStarted { gesture: u64, at: Instant },
    ThresholdsMet(u64),
    GestureEnded { gesture: u64, dragged: bool },
    Shutdown,
}

/// Handle to the poll thread.
pub(crate) struct PollerHandle {
    sender: Sender<PollerSignal>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub(crate) fn spawn(shared: Arc<Shared>, batch: BatchSender) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let poller = Poller {
            shared,
            batch,
            phase: PollPhase::Idle,
            gesture: 0,
            thresholds_met: false,
            baseline: None,
            last_seen: None,
            observed: None,
            previous: None,
            cooldown_until: None,
        };
        poller.publish_phase();

        let thread = thread::Builder::new()
            .name("dragwatch-poller".into())
            .spawn(move || poller.run(receiver))
            .map_err(|e| Error::ThreadCreateFailed(format!("poller: {e}")))?;

        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    pub(crate) fn sender(&self) -> Sender<PollerSignal> {
        self.sender.clone()
    }

    pub(crate) fn shutdown(mut self) {
        let _ = self.sender.send(PollerSignal::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("poller thread panicked");
        }
    }
}

/// Current poll phase as last published by the poll thread.
pub(crate) fn load_phase(cell: &AtomicU8) -> PollPhase {
    PollPhase::from_u8(cell.load(Ordering::SeqCst))
}

struct Poller {
    shared: Arc<Shared>,
    batch: BatchSender,
    phase: PollPhase,
    /// Gesture the poller is tracking.
    gesture: u64,
    thresholds_met: bool,
    /// Last change count read before the gesture's press.
    baseline: Option<i64>,
    /// Change count of the last successful extraction.
    last_seen: Option<i64>,
    /// Latest change count read, and when.
    observed: Option<(i64, Instant)>,
    /// The reading before `observed`.
    previous: Option<(i64, Instant)>,
    cooldown_until: Option<Instant>,
}

impl Poller {
    fn run(mut self, receiver: Receiver<PollerSignal>) {
        log::debug!("poll loop started");
        self.change_count();
        loop {
            let timeout = self.shared.config.poll.interval(self.phase);
            match receiver.recv_timeout(timeout) {
                Ok(PollerSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(signal) => {
                    if !self.drain(signal, &receiver) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if self.shared.stopping.load(Ordering::SeqCst) {
                break;
            }
            self.tick();
        }
        log::debug!("poll loop exited");
    }

    /// Handle `first` and everything queued behind it before the next tick.
    /// Returns false on shutdown.
    fn drain(&mut self, first: PollerSignal, receiver: &Receiver<PollerSignal>) -> bool {
        self.handle(first);
        while let Ok(signal) = receiver.try_recv() {
            if signal == PollerSignal::Shutdown {
                return false;
            }
            self.handle(signal);
        }
        true
    }

    fn set_phase(&mut self, phase: PollPhase) {
        if self.phase != phase {
            log::debug!("poll phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.publish_phase();
        }
    }

    fn publish_phase(&self) {
        self.shared
            .poll_phase
            .store(self.phase as u8, Ordering::SeqCst);
    }

    /// Read the change counter and remember the reading.
    fn change_count(&mut self) -> Option<i64> {
        let at = Instant::now();
        match self.shared.source.change_count() {
            Ok(count) => {
                self.previous = self.observed.replace((count, at));
                Some(count)
            }
            Err(e) => {
                log::debug!("payload change count unavailable: {e}");
                None
            }
        }
    }

    fn handle(&mut self, signal: PollerSignal) {
        match signal {
            PollerSignal::GestureStarted { gesture, at } => {
                self.gesture = gesture;
                self.thresholds_met = false;
                self.baseline = self.baseline_before(at);
                self.last_seen = None;
                self.cooldown_until = None;
                self.set_phase(PollPhase::Idle);
            }
            PollerSignal::ThresholdsMet(gesture) if gesture == self.gesture => {
                self.thresholds_met = true;
                self.set_phase(PollPhase::Active);
            }
            PollerSignal::GestureEnded { gesture, dragged } if gesture == self.gesture => {
                self.thresholds_met = false;
                if dragged {
                    self.cooldown_until =
                        Some(Instant::now() + self.shared.config.poll.cooldown_duration());
                    self.set_phase(PollPhase::Cooldown);
                } else {
                    self.set_phase(PollPhase::Idle);
                }
            }
            _ => {}
        }
    }

    /// The newest reading taken no later than `press`.
    ///
    /// The signal is handled after the press, possibly behind a slow tick,
    /// so a fresh read could already include the gesture's own payload.
    /// Queued signals are drained before ticking, so at most the tick in
    /// flight at the press reads after it and one of the two kept readings
    /// predates the press unless none was ever taken.
    fn baseline_before(&mut self, press: Instant) -> Option<i64> {
        let before = [self.observed, self.previous]
            .into_iter()
            .flatten()
            .find(|(_, at)| *at <= press);
        match before {
            Some((count, _)) => Some(count),
            None => match self.previous.or(self.observed) {
                Some((count, _)) => Some(count),
                None => self.change_count(),
            },
        }
    }

    fn tick(&mut self) {
        self.shared.items.clear_if_due();

        let Some(count) = self.change_count() else {
            return;
        };

        match self.phase {
            PollPhase::Idle => {}
            PollPhase::Active => match self.shared.phase.load() {
                GesturePhase::Sampling => {
                    let baseline = *self.baseline.get_or_insert(count);
                    if self.thresholds_met && count != baseline && self.last_seen != Some(count)
                    {
                        self.try_confirm(count);
                    }
                }
                GesturePhase::Dragging => {
                    if self.last_seen != Some(count) {
                        self.last_seen = Some(count);
                        self.refresh(true);
                    }
                }
                GesturePhase::Idle | GesturePhase::Cooldown => {}
            },
            PollPhase::Cooldown => {
                if self.last_seen != Some(count) {
                    self.last_seen = Some(count);
                    self.refresh(false);
                }
                if self.cooldown_until.is_none_or(|until| Instant::now() >= until) {
                    self.cooldown_until = None;
                    if self
                        .shared
                        .phase
                        .transition(GesturePhase::Cooldown, GesturePhase::Idle)
                    {
                        log::debug!("gesture {} cooldown finished", self.gesture);
                    }
                    self.set_phase(PollPhase::Idle);
                }
            }
        }
    }

    fn extract(&self) -> Vec<DraggedItemDescriptor> {
        self.shared.extractor.extract(self.shared.source.as_ref())
    }

    fn gesture_is_current(&self) -> bool {
        self.shared
            .gesture
            .read(|g| g.gesture_id == self.gesture && g.in_progress)
    }

    /// Promote the tracked gesture to a drag if the payload holds files.
    fn try_confirm(&mut self, count: i64) {
        let items = self.extract();
        if items.is_empty() {
            return;
        }
        self.last_seen = Some(count);

        let shared = &self.shared;
        if !self.gesture_is_current() {
            return;
        }
        shared.items.replace(items.clone());
        shared
            .confirmed_gesture
            .store(self.gesture, Ordering::SeqCst);

        if !shared
            .phase
            .transition(GesturePhase::Sampling, GesturePhase::Dragging)
        {
            shared.items.clear();
            return;
        }
        // A new gesture may have begun between the check and the transition.
        if !self.gesture_is_current() {
            shared
                .phase
                .transition(GesturePhase::Dragging, GesturePhase::Sampling);
            shared.items.clear();
            return;
        }

        log::debug!(
            "gesture {} confirmed as a file drag with {} item(s)",
            self.gesture,
            items.len()
        );
        self.batch.send(Envelope::DragConfirmed {
            gesture: self.gesture,
            items,
        });
    }

    /// Re-read the payload after its change counter advanced again.
    fn refresh(&mut self, dragging: bool) {
        let items = self.extract();
        if items.is_empty() || self.shared.items.matches(&items) {
            return;
        }

        log::debug!("dragged items changed ({} item(s))", items.len());
        self.shared.items.replace(items.clone());

        let still_dragging = self.shared.phase.load() == GesturePhase::Dragging;
        if dragging && still_dragging {
            self.batch.send(Envelope::Dragging {
                gesture: self.gesture,
                items,
            });
        } else if !still_dragging {
            // Replacing cancelled the deferred clear of the ended drag.
            self.shared
                .items
                .schedule_clear(self.shared.config.clear_delay());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::{BatcherHandle, MonitorEvent, PerformanceCounters};
    use crate::config::MonitorConfig;
    use crate::event::Point;
    use crate::payload::MemoryPayloadSource;
    use std::sync::Mutex;
    use std::time::Duration;

    fn recording_batcher(
        shared: &Shared,
    ) -> (BatcherHandle, Arc<Mutex<Vec<MonitorEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handle = BatcherHandle::spawn(
            shared.config.batch,
            Arc::new(move |e: MonitorEvent| sink.lock().unwrap().push(e)),
            Arc::new(PerformanceCounters::default()),
            shared.stopping.clone(),
        )
        .unwrap();
        (handle, events)
    }

    fn started(gesture: u64) -> PollerSignal {
        PollerSignal::GestureStarted {
            gesture,
            at: Instant::now(),
        }
    }

    fn begin_gesture(shared: &Shared, id: u64) {
        shared
            .gesture
            .try_update(|g| g.begin(id, Point::new(0.0, 0.0), 0))
            .unwrap();
        shared.phase.swap(GesturePhase::Sampling);
    }

    #[test]
    fn test_phase_follows_signals() {
        let source = Arc::new(MemoryPayloadSource::new());
        let shared = Arc::new(Shared::new(MonitorConfig::default(), source));
        let (batcher, _) = recording_batcher(&shared);
        let poller = PollerHandle::spawn(shared.clone(), batcher.sender()).unwrap();
        let signals = poller.sender();

        begin_gesture(&shared, 1);
        signals.send(started(1)).unwrap();
        signals.send(PollerSignal::ThresholdsMet(1)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(load_phase(&shared.poll_phase), PollPhase::Active);

        signals
            .send(PollerSignal::GestureEnded {
                gesture: 1,
                dragged: false,
            })
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(load_phase(&shared.poll_phase), PollPhase::Idle);

        poller.shutdown();
        batcher.shutdown();
    }

    #[test]
    fn test_stale_payload_does_not_confirm() {
        let source = Arc::new(MemoryPayloadSource::new());
        // Left over from an earlier copy: present before the gesture starts.
        source.set_paths(["/tmp/stale.txt"]);
        let shared = Arc::new(Shared::new(MonitorConfig::default(), source.clone()));
        let (batcher, events) = recording_batcher(&shared);
        let poller = PollerHandle::spawn(shared.clone(), batcher.sender()).unwrap();
        let signals = poller.sender();

        begin_gesture(&shared, 1);
        signals.send(started(1)).unwrap();
        signals.send(PollerSignal::ThresholdsMet(1)).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(shared.phase.load(), GesturePhase::Sampling);
        assert!(events.lock().unwrap().is_empty());

        source.set_paths(["/tmp/fresh.txt"]);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(shared.phase.load(), GesturePhase::Dragging);
        assert_eq!(shared.items.snapshot()[0].name, "fresh.txt");

        poller.shutdown();
        batcher.shutdown();
        let events = events.lock().unwrap();
        assert_eq!(events[0], MonitorEvent::DragStart);
        assert!(matches!(&events[1], MonitorEvent::Dragging(items) if items.len() == 1));
    }

    #[test]
    fn test_payload_published_before_late_signal_confirms() {
        let source = Arc::new(MemoryPayloadSource::new());
        let shared = Arc::new(Shared::new(MonitorConfig::default(), source.clone()));
        let (batcher, events) = recording_batcher(&shared);
        let poller = PollerHandle::spawn(shared.clone(), batcher.sender()).unwrap();
        let signals = poller.sender();
        thread::sleep(Duration::from_millis(20));

        // The press happens, its payload lands, and only then does the
        // poller get to see the gesture start.
        begin_gesture(&shared, 3);
        let pressed = Instant::now();
        source.set_paths(["/tmp/a.txt"]);
        thread::sleep(Duration::from_millis(20));
        signals
            .send(PollerSignal::GestureStarted {
                gesture: 3,
                at: pressed,
            })
            .unwrap();
        signals.send(PollerSignal::ThresholdsMet(3)).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(shared.phase.load(), GesturePhase::Dragging);

        poller.shutdown();
        batcher.shutdown();
        assert_eq!(events.lock().unwrap()[0], MonitorEvent::DragStart);
    }

    #[test]
    fn test_items_changing_mid_drag_are_redelivered() {
        let source = Arc::new(MemoryPayloadSource::new());
        let shared = Arc::new(Shared::new(MonitorConfig::default(), source.clone()));
        let (batcher, events) = recording_batcher(&shared);
        let poller = PollerHandle::spawn(shared.clone(), batcher.sender()).unwrap();
        let signals = poller.sender();

        begin_gesture(&shared, 7);
        signals.send(started(7)).unwrap();
        thread::sleep(Duration::from_millis(20));
        source.set_paths(["/tmp/a.txt"]);
        signals.send(PollerSignal::ThresholdsMet(7)).unwrap();
        thread::sleep(Duration::from_millis(60));
        source.set_paths(["/tmp/a.txt", "/tmp/b.txt"]);
        thread::sleep(Duration::from_millis(60));

        poller.shutdown();
        batcher.shutdown();
        let dragging: Vec<usize> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Dragging(items) => Some(items.len()),
                _ => None,
            })
            .collect();
        assert_eq!(dragging, vec![1, 2]);
        assert_eq!(shared.items.len(), 2);
    }
}
