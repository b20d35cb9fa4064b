//! Batching and delivery to the registered consumer.
//!
//! Producers never block here. Button transitions and drag lifecycle events
//! travel through an unbounded control channel and are delivered one by one,
//! in order. Position samples go into a single latest-wins cell instead: the
//! dispatcher delivers at most one per batch interval and counts everything
//! it skipped as dropped.

use crate::analyzer::TrajectoryAnalysis;
use crate::config::BatchConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::event::{ButtonStates, ButtonTransition, PositionSample};
use crate::gesture::GestureState;
use crate::payload::DraggedItemDescriptor;
use std::hint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Receives everything the engine reports.
///
/// Every method has an empty default so consumers implement only what they
/// need. Methods are called from the engine's dispatch thread (analysis from
/// the analyzer thread) and must not block for long.
///
/// Closures taking a [`MonitorEvent`] implement this trait.
pub trait Consumer: Send + Sync + 'static {
    /// Coalesced pointer position, at most 60 per second.
    fn on_position_sample(&self, _sample: &PositionSample) {}

    /// One call per left/right button transition, never dropped.
    fn on_button_state_change(&self, _transition: &ButtonTransition) {}

    /// A drag with a confirmed file payload started.
    fn on_drag_start(&self) {}

    /// The dragged items, after a drag start or when they change mid-drag.
    fn on_dragging(&self, _items: &[DraggedItemDescriptor]) {}

    /// The confirmed drag ended.
    fn on_drag_end(&self) {}

    /// Fatal start failure.
    fn on_error(&self, _code: ErrorCode, _message: &str) {}

    /// Advisory trajectory analysis of the gesture in progress or just finished.
    fn on_gesture_analyzed(&self, _gesture: &GestureState, _analysis: &TrajectoryAnalysis) {}
}

/// Everything a [`Consumer`] can observe, as one value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MonitorEvent {
    /// See [`Consumer::on_position_sample`].
    Position(PositionSample),
    /// See [`Consumer::on_button_state_change`].
    ButtonChanged(ButtonTransition),
    /// See [`Consumer::on_drag_start`].
    DragStart,
    /// See [`Consumer::on_dragging`].
    Dragging(Vec<DraggedItemDescriptor>),
    /// See [`Consumer::on_drag_end`].
    DragEnd,
    /// See [`Consumer::on_error`].
    Error {
        /// Stable numeric code.
        code: ErrorCode,
        /// Human readable message.
        message: String,
    },
    /// See [`Consumer::on_gesture_analyzed`].
    GestureAnalyzed(TrajectoryAnalysis),
}

impl<F> Consumer for F
where
    F: Fn(MonitorEvent) + Send + Sync + 'static,
{
    fn on_position_sample(&self, sample: &PositionSample) {
        self(MonitorEvent::Position(*sample));
    }

    fn on_button_state_change(&self, transition: &ButtonTransition) {
        self(MonitorEvent::ButtonChanged(*transition));
    }

    fn on_drag_start(&self) {
        self(MonitorEvent::DragStart);
    }

    fn on_dragging(&self, items: &[DraggedItemDescriptor]) {
        self(MonitorEvent::Dragging(items.to_vec()));
    }

    fn on_drag_end(&self) {
        self(MonitorEvent::DragEnd);
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        self(MonitorEvent::Error {
            code,
            message: message.to_string(),
        });
    }

    fn on_gesture_analyzed(&self, _gesture: &GestureState, analysis: &TrajectoryAnalysis) {
        self(MonitorEvent::GestureAnalyzed(*analysis));
    }
}

/// Snapshot of the engine's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PerformanceMetrics {
    /// Raw input events seen by the capture layer.
    pub processed: u64,
    /// Consumer callbacks completed.
    pub delivered: u64,
    /// Samples superseded, skipped or lost to a failed delivery.
    pub dropped: u64,
}

/// Monotonic counters, updated with atomic increments only.
#[derive(Debug, Default)]
pub struct PerformanceCounters {
    processed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl PerformanceCounters {
    /// Read all counters.
    pub fn snapshot(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            processed: self.processed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }
}

const BUTTONS_PRESENT: u8 = 1;
const BUTTONS_LEFT: u8 = 1 << 1;
const BUTTONS_RIGHT: u8 = 1 << 2;

fn encode_buttons(buttons: Option<ButtonStates>) -> u8 {
    match buttons {
        None => 0,
        Some(b) => {
            let mut bits = BUTTONS_PRESENT;
            if b.left {
                bits |= BUTTONS_LEFT;
            }
            if b.right {
                bits |= BUTTONS_RIGHT;
            }
            bits
        }
    }
}

fn decode_buttons(bits: u8) -> Option<ButtonStates> {
    (bits & BUTTONS_PRESENT != 0).then_some(ButtonStates {
        left: bits & BUTTONS_LEFT != 0,
        right: bits & BUTTONS_RIGHT != 0,
    })
}

/// Latest-wins position slot built from atomics (a seqlock).
///
/// Writers bump `seq` to odd, store the fields and bump it back to even;
/// the reader retries until it sees the same even `seq` before and after
/// loading the fields.
#[derive(Debug, Default)]
pub(crate) struct PositionCell {
    seq: AtomicU64,
    x: AtomicU64,
    y: AtomicU64,
    timestamp_ms: AtomicU64,
    buttons: AtomicU8,
    pending: AtomicUsize,
}

impl PositionCell {
    /// Store `sample`, replacing any undelivered one.
    ///
    /// Returns whether the dispatcher should be woken: on the first pending
    /// sample and when the pending count reaches `wake_threshold`.
    pub(crate) fn publish(&self, sample: PositionSample, wake_threshold: usize) -> bool {
        let start = loop {
            let seq = self.seq.load(Ordering::SeqCst);
            if seq % 2 == 0
                && self
                    .seq
                    .compare_exchange_weak(seq, seq + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                break seq;
            }
            hint::spin_loop();
        };

        self.x.store(sample.x.to_bits(), Ordering::SeqCst);
        self.y.store(sample.y.to_bits(), Ordering::SeqCst);
        self.timestamp_ms.store(sample.timestamp_ms, Ordering::SeqCst);
        self.buttons
            .store(encode_buttons(sample.buttons), Ordering::SeqCst);
        self.seq.store(start + 2, Ordering::SeqCst);

        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        pending == 1 || pending == wake_threshold
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) != 0
    }

    /// Take the newest sample, its sequence number and how many samples it
    /// superseded.
    pub(crate) fn take(&self) -> Option<(PositionSample, u64, usize)> {
        let pending = self.pending.swap(0, Ordering::SeqCst);
        if pending == 0 {
            return None;
        }
        loop {
            let before = self.seq.load(Ordering::SeqCst);
            if before % 2 == 1 {
                hint::spin_loop();
                continue;
            }
            let sample = PositionSample {
                x: f64::from_bits(self.x.load(Ordering::SeqCst)),
                y: f64::from_bits(self.y.load(Ordering::SeqCst)),
                timestamp_ms: self.timestamp_ms.load(Ordering::SeqCst),
                buttons: decode_buttons(self.buttons.load(Ordering::SeqCst)),
            };
            if self.seq.load(Ordering::SeqCst) == before {
                return Some((sample, before, pending - 1));
            }
        }
    }
}

/// Messages for the dispatch loop.
#[derive(Debug)]
pub(crate) enum Envelope {
    /// A position sample is pending.
    Wake,
    /// A button transition.
    Button(ButtonTransition),
    /// A gesture's payload was confirmed: drag start followed by its items.
    DragConfirmed {
        gesture: u64,
        items: Vec<DraggedItemDescriptor>,
    },
    /// The items of an ongoing drag changed.
    Dragging {
        gesture: u64,
        items: Vec<DraggedItemDescriptor>,
    },
    /// The confirmed drag of `gesture` ended.
    DragEnd { gesture: u64 },
    /// Exit the loop.
    Shutdown,
}

/// Producer side of the batcher, shared by the capture layer and the poller.
#[derive(Debug, Clone)]
pub(crate) struct BatchSender {
    control: Sender<Envelope>,
    positions: Arc<PositionCell>,
    wake_threshold: usize,
}

impl BatchSender {
    /// Offer a position sample (latest wins).
    pub(crate) fn position(&self, sample: PositionSample) {
        if self.positions.publish(sample, self.wake_threshold) {
            let _ = self.control.send(Envelope::Wake);
        }
    }

    /// Queue a control message. Fails only once the dispatcher is gone.
    pub(crate) fn send(&self, envelope: Envelope) -> bool {
        self.control.send(envelope).is_ok()
    }
}

/// Handle to the dispatch thread.
pub(crate) struct BatcherHandle {
    sender: BatchSender,
    thread: Option<JoinHandle<()>>,
}

impl BatcherHandle {
    pub(crate) fn spawn(
        config: BatchConfig,
        consumer: Arc<dyn Consumer>,
        counters: Arc<PerformanceCounters>,
        stopping: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (control, receiver) = mpsc::channel();
        let positions = Arc::new(PositionCell::default());

        let dispatcher = Dispatcher {
            consumer,
            counters,
            stopping,
            positions: positions.clone(),
            interval: config.interval(),
            last_delivery: None,
            last_seq: None,
            active_drag: None,
            early_end: None,
        };
        let thread = thread::Builder::new()
            .name("dragwatch-dispatch".into())
            .spawn(move || dispatcher.run(receiver))
            .map_err(|e| Error::ThreadCreateFailed(format!("dispatcher: {e}")))?;

        Ok(Self {
            sender: BatchSender {
                control,
                positions,
                wake_threshold: config.wake_threshold,
            },
            thread: Some(thread),
        })
    }

    pub(crate) fn sender(&self) -> BatchSender {
        self.sender.clone()
    }

    /// Stop the loop and wait for it. Undelivered samples are discarded.
    pub(crate) fn shutdown(mut self) {
        let _ = self.sender.control.send(Envelope::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("dispatch thread panicked");
        }
    }
}

struct Dispatcher {
    consumer: Arc<dyn Consumer>,
    counters: Arc<PerformanceCounters>,
    stopping: Arc<AtomicBool>,
    positions: Arc<PositionCell>,
    interval: Duration,
    last_delivery: Option<Instant>,
    last_seq: Option<u64>,
    /// Gesture whose drag start was delivered and whose end was not.
    active_drag: Option<u64>,
    /// A drag end that overtook its gesture's confirmation.
    early_end: Option<u64>,
}

impl Dispatcher {
    fn run(mut self, receiver: Receiver<Envelope>) {
        loop {
            let envelope = match self.next_position_due() {
                Some(due) => {
                    match receiver.recv_timeout(due.saturating_duration_since(Instant::now())) {
                        Ok(envelope) => Some(envelope),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match receiver.recv() {
                    Ok(envelope) => Some(envelope),
                    Err(_) => break,
                },
            };

            if let Some(envelope) = envelope {
                if !self.handle(envelope) {
                    break;
                }
                let mut open = true;
                while let Ok(envelope) = receiver.try_recv() {
                    if !self.handle(envelope) {
                        open = false;
                        break;
                    }
                }
                if !open {
                    break;
                }
            }

            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            self.flush_position();
        }
        log::debug!("dispatch loop exited");
    }

    fn next_position_due(&self) -> Option<Instant> {
        if !self.positions.has_pending() {
            return None;
        }
        Some(match self.last_delivery {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }

    /// Returns false when the loop should exit.
    fn handle(&mut self, envelope: Envelope) -> bool {
        match envelope {
            Envelope::Wake => {}
            Envelope::Button(transition) => {
                self.deliver(|c| c.on_button_state_change(&transition));
            }
            Envelope::DragConfirmed { gesture, items } => {
                self.deliver(|c| c.on_drag_start());
                self.deliver(|c| c.on_dragging(&items));
                self.active_drag = Some(gesture);
                if self.early_end == Some(gesture) {
                    self.early_end = None;
                    self.end_drag();
                }
            }
            Envelope::Dragging { gesture, items } => {
                if self.active_drag == Some(gesture) {
                    self.deliver(|c| c.on_dragging(&items));
                }
            }
            Envelope::DragEnd { gesture } => {
                if self.active_drag == Some(gesture) {
                    self.end_drag();
                } else {
                    self.early_end = Some(gesture);
                }
            }
            Envelope::Shutdown => return false,
        }
        true
    }

    fn end_drag(&mut self) {
        self.active_drag = None;
        self.deliver(|c| c.on_drag_end());
    }

    fn flush_position(&mut self) {
        if let Some(last) = self.last_delivery
            && last.elapsed() < self.interval
        {
            return;
        }
        let Some((sample, seq, superseded)) = self.positions.take() else {
            return;
        };
        self.counters.record_dropped(superseded as u64);
        if self.last_seq == Some(seq) {
            // The pending count lagged the store: this sample already went
            // out under an earlier writer's count, so that writer's sample is
            // the one lost.
            self.counters.record_dropped(1);
            return;
        }
        self.last_seq = Some(seq);
        self.last_delivery = Some(Instant::now());
        self.deliver(|c| c.on_position_sample(&sample));
    }

    fn deliver(&self, f: impl FnOnce(&dyn Consumer)) {
        if self.stopping.load(Ordering::SeqCst) {
            self.counters.record_dropped(1);
            return;
        }
        let consumer = &*self.consumer;
        match panic::catch_unwind(AssertUnwindSafe(|| f(consumer))) {
            Ok(()) => self.counters.record_delivered(),
            Err(_) => {
                let err = Error::DeliveryFailed("consumer callback panicked".into());
                log::warn!("{err}");
                self.counters.record_dropped(1);
            }
        }
    }
}
