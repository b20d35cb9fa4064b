//! # dragwatch
//!
//! A low-latency, system-wide pointer and file drag-and-drop monitoring engine.
//!
//! ## Features
//!
//! - Cross-platform listen-only input hooks (macOS, Windows, Linux/X11)
//! - File drag detection from the OS drag payload (pasteboard, clipboard,
//!   XDND selection), confirmed only after a gesture clears click-rejection
//!   thresholds
//! - A hook path that never blocks: atomics, a double-buffered gesture store
//!   and non-blocking queues
//! - Rate-limited position delivery (at most 60Hz, latest wins) with lossless,
//!   ordered button transitions
//! - Trajectory analysis (direction changes, circular and zigzag motion)
//! - Channel adaptors for std and tokio consumers
//!
//! ## Quick Start
//!
//! ```no_run
//! use dragwatch::{Monitor, MonitorConfig, MonitorEvent};
//!
//! let monitor = Monitor::new(MonitorConfig::default(), |event: MonitorEvent| match event {
//!     MonitorEvent::DragStart => println!("drag started"),
//!     MonitorEvent::Dragging(items) => {
//!         for item in items {
//!             println!("  {} ({:?})", item.path.display(), item.kind);
//!         }
//!     }
//!     MonitorEvent::DragEnd => println!("drag ended"),
//!     _ => {}
//! })
//! .expect("invalid config");
//!
//! monitor.start().expect("failed to start monitoring");
//! ```
//!
//! ## Implementing a consumer
//!
//! Closures taking a [`MonitorEvent`] are consumers. For finer control,
//! implement [`Consumer`] and override only the callbacks you need:
//!
//! ```no_run
//! use dragwatch::{Consumer, DraggedItemDescriptor, Monitor, MonitorConfig};
//!
//! struct Printer;
//!
//! impl Consumer for Printer {
//!     fn on_dragging(&self, items: &[DraggedItemDescriptor]) {
//!         println!("{} item(s)", items.len());
//!     }
//! }
//!
//! let monitor = Monitor::new(MonitorConfig::default(), Printer).unwrap();
//! monitor.start().unwrap();
//! ```
//!
//! ## Architecture
//!
//! The OS hook callback only updates an atomic button mask (see [`state`]),
//! the double-buffered [`GestureState`] and the gesture phase, then hands work
//! to three threads: the adaptive poller queries the payload source, the
//! dispatcher delivers to the consumer, and the analyzer classifies
//! trajectories. A drag starts only when a gesture cleared the thresholds
//! *and* the payload source produced at least one file reference.

pub mod analyzer;
pub mod batcher;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod gesture;
pub mod monitor;
pub mod payload;
pub mod poller;
pub mod state;

mod platform;
mod registry;

// Re-exports
pub use analyzer::TrajectoryAnalysis;
pub use batcher::{Consumer, MonitorEvent, PerformanceMetrics};
pub use config::{BatchConfig, CaptureMode, MonitorConfig, PollIntervals};
pub use error::{Error, ErrorCode, Result};
pub use event::{Button, ButtonStates, ButtonTransition, Point, PositionSample, RawEvent};
pub use gesture::{GesturePhase, GestureState, GestureThresholds};
pub use monitor::Monitor;
pub use payload::{
    DraggedItemDescriptor, ItemKind, MemoryPayloadSource, PayloadFormat, PayloadSource,
    RawReference,
};
pub use poller::PollPhase;
