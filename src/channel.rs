//! Channel-based event receiving.
//!
//! These helpers start a [`Monitor`] whose consumer forwards every
//! [`MonitorEvent`] into a channel, so events can be processed on any thread
//! (or task) instead of inside the dispatch callback.
//!
//! # Example (Sync)
//!
//! ```no_run
//! use dragwatch::channel::monitor_channel;
//! use dragwatch::{MonitorConfig, MonitorEvent};
//! use std::time::Duration;
//!
//! let (monitor, rx) = monitor_channel(MonitorConfig::default()).expect("failed to start");
//!
//! loop {
//!     match rx.recv_timeout(Duration::from_millis(100)) {
//!         Ok(MonitorEvent::Dragging(items)) => println!("{} item(s)", items.len()),
//!         Ok(_) => {}
//!         Err(_) => {
//!             // Timeout - do other work or check exit condition
//!         }
//!     }
//! }
//! # monitor.stop().unwrap();
//! ```
//!
//! # Example (Async with Tokio)
//!
//! ```ignore
//! use dragwatch::channel::monitor_async_channel;
//! use dragwatch::MonitorConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (monitor, mut rx) =
//!         monitor_async_channel(MonitorConfig::default(), 256).expect("failed to start");
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```

use crate::batcher::MonitorEvent;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::monitor::Monitor;
use std::sync::mpsc::{self, Receiver};

/// Start a monitor that sends events to an unbounded channel.
///
/// Nothing is dropped between the dispatcher and the channel, so button
/// transitions stay lossless. Position samples are already rate limited by
/// the dispatcher, which keeps the channel from growing without bound unless
/// the receiver stops reading.
pub fn monitor_channel(config: MonitorConfig) -> Result<(Monitor, Receiver<MonitorEvent>)> {
    let (sender, receiver) = mpsc::channel();
    let monitor = Monitor::new(config, move |event: MonitorEvent| {
        let _ = sender.send(event);
    })?;
    monitor.start()?;
    Ok((monitor, receiver))
}

/// Start a monitor that sends events to a bounded channel.
///
/// When the channel is full new events are dropped so a slow receiver never
/// stalls the dispatcher. This includes button transitions; use
/// [`monitor_channel`] if those must not be lost.
pub fn monitor_bounded_channel(
    config: MonitorConfig,
    capacity: usize,
) -> Result<(Monitor, Receiver<MonitorEvent>)> {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    let monitor = Monitor::new(config, move |event: MonitorEvent| {
        let _ = sender.try_send(event);
    })?;
    monitor.start()?;
    Ok((monitor, receiver))
}

#[cfg(feature = "tokio")]
pub use tokio_channel::*;

#[cfg(feature = "tokio")]
mod tokio_channel {
    use super::*;
    use tokio::sync::mpsc as tokio_mpsc;

    /// Start a monitor that sends events to a tokio channel.
    ///
    /// Uses `try_send`, so events are dropped while the channel is full.
    pub fn monitor_async_channel(
        config: MonitorConfig,
        capacity: usize,
    ) -> Result<(Monitor, tokio_mpsc::Receiver<MonitorEvent>)> {
        let (sender, receiver) = tokio_mpsc::channel(capacity);
        let monitor = Monitor::new(config, move |event: MonitorEvent| {
            let _ = sender.try_send(event);
        })?;
        monitor.start()?;
        Ok((monitor, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureMode;
    use crate::event::{Button, RawEvent};
    use std::time::Duration;

    fn manual() -> MonitorConfig {
        MonitorConfig::default().with_capture(CaptureMode::Manual)
    }

    #[test]
    fn test_monitor_channel_receives_transitions() {
        let (monitor, rx) = monitor_channel(manual()).unwrap();
        assert!(monitor.is_monitoring());

        monitor.feed(RawEvent::pressed(Button::Right, 1.0, 2.0));
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match event {
            MonitorEvent::ButtonChanged(t) => assert!(t.right_down && !t.left_down),
            other => panic!("unexpected event {other:?}"),
        }
        monitor.stop().unwrap();
    }

    #[test]
    fn test_bounded_channel_drops_when_full() {
        let (monitor, rx) = monitor_bounded_channel(manual(), 2).unwrap();
        for i in 0..10 {
            monitor.feed(RawEvent::pressed(Button::Right, 0.0, 0.0).at(i * 2));
            monitor.feed(RawEvent::released(Button::Right, 0.0, 0.0).at(i * 2 + 1));
        }
        std::thread::sleep(Duration::from_millis(100));
        monitor.stop().unwrap();
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_channel_closes_after_monitor_drops() {
        let (monitor, rx) = monitor_channel(manual()).unwrap();
        drop(monitor);
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_async_channel_receives_transitions() {
        let (monitor, mut rx) = monitor_async_channel(manual(), 16).unwrap();
        monitor.feed(RawEvent::pressed(Button::Left, 0.0, 0.0));
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, MonitorEvent::ButtonChanged(t) if t.left_down));
        monitor.stop().unwrap();
    }
}
