//! Async channel example with Tokio.
//!
//! Run with: cargo run --example channel_async --features tokio
//!
//! This example shows how to use async channels with Tokio
//! to receive monitor events in an async context.

use dragwatch::channel::monitor_async_channel;
use dragwatch::{MonitorConfig, MonitorEvent};
use std::time::Duration;
use tokio::time::interval;

#[tokio::main]
async fn main() {
    println!("dragwatch channel example (async/tokio)");
    println!("=======================================\n");
    println!("Events will be received asynchronously.");
    println!("Press Ctrl+C to exit.\n");

    let (monitor, mut rx) =
        monitor_async_channel(MonitorConfig::default(), 256).expect("Failed to start monitor");

    println!("Monitor started, waiting for events...\n");

    let mut event_count = 0u32;
    let mut heartbeat = interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        event_count += 1;

                        match event {
                            MonitorEvent::DragStart => println!("[{}] Drag started", event_count),
                            MonitorEvent::Dragging(items) => {
                                for item in items {
                                    println!("[{}]   {} ({:?})", event_count, item.name, item.kind);
                                }
                            }
                            MonitorEvent::DragEnd => println!("[{}] Drag ended", event_count),
                            MonitorEvent::ButtonChanged(t) => {
                                println!(
                                    "[{}] Buttons: left={} right={}",
                                    event_count, t.left_down, t.right_down
                                );
                            }
                            _ => {}
                        }
                    }
                    None => {
                        println!("Channel closed, monitor stopped.");
                        break;
                    }
                }
            }

            // Periodic heartbeat to show the async loop is responsive
            _ = heartbeat.tick() => {
                let metrics = monitor.performance_metrics();
                println!(
                    "... heartbeat (received {} events, {} processed, {} dropped)",
                    event_count, metrics.processed, metrics.dropped
                );
            }
        }
    }

    let _ = monitor.stop();
}
