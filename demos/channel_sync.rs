//! Sync channel example - receive monitor events in the background.
//!
//! Run with: cargo run --example channel_sync
//!
//! This example shows how to use channels to receive events
//! without blocking your main thread.

use dragwatch::channel::monitor_channel;
use dragwatch::{MonitorConfig, MonitorEvent};
use std::time::Duration;

fn main() {
    println!("dragwatch channel example (sync)");
    println!("================================\n");
    println!("Events will be received in the background.");
    println!("Press Ctrl+C to exit.\n");

    let (monitor, rx) = monitor_channel(MonitorConfig::default()).expect("Failed to start monitor");

    println!("Monitor started, waiting for events...\n");

    let mut event_count = 0u32;

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                event_count += 1;

                match event {
                    MonitorEvent::ButtonChanged(t) => {
                        println!(
                            "[{}] Buttons: left={} right={}",
                            event_count, t.left_down, t.right_down
                        );
                    }
                    MonitorEvent::Position(p) => {
                        // Only print every 30th sample to reduce spam
                        if event_count % 30 == 0 {
                            println!("[{}] Pointer at ({:.0}, {:.0})", event_count, p.x, p.y);
                        }
                    }
                    MonitorEvent::DragStart => println!("[{}] Drag started", event_count),
                    MonitorEvent::Dragging(items) => {
                        for item in items {
                            println!("[{}]   {}", event_count, item.name);
                        }
                    }
                    MonitorEvent::DragEnd => println!("[{}] Drag ended", event_count),
                    MonitorEvent::Error { code, message } => {
                        eprintln!("[{}] Error {:?}: {}", event_count, code, message);
                    }
                    MonitorEvent::GestureAnalyzed(_) => {}
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // No event - do other work here
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                println!("Channel disconnected, monitor stopped.");
                break;
            }
        }
    }

    let _ = monitor.stop();
}
