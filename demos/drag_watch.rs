//! Drag watch example - the core feature of dragwatch.
//!
//! Prints file drags as they are detected, with the trajectory analysis of
//! every finished gesture and the engine's counters on exit.
//!
//! Run with: cargo run --example drag_watch
//! Pass `--responsive` to use the low-latency thresholds.
//!
//! Expected output when dragging a file from a file manager:
//!   >>> DRAG START
//!       /home/me/report.pdf (File, 48213 bytes)
//!   <<< DRAG END
//!       gesture 7: 3 direction changes, circular=false, zigzag=false

use dragwatch::{
    Consumer, DraggedItemDescriptor, ErrorCode, GestureState, GestureThresholds, Monitor,
    MonitorConfig, TrajectoryAnalysis,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

struct Printer;

impl Consumer for Printer {
    fn on_drag_start(&self) {
        println!(">>> DRAG START");
    }

    fn on_dragging(&self, items: &[DraggedItemDescriptor]) {
        for item in items {
            match item.size {
                Some(size) => println!(
                    "    {} ({:?}, {} bytes)",
                    item.path.display(),
                    item.kind,
                    size
                ),
                None => println!("    {} ({:?})", item.path.display(), item.kind),
            }
        }
    }

    fn on_drag_end(&self) {
        println!("<<< DRAG END");
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        eprintln!("error {}: {}", code.as_u32(), message);
    }

    fn on_gesture_analyzed(&self, gesture: &GestureState, analysis: &TrajectoryAnalysis) {
        if !gesture.in_progress && gesture.move_count > 0 {
            println!(
                "    gesture {}: {} direction changes, circular={}, zigzag={}",
                analysis.gesture_id,
                analysis.direction_changes,
                analysis.has_circular_motion,
                analysis.has_zigzag_pattern
            );
        }
    }
}

fn main() -> dragwatch::Result<()> {
    let thresholds = if std::env::args().any(|arg| arg == "--responsive") {
        GestureThresholds::responsive()
    } else {
        GestureThresholds::conservative()
    };
    let config = MonitorConfig::default().with_thresholds(thresholds);

    println!("dragwatch drag detection example");
    println!("================================\n");
    println!("Drag files from your file manager to see them reported.");
    println!("Press Ctrl+C to exit\n");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        println!("\nStopping...");
    })
    .expect("Error setting Ctrl-C handler");

    let monitor = Monitor::new(config, Printer)?;
    monitor.start()?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    monitor.stop()?;
    let metrics = monitor.performance_metrics();
    println!(
        "processed {} events, delivered {}, dropped {}",
        metrics.processed, metrics.delivered, metrics.dropped
    );
    Ok(())
}
