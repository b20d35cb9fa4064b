//! Input Monitoring (listen-event) consent.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    fn CGPreflightListenEventAccess() -> bool;
    fn CGRequestListenEventAccess() -> bool;
}

/// Whether consent has been requested in this process.
static REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check listen-event access, prompting the user the first time it is missing.
pub(crate) fn ensure_permission() -> Result<()> {
    if unsafe { CGPreflightListenEventAccess() } {
        return Ok(());
    }
    if !REQUESTED.swap(true, Ordering::SeqCst) {
        log::info!("requesting input monitoring access");
        if unsafe { CGRequestListenEventAccess() } {
            return Ok(());
        }
    }
    Err(Error::PermissionDenied(
        "input monitoring access is not granted; enable it in System Settings > \
         Privacy & Security > Input Monitoring and start again"
            .into(),
    ))
}
