//! Platform-specific implementations.
//!
//! Every backend exports the same four items:
//!
//! - `install_hook(sink)`: install a listen-only input hook on a dedicated
//!   thread and return once it is live (or failed),
//! - `HookHandle::stop(self)`: remove the hook and join its thread,
//! - `system_payload_source()`: the OS drag payload source,
//! - `ensure_permission()`: check (and request once) input monitoring consent.

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub(crate) use macos::*;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub(crate) use windows::*;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::*;

#[cfg(any(
    all(target_os = "linux", not(feature = "x11")),
    not(any(target_os = "macos", target_os = "windows", target_os = "linux"))
))]
mod unsupported;
#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
pub(crate) use unsupported::*;

use crate::error::{Error, Result};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Spawn `body` on the hook thread and wait for it to report whether the
/// hook is live. `body` must report exactly once before entering its loop.
#[allow(dead_code)]
pub(crate) fn spawn_hook_thread<T, F>(body: F) -> Result<(T, JoinHandle<()>)>
where
    T: Send + 'static,
    F: FnOnce(SyncSender<Result<T>>) + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let thread = thread::Builder::new()
        .name("dragwatch-hook".into())
        .spawn(move || body(ready_tx))
        .map_err(|e| Error::ThreadCreateFailed(format!("hook: {e}")))?;

    match ready_rx.recv() {
        Ok(Ok(value)) => Ok((value, thread)),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(Error::HookInstallFailed(
                "hook thread exited before the hook was installed".into(),
            ))
        }
    }
}

/// Wake the hook loop until its thread exits, then join it.
///
/// The wake is repeated because the loop may not have started waiting yet
/// when the first one is sent.
#[allow(dead_code)]
pub(crate) fn join_hook_thread(thread: JoinHandle<()>, mut wake: impl FnMut()) -> Result<()> {
    while !thread.is_finished() {
        wake();
        thread::sleep(Duration::from_millis(5));
    }
    thread
        .join()
        .map_err(|_| Error::Platform("hook thread panicked".into()))
}
