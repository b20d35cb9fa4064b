//! macOS input hook using a listen-only CGEventTap.

#![allow(unsafe_op_in_unsafe_fn)]

use crate::error::{Error, Result};
use crate::event::{Button, RawEvent};
use crate::platform::{join_hook_thread, spawn_hook_thread};
use crate::registry::{self, InputSink};
use core::ptr::NonNull;
use objc2_core_foundation::{CFMachPort, CFRetained, CFRunLoop, kCFRunLoopCommonModes};
use objc2_core_graphics::{
    CGEvent, CGEventField, CGEventMask, CGEventTapCallBack, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType,
};
use objc2_foundation::NSAutoreleasePool;
use std::cell::Cell;
use std::ffi::c_void;
use std::ptr::null;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::thread::JoinHandle;

#[link(name = "Cocoa", kind = "framework")]
unsafe extern "C" {}

thread_local! {
    /// The tap owned by this hook thread, kept for timeout recovery.
    static TAP: Cell<*const CFMachPort> = const { Cell::new(null()) };
}

/// Run loop of a hook thread, stopped from the thread calling `stop()`.
struct HookRunLoop(CFRetained<CFRunLoop>);

// SAFETY: CFRunLoopStop may be called from any thread.
unsafe impl Send for HookRunLoop {}

/// A live event tap and the thread running it.
pub(crate) struct HookHandle {
    handle: u64,
    run_loop: HookRunLoop,
    thread: JoinHandle<()>,
}

impl HookHandle {
    /// Remove the tap and wait for its thread to exit.
    pub(crate) fn stop(self) -> Result<()> {
        registry::remove(self.handle);
        let run_loop = self.run_loop;
        let result = join_hook_thread(self.thread, || run_loop.0.stop());
        log::info!("event tap removed");
        result
    }
}

/// Mouse events the tap listens to.
fn event_mask() -> CGEventMask {
    [
        CGEventType::LeftMouseDown,
        CGEventType::LeftMouseUp,
        CGEventType::RightMouseDown,
        CGEventType::RightMouseUp,
        CGEventType::OtherMouseDown,
        CGEventType::OtherMouseUp,
        CGEventType::MouseMoved,
        CGEventType::LeftMouseDragged,
        CGEventType::RightMouseDragged,
        CGEventType::OtherMouseDragged,
    ]
    .iter()
    .fold(0, |mask, t| mask | (1 << t.0))
}

/// Convert the CGEvent button number (0-based) of an "other" button.
fn other_button(number: i64) -> Button {
    Button::from_number(u8::try_from(number + 1).unwrap_or(u8::MAX))
}

unsafe fn convert_event(event_type: CGEventType, cg_event: NonNull<CGEvent>) -> Option<RawEvent> {
    let point = CGEvent::location(Some(cg_event.as_ref()));
    let (x, y) = (point.x, point.y);

    let event = match event_type {
        CGEventType::LeftMouseDown => RawEvent::pressed(Button::Left, x, y),
        CGEventType::LeftMouseUp => RawEvent::released(Button::Left, x, y),
        CGEventType::RightMouseDown => RawEvent::pressed(Button::Right, x, y),
        CGEventType::RightMouseUp => RawEvent::released(Button::Right, x, y),
        CGEventType::OtherMouseDown | CGEventType::OtherMouseUp => {
            let number = CGEvent::integer_value_field(
                Some(cg_event.as_ref()),
                CGEventField::MouseEventButtonNumber,
            );
            let button = other_button(number);
            if event_type == CGEventType::OtherMouseDown {
                RawEvent::pressed(button, x, y)
            } else {
                RawEvent::released(button, x, y)
            }
        }
        CGEventType::MouseMoved
        | CGEventType::LeftMouseDragged
        | CGEventType::RightMouseDragged
        | CGEventType::OtherMouseDragged => RawEvent::moved(x, y),
        _ => return None,
    };
    Some(event)
}

unsafe extern "C-unwind" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: CGEventType,
    cg_event: NonNull<CGEvent>,
    user_info: *mut c_void,
) -> *mut CGEvent {
    // The system disables taps whose callbacks run too long.
    if event_type == CGEventType::TapDisabledByTimeout
        || event_type == CGEventType::TapDisabledByUserInput
    {
        log::warn!("event tap was disabled by the system, re-enabling");
        let tap = TAP.with(Cell::get);
        if !tap.is_null() {
            CGEvent::tap_enable(&*tap, true);
        }
        return cg_event.as_ptr();
    }

    if let Some(event) = convert_event(event_type, cg_event) {
        registry::dispatch(user_info as usize as u64, event);
    }
    cg_event.as_ptr()
}

/// Install a listen-only tap feeding `sink`.
pub(crate) fn install_hook(sink: Arc<dyn InputSink>) -> Result<HookHandle> {
    let handle = registry::register(sink);
    match spawn_hook_thread(move |ready| run_tap(handle, ready)) {
        Ok((run_loop, thread)) => {
            log::info!("event tap installed");
            Ok(HookHandle {
                handle,
                run_loop,
                thread,
            })
        }
        Err(e) => {
            registry::remove(handle);
            Err(e)
        }
    }
}

fn run_tap(handle: u64, ready: SyncSender<Result<HookRunLoop>>) {
    unsafe {
        let _pool = NSAutoreleasePool::new();

        let callback: CGEventTapCallBack = Some(tap_callback);
        let Some(tap) = CGEvent::tap_create(
            CGEventTapLocation::HIDEventTap,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            event_mask(),
            callback,
            handle as usize as *mut c_void,
        ) else {
            let _ = ready.send(Err(Error::PermissionDenied(
                "failed to create event tap; grant Input Monitoring access".into(),
            )));
            return;
        };

        let Some(source) = CFMachPort::new_run_loop_source(None, Some(&tap), 0) else {
            let _ = ready.send(Err(Error::HookInstallFailed(
                "failed to create run loop source".into(),
            )));
            return;
        };
        let Some(run_loop) = CFRunLoop::current() else {
            let _ = ready.send(Err(Error::RunLoopCreateFailed(
                "no run loop for the hook thread".into(),
            )));
            return;
        };

        run_loop.add_source(Some(&source), kCFRunLoopCommonModes);
        CGEvent::tap_enable(&tap, true);
        TAP.with(|t| t.set(&*tap as *const CFMachPort));

        if ready.send(Ok(HookRunLoop(run_loop.clone()))).is_ok() {
            CFRunLoop::run();
        }

        CGEvent::tap_enable(&tap, false);
        TAP.with(|t| t.set(null()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_covers_mouse_events_only() {
        let mask = event_mask();
        assert_ne!(mask & (1 << CGEventType::LeftMouseDown.0), 0);
        assert_ne!(mask & (1 << CGEventType::OtherMouseDragged.0), 0);
        assert_eq!(mask & (1 << CGEventType::KeyDown.0), 0);
    }

    #[test]
    fn test_other_button_numbers() {
        assert_eq!(other_button(2), Button::Middle);
        assert_eq!(other_button(3), Button::Unknown(4));
    }
}
