//! Windows input hook using `SetWindowsHookExW(WH_MOUSE_LL)`.
//!
//! Low-level hooks are called on the thread that installed them, so the
//! registry key is the hook thread's id.

use crate::error::{Error, Result};
use crate::event::{Button, RawEvent};
use crate::platform::{join_hook_thread, spawn_hook_thread};
use crate::registry::{self, InputSink};
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::thread::JoinHandle;
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, HC_ACTION, MSG, MSLLHOOKSTRUCT, PM_NOREMOVE, PeekMessageW,
    PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx, WH_MOUSE_LL, WM_LBUTTONDOWN,
    WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEMOVE, WM_QUIT, WM_RBUTTONDOWN,
    WM_RBUTTONUP, WM_XBUTTONDOWN, WM_XBUTTONUP,
};

/// A live mouse hook and its message pump thread.
pub(crate) struct HookHandle {
    thread_id: u32,
    thread: JoinHandle<()>,
}

impl HookHandle {
    /// Unhook and wait for the message pump to exit.
    pub(crate) fn stop(self) -> Result<()> {
        registry::remove(self.thread_id as u64);
        let thread_id = self.thread_id;
        let result = join_hook_thread(self.thread, || unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        });
        log::info!("mouse hook removed");
        result
    }
}

/// Read the MSLLHOOKSTRUCT behind `lparam`.
unsafe fn hook_data(lparam: LPARAM) -> MSLLHOOKSTRUCT {
    unsafe { *(lparam.0 as *const MSLLHOOKSTRUCT) }
}

/// X buttons 1 and 2 are buttons 4 and 5.
fn xbutton(mouse_data: u32) -> Button {
    Button::from_number(((mouse_data >> 16) & 0xFFFF) as u8 + 3)
}

unsafe fn convert_event(wparam: WPARAM, lparam: LPARAM) -> Option<RawEvent> {
    let data = unsafe { hook_data(lparam) };
    let (x, y) = (data.pt.x as f64, data.pt.y as f64);

    let event = match wparam.0 as u32 {
        WM_LBUTTONDOWN => RawEvent::pressed(Button::Left, x, y),
        WM_LBUTTONUP => RawEvent::released(Button::Left, x, y),
        WM_RBUTTONDOWN => RawEvent::pressed(Button::Right, x, y),
        WM_RBUTTONUP => RawEvent::released(Button::Right, x, y),
        WM_MBUTTONDOWN => RawEvent::pressed(Button::Middle, x, y),
        WM_MBUTTONUP => RawEvent::released(Button::Middle, x, y),
        WM_XBUTTONDOWN => RawEvent::pressed(xbutton(data.mouseData), x, y),
        WM_XBUTTONUP => RawEvent::released(xbutton(data.mouseData), x, y),
        WM_MOUSEMOVE => RawEvent::moved(x, y),
        _ => return None,
    };
    Some(event)
}

unsafe extern "system" fn mouse_callback(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32
        && let Some(event) = unsafe { convert_event(wparam, lparam) }
    {
        let thread_id = unsafe { GetCurrentThreadId() };
        registry::dispatch(thread_id as u64, event);
    }
    unsafe { CallNextHookEx(None, code, wparam, lparam) }
}

/// Install a low-level mouse hook feeding `sink`.
pub(crate) fn install_hook(sink: Arc<dyn InputSink>) -> Result<HookHandle> {
    let (thread_id, thread) = spawn_hook_thread(move |ready| run_pump(sink, ready))?;
    log::info!("mouse hook installed");
    Ok(HookHandle { thread_id, thread })
}

fn run_pump(sink: Arc<dyn InputSink>, ready: SyncSender<Result<u32>>) {
    let thread_id = unsafe { GetCurrentThreadId() };
    let mut msg = MSG::default();

    // Create the message queue before anyone can post WM_QUIT to it.
    unsafe {
        let _ = PeekMessageW(&mut msg, None, 0, 0, PM_NOREMOVE);
    }

    registry::insert(thread_id as u64, sink);
    let hook = match unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_callback), None, 0) } {
        Ok(hook) => hook,
        Err(e) => {
            registry::remove(thread_id as u64);
            let _ = ready.send(Err(Error::HookInstallFailed(format!(
                "SetWindowsHookExW(WH_MOUSE_LL): {e}"
            ))));
            return;
        }
    };

    if ready.send(Ok(thread_id)).is_ok() {
        unsafe {
            // 0 is WM_QUIT, -1 an error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {}
        }
    }

    unsafe {
        let _ = UnhookWindowsHookEx(hook);
    }
    registry::remove(thread_id as u64);
}
