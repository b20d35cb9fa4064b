//! X11 input hook using XRecord.

use crate::error::{Error, Result};
use crate::event::{Button, RawEvent};
use crate::platform::{join_hook_thread, spawn_hook_thread};
use crate::registry::{self, InputSink};
use std::os::raw::{c_char, c_int, c_uchar, c_ulong};
use std::ptr::null;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::thread::JoinHandle;
use x11::xlib;
use x11::xrecord;

const FALSE: c_int = 0;

/// Leading fields of a recorded device event.
#[repr(C)]
struct XRecordDatum {
    type_: u8,
    code: u8,
    _rest: u64,
    _1: bool,
    _2: bool,
    _3: bool,
    root_x: i16,
    root_y: i16,
    _event_x: i16,
    _event_y: i16,
    _state: u16,
}

/// A live record context and the thread blocked in it.
pub(crate) struct HookHandle {
    handle: u64,
    context: xrecord::XRecordContext,
    thread: JoinHandle<()>,
}

impl HookHandle {
    /// Disable the record context and wait for its thread to exit.
    ///
    /// The context has to be disabled from a second connection; the data
    /// connection is blocked inside `XRecordEnableContext`.
    pub(crate) fn stop(self) -> Result<()> {
        registry::remove(self.handle);

        let control = unsafe { xlib::XOpenDisplay(null()) };
        if control.is_null() {
            return Err(Error::Platform(
                "cannot open X display to stop the record context".into(),
            ));
        }
        let context = self.context;
        let result = join_hook_thread(self.thread, || unsafe {
            xrecord::XRecordDisableContext(control, context);
            xlib::XFlush(control);
        });
        unsafe { xlib::XCloseDisplay(control) };
        log::info!("XRecord hook removed");
        result
    }
}

/// Map an X button code. Codes 4-7 are wheel steps and are ignored.
fn x_button(code: u8) -> Option<Button> {
    match code {
        1 => Some(Button::Left),
        2 => Some(Button::Middle),
        3 => Some(Button::Right),
        4..=7 => None,
        c => Some(Button::Unknown(c)),
    }
}

fn convert_event(type_: c_int, code: u8, x: f64, y: f64) -> Option<RawEvent> {
    match type_ {
        t if t == xlib::ButtonPress => x_button(code).map(|b| RawEvent::pressed(b, x, y)),
        t if t == xlib::ButtonRelease => x_button(code).map(|b| RawEvent::released(b, x, y)),
        t if t == xlib::MotionNotify => Some(RawEvent::moved(x, y)),
        _ => None,
    }
}

unsafe extern "C" fn record_callback(closure: *mut c_char, raw_data: *mut xrecord::XRecordInterceptData) {
    unsafe {
        let Some(data) = raw_data.as_ref() else {
            return;
        };

        if data.category == xrecord::XRecordFromServer
            && let Some(datum) = (data.data as *const XRecordDatum).as_ref()
            && let Some(event) = convert_event(
                datum.type_ as c_int,
                datum.code,
                datum.root_x as f64,
                datum.root_y as f64,
            )
        {
            registry::dispatch(closure as usize as u64, event);
        }

        xrecord::XRecordFreeData(raw_data);
    }
}

/// Install an XRecord hook feeding `sink`.
pub(crate) fn install_hook(sink: Arc<dyn InputSink>) -> Result<HookHandle> {
    let handle = registry::register(sink);
    match spawn_hook_thread(move |ready| run_record(handle, ready)) {
        Ok((context, thread)) => {
            log::info!("XRecord hook installed");
            Ok(HookHandle {
                handle,
                context,
                thread,
            })
        }
        Err(e) => {
            registry::remove(handle);
            Err(e)
        }
    }
}

fn run_record(handle: u64, ready: SyncSender<Result<xrecord::XRecordContext>>) {
    unsafe {
        let display = xlib::XOpenDisplay(null());
        if display.is_null() {
            let _ = ready.send(Err(Error::HookInstallFailed(
                "cannot open X display".into(),
            )));
            return;
        }

        if xlib::XInitExtension(display, c"RECORD".as_ptr()).is_null() {
            xlib::XCloseDisplay(display);
            let _ = ready.send(Err(Error::HookInstallFailed(
                "XRecord extension not available".into(),
            )));
            return;
        }

        let range = xrecord::XRecordAllocRange();
        if range.is_null() {
            xlib::XCloseDisplay(display);
            let _ = ready.send(Err(Error::HookInstallFailed(
                "cannot allocate XRecord range".into(),
            )));
            return;
        }
        (*range).device_events.first = xlib::ButtonPress as c_uchar;
        (*range).device_events.last = xlib::MotionNotify as c_uchar;

        let mut clients: c_ulong = xrecord::XRecordAllClients;
        let mut ranges = [range];
        let context =
            xrecord::XRecordCreateContext(display, 0, &mut clients, 1, ranges.as_mut_ptr(), 1);
        xlib::XFree(range.cast());

        if context == 0 {
            xlib::XCloseDisplay(display);
            let _ = ready.send(Err(Error::HookInstallFailed(
                "cannot create XRecord context".into(),
            )));
            return;
        }
        xlib::XSync(display, FALSE);

        if ready.send(Ok(context)).is_ok() {
            let enabled = xrecord::XRecordEnableContext(
                display,
                context,
                Some(record_callback),
                handle as usize as *mut c_char,
            );
            if enabled == 0 {
                log::error!("XRecordEnableContext failed");
            }
        }

        xrecord::XRecordFreeContext(display, context);
        xlib::XCloseDisplay(display);
    }
}
