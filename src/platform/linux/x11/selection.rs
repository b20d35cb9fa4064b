//! The XDND selection as a payload source.
//!
//! A drag source owns `XdndSelection` for the duration of a drag and answers
//! conversions to `text/uri-list`. X offers no change counter, so one is
//! derived from the owner and its `TIMESTAMP` answer: a source reacquiring
//! the selection from the same window still stamps it with a new time.

use crate::error::{Error, Result};
use crate::payload::{PayloadFormat, PayloadSource, RawReference, parse_uri_list};
use std::ffi::CString;
use std::os::raw::{c_int, c_long, c_uchar, c_ulong};
use std::ptr::{null, null_mut};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use x11::xlib;

/// How long the selection owner has to answer a conversion.
const CONVERT_TIMEOUT: Duration = Duration::from_millis(100);

struct Atoms {
    selection: xlib::Atom,
    property: xlib::Atom,
    uri_list: xlib::Atom,
    utf8_string: xlib::Atom,
    timestamp: xlib::Atom,
}

/// A private display connection with an unmapped requestor window.
struct Connection {
    display: *mut xlib::Display,
    window: xlib::Window,
    atoms: Atoms,
}

// SAFETY: the connection is only used behind the source's mutex.
unsafe impl Send for Connection {}

impl Connection {
    fn open() -> Result<Self> {
        unsafe {
            let display = xlib::XOpenDisplay(null());
            if display.is_null() {
                return Err(Error::ExtractionFailed("cannot open X display".into()));
            }
            let root = xlib::XDefaultRootWindow(display);
            let window = xlib::XCreateSimpleWindow(display, root, 0, 0, 1, 1, 0, 0, 0);
            let intern = |name: &str| {
                let name = CString::new(name).unwrap_or_default();
                xlib::XInternAtom(display, name.as_ptr(), xlib::False)
            };
            let atoms = Atoms {
                selection: intern("XdndSelection"),
                property: intern("DRAGWATCH_SELECTION"),
                uri_list: intern("text/uri-list"),
                utf8_string: intern("UTF8_STRING"),
                timestamp: intern("TIMESTAMP"),
            };
            Ok(Self {
                display,
                window,
                atoms,
            })
        }
    }

    fn intern(&self, name: &str) -> Result<xlib::Atom> {
        let name = CString::new(name)
            .map_err(|_| Error::ExtractionFailed(format!("invalid target name {name:?}")))?;
        Ok(unsafe { xlib::XInternAtom(self.display, name.as_ptr(), xlib::False) })
    }

    fn owner(&self) -> xlib::Window {
        unsafe { xlib::XGetSelectionOwner(self.display, self.atoms.selection) }
    }

    /// Convert the selection to `target`. `None` when the owner refused.
    fn convert(&self, target: xlib::Atom) -> Result<Option<Vec<u8>>> {
        if self.owner() == 0 {
            return Ok(None);
        }
        unsafe {
            xlib::XConvertSelection(
                self.display,
                self.atoms.selection,
                target,
                self.atoms.property,
                self.window,
                xlib::CurrentTime,
            );
            xlib::XFlush(self.display);

            let deadline = Instant::now() + CONVERT_TIMEOUT;
            let mut event: xlib::XEvent = std::mem::zeroed();
            loop {
                if xlib::XCheckTypedWindowEvent(
                    self.display,
                    self.window,
                    xlib::SelectionNotify,
                    &mut event,
                ) != 0
                {
                    let notify = event.selection;
                    if notify.property == 0 {
                        return Ok(None);
                    }
                    return Ok(Some(self.take_property(notify.property)));
                }
                if Instant::now() >= deadline {
                    return Err(Error::ExtractionFailed(
                        "selection owner did not answer in time".into(),
                    ));
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    /// Read and delete `property` on the requestor window.
    unsafe fn take_property(&self, property: xlib::Atom) -> Vec<u8> {
        let mut actual_type: xlib::Atom = 0;
        let mut actual_format: c_int = 0;
        let mut items: c_ulong = 0;
        let mut remaining: c_ulong = 0;
        let mut data: *mut c_uchar = null_mut();

        let status = unsafe {
            xlib::XGetWindowProperty(
                self.display,
                self.window,
                property,
                0,
                c_long::MAX / 4,
                xlib::True,
                0,
                &mut actual_type,
                &mut actual_format,
                &mut items,
                &mut remaining,
                &mut data,
            )
        };
        if status != 0 || data.is_null() {
            return Vec::new();
        }
        // Xlib hands 32-bit items back as C longs.
        let item_size = match actual_format {
            8 => 1,
            16 => std::mem::size_of::<std::os::raw::c_short>(),
            32 => std::mem::size_of::<c_long>(),
            _ => 0,
        };
        let len = items as usize * item_size;
        let bytes = unsafe { std::slice::from_raw_parts(data, len) }.to_vec();
        unsafe { xlib::XFree(data.cast()) };
        bytes
    }

    /// The server time at which the owner acquired the selection.
    fn acquired_at(&self) -> Option<xlib::Time> {
        let bytes = self.convert(self.atoms.timestamp).ok()??;
        let raw: [u8; std::mem::size_of::<c_ulong>()] =
            bytes.get(..std::mem::size_of::<c_ulong>())?.try_into().ok()?;
        Some(c_ulong::from_ne_bytes(raw) as xlib::Time)
    }

    fn convert_text(&self, target: xlib::Atom) -> Result<String> {
        Ok(self
            .convert(target)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe {
            xlib::XDestroyWindow(self.display, self.window);
            xlib::XCloseDisplay(self.display);
        }
    }
}

/// Advances whenever the selection is (re)acquired.
#[derive(Debug, Default)]
struct OwnerCounter {
    last: Option<(xlib::Window, Option<xlib::Time>)>,
    changes: i64,
}

impl OwnerCounter {
    /// Record the current owner and acquisition time. Owners that do not
    /// answer `TIMESTAMP` are tracked by window alone.
    fn observe(&mut self, owner: xlib::Window, acquired: Option<xlib::Time>) -> i64 {
        let key = Some((owner, acquired));
        if key != self.last {
            self.last = key;
            self.changes += 1;
        }
        self.changes
    }
}

#[derive(Default)]
struct State {
    connection: Option<Connection>,
    counter: OwnerCounter,
}

/// Reads the XDND selection. The display is opened on first use.
#[derive(Default)]
pub(crate) struct XdndSelection {
    state: Mutex<State>,
}

impl XdndSelection {
    fn with_connection<R>(&self, f: impl FnOnce(&mut State) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.connection.is_none() {
            state.connection = Some(Connection::open()?);
        }
        f(&mut state)
    }
}

impl PayloadSource for XdndSelection {
    fn change_count(&self) -> Result<i64> {
        self.with_connection(|state| {
            let Some(conn) = state.connection.as_ref() else {
                return Ok(state.counter.changes);
            };
            let owner = conn.owner();
            let acquired = if owner == 0 { None } else { conn.acquired_at() };
            Ok(state.counter.observe(owner, acquired))
        })
    }

    fn read(&self, format: &PayloadFormat) -> Result<Vec<RawReference>> {
        self.with_connection(|state| {
            let Some(conn) = state.connection.as_ref() else {
                return Ok(Vec::new());
            };
            let references = match format {
                PayloadFormat::FileUrls => parse_uri_list(&conn.convert_text(conn.atoms.uri_list)?),
                PayloadFormat::FilenameList => {
                    parse_uri_list(&conn.convert_text(conn.atoms.utf8_string)?)
                }
                // XDND has no promise target; direct save (XDS) happens at drop.
                PayloadFormat::PromisedFiles => Vec::new(),
                PayloadFormat::Vendor(target) => {
                    parse_uri_list(&conn.convert_text(conn.intern(target)?)?)
                }
            };
            Ok(references)
        })
    }
}

/// The XDND selection.
pub(crate) fn system_payload_source() -> Arc<dyn PayloadSource> {
    Arc::new(XdndSelection::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reacquiring_from_same_window_advances() {
        let mut counter = OwnerCounter::default();
        let first = counter.observe(0x2a0_0001, Some(1000));
        assert_eq!(counter.observe(0x2a0_0001, Some(1000)), first);

        // Same file manager window, new drag.
        let second = counter.observe(0x2a0_0001, Some(5400));
        assert!(second > first);

        let other = counter.observe(0x380_0002, Some(5400));
        assert!(other > second);
        assert_eq!(counter.observe(0, None), other + 1);
        assert_eq!(counter.observe(0, None), other + 1);
    }

    #[test]
    fn test_owner_without_timestamp_is_tracked_by_window() {
        let mut counter = OwnerCounter::default();
        let first = counter.observe(7, None);
        assert_eq!(counter.observe(7, None), first);
        assert_eq!(counter.observe(8, None), first + 1);
    }
}
