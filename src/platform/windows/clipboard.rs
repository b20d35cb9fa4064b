//! The clipboard as a payload source.
//!
//! Drag sources that publish through OLE expose their data object on the
//! OLE clipboard; older ones put a `CF_HDROP` on the legacy clipboard.
//! Virtual files (e.g. mail attachments) only carry `FileGroupDescriptorW`.

use crate::error::{Error, Result};
use crate::payload::{PayloadFormat, PayloadSource, RawReference, parse_uri_list};
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;
use std::sync::Arc;
use windows::Win32::Foundation::HGLOBAL;
use windows::Win32::System::Com::{DVASPECT_CONTENT, FORMATETC, TYMED_HGLOBAL};
use windows::Win32::System::DataExchange::{
    CloseClipboard, GetClipboardData, GetClipboardSequenceNumber, OpenClipboard,
    RegisterClipboardFormatW,
};
use windows::Win32::System::Memory::{GlobalLock, GlobalSize, GlobalUnlock};
use windows::Win32::System::Ole::{
    CF_HDROP, OleGetClipboard, OleInitialize, OleUninitialize, ReleaseStgMedium,
};
use windows::Win32::UI::Shell::{DragQueryFileW, FILEGROUPDESCRIPTORW, HDROP};
use windows::core::{HSTRING, w};

/// OLE must be initialized on every thread that reads the clipboard.
struct OleThread(bool);

impl OleThread {
    fn init() -> Self {
        Self(unsafe { OleInitialize(None) }.is_ok())
    }
}

impl Drop for OleThread {
    fn drop(&mut self) {
        if self.0 {
            unsafe { OleUninitialize() };
        }
    }
}

thread_local! {
    static OLE: OleThread = OleThread::init();
}

/// Legacy clipboard, closed on drop.
struct OpenedClipboard;

impl OpenedClipboard {
    fn open() -> Result<Self> {
        unsafe { OpenClipboard(None) }
            .map(|()| Self)
            .map_err(|e| Error::ExtractionFailed(format!("OpenClipboard: {e}")))
    }
}

impl Drop for OpenedClipboard {
    fn drop(&mut self) {
        let _ = unsafe { CloseClipboard() };
    }
}

/// Run `read` on the locked contents of `hglobal`.
unsafe fn with_locked<R>(hglobal: HGLOBAL, read: impl FnOnce(*const u8, usize) -> R) -> Option<R> {
    let ptr = unsafe { GlobalLock(hglobal) } as *const u8;
    if ptr.is_null() {
        return None;
    }
    let size = unsafe { GlobalSize(hglobal) };
    let result = read(ptr, size);
    let _ = unsafe { GlobalUnlock(hglobal) };
    Some(result)
}

unsafe fn hdrop_paths(hglobal: HGLOBAL) -> Vec<PathBuf> {
    unsafe {
        with_locked(hglobal, |ptr, _| {
            let hdrop = HDROP(ptr as *mut _);
            let count = DragQueryFileW(hdrop, u32::MAX, None);
            let mut paths = Vec::with_capacity(count as usize);
            for i in 0..count {
                let len = DragQueryFileW(hdrop, i, None) as usize;
                if len == 0 {
                    continue;
                }
                let mut buf = vec![0u16; len + 1];
                let written = DragQueryFileW(hdrop, i, Some(&mut buf)) as usize;
                paths.push(PathBuf::from(OsString::from_wide(&buf[..written])));
            }
            paths
        })
    }
    .unwrap_or_default()
}

unsafe fn group_descriptor_names(hglobal: HGLOBAL) -> Vec<String> {
    unsafe {
        with_locked(hglobal, |ptr, size| {
            if size < std::mem::size_of::<FILEGROUPDESCRIPTORW>() {
                return Vec::new();
            }
            let group = &*(ptr as *const FILEGROUPDESCRIPTORW);
            let first = group.fgd.as_ptr();
            (0..group.cItems as usize)
                .map(|i| {
                    let name = &(*first.add(i)).cFileName;
                    let len = name.iter().position(|&c| c == 0).unwrap_or(name.len());
                    String::from_utf16_lossy(&name[..len])
                })
                .filter(|name| !name.is_empty())
                .collect()
        })
    }
    .unwrap_or_default()
}

unsafe fn text(hglobal: HGLOBAL) -> String {
    unsafe {
        with_locked(hglobal, |ptr, size| {
            let bytes = std::slice::from_raw_parts(ptr, size);
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        })
    }
    .unwrap_or_default()
}

/// Read clipboard format `cf` from the OLE data object.
fn ole_data<R>(cf: u16, read: impl FnOnce(HGLOBAL) -> R) -> Result<Option<R>> {
    OLE.with(|ole| {
        if !ole.0 {
            return Err(Error::ExtractionFailed("OLE is not initialized".into()));
        }
        unsafe {
            let data = OleGetClipboard()
                .map_err(|e| Error::ExtractionFailed(format!("OleGetClipboard: {e}")))?;
            let format = FORMATETC {
                cfFormat: cf,
                ptd: std::ptr::null_mut(),
                dwAspect: DVASPECT_CONTENT.0 as u32,
                lindex: -1,
                tymed: TYMED_HGLOBAL.0 as u32,
            };
            let Ok(mut medium) = data.GetData(&format) else {
                return Ok(None);
            };
            let result = read(medium.u.hGlobal);
            ReleaseStgMedium(&mut medium);
            Ok(Some(result))
        }
    })
}

/// Reads drag payloads from the clipboard.
#[derive(Debug, Default)]
pub(crate) struct Clipboard;

impl Clipboard {
    fn file_drop() -> Result<Vec<RawReference>> {
        let paths = ole_data(CF_HDROP.0, |h| unsafe { hdrop_paths(h) })?.unwrap_or_default();
        Ok(paths.into_iter().map(RawReference::Path).collect())
    }

    fn legacy_file_drop() -> Result<Vec<RawReference>> {
        let _clipboard = OpenedClipboard::open()?;
        let paths = match unsafe { GetClipboardData(CF_HDROP.0 as u32) } {
            Ok(handle) => unsafe { hdrop_paths(HGLOBAL(handle.0)) },
            Err(_) => Vec::new(),
        };
        Ok(paths.into_iter().map(RawReference::Path).collect())
    }

    fn group_descriptor() -> Result<Vec<RawReference>> {
        let cf = unsafe { RegisterClipboardFormatW(w!("FileGroupDescriptorW")) };
        let names = ole_data(cf as u16, |h| unsafe { group_descriptor_names(h) })?
            .unwrap_or_default();
        Ok(names.into_iter().map(RawReference::Promised).collect())
    }

    fn vendor(name: &str) -> Result<Vec<RawReference>> {
        let cf = unsafe { RegisterClipboardFormatW(&HSTRING::from(name)) };
        if cf == 0 {
            return Err(Error::ExtractionFailed(format!(
                "cannot register clipboard format {name}"
            )));
        }
        let value = ole_data(cf as u16, |h| unsafe { text(h) })?.unwrap_or_default();
        Ok(parse_uri_list(&value))
    }
}

impl PayloadSource for Clipboard {
    fn change_count(&self) -> Result<i64> {
        Ok(unsafe { GetClipboardSequenceNumber() } as i64)
    }

    fn read(&self, format: &PayloadFormat) -> Result<Vec<RawReference>> {
        match format {
            PayloadFormat::FileUrls => Self::file_drop(),
            PayloadFormat::FilenameList => Self::legacy_file_drop(),
            PayloadFormat::PromisedFiles => Self::group_descriptor(),
            PayloadFormat::Vendor(name) => Self::vendor(name),
        }
    }
}

/// The clipboard.
pub(crate) fn system_payload_source() -> Arc<dyn PayloadSource> {
    Arc::new(Clipboard)
}
