//! The drag pasteboard as a payload source.
//!
//! AppKit writes the items of a drag session to the pasteboard named
//! `NSPasteboardNameDrag`. Its change count advances when a new session
//! starts, which is what the poller watches.

use crate::error::{Error, Result};
use crate::payload::{PayloadFormat, PayloadSource, RawReference, parse_uri_list};
use objc2::rc::{Retained, autoreleasepool};
use objc2_app_kit::{NSPasteboard, NSPasteboardNameDrag, NSPasteboardTypeFileURL};
use objc2_foundation::{NSArray, NSString};
use std::path::PathBuf;
use std::sync::Arc;

/// Legacy property list of POSIX paths.
const FILENAMES_TYPE: &str = "NSFilenamesPboardType";
/// Metadata item written for each file promise.
const PROMISE_METADATA_TYPE: &str = "com.apple.NSFilePromiseItemMetaData";
/// Names of promised files, written by older promise APIs.
const PROMISED_NAMES_TYPE: &str = "com.apple.pasteboard.promised-file-name";

/// Reads the system drag pasteboard.
#[derive(Debug, Default)]
pub(crate) struct DragPasteboard;

fn drag_pasteboard() -> Retained<NSPasteboard> {
    NSPasteboard::pasteboardWithName(unsafe { NSPasteboardNameDrag })
}

impl DragPasteboard {
    /// String values of `type_` for every pasteboard item.
    fn item_strings(pasteboard: &NSPasteboard, type_: &NSString) -> Vec<String> {
        let Some(items) = pasteboard.pasteboardItems() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| item.stringForType(type_))
            .map(|s| s.to_string())
            .collect()
    }

    fn filenames(pasteboard: &NSPasteboard) -> Vec<RawReference> {
        let type_ = NSString::from_str(FILENAMES_TYPE);
        let Some(list) = pasteboard.propertyListForType(&type_) else {
            return Vec::new();
        };
        let Ok(array) = list.downcast::<NSArray>() else {
            log::debug!("{FILENAMES_TYPE} is not an array");
            return Vec::new();
        };
        array
            .iter()
            .filter_map(|entry| entry.downcast::<NSString>().ok())
            .map(|path| RawReference::Path(PathBuf::from(path.to_string())))
            .collect()
    }

    fn promised(pasteboard: &NSPasteboard) -> Vec<RawReference> {
        let names = Self::item_strings(pasteboard, &NSString::from_str(PROMISED_NAMES_TYPE));
        let references = promised_references(names);
        if references.is_empty() {
            let unnamed =
                Self::item_strings(pasteboard, &NSString::from_str(PROMISE_METADATA_TYPE)).len();
            if unnamed > 0 {
                log::debug!("skipping {unnamed} file promise(s) without a file name");
            }
        }
        references
    }
}

/// Promised files that carry a usable name. Nameless promises are left out:
/// nothing on disk could ever match them.
fn promised_references(names: Vec<String>) -> Vec<RawReference> {
    names
        .into_iter()
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .map(RawReference::Promised)
        .collect()
}

impl PayloadSource for DragPasteboard {
    fn change_count(&self) -> Result<i64> {
        autoreleasepool(|_| Ok(drag_pasteboard().changeCount() as i64))
    }

    fn read(&self, format: &PayloadFormat) -> Result<Vec<RawReference>> {
        autoreleasepool(|_| {
            let pasteboard = drag_pasteboard();
            let references = match format {
                PayloadFormat::FileUrls => {
                    Self::item_strings(&pasteboard, unsafe { NSPasteboardTypeFileURL })
                        .into_iter()
                        .map(RawReference::FileUrl)
                        .collect()
                }
                PayloadFormat::FilenameList => Self::filenames(&pasteboard),
                PayloadFormat::PromisedFiles => Self::promised(&pasteboard),
                PayloadFormat::Vendor(type_) => {
                    let type_ = NSString::from_str(type_);
                    let Some(value) = pasteboard.stringForType(&type_) else {
                        return Ok(Vec::new());
                    };
                    let value = value.to_string();
                    if value.is_empty() {
                        return Err(Error::ExtractionFailed(format!(
                            "vendor type {type_} is empty"
                        )));
                    }
                    parse_uri_list(&value)
                }
            };
            Ok(references)
        })
    }
}

/// The drag pasteboard.
pub(crate) fn system_payload_source() -> Arc<dyn PayloadSource> {
    Arc::new(DragPasteboard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nameless_promises_are_skipped() {
        let references = promised_references(vec![
            "IMG_0042.HEIC".to_owned(),
            String::new(),
            "  ".to_owned(),
        ]);
        assert_eq!(
            references,
            vec![RawReference::Promised("IMG_0042.HEIC".to_owned())]
        );
        assert!(promised_references(Vec::new()).is_empty());
    }
}
