//! macOS backend: CGEventTap hook, drag pasteboard, listen-event permission.

mod hook;
mod pasteboard;
mod permission;

pub(crate) use hook::{HookHandle, install_hook};
pub(crate) use pasteboard::system_payload_source;
pub(crate) use permission::ensure_permission;
