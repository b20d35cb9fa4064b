//! Windows backend: low-level mouse hook and clipboard payload source.

mod clipboard;
mod hook;

pub(crate) use clipboard::system_payload_source;
pub(crate) use hook::{HookHandle, install_hook};

use crate::error::Result;

/// Low-level hooks need no consent on Windows.
pub(crate) fn ensure_permission() -> Result<()> {
    Ok(())
}
