//! X11 backend: XRecord hook and XDND selection payload source.

mod hook;
mod selection;

pub(crate) use hook::{HookHandle, install_hook};
pub(crate) use selection::system_payload_source;

use crate::error::Result;

/// XRecord needs no consent beyond access to the display.
pub(crate) fn ensure_permission() -> Result<()> {
    Ok(())
}
