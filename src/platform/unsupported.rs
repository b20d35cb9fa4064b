//! Fallback for platforms without an input hook backend.
//!
//! System capture fails to start; manual capture works as everywhere else.

use crate::error::{Error, Result};
use crate::payload::{NullPayloadSource, PayloadSource};
use crate::registry::InputSink;
use std::sync::Arc;

/// No hook can be installed here, so no handle can exist.
pub(crate) enum HookHandle {}

impl HookHandle {
    pub(crate) fn stop(self) -> Result<()> {
        match self {}
    }
}

pub(crate) fn install_hook(_sink: Arc<dyn InputSink>) -> Result<HookHandle> {
    Err(Error::HookInstallFailed(
        "no input hook backend is available (on Linux, enable the `x11` feature)".into(),
    ))
}

pub(crate) fn system_payload_source() -> Arc<dyn PayloadSource> {
    Arc::new(NullPayloadSource)
}

pub(crate) fn ensure_permission() -> Result<()> {
    Ok(())
}
