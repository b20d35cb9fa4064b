//! Linux backend.
//!
//! With the `x11` feature (default) input comes from XRecord and drag
//! payloads from the XDND selection. Without it only manual capture works.

#[cfg(feature = "x11")]
mod x11;
#[cfg(feature = "x11")]
pub(crate) use x11::*;

#[cfg(not(feature = "x11"))]
pub(crate) use super::unsupported::*;
