//! Error types for the drag monitoring engine.

use thiserror::Error;

/// Result type alias for dragwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric codes reported to consumers alongside error messages.
///
/// The numbering groups errors by area: general (1-99), permission (100-199),
/// system (200-299) and lifecycle (300-399).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum ErrorCode {
    /// Unclassified failure.
    Unknown = 1,
    /// A caller-supplied value was rejected.
    InvalidArgument = 2,
    /// Input monitoring / accessibility consent is missing.
    PermissionDenied = 100,
    /// The OS refused to install the input interposer.
    HookInstallFailed = 200,
    /// The run loop / message pump backing the hook could not be created.
    RunLoopCreateFailed = 201,
    /// A worker thread could not be spawned.
    ThreadCreateFailed = 202,
    /// The drag payload source could not be read.
    PayloadAccessFailed = 203,
    /// A sample could not be handed to the consumer.
    DeliveryFailed = 204,
    /// The engine failed to start for a reason not covered above.
    StartFailed = 310,
}

impl ErrorCode {
    /// Numeric value of the code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Errors that can occur while monitoring input and drag payloads.
#[derive(Debug, Error)]
pub enum Error {
    /// Input monitoring consent was denied. Fatal until granted externally.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The OS input interposer could not be installed.
    #[error("failed to install input hook: {0}")]
    HookInstallFailed(String),

    /// The run loop or message pump backing the hook could not be created.
    #[error("failed to create run loop: {0}")]
    RunLoopCreateFailed(String),

    /// A worker thread could not be created.
    #[error("failed to create thread: {0}")]
    ThreadCreateFailed(String),

    /// Reading the drag payload failed. Soft: treated as "no files".
    #[error("payload extraction failed: {0}")]
    ExtractionFailed(String),

    /// A sample could not be delivered to the consumer. Soft: counted as dropped.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Configuration values violate an invariant.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Platform-specific error.
    #[error("platform error: {0}")]
    Platform(String),

    /// The requested feature is not supported on this platform.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Stable numeric code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Error::HookInstallFailed(_) => ErrorCode::HookInstallFailed,
            Error::RunLoopCreateFailed(_) => ErrorCode::RunLoopCreateFailed,
            Error::ThreadCreateFailed(_) => ErrorCode::ThreadCreateFailed,
            Error::ExtractionFailed(_) => ErrorCode::PayloadAccessFailed,
            Error::DeliveryFailed(_) => ErrorCode::DeliveryFailed,
            Error::InvalidConfig(_) => ErrorCode::InvalidArgument,
            Error::Platform(_) => ErrorCode::StartFailed,
            Error::NotSupported(_) => ErrorCode::HookInstallFailed,
        }
    }

    /// Whether this error aborts `start()`.
    ///
    /// Soft errors are only ever logged and counted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::ExtractionFailed(_) | Error::DeliveryFailed(_))
    }
}
