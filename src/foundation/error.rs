use std::time::Duration;

/// Convenience result type used across animcap.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Top-level error taxonomy used by capture APIs.
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    /// No pooled resource became available before the acquire deadline.
    #[error("resource acquire timeout: no resource available after {0:?}")]
    ResourceAcquireTimeout(Duration),

    /// The capture target selector did not resolve to an element.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The requested animation group does not exist.
    #[error("index error: animation group {index} requested but {available} discovered")]
    Index {
        /// Requested group index.
        index: usize,
        /// Number of groups discovered on the page.
        available: usize,
    },

    /// Unknown quality preset name.
    #[error("invalid quality preset: '{0}' (expected low, medium or high)")]
    InvalidQualityPreset(String),

    /// The encoder was used outside of its `ready` state.
    #[error("encoder not ready: {0}")]
    EncoderNotReady(String),

    /// The encoder process failed or exited non-zero.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// An event-driven session never received its stop signal.
    #[error("capture timeout: no stop signal after {0:?}")]
    CaptureTimeout(Duration),

    /// An event-driven session was stopped before any frame was captured.
    #[error("no frames captured")]
    NoFramesCaptured,

    /// Invalid caller-provided data or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Browser instrumentation protocol failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A protocol call hit a page that is being torn down.
    #[error("page closed: {0}")]
    PageClosed(String),

    /// Object storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaptureError {
    /// Build a [`CaptureError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`CaptureError::Protocol`] value.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Build a [`CaptureError::PageClosed`] value.
    pub fn page_closed(msg: impl Into<String>) -> Self {
        Self::PageClosed(msg.into())
    }

    /// Build a [`CaptureError::Storage`] value.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Build a [`CaptureError::EncoderNotReady`] value.
    pub fn encoder_not_ready(msg: impl Into<String>) -> Self {
        Self::EncoderNotReady(msg.into())
    }

    /// Build a [`CaptureError::EncodeFailed`] value.
    pub fn encode_failed(msg: impl Into<String>) -> Self {
        Self::EncodeFailed(msg.into())
    }

    /// Return `true` for errors that only mean the page went away mid-capture.
    pub fn is_page_closed(&self) -> bool {
        matches!(self, Self::PageClosed(_))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
