use std::fmt;

/// High-level response after a surface error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface was reconfigured; rendering may resume next frame.
    Reconfigured,
    /// Transient error; skip the current frame.
    SkipFrame,
    /// Fatal error (commonly OOM); terminate gracefully.
    Fatal,
}

/// Failure reported by a [`GraphicsContext`](super::GraphicsContext).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContextError {
    /// The context is no longer usable (device lost, display reset).
    ///
    /// Recoverable: the caller may recreate the context and retry.
    Lost,
    /// The device refused to allocate a resource.
    OutOfMemory,
    /// A handle that the context does not know about was used.
    InvalidHandle,
}

impl ContextError {
    /// Returns `true` for errors the caller can recover from by recreating the context.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ContextError::Lost)
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Lost => f.write_str("graphics context is no longer available"),
            ContextError::OutOfMemory => f.write_str("graphics device is out of memory"),
            ContextError::InvalidHandle => f.write_str("unknown graphics resource handle"),
        }
    }
}

impl std::error::Error for ContextError {}
