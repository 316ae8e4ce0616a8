use std::fmt;

use crate::device::ContextError;

use super::compositor::TargetHandle;

/// Failure surfaced by the cache, the compositor or a redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The graphics context reported an error.
    Context(ContextError),
    /// The vertex cache could not provide `requested` vertices.
    AllocationFailed { requested: u32, capacity: u32 },
    /// A render target would exceed the maximum texture dimension.
    UnsupportedBufferSize { width: u32, height: u32, max: u32 },
    /// Every color attachment slot is in use.
    TooManyTargets { max: u32 },
    /// The compositor was used before `initialize` (or after it was reset).
    NotInitialized,
    /// The handle belongs to an older compositor generation or was never created.
    InvalidTarget(TargetHandle),
}

impl RenderError {
    /// Returns `true` when the caller may recreate the context and retry the frame.
    ///
    /// Resource exhaustion and misuse are fatal.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RenderError::Context(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

impl From<ContextError> for RenderError {
    fn from(e: ContextError) -> Self {
        RenderError::Context(e)
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Context(e) => write!(f, "graphics context error: {e}"),
            RenderError::AllocationFailed { requested, capacity } => write!(
                f,
                "cannot allocate {requested} vertices (cache capacity {capacity})"
            ),
            RenderError::UnsupportedBufferSize { width, height, max } => write!(
                f,
                "render target {width}x{height} exceeds the maximum texture size {max}"
            ),
            RenderError::TooManyTargets { max } => {
                write!(f, "no free color attachment (maximum {max})")
            }
            RenderError::NotInitialized => f.write_str("compositor is not initialized"),
            RenderError::InvalidTarget(h) => write!(f, "invalid render target {h:?}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Context(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lost_context_is_recoverable() {
        assert!(RenderError::from(ContextError::Lost).is_recoverable());
        assert!(!RenderError::from(ContextError::OutOfMemory).is_recoverable());
        assert!(!RenderError::TooManyTargets { max: 8 }.is_recoverable());
        assert!(!RenderError::NotInitialized.is_recoverable());
    }
}
