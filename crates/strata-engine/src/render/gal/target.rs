/// Destination of primitives drawn outside a group.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum RenderTargetKind {
    /// Main buffer, content kept in the vertex cache.
    #[default]
    Cached,
    /// Main buffer, content rebuilt every frame.
    NonCached,
    /// Separate buffer composited above the main one.
    Overlay,
}

impl RenderTargetKind {
    pub const ALL: [RenderTargetKind; 3] =
        [RenderTargetKind::Cached, RenderTargetKind::NonCached, RenderTargetKind::Overlay];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Cached and non-cached content share the main buffer.
    #[inline]
    pub fn shares_main_buffer(self) -> bool {
        !matches!(self, RenderTargetKind::Overlay)
    }
}
