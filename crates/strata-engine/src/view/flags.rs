use bitflags::bitflags;

bitflags! {
    /// Pending work for an item, processed by `Scene::update_items`.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct UpdateFlags: u8 {
        /// Visibility changed.
        const APPEARANCE = 0x01;
        /// Color changed; cached groups are recolored in place.
        const COLOR = 0x02;
        /// Bounding box or drawn geometry changed.
        const GEOMETRY = 0x04;
        /// Layer membership changed.
        const LAYERS = 0x08;
        /// Item was just added; its index entries already exist.
        const INITIAL_ADD = 0x10;
        /// Cached groups must be drawn again.
        const REPAINT = 0x20;
        const ALL = 0xef;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct Visibility: u8 {
        const VISIBLE = 0x01;
        const HIDDEN = 0x02;
        const OVERLAY_HIDDEN = 0x04;
    }
}

impl UpdateFlags {
    /// Flags that move the item in the spatial index.
    pub const INDEX: UpdateFlags = UpdateFlags::GEOMETRY.union(UpdateFlags::LAYERS);
}

impl Visibility {
    /// Drawn only when visible and not hidden in any way.
    #[inline]
    pub fn is_renderable(self) -> bool {
        self == Visibility::VISIBLE
    }
}
