use std::ops::Range;

use crate::device::{BufferId, BufferUsage, GraphicsContext};
use crate::render::{RenderError, Vertex};

/// Move of `len` vertices from `from` (old layout) to `to` (new layout).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Relocation {
    pub from: u32,
    pub to: u32,
    pub len: u32,
}

/// Where cached vertices live between frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Residency {
    /// Host memory, uploaded in bulk when dirty. Suits frequent CPU edits.
    #[default]
    Host,
    /// Mapped device buffer with dirty-range flushes. Suits rare reallocation.
    Device,
}

/// Backing memory of a [`CachedContainer`](super::CachedContainer).
///
/// Offsets and lengths are in vertices. `data_mut` and `copy_within` are only
/// valid while mapped.
pub trait VertexStorage {
    fn residency(&self) -> Residency;

    /// Capacity in vertices.
    fn capacity(&self) -> u32;

    /// Device buffer to draw from, once one exists.
    fn buffer(&self) -> Option<BufferId>;

    fn is_mapped(&self) -> bool;

    /// Returns `true` if the device copy is stale.
    fn is_dirty(&self) -> bool;

    fn map(&mut self, ctx: &mut dyn GraphicsContext) -> Result<(), RenderError>;

    /// Unmaps and brings the device copy up to date. `used` is one past the
    /// highest vertex ever written.
    fn unmap(&mut self, ctx: &mut dyn GraphicsContext, used: u32);

    fn data(&self) -> &[Vertex];

    fn data_mut(&mut self, range: Range<u32>) -> &mut [Vertex];

    fn copy_within(&mut self, from: u32, to: u32, len: u32);

    /// Rebuilds the storage with `capacity` vertices, carrying over `moves`.
    /// Everything not moved is dropped. Works mapped or unmapped and leaves
    /// the mapping state unchanged.
    fn relocate(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        moves: &[Relocation],
        capacity: u32,
    ) -> Result<(), RenderError>;

    /// Frees the device buffer.
    fn release(&mut self, ctx: &mut dyn GraphicsContext);
}

fn relocated(old: &[Vertex], moves: &[Relocation], capacity: u32) -> Vec<Vertex> {
    let mut data = vec![Vertex::default(); capacity as usize];
    for m in moves.iter().filter(|m| m.len > 0) {
        let (from, to, len) = (m.from as usize, m.to as usize, m.len as usize);
        data[to..to + len].copy_from_slice(&old[from..from + len]);
    }
    data
}

// ── host ──────────────────────────────────────────────────────────────────

/// Vertices in host memory; the device buffer is rewritten on unmap when dirty.
pub struct HostStorage {
    data: Vec<Vertex>,
    buffer: Option<(BufferId, u32)>,
    mapped: bool,
    dirty: bool,
}

impl HostStorage {
    pub fn new(capacity: u32) -> Self {
        Self {
            data: vec![Vertex::default(); capacity as usize],
            buffer: None,
            mapped: false,
            dirty: false,
        }
    }
}

impl VertexStorage for HostStorage {
    fn residency(&self) -> Residency {
        Residency::Host
    }

    fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    fn buffer(&self) -> Option<BufferId> {
        self.buffer.map(|(id, _)| id)
    }

    fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn map(&mut self, _ctx: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        debug_assert!(!self.mapped, "vertex storage mapped twice");
        self.mapped = true;
        Ok(())
    }

    fn unmap(&mut self, ctx: &mut dyn GraphicsContext, used: u32) {
        debug_assert!(self.mapped, "vertex storage unmapped twice");
        self.mapped = false;
        if !self.dirty {
            return;
        }

        let capacity = self.capacity();
        let buffer = match self.buffer {
            Some((id, len)) if len >= capacity => id,
            stale => {
                if let Some((id, _)) = stale {
                    ctx.destroy_buffer(id);
                }
                match ctx.create_buffer(BufferUsage::Vertex, capacity) {
                    Ok(id) => {
                        self.buffer = Some((id, capacity));
                        id
                    }
                    Err(e) => {
                        // Stays dirty; the next unmap retries.
                        self.buffer = None;
                        log::warn!("vertex cache upload skipped: {e}");
                        return;
                    }
                }
            }
        };

        let used = used.min(capacity) as usize;
        if used > 0 {
            ctx.write_vertices(buffer, 0, &self.data[..used]);
        }
        log::trace!("uploaded {used} cached vertices");
        self.dirty = false;
    }

    fn data(&self) -> &[Vertex] {
        &self.data
    }

    fn data_mut(&mut self, range: Range<u32>) -> &mut [Vertex] {
        debug_assert!(self.mapped, "vertex storage written while unmapped");
        self.dirty = true;
        &mut self.data[range.start as usize..range.end as usize]
    }

    fn copy_within(&mut self, from: u32, to: u32, len: u32) {
        debug_assert!(self.mapped, "vertex storage written while unmapped");
        let from = from as usize;
        self.data.copy_within(from..from + len as usize, to as usize);
        self.dirty = true;
    }

    fn relocate(
        &mut self,
        _ctx: &mut dyn GraphicsContext,
        moves: &[Relocation],
        capacity: u32,
    ) -> Result<(), RenderError> {
        self.data = relocated(&self.data, moves, capacity);
        self.dirty = true;
        Ok(())
    }

    fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        if let Some((id, _)) = self.buffer.take() {
            ctx.destroy_buffer(id);
        }
        self.mapped = false;
    }
}

// ── device ────────────────────────────────────────────────────────────────

/// Device buffer mapped into host memory while a frame is being built.
///
/// The mapped range is shadowed on the host; only the vertices written since
/// the last unmap are flushed.
pub struct DeviceStorage {
    shadow: Vec<Vertex>,
    buffer: Option<BufferId>,
    mapped: bool,
    dirty: Option<Range<u32>>,
}

impl DeviceStorage {
    pub fn new(capacity: u32) -> Self {
        Self {
            shadow: vec![Vertex::default(); capacity as usize],
            buffer: None,
            mapped: false,
            dirty: None,
        }
    }

    fn touch(&mut self, range: Range<u32>) {
        if range.is_empty() {
            return;
        }
        self.dirty = Some(match self.dirty.take() {
            Some(d) => d.start.min(range.start)..d.end.max(range.end),
            None => range,
        });
    }

    /// Writes the dirty range to the device buffer. Without a buffer the
    /// range stays dirty for the next one.
    fn flush(&mut self, ctx: &mut dyn GraphicsContext) {
        let Some(buffer) = self.buffer else {
            return;
        };
        let Some(range) = self.dirty.take() else {
            return;
        };
        let data = &self.shadow[range.start as usize..range.end as usize];
        ctx.write_vertices(buffer, range.start, data);
        log::trace!("flushed cached vertices {range:?}");
    }
}

impl VertexStorage for DeviceStorage {
    fn residency(&self) -> Residency {
        Residency::Device
    }

    fn capacity(&self) -> u32 {
        self.shadow.len() as u32
    }

    fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    fn map(&mut self, ctx: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        debug_assert!(!self.mapped, "vertex storage mapped twice");
        if ctx.is_lost() {
            return Err(crate::device::ContextError::Lost.into());
        }
        let buffer = match self.buffer {
            Some(id) => id,
            None => {
                let id = ctx.create_buffer(BufferUsage::Vertex, self.capacity())?;
                self.buffer = Some(id);
                id
            }
        };
        ctx.map_buffer(buffer)?;
        self.mapped = true;
        Ok(())
    }

    fn unmap(&mut self, ctx: &mut dyn GraphicsContext, _used: u32) {
        debug_assert!(self.mapped, "vertex storage unmapped twice");
        self.flush(ctx);
        if let Some(buffer) = self.buffer {
            ctx.unmap_buffer(buffer);
        }
        self.mapped = false;
    }

    fn data(&self) -> &[Vertex] {
        &self.shadow
    }

    fn data_mut(&mut self, range: Range<u32>) -> &mut [Vertex] {
        debug_assert!(self.mapped, "vertex storage written while unmapped");
        self.touch(range.clone());
        &mut self.shadow[range.start as usize..range.end as usize]
    }

    fn copy_within(&mut self, from: u32, to: u32, len: u32) {
        debug_assert!(self.mapped, "vertex storage written while unmapped");
        let start = from as usize;
        self.shadow.copy_within(start..start + len as usize, to as usize);
        self.touch(to..to + len);
    }

    fn relocate(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        moves: &[Relocation],
        capacity: u32,
    ) -> Result<(), RenderError> {
        // On failure the old buffer stays mapped with its dirty range intact.
        let new = ctx.create_buffer(BufferUsage::Vertex, capacity)?;

        let old = self.buffer;
        let was_mapped = self.mapped;
        if was_mapped {
            self.flush(ctx);
            if let Some(old) = old {
                ctx.unmap_buffer(old);
            }
        }

        let copy_on_device = ctx.limits().supports_buffer_copy && old.is_some();
        if let (true, Some(old)) = (copy_on_device, old) {
            for m in moves.iter().filter(|m| m.len > 0) {
                ctx.copy_buffer(old, m.from, new, m.to, m.len);
            }
        }
        if let Some(old) = old {
            ctx.destroy_buffer(old);
        }

        let used = moves.iter().map(|m| m.to + m.len).max().unwrap_or(0);
        self.shadow = relocated(&self.shadow, moves, capacity);
        self.buffer = Some(new);
        self.dirty = None;
        if !copy_on_device {
            self.touch(0..used);
        }

        if was_mapped {
            if let Err(err) = ctx.map_buffer(new) {
                // The shadow keeps the relocated data; the next map uploads
                // it into a fresh buffer.
                log::warn!("vertex cache buffer lost during relocation: {err}");
                ctx.destroy_buffer(new);
                self.buffer = None;
                self.dirty = None;
                self.touch(0..used);
            }
        }
        Ok(())
    }

    fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        if let Some(buffer) = self.buffer.take() {
            if self.mapped {
                ctx.unmap_buffer(buffer);
            }
            ctx.destroy_buffer(buffer);
        }
        self.mapped = false;
        self.dirty = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ContextCall, ContextLimits, RecordingContext};
    use crate::paint::Color;

    fn vertex(x: f32) -> Vertex {
        Vertex::solid(x, 0.0, 0.0, Color::WHITE)
    }

    fn no_copy_ctx() -> RecordingContext {
        RecordingContext::with_limits(
            64,
            64,
            ContextLimits { supports_buffer_copy: false, ..ContextLimits::default() },
        )
    }

    // ── host ──────────────────────────────────────────────────────────────

    #[test]
    fn host_uploads_only_when_dirty() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut s = HostStorage::new(16);
        s.map(&mut ctx).unwrap();
        s.data_mut(0..2).copy_from_slice(&[vertex(1.0), vertex(2.0)]);
        s.unmap(&mut ctx, 2);
        let buffer = s.buffer().unwrap();
        assert_eq!(ctx.buffer_vertices(buffer).unwrap()[1].pos[0], 2.0);

        ctx.take_calls();
        s.map(&mut ctx).unwrap();
        s.unmap(&mut ctx, 2);
        assert!(ctx.calls().is_empty());
    }

    #[test]
    fn host_relocation_recreates_buffer_on_next_upload() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut s = HostStorage::new(4);
        s.map(&mut ctx).unwrap();
        s.data_mut(0..1)[0] = vertex(7.0);
        s.unmap(&mut ctx, 1);
        let old = s.buffer().unwrap();

        s.map(&mut ctx).unwrap();
        s.relocate(&mut ctx, &[Relocation { from: 0, to: 5, len: 1 }], 8).unwrap();
        s.unmap(&mut ctx, 6);
        let new = s.buffer().unwrap();
        assert_ne!(old, new);
        assert_eq!(ctx.buffer_vertices(new).unwrap()[5].pos[0], 7.0);
        assert_eq!(ctx.live_buffers(), 1);
    }

    // ── device ────────────────────────────────────────────────────────────

    #[test]
    fn device_flushes_only_the_dirty_range() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut s = DeviceStorage::new(32);
        s.map(&mut ctx).unwrap();
        s.data_mut(4..6).copy_from_slice(&[vertex(1.0), vertex(2.0)]);
        s.data_mut(10..11)[0] = vertex(3.0);
        ctx.take_calls();
        s.unmap(&mut ctx, 11);
        let buffer = s.buffer().unwrap();
        assert_eq!(
            ctx.calls()[0],
            ContextCall::WriteVertices { buffer, offset: 4, len: 7 }
        );
        assert!(!s.is_dirty());
    }

    #[test]
    fn device_map_reports_lost_context() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut s = DeviceStorage::new(8);
        ctx.lose();
        let err = s.map(&mut ctx).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!s.is_mapped());
    }

    #[test]
    fn device_relocation_copies_on_device() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut s = DeviceStorage::new(8);
        s.map(&mut ctx).unwrap();
        s.data_mut(6..8).copy_from_slice(&[vertex(1.0), vertex(2.0)]);
        s.unmap(&mut ctx, 8);
        s.map(&mut ctx).unwrap();

        s.relocate(&mut ctx, &[Relocation { from: 6, to: 0, len: 2 }], 16).unwrap();
        assert!(s.is_mapped());
        assert!(!s.is_dirty());
        assert!(ctx.calls().iter().any(|c| matches!(c, ContextCall::CopyBuffer { len: 2, .. })));
        s.unmap(&mut ctx, 2);
        let data = ctx.buffer_vertices(s.buffer().unwrap()).unwrap();
        assert_eq!(data[0].pos[0], 1.0);
        assert_eq!(data[1].pos[0], 2.0);
        assert!(ctx.violations().is_empty());
    }

    #[test]
    fn device_relocation_without_copy_goes_through_memory() {
        let mut ctx = no_copy_ctx();
        let mut s = DeviceStorage::new(8);
        s.map(&mut ctx).unwrap();
        s.data_mut(3..4)[0] = vertex(9.0);
        s.relocate(&mut ctx, &[Relocation { from: 3, to: 0, len: 1 }], 8).unwrap();
        assert!(s.is_dirty());
        s.unmap(&mut ctx, 1);
        assert!(!ctx.calls().iter().any(|c| matches!(c, ContextCall::CopyBuffer { .. })));
        assert_eq!(ctx.buffer_vertices(s.buffer().unwrap()).unwrap()[0].pos[0], 9.0);
    }

    #[test]
    fn failed_relocation_keeps_the_old_buffer_mapped() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut s = DeviceStorage::new(8);
        s.map(&mut ctx).unwrap();
        s.data_mut(0..2).copy_from_slice(&[vertex(4.0), vertex(5.0)]);
        let buffer = s.buffer().unwrap();

        ctx.lose();
        let err = s.relocate(&mut ctx, &[Relocation { from: 0, to: 0, len: 2 }], 16).unwrap_err();
        assert!(err.is_recoverable());
        assert!(s.is_mapped());
        assert!(s.is_dirty());
        assert_eq!(s.buffer(), Some(buffer));
        assert_eq!(s.capacity(), 8);

        ctx.restore();
        s.unmap(&mut ctx, 2);
        let data = ctx.buffer_vertices(buffer).unwrap();
        assert_eq!(data[0].pos[0], 4.0);
        assert_eq!(data[1].pos[0], 5.0);
        assert_eq!(ctx.live_buffers(), 1);
        assert!(ctx.violations().is_empty());
    }
}
