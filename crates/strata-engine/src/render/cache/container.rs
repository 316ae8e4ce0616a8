use std::collections::BTreeMap;
use std::ops::Range;

use crate::device::{BufferId, GraphicsContext};
use crate::render::{RenderError, Vertex};

use super::chunks::FreeChunks;
use super::storage::{DeviceStorage, HostStorage, Relocation, Residency, VertexStorage};

/// Handle of a cached group of vertices.
///
/// A handle stays valid until the group is deleted or the cache is cleared;
/// clearing bumps the generation so older handles resolve to nothing.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GroupId {
    pub(crate) serial: u32,
    pub(crate) generation: u32,
}

/// Vertex range `offset..offset + size` of one group.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Span {
    pub offset: u32,
    pub size: u32,
}

impl Span {
    #[inline]
    pub fn end(self) -> u32 {
        self.offset + self.size
    }

    #[inline]
    pub fn range(self) -> Range<u32> {
        self.offset..self.end()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.size == 0
    }
}

/// Item receiving allocations. Its chunk may be larger than its data.
#[derive(Debug, Copy, Clone)]
struct Current {
    serial: u32,
    chunk_offset: u32,
    chunk_size: u32,
}

/// Chunked allocator over one shared vertex buffer.
///
/// Every group owns one contiguous span. Vertices are appended to the current
/// group (see [`set_item`](Self::set_item)); its chunk grows in place when the
/// following region is free, otherwise the group moves to the best-fitting
/// free region. When no region fits, live groups are compacted to the front of
/// a fresh buffer (growing it if needed).
///
/// Accounting: free space, plus the sizes of all groups but the current one,
/// plus the current group's whole chunk, always equals the capacity.
pub struct CachedContainer {
    storage: Box<dyn VertexStorage>,
    /// Spans by creation serial, which is also the compaction order.
    items: BTreeMap<u32, Span>,
    free: FreeChunks,
    current: Option<Current>,
    max_index: u32,
    initial_capacity: u32,
    next_serial: u32,
    generation: u32,
}

impl CachedContainer {
    pub fn new(storage: Box<dyn VertexStorage>) -> Self {
        let capacity = storage.capacity();
        Self {
            storage,
            items: BTreeMap::new(),
            free: FreeChunks::with_chunk(0, capacity),
            current: None,
            max_index: 0,
            initial_capacity: capacity,
            next_serial: 0,
            generation: 0,
        }
    }

    pub fn with_residency(residency: Residency, capacity: u32) -> Self {
        match residency {
            Residency::Host => Self::new(Box::new(HostStorage::new(capacity))),
            Residency::Device => Self::new(Box::new(DeviceStorage::new(capacity))),
        }
    }

    // ── queries ───────────────────────────────────────────────────────────

    pub fn residency(&self) -> Residency {
        self.storage.residency()
    }

    pub fn capacity(&self) -> u32 {
        self.storage.capacity()
    }

    pub fn free_space(&self) -> u32 {
        self.free.total()
    }

    /// Space not available to new groups, including the current group's slack.
    pub fn used_space(&self) -> u32 {
        self.capacity() - self.free.total()
    }

    /// Total size of every group's data.
    pub fn all_items_size(&self) -> u32 {
        self.items.values().map(|s| s.size).sum()
    }

    pub fn free_chunk_count(&self) -> usize {
        self.free.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn span(&self, id: GroupId) -> Option<Span> {
        self.resolve(id).and_then(|serial| self.items.get(&serial).copied())
    }

    pub fn contains(&self, id: GroupId) -> bool {
        self.span(id).is_some()
    }

    pub fn vertices(&self, id: GroupId) -> Option<&[Vertex]> {
        let span = self.span(id)?;
        Some(&self.storage.data()[span.offset as usize..span.end() as usize])
    }

    /// Mutable access to a group's vertices. Requires the cache to be mapped.
    pub fn vertices_mut(&mut self, id: GroupId) -> Option<&mut [Vertex]> {
        let span = self.span(id)?;
        Some(self.storage.data_mut(span.range()))
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.storage.buffer()
    }

    pub fn is_mapped(&self) -> bool {
        self.storage.is_mapped()
    }

    pub fn is_dirty(&self) -> bool {
        self.storage.is_dirty()
    }

    /// One past the highest vertex written since the last compaction.
    pub fn max_index(&self) -> u32 {
        self.max_index
    }

    /// Checks the space accounting. Cheap enough for debug assertions.
    pub fn is_consistent(&self) -> bool {
        let current_serial = self.current.map(|c| c.serial);
        let others: u64 = self
            .items
            .iter()
            .filter(|(s, _)| Some(**s) != current_serial)
            .map(|(_, span)| span.size as u64)
            .sum();
        let chunk = self.current.map_or(0, |c| c.chunk_size as u64);
        self.free.total() as u64 + others + chunk == self.capacity() as u64
    }

    // ── mapping ───────────────────────────────────────────────────────────

    pub fn map(&mut self, ctx: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        self.storage.map(ctx)
    }

    pub fn unmap(&mut self, ctx: &mut dyn GraphicsContext) {
        debug_assert!(self.current.is_none(), "cache unmapped with an unfinished group");
        self.storage.unmap(ctx, self.max_index);
    }

    // ── groups ────────────────────────────────────────────────────────────

    /// Registers an empty group.
    pub fn create_item(&mut self) -> GroupId {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.items.insert(serial, Span::default());
        GroupId { serial, generation: self.generation }
    }

    /// Makes `id` the group that receives allocations. Returns `false` for
    /// unknown or stale handles.
    pub fn set_item(&mut self, id: GroupId) -> bool {
        debug_assert!(self.current.is_none(), "set_item while another group is current");
        let Some(serial) = self.resolve(id) else {
            log::error!("set_item on unknown cache group {id:?}");
            return false;
        };
        let Some(span) = self.items.get(&serial).copied() else {
            return false;
        };
        self.current = Some(Current { serial, chunk_offset: span.offset, chunk_size: span.size });
        true
    }

    /// Ends allocation for the current group and returns its unused slack.
    pub fn finish_item(&mut self) {
        let Some(cur) = self.current.take() else {
            return;
        };
        let size = self.items.get(&cur.serial).map_or(0, |s| s.size);
        let slack = cur.chunk_size - size;
        if slack > 0 {
            self.free.insert(cur.chunk_offset + size, slack);
        }
        debug_assert!(self.is_consistent());
    }

    /// Appends `count` vertices to the current group and returns their range.
    pub fn allocate(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        count: u32,
    ) -> Result<Range<u32>, RenderError> {
        debug_assert!(self.storage.is_mapped(), "allocation while the cache is unmapped");
        debug_assert!(self.current.is_some(), "allocation without a current group");
        let Some(cur) = self.current else {
            return Err(self.allocation_failed(count));
        };
        let size = self.items.get(&cur.serial).map_or(0, |s| s.size);
        let Some(needed) = size.checked_add(count) else {
            return Err(self.allocation_failed(count));
        };
        if needed > cur.chunk_size {
            self.reallocate(ctx, needed)?;
        }

        let Some(span) = self.items.get_mut(&cur.serial) else {
            return Err(self.allocation_failed(count));
        };
        let start = span.offset + span.size;
        span.size += count;
        self.max_index = self.max_index.max(start + count);
        Ok(start..start + count)
    }

    /// Appends `vertices` to the current group.
    pub fn push(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        vertices: &[Vertex],
    ) -> Result<Range<u32>, RenderError> {
        let range = self.allocate(ctx, vertices.len() as u32)?;
        self.storage.data_mut(range.clone()).copy_from_slice(vertices);
        Ok(range)
    }

    /// Frees a group. When the cache becomes mostly empty it shrinks to half.
    pub fn delete(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        id: GroupId,
    ) -> Result<bool, RenderError> {
        let Some(serial) = self.resolve(id) else {
            return Ok(false);
        };
        let Some(span) = self.items.remove(&serial) else {
            return Ok(false);
        };
        match self.current {
            Some(cur) if cur.serial == serial => {
                self.current = None;
                self.free.insert(cur.chunk_offset, cur.chunk_size);
            }
            _ => self.free.insert(span.offset, span.size),
        }
        debug_assert!(self.is_consistent());

        let capacity = self.capacity();
        if self.storage.is_mapped()
            && self.free.total() as u64 * 4 > capacity as u64 * 3
            && capacity > self.initial_capacity
        {
            self.defragment_resize(ctx, capacity / 2)?;
        }
        Ok(true)
    }

    /// Drops every group and returns to the initial capacity.
    pub fn clear(&mut self, ctx: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        self.items.clear();
        self.current = None;
        self.max_index = 0;
        self.generation = self.generation.wrapping_add(1);
        self.free.reset(0, self.initial_capacity);
        self.storage.relocate(ctx, &[], self.initial_capacity)?;
        log::debug!("vertex cache cleared (generation {})", self.generation);
        Ok(())
    }

    /// Frees the device buffer. The container is empty afterwards.
    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        self.items.clear();
        self.current = None;
        self.max_index = 0;
        self.generation = self.generation.wrapping_add(1);
        self.free.reset(0, self.capacity());
        self.storage.release(ctx);
    }

    // ── relocation ────────────────────────────────────────────────────────

    /// Compacts every group to the front of a buffer of `capacity` vertices,
    /// in creation order with the current group last.
    ///
    /// Returns `false` (and changes nothing) if the groups do not fit.
    pub fn defragment_resize(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        capacity: u32,
    ) -> Result<bool, RenderError> {
        let live = self.all_items_size();
        if live > capacity {
            log::debug!("vertex cache cannot shrink to {capacity}: {live} vertices in use");
            return Ok(false);
        }
        debug_assert!(self.storage.is_mapped(), "defragmentation while the cache is unmapped");

        let current_serial = self.current.map(|c| c.serial);
        let mut plan: Vec<(u32, Relocation)> = Vec::with_capacity(self.items.len());
        let mut cursor = 0;
        let ordered = self
            .items
            .iter()
            .filter(|(s, _)| Some(**s) != current_serial)
            .chain(current_serial.and_then(|s| self.items.get_key_value(&s)));
        for (&serial, span) in ordered {
            plan.push((serial, Relocation { from: span.offset, to: cursor, len: span.size }));
            cursor += span.size;
        }

        let moves: Vec<Relocation> = plan.iter().map(|(_, m)| *m).collect();
        let old_capacity = self.capacity();
        self.storage.relocate(ctx, &moves, capacity)?;

        for (serial, m) in &plan {
            if let Some(span) = self.items.get_mut(serial) {
                span.offset = m.to;
            }
        }
        if let Some(cur) = self.current.as_mut() {
            if let Some(span) = self.items.get(&cur.serial) {
                cur.chunk_offset = span.offset;
                cur.chunk_size = span.size;
            }
        }
        self.free.reset(live, capacity - live);
        self.max_index = live;

        log::debug!(
            "vertex cache defragmented: {} groups, {live} vertices, capacity {old_capacity} -> {capacity}",
            plan.len()
        );
        debug_assert!(self.is_consistent());
        Ok(true)
    }

    /// Gives the current group a chunk of at least `needed` vertices.
    fn reallocate(&mut self, ctx: &mut dyn GraphicsContext, needed: u32) -> Result<(), RenderError> {
        let Some(cur) = self.current else {
            return Err(self.allocation_failed(needed));
        };

        if cur.chunk_size > 0 && self.extend_in_place(needed) {
            return Ok(());
        }

        if let Some((offset, chunk)) = self.free.best_fit(needed) {
            self.free.take(offset);
            let size = self.items.get(&cur.serial).map_or(0, |s| s.size);
            if size > 0 {
                let from = self.items.get(&cur.serial).map_or(0, |s| s.offset);
                self.storage.copy_within(from, offset, size);
            }
            if cur.chunk_size > 0 {
                self.free.insert(cur.chunk_offset, cur.chunk_size);
            }
            if let Some(span) = self.items.get_mut(&cur.serial) {
                span.offset = offset;
            }
            self.current = Some(Current { serial: cur.serial, chunk_offset: offset, chunk_size: chunk });
            self.max_index = self.max_index.max(offset + size);
            return Ok(());
        }

        // Nothing fits: compact, growing if the live data needs more room.
        let size = self.items.get(&cur.serial).map_or(0, |s| s.size);
        let required = self.all_items_size() as u64 - size as u64 + needed as u64;
        let capacity = self.capacity();
        let target = if required <= capacity as u64 {
            capacity
        } else {
            let Some(grown) = u32::try_from(required).ok().and_then(u32::checked_next_power_of_two)
            else {
                return Err(self.allocation_failed(needed));
            };
            grown.max(capacity.saturating_mul(2))
        };
        if target > capacity {
            log::debug!("vertex cache growing {capacity} -> {target} (need {required})");
        }
        if !self.defragment_resize(ctx, target)? || !self.extend_in_place(needed) {
            return Err(self.allocation_failed(needed));
        }
        Ok(())
    }

    /// Absorbs the free region right after the current chunk if that makes
    /// the chunk at least `needed` long.
    fn extend_in_place(&mut self, needed: u32) -> bool {
        let Some(cur) = self.current.as_mut() else {
            return false;
        };
        let end = cur.chunk_offset + cur.chunk_size;
        match self.free.at(end) {
            Some(next) if cur.chunk_size + next >= needed => {
                self.free.take(end);
                cur.chunk_size += next;
                true
            }
            _ => false,
        }
    }

    fn resolve(&self, id: GroupId) -> Option<u32> {
        (id.generation == self.generation).then_some(id.serial)
    }

    fn allocation_failed(&self, requested: u32) -> RenderError {
        RenderError::AllocationFailed { requested, capacity: self.capacity() }
    }
}
