use crate::device::{BufferId, BufferUsage, GraphicsContext};

use super::cache::{Span, StreamContainer};
use super::RenderError;

/// Spans longer than this are drawn directly instead of through the index buffer.
pub const HUGE_RANGE: u32 = 1000;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum DrawRange {
    /// Inclusive vertex range, drawn through the scratch index buffer.
    Normal { first: u32, last: u32 },
    Large { first: u32, count: u32 },
}

/// Draw calls issued by one batch.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct BatchStats {
    pub draw_calls: u32,
    pub indexed_vertices: u32,
    pub direct_vertices: u32,
}

impl BatchStats {
    pub fn add(&mut self, other: BatchStats) {
        self.draw_calls += other.draw_calls;
        self.indexed_vertices += other.indexed_vertices;
        self.direct_vertices += other.direct_vertices;
    }
}

/// Turns cached group spans into few draw calls.
///
/// Consecutive small spans are concatenated into one index list and drawn
/// with a single indexed call; each large span is drawn directly after the
/// pending indices are flushed, so submission order is kept.
#[derive(Default)]
pub struct DrawBatcher {
    ranges: Vec<DrawRange>,
    scratch: Vec<u32>,
    index_buffer: Option<(BufferId, u32)>,
    index_size: u32,
    index_max: u32,
    drawing: bool,
}

impl DrawBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Starts a new batch.
    pub fn begin_drawing(&mut self) {
        debug_assert!(!self.drawing, "nested begin_drawing");
        self.ranges.clear();
        self.drawing = true;
    }

    /// Queues a group's vertices. Empty spans are ignored.
    pub fn draw_indices(&mut self, span: Span) {
        debug_assert!(self.drawing, "draw_indices outside begin/end_drawing");
        if span.is_empty() {
            return;
        }
        let range = if span.size > HUGE_RANGE {
            DrawRange::Large { first: span.offset, count: span.size }
        } else {
            DrawRange::Normal { first: span.offset, last: span.end() - 1 }
        };
        self.ranges.push(range);
    }

    /// Issues the queued spans against `vertices`. `allocated` is one past the
    /// highest valid vertex.
    pub fn end_drawing(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        vertices: BufferId,
        allocated: u32,
    ) -> Result<BatchStats, RenderError> {
        debug_assert!(self.drawing, "end_drawing without begin_drawing");
        self.drawing = false;

        let mut stats = BatchStats::default();
        let indexed: u32 = self
            .ranges
            .iter()
            .map(|r| match *r {
                DrawRange::Normal { first, last } => last - first + 1,
                DrawRange::Large { .. } => 0,
            })
            .sum();
        let index_buffer = if indexed > 0 { Some(self.reserve(ctx, indexed)?) } else { None };

        let ranges = std::mem::take(&mut self.ranges);
        let mut cursor = 0;
        self.scratch.clear();
        for range in &ranges {
            match *range {
                DrawRange::Normal { first, last } => {
                    debug_assert!(last < allocated, "vertex {last} beyond allocated {allocated}");
                    self.scratch.extend(first..=last);
                }
                DrawRange::Large { first, count } => {
                    debug_assert!(first + count <= allocated, "range beyond allocated {allocated}");
                    self.flush(ctx, vertices, index_buffer, &mut cursor, &mut stats);
                    ctx.draw_arrays(vertices, first, count);
                    stats.draw_calls += 1;
                    stats.direct_vertices += count;
                }
            }
        }
        self.flush(ctx, vertices, index_buffer, &mut cursor, &mut stats);
        self.ranges = ranges;
        self.ranges.clear();

        log::trace!(
            "batch: {} draw calls, {} indexed, {} direct",
            stats.draw_calls,
            stats.indexed_vertices,
            stats.direct_vertices
        );
        Ok(stats)
    }

    /// Draws a frame's non-cached vertices as one array and empties the container.
    pub fn stream_draw(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        stream: &mut StreamContainer,
    ) -> Result<BatchStats, RenderError> {
        let mut stats = BatchStats::default();
        if let Some((buffer, count)) = stream.upload(ctx)? {
            ctx.draw_arrays(buffer, 0, count);
            stats.draw_calls = 1;
            stats.direct_vertices = count;
        }
        stream.clear();
        Ok(stats)
    }

    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        if let Some((id, _)) = self.index_buffer.take() {
            ctx.destroy_buffer(id);
        }
        self.index_size = 0;
        self.index_max = 0;
    }

    /// Makes sure the index buffer holds `run` indices.
    ///
    /// Capacity follows the largest run seen: it is kept at twice that size
    /// and only recreated when it falls short.
    fn reserve(&mut self, ctx: &mut dyn GraphicsContext, run: u32) -> Result<BufferId, RenderError> {
        self.index_size = self.index_size.max(run);
        self.index_max = self.index_max.max(self.index_size.saturating_mul(2));
        match self.index_buffer {
            Some((id, cap)) if cap >= self.index_max => Ok(id),
            old => {
                if let Some((id, _)) = old {
                    ctx.destroy_buffer(id);
                }
                self.index_buffer = None;
                let id = ctx.create_buffer(BufferUsage::Index, self.index_max)?;
                log::debug!("index buffer resized to {}", self.index_max);
                self.index_buffer = Some((id, self.index_max));
                Ok(id)
            }
        }
    }

    fn flush(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        vertices: BufferId,
        index_buffer: Option<BufferId>,
        cursor: &mut u32,
        stats: &mut BatchStats,
    ) {
        if self.scratch.is_empty() {
            return;
        }
        let Some(indices) = index_buffer else {
            self.scratch.clear();
            return;
        };
        let count = self.scratch.len() as u32;
        ctx.write_indices(indices, *cursor, &self.scratch);
        ctx.draw_indexed(vertices, indices, *cursor, count);
        *cursor += count;
        stats.draw_calls += 1;
        stats.indexed_vertices += count;
        self.scratch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ContextCall, RecordingContext};
    use crate::paint::Color;
    use crate::render::Vertex;
    use crate::render::cache::{CachedContainer, Residency};

    fn span(offset: u32, size: u32) -> Span {
        Span { offset, size }
    }

    fn setup(len: u32) -> (RecordingContext, BufferId) {
        let mut ctx = RecordingContext::new(64, 64);
        let vb = ctx.create_buffer(BufferUsage::Vertex, len).unwrap();
        ctx.take_calls();
        (ctx, vb)
    }

    fn draws(ctx: &RecordingContext) -> Vec<ContextCall> {
        ctx.calls().iter().filter(|c| c.is_draw()).cloned().collect()
    }

    // ── coalescing ────────────────────────────────────────────────────────

    #[test]
    fn small_ranges_become_one_indexed_draw() {
        let (mut ctx, vb) = setup(100);
        let mut b = DrawBatcher::new();
        b.begin_drawing();
        b.draw_indices(span(0, 3));
        b.draw_indices(span(10, 6));
        b.draw_indices(span(50, 0));
        let stats = b.end_drawing(&mut ctx, vb, 100).unwrap();

        assert_eq!(stats, BatchStats { draw_calls: 1, indexed_vertices: 9, direct_vertices: 0 });
        let ContextCall::DrawIndexed { indices, first_index, count, .. } = draws(&ctx)[0] else {
            panic!("expected an indexed draw");
        };
        assert_eq!((first_index, count), (0, 9));
        assert_eq!(
            &ctx.buffer_indices(indices).unwrap()[..9],
            &[0, 1, 2, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn large_range_flushes_pending_indices_first() {
        let (mut ctx, vb) = setup(5000);
        let mut b = DrawBatcher::new();
        b.begin_drawing();
        b.draw_indices(span(0, 3));
        b.draw_indices(span(3, 2000));
        b.draw_indices(span(2003, 6));
        b.end_drawing(&mut ctx, vb, 5000).unwrap();

        let d = draws(&ctx);
        assert_eq!(d.len(), 3);
        assert!(matches!(d[0], ContextCall::DrawIndexed { first_index: 0, count: 3, .. }));
        assert_eq!(d[1], ContextCall::DrawArrays { buffer: vb, first: 3, count: 2000 });
        assert!(matches!(d[2], ContextCall::DrawIndexed { first_index: 3, count: 6, .. }));
        assert!(ctx.violations().is_empty());
    }

    #[test]
    fn empty_batch_draws_nothing() {
        let (mut ctx, vb) = setup(10);
        let mut b = DrawBatcher::new();
        b.begin_drawing();
        b.draw_indices(span(4, 0));
        let stats = b.end_drawing(&mut ctx, vb, 10).unwrap();
        assert_eq!(stats.draw_calls, 0);
        assert!(ctx.calls().is_empty());
    }

    // ── index buffer ──────────────────────────────────────────────────────

    #[test]
    fn index_buffer_is_reused_across_frames() {
        let (mut ctx, vb) = setup(100);
        let mut b = DrawBatcher::new();
        for _ in 0..3 {
            b.begin_drawing();
            b.draw_indices(span(0, 30));
            b.end_drawing(&mut ctx, vb, 100).unwrap();
        }
        let created = ctx
            .calls()
            .iter()
            .filter(|c| matches!(c, ContextCall::CreateBuffer { usage: BufferUsage::Index, .. }))
            .count();
        assert_eq!(created, 1);

        b.begin_drawing();
        b.draw_indices(span(0, 100));
        b.end_drawing(&mut ctx, vb, 100).unwrap();
        assert!(ctx.calls().iter().any(|c| matches!(
            c,
            ContextCall::CreateBuffer { usage: BufferUsage::Index, len: 200, .. }
        )));
    }

    // ── range safety ──────────────────────────────────────────────────────

    #[test]
    fn batches_stay_inside_the_allocated_range() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut cache = CachedContainer::with_residency(Residency::Host, 256);
        cache.map(&mut ctx).unwrap();
        let mut ids = Vec::new();
        for i in 0..40u32 {
            let id = cache.create_item();
            cache.set_item(id);
            let n = (i * 37) % 90 + if i % 13 == 0 { 1200 } else { 0 };
            cache.push(&mut ctx, &vec![Vertex::solid(0.0, 0.0, 0.0, Color::WHITE); n as usize]).unwrap();
            cache.finish_item();
            ids.push(id);
            if i % 3 == 0 {
                let victim = ids.remove(ids.len() / 2);
                cache.delete(&mut ctx, victim).unwrap();
            }
        }
        cache.unmap(&mut ctx);
        let vb = cache.buffer().unwrap();
        let allocated = cache.max_index();

        let mut b = DrawBatcher::new();
        b.begin_drawing();
        for &id in &ids {
            b.draw_indices(cache.span(id).unwrap());
        }
        let stats = b.end_drawing(&mut ctx, vb, allocated).unwrap();

        let total: u32 = ids.iter().map(|&id| cache.span(id).unwrap().size).sum();
        assert_eq!(stats.indexed_vertices + stats.direct_vertices, total);
        assert!(ctx.violations().is_empty());
        for call in ctx.calls() {
            match *call {
                ContextCall::DrawArrays { first, count, .. } => assert!(first + count <= allocated),
                ContextCall::DrawIndexed { indices, first_index, count, .. } => {
                    let data = ctx.buffer_indices(indices).unwrap();
                    let run = &data[first_index as usize..(first_index + count) as usize];
                    assert!(run.iter().all(|&i| i < allocated));
                }
                _ => {}
            }
        }
    }

    #[test]
    fn stream_draw_empties_the_container() {
        let mut ctx = RecordingContext::new(64, 64);
        let mut stream = StreamContainer::new();
        stream.push(&[Vertex::default(); 6]);
        let mut b = DrawBatcher::new();
        let stats = b.stream_draw(&mut ctx, &mut stream).unwrap();
        assert_eq!(stats.direct_vertices, 6);
        assert!(stream.is_empty());
        assert_eq!(b.stream_draw(&mut ctx, &mut stream).unwrap(), BatchStats::default());
    }
}
