use std::sync::Arc;

use kurbo::{Affine, Point, Vec2};

use crate::coords::{screen_to_clip, ViewTransform, Viewport};
use crate::device::{ContextGuard, ContextId, ContextManager, GraphicsContext};
use crate::paint::Color;
use crate::render::batch::{BatchStats, DrawBatcher};
use crate::render::cache::{CachedContainer, GroupId, Residency, StreamContainer, DEFAULT_INITIAL_CAPACITY};
use crate::render::compositor::{AntialiasingMode, Compositor, TargetHandle};
use crate::render::{RenderError, Vertex};

use super::tessellate::{self, Brush};
use super::RenderTargetKind;

/// Depth span reserved for layer orders; `order / DEPTH_RANGE` is subtracted
/// from the middle of the depth range.
const DEPTH_RANGE: f64 = (1 << 18) as f64;

/// Depth of a layer with rendering `order`. Higher orders are nearer.
pub fn layer_depth(order: i32) -> f32 {
    (0.5 - order as f64 / DEPTH_RANGE).clamp(0.0, 1.0) as f32
}

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct GalConfig {
    /// Where cached vertices live between frames.
    pub residency: Residency,
    /// Initial vertex cache capacity, in vertices.
    pub cache_capacity: u32,
    pub antialiasing: AntialiasingMode,
    /// Display background.
    pub clear_color: Color,
}

impl Default for GalConfig {
    fn default() -> Self {
        Self {
            residency: Residency::Host,
            cache_capacity: DEFAULT_INITIAL_CAPACITY,
            antialiasing: AntialiasingMode::None,
            clear_color: Color::BLACK,
        }
    }
}

/// Immediate drawing surface over a [`GraphicsContext`].
///
/// Primitives drawn between `begin_group` and `end_group` are stored in the
/// vertex cache and replayed with `draw_group`; everything else goes to the
/// per-frame stream of the current target. Nothing reaches the context until
/// `end_drawing`, which draws the main and overlay buffers and composites
/// them onto the display.
pub struct Gal {
    ctx: Box<dyn GraphicsContext>,
    manager: Arc<ContextManager>,
    context_id: ContextId,
    config: GalConfig,

    cache: CachedContainer,
    batcher: DrawBatcher,
    noncached: StreamContainer,
    overlay: StreamContainer,
    compositor: Compositor,
    main_buffer: Option<TargetHandle>,
    overlay_buffer: Option<TargetHandle>,
    pending_clear: [bool; 3],

    view: ViewTransform,
    target: RenderTargetKind,
    stroke_color: Color,
    fill_color: Color,
    line_width: f64,
    fill: bool,
    stroke: bool,
    depth: f32,
    transforms: Vec<Affine>,
    transform: Affine,

    group: Option<GroupId>,
    /// Groups drawn this frame. Resolved to spans at `end_drawing`, after any
    /// relocation caused by later allocations.
    queued: Vec<GroupId>,
    drawing: bool,
    updating: bool,
    scratch: Vec<Vertex>,
    stats: BatchStats,
}

impl Gal {
    /// Wraps `ctx` and registers it with `manager`.
    pub fn new(ctx: Box<dyn GraphicsContext>, manager: Arc<ContextManager>, config: GalConfig) -> Self {
        let context_id = manager.create("gal");
        let (w, h) = ctx.display_size();
        let view = ViewTransform { screen: Viewport::new(w, h), ..ViewTransform::default() };
        Self {
            ctx,
            manager,
            context_id,
            cache: CachedContainer::with_residency(config.residency, config.cache_capacity),
            batcher: DrawBatcher::new(),
            noncached: StreamContainer::new(),
            overlay: StreamContainer::new(),
            compositor: Compositor::new(config.antialiasing),
            main_buffer: None,
            overlay_buffer: None,
            pending_clear: [false; 3],
            view,
            target: RenderTargetKind::Cached,
            stroke_color: Color::WHITE,
            fill_color: Color::WHITE,
            line_width: 1.0,
            fill: true,
            stroke: true,
            depth: 0.5,
            transforms: Vec::new(),
            transform: Affine::IDENTITY,
            group: None,
            queued: Vec::new(),
            drawing: false,
            updating: false,
            scratch: Vec::new(),
            stats: BatchStats::default(),
            config,
        }
    }

    // ── context ───────────────────────────────────────────────────────────

    pub fn manager(&self) -> &Arc<ContextManager> {
        &self.manager
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn context(&self) -> &dyn GraphicsContext {
        self.ctx.as_ref()
    }

    pub fn context_mut(&mut self) -> &mut dyn GraphicsContext {
        self.ctx.as_mut()
    }

    pub fn config(&self) -> &GalConfig {
        &self.config
    }

    pub fn cache(&self) -> &CachedContainer {
        &self.cache
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Draw calls issued by the last `end_drawing`.
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Starts a frame. Returns `true` when the compositor buffers were
    /// (re)created, in which case every target must be redrawn.
    pub fn begin_drawing(&mut self, guard: &ContextGuard<'_>) -> Result<bool, RenderError> {
        debug_assert!(!self.drawing, "nested begin_drawing");
        self.check_guard(guard, "begin_drawing");
        if self.updating {
            self.finish_update();
        }

        let recreated = !self.compositor.is_initialized();
        if recreated {
            let screen = self.view.screen;
            self.compositor.resize(self.ctx.as_mut(), screen.width, screen.height);
            self.compositor.initialize(self.ctx.as_mut())?;
            self.main_buffer = Some(self.compositor.create_buffer(self.ctx.as_mut(), None)?);
            self.overlay_buffer = Some(self.compositor.create_buffer(self.ctx.as_mut(), None)?);
            self.pending_clear = [true; 3];
        }

        self.compositor.begin(self.ctx.as_mut())?;
        self.cache.map(self.ctx.as_mut())?;
        self.queued.clear();
        self.stats = BatchStats::default();
        self.drawing = true;
        Ok(recreated)
    }

    /// Draws the frame and presents it.
    pub fn end_drawing(&mut self, guard: &ContextGuard<'_>) -> Result<(), RenderError> {
        debug_assert!(self.drawing, "end_drawing without begin_drawing");
        debug_assert!(self.group.is_none(), "end_drawing with an open group");
        self.check_guard(guard, "end_drawing");
        self.drawing = false;
        if self.group.take().is_some() {
            self.cache.finish_item();
        }

        let transform = self.world_to_clip();
        let ctx = self.ctx.as_mut();
        self.cache.unmap(ctx);
        let (Some(main), Some(overlay)) = (self.main_buffer, self.overlay_buffer) else {
            return Err(RenderError::NotInitialized);
        };

        // Main buffer: cached groups, then this frame's non-cached content.
        self.compositor.set_buffer(ctx, main)?;
        if self.pending_clear[RenderTargetKind::Cached.index()]
            || self.pending_clear[RenderTargetKind::NonCached.index()]
        {
            self.compositor.clear_buffer(ctx, Color::transparent())?;
        }
        ctx.set_transform(transform);
        let mut stats = match self.cache.buffer() {
            Some(vb) => {
                self.batcher.begin_drawing();
                for id in self.queued.drain(..) {
                    match self.cache.span(id) {
                        Some(span) => self.batcher.draw_indices(span),
                        None => log::trace!("draw_group: group {id:?} vanished"),
                    }
                }
                self.batcher.end_drawing(ctx, vb, self.cache.max_index())?
            }
            None => {
                self.queued.clear();
                BatchStats::default()
            }
        };
        stats.add(self.batcher.stream_draw(ctx, &mut self.noncached)?);

        self.compositor.set_buffer(ctx, overlay)?;
        if self.pending_clear[RenderTargetKind::Overlay.index()] {
            self.compositor.clear_buffer(ctx, Color::transparent())?;
        }
        ctx.set_transform(transform);
        stats.add(self.batcher.stream_draw(ctx, &mut self.overlay)?);
        self.pending_clear = [false; 3];

        self.compositor.set_buffer(ctx, TargetHandle::DIRECT)?;
        self.compositor.clear_buffer(ctx, self.config.clear_color)?;
        self.compositor.draw_buffer(ctx, main)?;
        self.compositor.draw_buffer(ctx, overlay)?;
        self.compositor.present(ctx)?;
        ctx.present();

        self.stats = stats;
        log::trace!("frame: {} draw calls", stats.draw_calls);
        Ok(())
    }

    /// Maps the cache so groups can be edited outside a frame. Inside a
    /// frame this does nothing.
    pub fn begin_update(&mut self, guard: &ContextGuard<'_>) -> Result<(), RenderError> {
        self.check_guard(guard, "begin_update");
        if self.drawing || self.updating {
            return Ok(());
        }
        self.cache.map(self.ctx.as_mut())?;
        self.updating = true;
        Ok(())
    }

    pub fn end_update(&mut self, guard: &ContextGuard<'_>) {
        self.check_guard(guard, "end_update");
        self.finish_update();
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    fn finish_update(&mut self) {
        if !self.updating {
            return;
        }
        if self.group.take().is_some() {
            log::error!("end_update with an open group");
            self.cache.finish_item();
        }
        self.cache.unmap(self.ctx.as_mut());
        self.updating = false;
    }

    fn check_guard(&self, guard: &ContextGuard<'_>, op: &str) {
        if guard.id() != self.context_id {
            log::error!("{op} under the lock of another context {:?}", guard.id());
        }
        debug_assert_eq!(guard.id(), self.context_id, "{op} under a foreign lock");
    }

    // ── targets ───────────────────────────────────────────────────────────

    pub fn set_target(&mut self, kind: RenderTargetKind) {
        self.target = kind;
    }

    pub fn target(&self) -> RenderTargetKind {
        self.target
    }

    /// Schedules a clear of `kind`'s buffer; it happens before the buffer is
    /// drawn in `end_drawing`. Cached and non-cached content share a buffer.
    pub fn clear_target(&mut self, kind: RenderTargetKind) {
        self.pending_clear[kind.index()] = true;
        match kind {
            RenderTargetKind::NonCached => self.noncached.clear(),
            RenderTargetKind::Overlay => self.overlay.clear(),
            RenderTargetKind::Cached => {}
        }
    }

    pub fn set_antialiasing_mode(&mut self, mode: AntialiasingMode) {
        self.compositor.set_antialiasing_mode(self.ctx.as_mut(), mode);
        self.config.antialiasing = mode;
        self.main_buffer = None;
        self.overlay_buffer = None;
    }

    pub fn antialiasing_mode(&self) -> AntialiasingMode {
        self.compositor.antialiasing_mode()
    }

    // ── view ──────────────────────────────────────────────────────────────

    pub fn set_view(&mut self, view: &ViewTransform) {
        if view.screen != self.view.screen {
            self.resize_screen(view.screen.width, view.screen.height);
        }
        self.view = *view;
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    /// Changes the display size. The compositor buffers are recreated on the
    /// next `begin_drawing`.
    pub fn resize_screen(&mut self, width: u32, height: u32) {
        self.view.screen = Viewport::new(width, height);
        self.compositor.resize(self.ctx.as_mut(), width, height);
        self.main_buffer = None;
        self.overlay_buffer = None;
    }

    pub fn screen_size(&self) -> Viewport {
        self.view.screen
    }

    pub fn world_scale(&self) -> f64 {
        self.view.scale
    }

    pub fn world_to_screen(&self) -> Affine {
        self.view.world_to_screen() * self.transform
    }

    pub fn screen_to_world(&self) -> Affine {
        self.world_to_screen().inverse()
    }

    /// World to clip space, including the antialiasing sub-pixel offset.
    pub fn world_to_clip(&self) -> Affine {
        let offset = self.compositor.render_offset() / self.compositor.supersampling_factor() as f64;
        screen_to_clip(self.view.screen) * Affine::translate(offset) * self.world_to_screen()
    }

    // ── state ─────────────────────────────────────────────────────────────

    pub fn set_stroke_color(&mut self, color: Color) {
        self.stroke_color = color;
    }

    pub fn stroke_color(&self) -> Color {
        self.stroke_color
    }

    pub fn set_fill_color(&mut self, color: Color) {
        self.fill_color = color;
    }

    pub fn fill_color(&self) -> Color {
        self.fill_color
    }

    pub fn set_line_width(&mut self, width: f64) {
        self.line_width = width.max(0.0);
    }

    pub fn line_width(&self) -> f64 {
        self.line_width
    }

    pub fn set_fill_enabled(&mut self, on: bool) {
        self.fill = on;
    }

    pub fn set_stroke_enabled(&mut self, on: bool) {
        self.stroke = on;
    }

    /// Depth of subsequent primitives, in `[0, 1]` (smaller is nearer).
    pub fn set_layer_depth(&mut self, depth: f32) {
        self.depth = depth.clamp(0.0, 1.0);
    }

    pub fn layer_depth(&self) -> f32 {
        self.depth
    }

    /// Saves the model transform applied to subsequent primitives.
    pub fn save(&mut self) {
        self.transforms.push(self.transform);
    }

    pub fn restore(&mut self) {
        match self.transforms.pop() {
            Some(t) => self.transform = t,
            None => log::error!("restore without save"),
        }
    }

    pub fn translate(&mut self, by: Vec2) {
        self.transform *= Affine::translate(by);
    }

    pub fn rotate(&mut self, radians: f64) {
        self.transform *= Affine::rotate(radians);
    }

    pub fn scale(&mut self, by: Vec2) {
        self.transform *= Affine::scale_non_uniform(by.x, by.y);
    }

    // ── primitives ────────────────────────────────────────────────────────

    /// Straight line of the current line width.
    pub fn draw_line(&mut self, a: Point, b: Point) -> Result<(), RenderError> {
        if !self.stroke {
            return Ok(());
        }
        let (a, b) = (self.transform * a, self.transform * b);
        let brush = self.brush(self.stroke_color);
        tessellate::line(&mut self.scratch, brush, a, b, self.line_width);
        self.submit()
    }

    /// Thick line with round ends, in the stroke color.
    pub fn draw_segment(&mut self, a: Point, b: Point, width: f64) -> Result<(), RenderError> {
        let (a, b) = (self.transform * a, self.transform * b);
        let brush = self.brush(self.stroke_color);
        tessellate::segment(&mut self.scratch, brush, a, b, width);
        self.submit()
    }

    pub fn draw_circle(&mut self, center: Point, radius: f64) -> Result<(), RenderError> {
        let center = self.transform * center;
        if self.fill {
            let brush = self.brush(self.fill_color);
            tessellate::filled_circle(&mut self.scratch, brush, center, radius);
        }
        if self.stroke {
            let brush = self.brush(self.stroke_color);
            tessellate::stroked_circle(&mut self.scratch, brush, center, radius, self.line_width);
        }
        self.submit()
    }

    /// Axis-aligned rectangle with corners `a` and `b`.
    pub fn draw_rectangle(&mut self, a: Point, b: Point) -> Result<(), RenderError> {
        if self.fill {
            let corners = [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y)].map(|p| self.transform * p);
            let brush = self.brush(self.fill_color);
            tessellate::polygon_fill(&mut self.scratch, brush, &corners);
        }
        if self.stroke {
            let corners =
                [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y), a].map(|p| self.transform * p);
            let brush = self.brush(self.stroke_color);
            tessellate::polyline(&mut self.scratch, brush, &corners, self.line_width);
        }
        self.submit()
    }

    pub fn draw_polyline(&mut self, points: &[Point]) -> Result<(), RenderError> {
        if !self.stroke || points.len() < 2 {
            return Ok(());
        }
        let points: Vec<Point> = points.iter().map(|&p| self.transform * p).collect();
        let brush = self.brush(self.stroke_color);
        tessellate::polyline(&mut self.scratch, brush, &points, self.line_width);
        self.submit()
    }

    /// Closed polygon; the fill is a triangle fan.
    pub fn draw_polygon(&mut self, points: &[Point]) -> Result<(), RenderError> {
        if points.len() < 3 {
            return Ok(());
        }
        let mut points: Vec<Point> = points.iter().map(|&p| self.transform * p).collect();
        if self.fill {
            let brush = self.brush(self.fill_color);
            tessellate::polygon_fill(&mut self.scratch, brush, &points);
        }
        if self.stroke {
            points.push(points[0]);
            let brush = self.brush(self.stroke_color);
            tessellate::polyline(&mut self.scratch, brush, &points, self.line_width);
        }
        self.submit()
    }

    pub fn draw_triangle(&mut self, a: Point, b: Point, c: Point) -> Result<(), RenderError> {
        self.draw_polygon(&[a, b, c])
    }

    fn brush(&self, color: Color) -> Brush {
        Brush::new(color, self.depth)
    }

    /// Moves tessellated vertices to the open group or the target's stream.
    fn submit(&mut self) -> Result<(), RenderError> {
        if self.scratch.is_empty() {
            return Ok(());
        }
        debug_assert!(self.drawing || self.updating, "primitive drawn outside a frame");
        let result = if self.group.is_some() {
            self.cache.push(self.ctx.as_mut(), &self.scratch).map(|_| ())
        } else {
            match self.target {
                RenderTargetKind::Overlay => self.overlay.push(&self.scratch),
                _ => self.noncached.push(&self.scratch),
            }
            Ok(())
        };
        self.scratch.clear();
        result
    }

    // ── groups ────────────────────────────────────────────────────────────

    /// Starts recording primitives into a new cached group.
    pub fn begin_group(&mut self) -> GroupId {
        debug_assert!(self.drawing || self.updating, "begin_group outside a frame");
        debug_assert!(self.group.is_none(), "nested begin_group");
        let id = self.cache.create_item();
        self.cache.set_item(id);
        self.group = Some(id);
        id
    }

    pub fn end_group(&mut self) {
        if self.group.take().is_some() {
            self.cache.finish_item();
        }
    }

    /// Queues a cached group for drawing in the main buffer.
    pub fn draw_group(&mut self, id: GroupId) {
        debug_assert!(self.drawing, "draw_group outside a frame");
        if self.cache.contains(id) {
            self.queued.push(id);
        } else {
            log::trace!("draw_group: unknown group {id:?}");
        }
    }

    /// Drops a cached group. Inside a frame or an update the cache may
    /// shrink, which issues context calls.
    pub fn delete_group(&mut self, guard: &ContextGuard<'_>, id: GroupId) -> Result<bool, RenderError> {
        self.check_guard(guard, "delete_group");
        if self.group == Some(id) {
            self.group = None;
        }
        self.cache.delete(self.ctx.as_mut(), id)
    }

    /// Repaints every vertex of a group. Requires a frame or an update.
    pub fn change_group_color(&mut self, id: GroupId, color: Color) {
        if let Some(vertices) = self.cache.vertices_mut(id) {
            let color = color.to_array();
            for v in vertices {
                v.color = color;
            }
        }
    }

    /// Moves every vertex of a group to `depth`. Requires a frame or an update.
    pub fn change_group_depth(&mut self, id: GroupId, depth: f32) {
        if let Some(vertices) = self.cache.vertices_mut(id) {
            for v in vertices {
                v.pos[2] = depth;
            }
        }
    }

    pub fn is_group_valid(&self, id: GroupId) -> bool {
        self.cache.contains(id)
    }

    /// Drops every cached group.
    pub fn clear_cache(&mut self, guard: &ContextGuard<'_>) -> Result<(), RenderError> {
        self.check_guard(guard, "clear_cache");
        self.group = None;
        self.cache.clear(self.ctx.as_mut())
    }
}

impl Drop for Gal {
    fn drop(&mut self) {
        let ctx = self.ctx.as_mut();
        if self.group.take().is_some() {
            self.cache.finish_item();
        }
        if self.cache.is_mapped() {
            self.cache.unmap(ctx);
        }
        self.cache.release(ctx);
        self.batcher.release(ctx);
        self.noncached.release(ctx);
        self.overlay.release(ctx);
        self.compositor.release(ctx);
        self.manager.destroy(self.context_id);
    }
}
