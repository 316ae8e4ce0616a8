use kurbo::Vec2;

use crate::device::{GraphicsContext, TargetFormat, TextureId};
use crate::paint::Color;
use crate::render::RenderError;

use super::presenter::Presenter;

/// Antialiasing strategy of the final image.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AntialiasingMode {
    #[default]
    None,
    /// Post-process edge antialiasing at display resolution.
    Fast,
    /// 2x supersampling.
    HighQuality,
}

impl AntialiasingMode {
    /// The next mode in `None -> Fast -> HighQuality -> None` order.
    pub fn next(self) -> Self {
        match self {
            AntialiasingMode::None => AntialiasingMode::Fast,
            AntialiasingMode::Fast => AntialiasingMode::HighQuality,
            AntialiasingMode::HighQuality => AntialiasingMode::None,
        }
    }
}

/// Compositor buffer handle. [`TargetHandle::DIRECT`] is the display.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TargetHandle {
    index: u32,
    generation: u32,
}

impl TargetHandle {
    pub const DIRECT: TargetHandle = TargetHandle { index: 0, generation: 0 };

    #[inline]
    pub fn is_direct(self) -> bool {
        self.index == 0
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Offscreen color image owned by the compositor.
#[derive(Debug, Copy, Clone)]
struct RenderTarget {
    color: TextureId,
    width: u32,
    height: u32,
}

/// Offscreen buffers and their composition onto the display.
///
/// Lifecycle: `initialize`, then per frame `begin`, any number of
/// `set_buffer`/`clear_buffer`/`draw_buffer`, and `present`. `resize` and
/// `set_antialiasing_mode` return to the uninitialized state and invalidate
/// every handle.
pub struct Compositor {
    mode: AntialiasingMode,
    presenter: Presenter,
    screen: (u32, u32),
    initialized: bool,
    generation: u32,
    targets: Vec<RenderTarget>,
    depth: Option<TextureId>,
    current: TargetHandle,
}

impl Compositor {
    pub fn new(mode: AntialiasingMode) -> Self {
        Self {
            mode,
            presenter: Presenter::for_mode(mode),
            screen: (0, 0),
            initialized: false,
            generation: 1,
            targets: Vec::new(),
            depth: None,
            current: TargetHandle::DIRECT,
        }
    }

    // ── state ─────────────────────────────────────────────────────────────

    pub fn antialiasing_mode(&self) -> AntialiasingMode {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    /// Resolution of the offscreen buffers.
    pub fn internal_size(&self) -> (u32, u32) {
        let f = self.presenter.supersampling_factor();
        (self.screen.0 * f, self.screen.1 * f)
    }

    pub fn supersampling_factor(&self) -> u32 {
        self.presenter.supersampling_factor()
    }

    pub fn render_offset(&self) -> Vec2 {
        self.presenter.render_offset()
    }

    pub fn current_buffer(&self) -> TargetHandle {
        self.current
    }

    /// Number of buffers created with [`create_buffer`](Self::create_buffer).
    pub fn buffer_count(&self) -> usize {
        self.targets.len()
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Creates the depth/stencil attachment and the presenter's images.
    pub fn initialize(&mut self, ctx: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        if self.initialized {
            return Ok(());
        }
        let limits = ctx.limits();
        let (width, height) = self.internal_size();
        if width > limits.max_texture_size || height > limits.max_texture_size {
            return Err(RenderError::UnsupportedBufferSize {
                width,
                height,
                max: limits.max_texture_size,
            });
        }
        if self.presenter.required_targets() > limits.max_color_attachments {
            return Err(RenderError::TooManyTargets { max: limits.max_color_attachments });
        }

        let depth = ctx.create_target(width.max(1), height.max(1), TargetFormat::DepthStencil)?;
        self.depth = Some(depth);
        if let Err(e) = self.presenter.init(ctx, (width.max(1), height.max(1)), self.screen) {
            self.teardown(ctx);
            return Err(e);
        }
        self.initialized = true;
        self.current = TargetHandle::DIRECT;
        log::debug!("compositor initialized: {:?} at {width}x{height}", self.mode);
        Ok(())
    }

    /// Releases every image. Handles become invalid; `initialize` must run again.
    pub fn resize(&mut self, ctx: &mut dyn GraphicsContext, width: u32, height: u32) {
        self.teardown(ctx);
        self.screen = (width, height);
    }

    /// Switches strategy. Every buffer is released and every handle becomes invalid.
    pub fn set_antialiasing_mode(&mut self, ctx: &mut dyn GraphicsContext, mode: AntialiasingMode) {
        self.teardown(ctx);
        self.mode = mode;
        self.presenter = Presenter::for_mode(mode);
        log::debug!("antialiasing mode set to {mode:?}");
    }

    /// Frees every image. Used on shutdown.
    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        self.teardown(ctx);
    }

    fn teardown(&mut self, ctx: &mut dyn GraphicsContext) {
        for target in self.targets.drain(..) {
            ctx.destroy_target(target.color);
        }
        if let Some(depth) = self.depth.take() {
            ctx.destroy_target(depth);
        }
        self.presenter.teardown(ctx);
        self.initialized = false;
        self.generation = self.generation.wrapping_add(1);
        self.current = TargetHandle::DIRECT;
    }

    // ── buffers ───────────────────────────────────────────────────────────

    /// Creates an offscreen buffer, by default at the internal resolution.
    pub fn create_buffer(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        dims: Option<(u32, u32)>,
    ) -> Result<TargetHandle, RenderError> {
        self.ensure_initialized()?;
        let limits = ctx.limits();
        let used = self.targets.len() as u32 + self.presenter.required_targets();
        if used >= limits.max_color_attachments {
            return Err(RenderError::TooManyTargets { max: limits.max_color_attachments });
        }
        let (width, height) = dims.unwrap_or_else(|| self.internal_size());
        if width > limits.max_texture_size || height > limits.max_texture_size {
            return Err(RenderError::UnsupportedBufferSize {
                width,
                height,
                max: limits.max_texture_size,
            });
        }

        let color = ctx.create_target(width.max(1), height.max(1), TargetFormat::Color)?;
        self.targets.push(RenderTarget { color, width, height });
        let handle = TargetHandle { index: self.targets.len() as u32, generation: self.generation };
        log::debug!("compositor buffer {} created ({width}x{height})", handle.index);
        Ok(handle)
    }

    /// Size of an offscreen buffer.
    pub fn buffer_size(&self, handle: TargetHandle) -> Result<(u32, u32), RenderError> {
        if handle.is_direct() {
            return Ok(self.internal_size());
        }
        self.target(handle).map(|t| (t.width, t.height))
    }

    /// Directs subsequent drawing to `handle`.
    pub fn set_buffer(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        handle: TargetHandle,
    ) -> Result<(), RenderError> {
        self.ensure_initialized()?;
        self.bind(ctx, handle)?;
        self.current = handle;
        Ok(())
    }

    /// Clears the current buffer. The display stays opaque; offscreen
    /// buffers are cleared to transparent.
    pub fn clear_buffer(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        color: Color,
    ) -> Result<(), RenderError> {
        self.ensure_initialized()?;
        let color = if self.current.is_direct() { color.with_alpha(1.0) } else { Color::transparent() };
        ctx.clear(color);
        Ok(())
    }

    /// Blends `handle` onto the display.
    pub fn draw_buffer(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        handle: TargetHandle,
    ) -> Result<(), RenderError> {
        self.draw_buffer_onto(ctx, handle, TargetHandle::DIRECT)
    }

    /// Blends `source` onto `destination` with premultiplied alpha.
    pub fn draw_buffer_onto(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        source: TargetHandle,
        destination: TargetHandle,
    ) -> Result<(), RenderError> {
        self.ensure_initialized()?;
        if source.is_direct() {
            log::error!("the display cannot be used as a composition source");
            return Err(RenderError::InvalidTarget(source));
        }
        let src = self.target(source)?.color;
        self.bind(ctx, destination)?;
        ctx.composite(src);
        self.bind(ctx, self.current)
    }

    // ── frame ─────────────────────────────────────────────────────────────

    pub fn begin(&mut self, ctx: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        self.ensure_initialized()?;
        self.presenter.begin(ctx);
        self.current = TargetHandle::DIRECT;
        self.bind(ctx, TargetHandle::DIRECT)
    }

    /// Resolves the frame onto the display. The caller presents the context.
    pub fn present(&mut self, ctx: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        self.ensure_initialized()?;
        self.presenter.present(ctx);
        self.current = TargetHandle::DIRECT;
        Ok(())
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn ensure_initialized(&self) -> Result<(), RenderError> {
        if self.initialized { Ok(()) } else { Err(RenderError::NotInitialized) }
    }

    fn target(&self, handle: TargetHandle) -> Result<&RenderTarget, RenderError> {
        if handle.generation != self.generation {
            return Err(RenderError::InvalidTarget(handle));
        }
        handle
            .index
            .checked_sub(1)
            .and_then(|i| self.targets.get(i as usize))
            .ok_or(RenderError::InvalidTarget(handle))
    }

    fn bind(&self, ctx: &mut dyn GraphicsContext, handle: TargetHandle) -> Result<(), RenderError> {
        if handle.is_direct() {
            ctx.bind_target(self.presenter.destination(), None);
        } else {
            let color = self.target(handle)?.color;
            ctx.bind_target(Some(color), self.depth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ContextCall, ContextLimits, PostPass, RecordingContext};

    fn initialized(mode: AntialiasingMode) -> (RecordingContext, Compositor) {
        let mut ctx = RecordingContext::new(800, 600);
        let mut c = Compositor::new(mode);
        c.resize(&mut ctx, 800, 600);
        c.initialize(&mut ctx).unwrap();
        (ctx, c)
    }

    fn post_passes(ctx: &RecordingContext) -> Vec<PostPass> {
        ctx.calls()
            .iter()
            .filter_map(|c| match c {
                ContextCall::PostProcess { pass, .. } => Some(*pass),
                _ => None,
            })
            .collect()
    }

    // ── state machine ─────────────────────────────────────────────────────

    #[test]
    fn use_before_initialize_fails() {
        let mut ctx = RecordingContext::new(800, 600);
        let mut c = Compositor::new(AntialiasingMode::None);
        assert_eq!(c.create_buffer(&mut ctx, None), Err(RenderError::NotInitialized));
        assert_eq!(c.begin(&mut ctx), Err(RenderError::NotInitialized));
        assert_eq!(
            c.set_buffer(&mut ctx, TargetHandle::DIRECT),
            Err(RenderError::NotInitialized)
        );
    }

    #[test]
    fn changing_antialiasing_invalidates_buffers() {
        let (mut ctx, mut c) = initialized(AntialiasingMode::None);
        let a = c.create_buffer(&mut ctx, None).unwrap();
        let b = c.create_buffer(&mut ctx, None).unwrap();

        c.set_antialiasing_mode(&mut ctx, AntialiasingMode::HighQuality);
        assert!(!c.is_initialized());
        assert_eq!(c.set_buffer(&mut ctx, a), Err(RenderError::NotInitialized));
        assert_eq!(ctx.live_targets(), 0);

        c.initialize(&mut ctx).unwrap();
        assert_eq!(c.set_buffer(&mut ctx, a), Err(RenderError::InvalidTarget(a)));
        assert_eq!(c.draw_buffer(&mut ctx, b), Err(RenderError::InvalidTarget(b)));

        let fresh = c.create_buffer(&mut ctx, None).unwrap();
        assert!(c.set_buffer(&mut ctx, fresh).is_ok());
        assert_eq!(c.buffer_size(fresh), Ok((1600, 1200)));
    }

    #[test]
    fn resize_requires_reinitialize() {
        let (mut ctx, mut c) = initialized(AntialiasingMode::None);
        let a = c.create_buffer(&mut ctx, None).unwrap();
        c.resize(&mut ctx, 1024, 768);
        assert_eq!(c.begin(&mut ctx), Err(RenderError::NotInitialized));
        c.initialize(&mut ctx).unwrap();
        assert_eq!(c.set_buffer(&mut ctx, a), Err(RenderError::InvalidTarget(a)));
        assert_eq!(c.screen_size(), (1024, 768));
    }

    // ── limits ────────────────────────────────────────────────────────────

    #[test]
    fn buffer_count_is_bounded_by_attachments() {
        let mut ctx = RecordingContext::with_limits(
            800,
            600,
            ContextLimits { max_color_attachments: 4, ..ContextLimits::default() },
        );
        let mut c = Compositor::new(AntialiasingMode::Fast);
        c.resize(&mut ctx, 800, 600);
        c.initialize(&mut ctx).unwrap();
        assert!(c.create_buffer(&mut ctx, None).is_ok());
        assert_eq!(c.create_buffer(&mut ctx, None), Err(RenderError::TooManyTargets { max: 4 }));
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        let mut ctx = RecordingContext::with_limits(
            800,
            600,
            ContextLimits { max_texture_size: 1024, ..ContextLimits::default() },
        );
        let mut c = Compositor::new(AntialiasingMode::HighQuality);
        c.resize(&mut ctx, 800, 600);
        assert_eq!(
            c.initialize(&mut ctx),
            Err(RenderError::UnsupportedBufferSize { width: 1600, height: 1200, max: 1024 })
        );

        c.set_antialiasing_mode(&mut ctx, AntialiasingMode::None);
        c.initialize(&mut ctx).unwrap();
        assert_eq!(
            c.create_buffer(&mut ctx, Some((2048, 16))),
            Err(RenderError::UnsupportedBufferSize { width: 2048, height: 16, max: 1024 })
        );
    }

    // ── composition ───────────────────────────────────────────────────────

    #[test]
    fn direct_clear_is_opaque_and_offscreen_clear_is_transparent() {
        let (mut ctx, mut c) = initialized(AntialiasingMode::None);
        let a = c.create_buffer(&mut ctx, None).unwrap();
        let grey = Color::from_straight(0.5, 0.5, 0.5, 0.25);

        c.set_buffer(&mut ctx, a).unwrap();
        c.clear_buffer(&mut ctx, grey).unwrap();
        c.set_buffer(&mut ctx, TargetHandle::DIRECT).unwrap();
        c.clear_buffer(&mut ctx, grey).unwrap();

        let clears: Vec<Color> = ctx
            .calls()
            .iter()
            .filter_map(|c| match c {
                ContextCall::Clear(color) => Some(*color),
                _ => None,
            })
            .collect();
        assert_eq!(clears[0], Color::transparent());
        assert_eq!(clears[1].a, 1.0);
    }

    #[test]
    fn draw_buffer_restores_the_current_binding() {
        let (mut ctx, mut c) = initialized(AntialiasingMode::None);
        let a = c.create_buffer(&mut ctx, None).unwrap();
        let b = c.create_buffer(&mut ctx, None).unwrap();
        c.set_buffer(&mut ctx, b).unwrap();
        ctx.take_calls();

        c.draw_buffer(&mut ctx, a).unwrap();
        let calls = ctx.take_calls();
        assert_eq!(calls[0], ContextCall::BindTarget { color: None, depth: None });
        assert!(matches!(calls[1], ContextCall::Composite(_)));
        assert!(matches!(calls[2], ContextCall::BindTarget { color: Some(_), depth: Some(_) }));
        assert_eq!(c.current_buffer(), b);
    }

    #[test]
    fn supersampling_downsamples_on_present() {
        let (mut ctx, mut c) = initialized(AntialiasingMode::HighQuality);
        assert_eq!(c.supersampling_factor(), 2);
        assert_eq!(c.render_offset(), Vec2::new(0.5, -0.5));
        c.begin(&mut ctx).unwrap();
        c.present(&mut ctx).unwrap();
        assert_eq!(post_passes(&ctx), vec![PostPass::Downsample]);
    }

    #[test]
    fn smaa_runs_three_passes() {
        let (mut ctx, mut c) = initialized(AntialiasingMode::Fast);
        assert_eq!(c.internal_size(), (800, 600));
        c.begin(&mut ctx).unwrap();
        c.present(&mut ctx).unwrap();
        assert_eq!(
            post_passes(&ctx),
            vec![PostPass::SmaaEdges, PostPass::SmaaWeights, PostPass::SmaaBlend]
        );
        assert!(ctx.violations().is_empty());
    }
}
