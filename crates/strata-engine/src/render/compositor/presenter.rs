use kurbo::Vec2;

use crate::device::{GraphicsContext, PostPass, TargetFormat, TextureId};
use crate::paint::Color;
use crate::render::RenderError;

use super::AntialiasingMode;

/// Final composition strategy, one per antialiasing mode.
///
/// Every strategy but `Direct` owns an intermediate image that stands in for
/// the display until `present` resolves it.
#[derive(Debug)]
pub(super) enum Presenter {
    Direct,
    /// Scene at twice the resolution, box-filtered down on present.
    Supersampling { main: Option<TextureId> },
    /// Scene at display resolution, then edge detection, blend weights and
    /// neighborhood blending.
    Smaa {
        base: Option<TextureId>,
        edges: Option<TextureId>,
        weights: Option<TextureId>,
    },
}

impl Presenter {
    pub fn for_mode(mode: AntialiasingMode) -> Self {
        match mode {
            AntialiasingMode::None => Presenter::Direct,
            AntialiasingMode::HighQuality => Presenter::Supersampling { main: None },
            AntialiasingMode::Fast => Presenter::Smaa { base: None, edges: None, weights: None },
        }
    }

    pub fn supersampling_factor(&self) -> u32 {
        match self {
            Presenter::Supersampling { .. } => 2,
            _ => 1,
        }
    }

    /// Sub-pixel shift applied to geometry, in internal pixels.
    pub fn render_offset(&self) -> Vec2 {
        match self {
            Presenter::Supersampling { .. } => Vec2::new(0.5, -0.5),
            _ => Vec2::ZERO,
        }
    }

    /// Color attachments the presenter needs.
    pub fn required_targets(&self) -> u32 {
        match self {
            Presenter::Direct => 0,
            Presenter::Supersampling { .. } => 1,
            Presenter::Smaa { .. } => 3,
        }
    }

    /// Image standing in for the display. `None` is the display itself.
    pub fn destination(&self) -> Option<TextureId> {
        match self {
            Presenter::Direct => None,
            Presenter::Supersampling { main } => *main,
            Presenter::Smaa { base, .. } => *base,
        }
    }

    /// Creates the intermediate images. `internal` is the scene resolution,
    /// `screen` the display resolution.
    pub fn init(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        internal: (u32, u32),
        screen: (u32, u32),
    ) -> Result<(), RenderError> {
        match self {
            Presenter::Direct => {}
            Presenter::Supersampling { main } => {
                *main = Some(ctx.create_target(internal.0, internal.1, TargetFormat::Color)?);
            }
            Presenter::Smaa { base, edges, weights } => {
                let (w, h) = screen;
                *base = Some(ctx.create_target(w, h, TargetFormat::Color)?);
                *edges = Some(ctx.create_target(w, h, TargetFormat::Color)?);
                *weights = Some(ctx.create_target(w, h, TargetFormat::Color)?);
            }
        }
        Ok(())
    }

    /// Clears the intermediate image at the start of a frame.
    pub fn begin(&self, ctx: &mut dyn GraphicsContext) {
        if let Some(dst) = self.destination() {
            ctx.bind_target(Some(dst), None);
            ctx.clear(Color::transparent());
        }
    }

    /// Resolves the intermediate image onto the display.
    pub fn present(&self, ctx: &mut dyn GraphicsContext) {
        match *self {
            Presenter::Direct => {}
            Presenter::Supersampling { main: Some(main) } => {
                ctx.bind_target(None, None);
                ctx.post_process(PostPass::Downsample, &[main]);
            }
            Presenter::Smaa { base: Some(base), edges: Some(edges), weights: Some(weights) } => {
                ctx.bind_target(Some(edges), None);
                ctx.clear(Color::transparent());
                ctx.post_process(PostPass::SmaaEdges, &[base]);

                ctx.bind_target(Some(weights), None);
                ctx.clear(Color::transparent());
                ctx.post_process(PostPass::SmaaWeights, &[edges]);

                ctx.bind_target(None, None);
                ctx.post_process(PostPass::SmaaBlend, &[base, weights]);
            }
            _ => log::error!("presenting before the antialiasing targets exist"),
        }
    }

    pub fn teardown(&mut self, ctx: &mut dyn GraphicsContext) {
        let owned: Vec<TextureId> = match self {
            Presenter::Direct => Vec::new(),
            Presenter::Supersampling { main } => main.take().into_iter().collect(),
            Presenter::Smaa { base, edges, weights } => {
                [base.take(), edges.take(), weights.take()].into_iter().flatten().collect()
            }
        };
        for target in owned {
            ctx.destroy_target(target);
        }
    }
}
