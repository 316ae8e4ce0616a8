use std::any::Any;

use kurbo::Affine;

use crate::paint::Color;
use crate::render::Vertex;

use super::ContextError;

/// Handle of a vertex or index buffer owned by a [`GraphicsContext`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

/// Handle of a render-target image owned by a [`GraphicsContext`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

/// Element type stored in a context buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferUsage {
    /// Array of [`Vertex`].
    Vertex,
    /// Array of `u32` vertex indices.
    Index,
}

/// Pixel format of a render-target image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TargetFormat {
    Color,
    DepthStencil,
}

/// Fullscreen passes used by antialiasing presenters.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PostPass {
    /// Box-filters a 2x supersampled image down to the bound target.
    Downsample,
    /// Luma edge detection (input: color).
    SmaaEdges,
    /// Blending weight estimation (input: edges).
    SmaaWeights,
    /// Neighborhood blending (inputs: color, weights).
    SmaaBlend,
}

/// Hardware limits reported by a context.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ContextLimits {
    /// Maximum number of offscreen color targets the compositor may create.
    pub max_color_attachments: u32,
    /// Maximum width/height of a render-target image.
    pub max_texture_size: u32,
    /// Whether `copy_buffer` is available for device-side relocation.
    pub supports_buffer_copy: bool,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_texture_size: 8192,
            supports_buffer_copy: true,
        }
    }
}

/// Immediate-mode graphics context driven by the renderer.
///
/// Calls are issued from the thread that holds the context lock (see
/// [`ContextManager`](super::ContextManager)). Buffer lengths and offsets are
/// counted in elements, not bytes.
///
/// Draw calls target whatever was bound last with [`bind_target`]; `None`
/// binds the display.
///
/// [`bind_target`]: GraphicsContext::bind_target
pub trait GraphicsContext {
    /// Hardware limits of this context.
    fn limits(&self) -> ContextLimits;

    /// Returns `true` once the context can no longer be used.
    fn is_lost(&self) -> bool;

    /// Size of the display surface in physical pixels.
    fn display_size(&self) -> (u32, u32);

    /// The concrete backend, for hosts that need backend-specific calls.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    // ── buffers ───────────────────────────────────────────────────────────

    fn create_buffer(&mut self, usage: BufferUsage, len: u32) -> Result<BufferId, ContextError>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Makes the buffer writable from the CPU.
    fn map_buffer(&mut self, buffer: BufferId) -> Result<(), ContextError>;

    fn unmap_buffer(&mut self, buffer: BufferId);

    fn write_vertices(&mut self, buffer: BufferId, offset: u32, data: &[Vertex]);

    fn write_indices(&mut self, buffer: BufferId, offset: u32, data: &[u32]);

    /// Device-side copy of `len` elements. Both buffers must be unmapped.
    fn copy_buffer(&mut self, src: BufferId, src_offset: u32, dst: BufferId, dst_offset: u32, len: u32);

    // ── drawing ───────────────────────────────────────────────────────────

    /// Sets the world-to-clip transform used by subsequent draws.
    fn set_transform(&mut self, world_to_clip: Affine);

    /// Draws `count` vertices starting at `first` as a triangle list.
    fn draw_arrays(&mut self, vertices: BufferId, first: u32, count: u32);

    /// Draws `count` indices starting at `first_index` as a triangle list.
    fn draw_indexed(&mut self, vertices: BufferId, indices: BufferId, first_index: u32, count: u32);

    // ── targets ───────────────────────────────────────────────────────────

    fn create_target(
        &mut self,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> Result<TextureId, ContextError>;

    fn destroy_target(&mut self, target: TextureId);

    /// Binds a color target (and optional depth/stencil). `None` is the display.
    fn bind_target(&mut self, color: Option<TextureId>, depth: Option<TextureId>);

    /// Clears the bound color target (and its depth/stencil, if any).
    fn clear(&mut self, color: Color);

    /// Alpha-composites `source` over the bound target (premultiplied blending).
    fn composite(&mut self, source: TextureId);

    /// Runs a fullscreen post-processing pass into the bound target.
    fn post_process(&mut self, pass: PostPass, inputs: &[TextureId]);

    /// Flushes the frame to the display.
    fn present(&mut self);
}
