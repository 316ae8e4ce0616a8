/// Surface image acquired for one frame.
///
/// Hand `view` to the context's display slot, draw, then give the frame back
/// to [`Gpu::present`](super::Gpu::present). Holding it blocks acquisition of
/// the next image.
pub struct GpuFrame {
    pub surface_texture: wgpu::SurfaceTexture,
    pub view: wgpu::TextureView,
}

impl GpuFrame {
    pub fn size(&self) -> (u32, u32) {
        let texture = &self.surface_texture.texture;
        (texture.width(), texture.height())
    }
}
