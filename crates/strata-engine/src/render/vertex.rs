use bytemuck::{Pod, Zeroable};

use crate::paint::Color;

/// Fragment program selected per vertex (stored in `Vertex::shader[0]`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum ShaderMode {
    /// Flat color.
    Solid = 0,
    /// Disc inscribed in the quad. `shader[1..3]` are the unit-square coordinates.
    FilledCircle = 1,
    /// Ring inscribed in the quad. `shader[3]` is the inner/outer radius ratio.
    StrokedCircle = 2,
}

impl ShaderMode {
    #[inline]
    pub fn as_f32(self) -> f32 {
        self as u8 as f32
    }
}

/// One vertex of the shared vertex buffers (44 bytes):
///
///  offset  0  pos     [f32; 3]   loc 0  (world x, y; z = layer depth)
///  offset 12  color   [f32; 4]   loc 1  (premultiplied)
///  offset 28  shader  [f32; 4]   loc 2  (mode, params)
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 4],
    pub shader: [f32; 4],
}

impl Vertex {
    pub const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3, // pos
        1 => Float32x4, // color
        2 => Float32x4  // shader
    ];

    #[inline]
    pub fn solid(x: f32, y: f32, depth: f32, color: Color) -> Self {
        Self {
            pos: [x, y, depth],
            color: color.to_array(),
            shader: [ShaderMode::Solid.as_f32(), 0.0, 0.0, 0.0],
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        let v = Vertex::solid(1.0, 2.0, 0.5, Color::WHITE);
        let bytes: &[u8] = bytemuck::bytes_of(&v);
        assert_eq!(bytes.len(), 44);
    }
}
