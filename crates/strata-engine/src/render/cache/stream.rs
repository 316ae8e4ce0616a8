use crate::device::{BufferId, BufferUsage, GraphicsContext};
use crate::render::{RenderError, Vertex};

/// Append-only vertices rebuilt every frame (non-cached and overlay targets).
#[derive(Default)]
pub struct StreamContainer {
    vertices: Vec<Vertex>,
    buffer: Option<(BufferId, u32)>,
}

impl StreamContainer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.vertices.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn push(&mut self, vertices: &[Vertex]) {
        self.vertices.extend_from_slice(vertices);
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
    }

    /// Uploads the frame's vertices, growing the device buffer to the next
    /// power of two when needed. Returns the buffer and vertex count.
    pub fn upload(
        &mut self,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<Option<(BufferId, u32)>, RenderError> {
        if self.vertices.is_empty() {
            return Ok(None);
        }
        let len = self.len();
        let buffer = match self.buffer {
            Some((id, cap)) if cap >= len => id,
            old => {
                if let Some((id, _)) = old {
                    ctx.destroy_buffer(id);
                }
                self.buffer = None;
                let cap = len.next_power_of_two().max(1024);
                let id = ctx.create_buffer(BufferUsage::Vertex, cap)?;
                self.buffer = Some((id, cap));
                id
            }
        };
        ctx.write_vertices(buffer, 0, &self.vertices);
        Ok(Some((buffer, len)))
    }

    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) {
        if let Some((id, _)) = self.buffer.take() {
            ctx.destroy_buffer(id);
        }
        self.vertices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingContext;
    use crate::paint::Color;

    #[test]
    fn upload_reuses_buffer_until_it_is_too_small() {
        let mut ctx = RecordingContext::new(8, 8);
        let mut s = StreamContainer::new();
        assert_eq!(s.upload(&mut ctx).unwrap(), None);

        s.push(&[Vertex::solid(0.0, 0.0, 0.0, Color::WHITE); 3]);
        let (first, len) = s.upload(&mut ctx).unwrap().unwrap();
        assert_eq!(len, 3);
        s.clear();
        s.push(&[Vertex::default(); 10]);
        let (again, _) = s.upload(&mut ctx).unwrap().unwrap();
        assert_eq!(first, again);

        s.push(&vec![Vertex::default(); 2000]);
        let (grown, len) = s.upload(&mut ctx).unwrap().unwrap();
        assert_ne!(first, grown);
        assert_eq!(len, 2010);
        assert_eq!(ctx.live_buffers(), 1);
        assert!(ctx.violations().is_empty());
    }
}
