use std::any::Any;
use std::collections::HashMap;

use kurbo::Affine;

use crate::paint::Color;
use crate::render::Vertex;

use super::{
    BufferId, BufferUsage, ContextError, ContextLimits, GraphicsContext, PostPass, TargetFormat,
    TextureId,
};

/// One call received by a [`RecordingContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContextCall {
    CreateBuffer { buffer: BufferId, usage: BufferUsage, len: u32 },
    DestroyBuffer(BufferId),
    MapBuffer(BufferId),
    UnmapBuffer(BufferId),
    WriteVertices { buffer: BufferId, offset: u32, len: u32 },
    WriteIndices { buffer: BufferId, offset: u32, len: u32 },
    CopyBuffer { src: BufferId, src_offset: u32, dst: BufferId, dst_offset: u32, len: u32 },
    SetTransform(Affine),
    DrawArrays { buffer: BufferId, first: u32, count: u32 },
    DrawIndexed { vertices: BufferId, indices: BufferId, first_index: u32, count: u32 },
    CreateTarget { target: TextureId, width: u32, height: u32, format: TargetFormat },
    DestroyTarget(TextureId),
    BindTarget { color: Option<TextureId>, depth: Option<TextureId> },
    Clear(Color),
    Composite(TextureId),
    PostProcess { pass: PostPass, inputs: Vec<TextureId> },
    Present,
}

impl ContextCall {
    pub fn is_draw(&self) -> bool {
        matches!(self, ContextCall::DrawArrays { .. } | ContextCall::DrawIndexed { .. })
    }
}

#[derive(Debug)]
struct RecordedBuffer {
    usage: BufferUsage,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    mapped: bool,
}

impl RecordedBuffer {
    fn len(&self) -> u32 {
        match self.usage {
            BufferUsage::Vertex => self.vertices.len() as u32,
            BufferUsage::Index => self.indices.len() as u32,
        }
    }
}

/// Headless [`GraphicsContext`] that keeps buffer contents in memory and
/// records every call.
///
/// Out-of-range writes, draws and copies are not executed; they are collected
/// as violations instead, so tests can assert that none happened.
pub struct RecordingContext {
    limits: ContextLimits,
    display: (u32, u32),
    lost: bool,
    next_id: u32,
    buffers: HashMap<BufferId, RecordedBuffer>,
    targets: HashMap<TextureId, (u32, u32, TargetFormat)>,
    calls: Vec<ContextCall>,
    violations: Vec<String>,
}

impl RecordingContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, ContextLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: ContextLimits) -> Self {
        Self {
            limits,
            display: (width, height),
            lost: false,
            next_id: 1,
            buffers: HashMap::new(),
            targets: HashMap::new(),
            calls: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Simulates losing the device: every later map or create fails.
    pub fn lose(&mut self) {
        self.lost = true;
    }

    pub fn restore(&mut self) {
        self.lost = false;
    }

    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display = (width, height);
    }

    pub fn calls(&self) -> &[ContextCall] {
        &self.calls
    }

    /// Drains the call log.
    pub fn take_calls(&mut self) -> Vec<ContextCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn buffer_vertices(&self, buffer: BufferId) -> Option<&[Vertex]> {
        self.buffers.get(&buffer).map(|b| b.vertices.as_slice())
    }

    pub fn buffer_indices(&self, buffer: BufferId) -> Option<&[u32]> {
        self.buffers.get(&buffer).map(|b| b.indices.as_slice())
    }

    pub fn is_mapped(&self, buffer: BufferId) -> bool {
        self.buffers.get(&buffer).is_some_and(|b| b.mapped)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn target_size(&self, target: TextureId) -> Option<(u32, u32)> {
        self.targets.get(&target).map(|&(w, h, _)| (w, h))
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn violation(&mut self, msg: String) {
        log::warn!("recording context: {msg}");
        self.violations.push(msg);
    }

    fn check_range(&mut self, what: &str, buffer: BufferId, offset: u32, len: u32) -> bool {
        let Some(b) = self.buffers.get(&buffer) else {
            self.violation(format!("{what}: unknown buffer {buffer:?}"));
            return false;
        };
        let end = offset as u64 + len as u64;
        if end > b.len() as u64 {
            let cap = b.len();
            self.violation(format!("{what}: {offset}+{len} exceeds {buffer:?} of length {cap}"));
            return false;
        }
        true
    }
}

impl GraphicsContext for RecordingContext {
    fn limits(&self) -> ContextLimits {
        self.limits
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn display_size(&self) -> (u32, u32) {
        self.display
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    // ── buffers ───────────────────────────────────────────────────────────

    fn create_buffer(&mut self, usage: BufferUsage, len: u32) -> Result<BufferId, ContextError> {
        if self.lost {
            return Err(ContextError::Lost);
        }
        let buffer = BufferId(self.next_id());
        let (vertices, indices) = match usage {
            BufferUsage::Vertex => (vec![Vertex::default(); len as usize], Vec::new()),
            BufferUsage::Index => (Vec::new(), vec![0; len as usize]),
        };
        self.buffers.insert(buffer, RecordedBuffer { usage, vertices, indices, mapped: false });
        self.calls.push(ContextCall::CreateBuffer { buffer, usage, len });
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_none() {
            self.violation(format!("destroy: unknown buffer {buffer:?}"));
        }
        self.calls.push(ContextCall::DestroyBuffer(buffer));
    }

    fn map_buffer(&mut self, buffer: BufferId) -> Result<(), ContextError> {
        if self.lost {
            return Err(ContextError::Lost);
        }
        let Some(b) = self.buffers.get_mut(&buffer) else {
            return Err(ContextError::InvalidHandle);
        };
        if b.mapped {
            self.violation(format!("map: {buffer:?} is already mapped"));
        } else {
            b.mapped = true;
        }
        self.calls.push(ContextCall::MapBuffer(buffer));
        Ok(())
    }

    fn unmap_buffer(&mut self, buffer: BufferId) {
        match self.buffers.get_mut(&buffer) {
            Some(b) if b.mapped => b.mapped = false,
            Some(_) => self.violation(format!("unmap: {buffer:?} is not mapped")),
            None => self.violation(format!("unmap: unknown buffer {buffer:?}")),
        }
        self.calls.push(ContextCall::UnmapBuffer(buffer));
    }

    fn write_vertices(&mut self, buffer: BufferId, offset: u32, data: &[Vertex]) {
        let len = data.len() as u32;
        self.calls.push(ContextCall::WriteVertices { buffer, offset, len });
        if !self.check_range("write_vertices", buffer, offset, len) {
            return;
        }
        if let Some(b) = self.buffers.get_mut(&buffer) {
            let start = offset as usize;
            b.vertices[start..start + data.len()].copy_from_slice(data);
        }
    }

    fn write_indices(&mut self, buffer: BufferId, offset: u32, data: &[u32]) {
        let len = data.len() as u32;
        self.calls.push(ContextCall::WriteIndices { buffer, offset, len });
        if !self.check_range("write_indices", buffer, offset, len) {
            return;
        }
        if let Some(b) = self.buffers.get_mut(&buffer) {
            let start = offset as usize;
            b.indices[start..start + data.len()].copy_from_slice(data);
        }
    }

    fn copy_buffer(&mut self, src: BufferId, src_offset: u32, dst: BufferId, dst_offset: u32, len: u32) {
        self.calls.push(ContextCall::CopyBuffer { src, src_offset, dst, dst_offset, len });
        if !self.limits.supports_buffer_copy {
            self.violation("copy_buffer: not supported by this context".to_string());
            return;
        }
        if self.is_mapped(src) || self.is_mapped(dst) {
            self.violation(format!("copy_buffer: {src:?} or {dst:?} is mapped"));
            return;
        }
        if !self.check_range("copy_buffer src", src, src_offset, len)
            || !self.check_range("copy_buffer dst", dst, dst_offset, len)
        {
            return;
        }
        let data: Vec<Vertex> = match self.buffers.get(&src) {
            Some(b) => b.vertices[src_offset as usize..(src_offset + len) as usize].to_vec(),
            None => return,
        };
        if let Some(b) = self.buffers.get_mut(&dst) {
            let start = dst_offset as usize;
            b.vertices[start..start + data.len()].copy_from_slice(&data);
        }
    }

    // ── drawing ───────────────────────────────────────────────────────────

    fn set_transform(&mut self, world_to_clip: Affine) {
        self.calls.push(ContextCall::SetTransform(world_to_clip));
    }

    fn draw_arrays(&mut self, buffer: BufferId, first: u32, count: u32) {
        self.calls.push(ContextCall::DrawArrays { buffer, first, count });
        self.check_range("draw_arrays", buffer, first, count);
    }

    fn draw_indexed(&mut self, vertices: BufferId, indices: BufferId, first_index: u32, count: u32) {
        self.calls.push(ContextCall::DrawIndexed { vertices, indices, first_index, count });
        if !self.check_range("draw_indexed", indices, first_index, count) {
            return;
        }
        let vertex_len = match self.buffers.get(&vertices) {
            Some(b) => b.len(),
            None => {
                self.violation(format!("draw_indexed: unknown vertex buffer {vertices:?}"));
                return;
            }
        };
        let out_of_range = self.buffers.get(&indices).and_then(|b| {
            b.indices[first_index as usize..(first_index + count) as usize]
                .iter()
                .copied()
                .find(|&i| i >= vertex_len)
        });
        if let Some(i) = out_of_range {
            self.violation(format!("draw_indexed: index {i} beyond vertex buffer length {vertex_len}"));
        }
    }

    // ── targets ───────────────────────────────────────────────────────────

    fn create_target(
        &mut self,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> Result<TextureId, ContextError> {
        if self.lost {
            return Err(ContextError::Lost);
        }
        let target = TextureId(self.next_id());
        self.targets.insert(target, (width, height, format));
        self.calls.push(ContextCall::CreateTarget { target, width, height, format });
        Ok(target)
    }

    fn destroy_target(&mut self, target: TextureId) {
        if self.targets.remove(&target).is_none() {
            self.violation(format!("destroy_target: unknown target {target:?}"));
        }
        self.calls.push(ContextCall::DestroyTarget(target));
    }

    fn bind_target(&mut self, color: Option<TextureId>, depth: Option<TextureId>) {
        for t in color.iter().chain(depth.iter()) {
            if !self.targets.contains_key(t) {
                self.violation(format!("bind_target: unknown target {t:?}"));
            }
        }
        self.calls.push(ContextCall::BindTarget { color, depth });
    }

    fn clear(&mut self, color: Color) {
        self.calls.push(ContextCall::Clear(color));
    }

    fn composite(&mut self, source: TextureId) {
        if !self.targets.contains_key(&source) {
            self.violation(format!("composite: unknown target {source:?}"));
        }
        self.calls.push(ContextCall::Composite(source));
    }

    fn post_process(&mut self, pass: PostPass, inputs: &[TextureId]) {
        self.calls.push(ContextCall::PostProcess { pass, inputs: inputs.to_vec() });
    }

    fn present(&mut self) {
        self.calls.push(ContextCall::Present);
    }
}
