//! [`GraphicsContext`] on a wgpu device.
//!
//! Every call is encoded into one command encoder that is submitted by
//! [`present`](GraphicsContext::present). Buffer writes are staged and copied
//! inside the encoder so they stay ordered with the draws around them.
//! Consecutive draws on the same target share a render pass; binding,
//! clearing, writing or changing the transform closes it.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::{Pod, Zeroable};
use hashbrown::HashMap;
use kurbo::Affine;
use wgpu::util::DeviceExt;

use crate::paint::Color;
use crate::render::Vertex;

use super::{
    BufferId, BufferUsage, ContextError, ContextLimits, GraphicsContext, PostPass, TargetFormat,
    TextureId,
};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Surface image the display target renders into during a frame.
///
/// The host fills it after acquiring a frame and empties it once the frame
/// is presented; draws to the display while it is empty are dropped.
#[derive(Clone, Default)]
pub struct DisplaySlot {
    inner: Rc<RefCell<Option<(wgpu::TextureView, (u32, u32))>>>,
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, view: wgpu::TextureView, size: (u32, u32)) {
        *self.inner.borrow_mut() = Some((view, size));
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().take();
    }

    pub fn is_set(&self) -> bool {
        self.inner.borrow().is_some()
    }

    fn view(&self) -> Option<wgpu::TextureView> {
        self.inner.borrow().as_ref().map(|(view, _)| view.clone())
    }

    fn size(&self) -> Option<(u32, u32)> {
        self.inner.borrow().as_ref().map(|&(_, size)| size)
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ViewUniform {
    world_to_clip: [[f32; 4]; 4],
}

impl ViewUniform {
    /// Column-major 4x4 form of a 2D affine map; z passes through.
    fn from_affine(m: Affine) -> Self {
        let [a, b, c, d, e, f] = m.as_coeffs().map(|v| v as f32);
        Self {
            world_to_clip: [
                [a, b, 0.0, 0.0],
                [c, d, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [e, f, 0.0, 1.0],
            ],
        }
    }
}

struct GpuBuffer {
    usage: BufferUsage,
    buffer: wgpu::Buffer,
    len: u32,
    mapped: bool,
}

impl GpuBuffer {
    fn element_size(&self) -> u64 {
        match self.usage {
            BufferUsage::Vertex => std::mem::size_of::<Vertex>() as u64,
            BufferUsage::Index => std::mem::size_of::<u32>() as u64,
        }
    }
}

struct GpuTarget {
    view: wgpu::TextureView,
    format: TargetFormat,
}

#[derive(Debug, Copy, Clone)]
enum DrawOp {
    Arrays { buffer: BufferId, first: u32, count: u32 },
    Indexed { vertices: BufferId, indices: BufferId, first_index: u32, count: u32 },
}

struct Pipelines {
    /// Scene triangles into a target with depth/stencil.
    triangles_depth: wgpu::RenderPipeline,
    /// Scene triangles into a color-only target.
    triangles: wgpu::RenderPipeline,
    composite: wgpu::RenderPipeline,
    downsample: wgpu::RenderPipeline,
    smaa_edges: wgpu::RenderPipeline,
    smaa_weights: wgpu::RenderPipeline,
    smaa_blend: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
}

impl Pipelines {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat, view_layout: &wgpu::BindGroupLayout) -> Self {
        let scene_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("strata scene shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/scene.wgsl").into()),
        });
        let post_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("strata post shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/post.wgsl").into()),
        });

        let scene_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("strata scene pipeline layout"),
            bind_group_layouts: &[view_layout],
            immediate_size: 0,
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("strata post bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
            ],
        });
        let post_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("strata post pipeline layout"),
            bind_group_layouts: &[&texture_layout],
            immediate_size: 0,
        });

        let triangles = |label, depth: Option<wgpu::DepthStencilState>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&scene_layout),
                vertex: wgpu::VertexState {
                    module: &scene_shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[Vertex::layout()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &scene_shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(premul_alpha_blend()),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: triangle_list(),
                depth_stencil: depth,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        };

        let fullscreen = |label, entry_point, blend| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&post_layout),
                vertex: wgpu::VertexState {
                    module: &post_shader,
                    entry_point: Some("vs_fullscreen"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &post_shader,
                    entry_point: Some(entry_point),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: triangle_list(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        };

        Self {
            triangles_depth: triangles(
                "strata triangles (depth)",
                Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
            ),
            triangles: triangles("strata triangles", None),
            composite: fullscreen("strata composite", "fs_composite", Some(premul_alpha_blend())),
            downsample: fullscreen("strata downsample", "fs_downsample", None),
            smaa_edges: fullscreen("strata smaa edges", "fs_smaa_edges", None),
            smaa_weights: fullscreen("strata smaa weights", "fs_smaa_weights", None),
            smaa_blend: fullscreen("strata smaa blend", "fs_smaa_blend", None),
            texture_layout,
        }
    }

    fn post(&self, pass: PostPass) -> &wgpu::RenderPipeline {
        match pass {
            PostPass::Downsample => &self.downsample,
            PostPass::SmaaEdges => &self.smaa_edges,
            PostPass::SmaaWeights => &self.smaa_weights,
            PostPass::SmaaBlend => &self.smaa_blend,
        }
    }
}

fn premul_alpha_blend() -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState { color: component, alpha: component }
}

fn triangle_list() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: None,
        polygon_mode: wgpu::PolygonMode::Fill,
        unclipped_depth: false,
        conservative: false,
    }
}

fn wgpu_color(c: Color) -> wgpu::Color {
    let [r, g, b, a] = c.to_array();
    wgpu::Color { r: r as f64, g: g as f64, b: b as f64, a: a as f64 }
}

/// Graphics context backed by a wgpu device and queue.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,
    display: DisplaySlot,
    limits: ContextLimits,
    max_buffer_size: u64,
    lost: Arc<AtomicBool>,

    pipelines: Pipelines,
    sampler: wgpu::Sampler,
    view_ubo: wgpu::Buffer,
    view_group: wgpu::BindGroup,

    next_id: u32,
    buffers: HashMap<BufferId, GpuBuffer>,
    targets: HashMap<TextureId, GpuTarget>,

    encoder: Option<wgpu::CommandEncoder>,
    bound: (Option<TextureId>, Option<TextureId>),
    pending_clear: Option<Color>,
    pending: Vec<DrawOp>,
}

impl WgpuContext {
    /// Creates a context drawing in `format`, the format of the surface the
    /// display slot will receive.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, format: wgpu::TextureFormat, display: DisplaySlot) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("wgpu device lost ({reason:?}): {message}");
            flag.store(true, Ordering::SeqCst);
        });

        let device_limits = device.limits();
        let limits = ContextLimits {
            max_color_attachments: device_limits.max_color_attachments,
            max_texture_size: device_limits.max_texture_dimension_2d,
            supports_buffer_copy: true,
        };

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("strata view bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<ViewUniform>() as u64),
                },
                count: None,
            }],
        });
        let view_ubo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("strata view ubo"),
            contents: bytemuck::bytes_of(&ViewUniform::from_affine(Affine::IDENTITY)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let view_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("strata view bind group"),
            layout: &view_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: view_ubo.as_entire_binding() }],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("strata post sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let pipelines = Pipelines::new(&device, format, &view_layout);

        Self {
            max_buffer_size: device_limits.max_buffer_size,
            device,
            queue,
            format,
            display,
            limits,
            lost,
            pipelines,
            sampler,
            view_ubo,
            view_group,
            next_id: 1,
            buffers: HashMap::new(),
            targets: HashMap::new(),
            encoder: None,
            bound: (None, None),
            pending_clear: None,
            pending: Vec::new(),
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn display(&self) -> &DisplaySlot {
        &self.display
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("strata frame encoder") })
        })
    }

    /// Color view of a bound target; `None` is the display.
    fn color_view(&self, target: Option<TextureId>) -> Option<wgpu::TextureView> {
        match target {
            None => self.display.view(),
            Some(id) => self.targets.get(&id).map(|t| t.view.clone()),
        }
    }

    /// Encodes the queued clear and draws into one pass on the bound target.
    fn flush_pass(&mut self) {
        if self.pending.is_empty() && self.pending_clear.is_none() {
            return;
        }
        let clear = self.pending_clear.take();
        let ops = std::mem::take(&mut self.pending);

        let Some(color) = self.color_view(self.bound.0) else {
            log::trace!("wgpu: dropping {} draws without a display image", ops.len());
            return;
        };
        let depth = self
            .bound
            .1
            .and_then(|id| self.targets.get(&id))
            .filter(|t| t.format == TargetFormat::DepthStencil)
            .map(|t| t.view.clone());

        let load = match clear {
            Some(c) => wgpu::LoadOp::Clear(wgpu_color(c)),
            None => wgpu::LoadOp::Load,
        };
        let depth_attachment = depth.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: if clear.is_some() { wgpu::LoadOp::Clear(1.0) } else { wgpu::LoadOp::Load },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: Some(wgpu::Operations {
                load: if clear.is_some() { wgpu::LoadOp::Clear(0) } else { wgpu::LoadOp::Load },
                store: wgpu::StoreOp::Store,
            }),
        });

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("strata frame encoder") })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("strata draw pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color,
                resolve_target: None,
                ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        if ops.is_empty() {
            return;
        }

        let pipeline = if depth.is_some() { &self.pipelines.triangles_depth } else { &self.pipelines.triangles };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.view_group, &[]);
        for op in ops {
            match op {
                DrawOp::Arrays { buffer, first, count } => {
                    let Some(vb) = self.buffers.get(&buffer) else {
                        continue;
                    };
                    pass.set_vertex_buffer(0, vb.buffer.slice(..));
                    pass.draw(first..first + count, 0..1);
                }
                DrawOp::Indexed { vertices, indices, first_index, count } => {
                    let (Some(vb), Some(ib)) = (self.buffers.get(&vertices), self.buffers.get(&indices)) else {
                        continue;
                    };
                    pass.set_vertex_buffer(0, vb.buffer.slice(..));
                    pass.set_index_buffer(ib.buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(first_index..first_index + count, 0, 0..1);
                }
            }
        }
    }

    /// Copies `bytes` into `dst` at `offset` from a staging buffer, after
    /// everything encoded so far.
    fn stage(&mut self, buffer: BufferId, offset: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.flush_pass();
        let Some(dst) = self.buffers.get(&buffer).map(|b| b.buffer.clone()) else {
            log::error!("wgpu: write to unknown buffer {buffer:?}");
            return;
        };
        let staging = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("strata staging"),
            contents: bytes,
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        self.encoder().copy_buffer_to_buffer(&staging, 0, &dst, offset, bytes.len() as u64);
    }

    fn in_range(&self, what: &str, buffer: BufferId, offset: u32, len: u32) -> bool {
        match self.buffers.get(&buffer) {
            Some(b) if offset as u64 + len as u64 <= b.len as u64 => true,
            Some(b) => {
                log::error!("wgpu {what}: {offset}+{len} exceeds {buffer:?} of length {}", b.len);
                false
            }
            None => {
                log::error!("wgpu {what}: unknown buffer {buffer:?}");
                false
            }
        }
    }

    /// Runs a fullscreen pass into the bound color target.
    fn fullscreen(&mut self, pipeline: FullscreenPipeline, inputs: &[TextureId]) {
        self.flush_pass();
        let Some(color) = self.color_view(self.bound.0) else {
            log::trace!("wgpu: fullscreen pass without a display image");
            return;
        };
        let views: Vec<wgpu::TextureView> =
            inputs.iter().filter_map(|id| self.targets.get(id).map(|t| t.view.clone())).collect();
        let (Some(src), aux) = (views.first(), views.get(1)) else {
            log::error!("wgpu: fullscreen pass with unknown inputs {inputs:?}");
            return;
        };
        let aux = aux.unwrap_or(src);
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("strata post bind group"),
            layout: &self.pipelines.texture_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(src) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(aux) },
            ],
        });

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("strata frame encoder") })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("strata fullscreen pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        let pipeline = match pipeline {
            FullscreenPipeline::Composite => &self.pipelines.composite,
            FullscreenPipeline::Post(post) => self.pipelines.post(post),
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[derive(Debug, Copy, Clone)]
enum FullscreenPipeline {
    Composite,
    Post(PostPass),
}

impl GraphicsContext for WgpuContext {
    fn limits(&self) -> ContextLimits {
        self.limits
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn display_size(&self) -> (u32, u32) {
        self.display.size().unwrap_or((1, 1))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    // ── buffers ───────────────────────────────────────────────────────────

    fn create_buffer(&mut self, usage: BufferUsage, len: u32) -> Result<BufferId, ContextError> {
        if self.is_lost() {
            return Err(ContextError::Lost);
        }
        let (element, kind) = match usage {
            BufferUsage::Vertex => (std::mem::size_of::<Vertex>() as u64, wgpu::BufferUsages::VERTEX),
            BufferUsage::Index => (std::mem::size_of::<u32>() as u64, wgpu::BufferUsages::INDEX),
        };
        let size = (len.max(1) as u64 * element).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if size > self.max_buffer_size {
            log::warn!("wgpu: buffer of {size} bytes exceeds the device limit {}", self.max_buffer_size);
            return Err(ContextError::OutOfMemory);
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("strata buffer"),
            size,
            usage: kind | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id());
        self.buffers.insert(id, GpuBuffer { usage, buffer, len, mapped: false });
        log::trace!("wgpu: created {usage:?} buffer {id:?} ({len} elements)");
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        // queued draws may still reference it
        self.flush_pass();
        match self.buffers.remove(&buffer) {
            Some(b) => b.buffer.destroy(),
            None => log::error!("wgpu: destroying unknown buffer {buffer:?}"),
        }
    }

    fn map_buffer(&mut self, buffer: BufferId) -> Result<(), ContextError> {
        if self.is_lost() {
            return Err(ContextError::Lost);
        }
        let b = self.buffers.get_mut(&buffer).ok_or(ContextError::InvalidHandle)?;
        debug_assert!(!b.mapped, "map: {buffer:?} is already mapped");
        b.mapped = true;
        Ok(())
    }

    fn unmap_buffer(&mut self, buffer: BufferId) {
        match self.buffers.get_mut(&buffer) {
            Some(b) => {
                debug_assert!(b.mapped, "unmap: {buffer:?} is not mapped");
                b.mapped = false;
            }
            None => log::error!("wgpu: unmapping unknown buffer {buffer:?}"),
        }
    }

    fn write_vertices(&mut self, buffer: BufferId, offset: u32, data: &[Vertex]) {
        if !self.in_range("write_vertices", buffer, offset, data.len() as u32) {
            return;
        }
        let element = self.buffers.get(&buffer).map_or(0, GpuBuffer::element_size);
        self.stage(buffer, offset as u64 * element, bytemuck::cast_slice(data));
    }

    fn write_indices(&mut self, buffer: BufferId, offset: u32, data: &[u32]) {
        if !self.in_range("write_indices", buffer, offset, data.len() as u32) {
            return;
        }
        let element = self.buffers.get(&buffer).map_or(0, GpuBuffer::element_size);
        self.stage(buffer, offset as u64 * element, bytemuck::cast_slice(data));
    }

    fn copy_buffer(&mut self, src: BufferId, src_offset: u32, dst: BufferId, dst_offset: u32, len: u32) {
        if !self.in_range("copy_buffer src", src, src_offset, len)
            || !self.in_range("copy_buffer dst", dst, dst_offset, len)
        {
            return;
        }
        self.flush_pass();
        let (Some(s), Some(d)) = (self.buffers.get(&src), self.buffers.get(&dst)) else {
            return;
        };
        debug_assert!(!s.mapped && !d.mapped, "copy_buffer on a mapped buffer");
        let element = s.element_size();
        let (s, d) = (s.buffer.clone(), d.buffer.clone());
        self.encoder().copy_buffer_to_buffer(
            &s,
            src_offset as u64 * element,
            &d,
            dst_offset as u64 * element,
            len as u64 * element,
        );
    }

    // ── drawing ───────────────────────────────────────────────────────────

    fn set_transform(&mut self, world_to_clip: Affine) {
        self.flush_pass();
        let uniform = ViewUniform::from_affine(world_to_clip);
        let staging = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("strata view staging"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        let ubo = self.view_ubo.clone();
        self.encoder()
            .copy_buffer_to_buffer(&staging, 0, &ubo, 0, std::mem::size_of::<ViewUniform>() as u64);
    }

    fn draw_arrays(&mut self, buffer: BufferId, first: u32, count: u32) {
        if count == 0 || !self.in_range("draw_arrays", buffer, first, count) {
            return;
        }
        self.pending.push(DrawOp::Arrays { buffer, first, count });
    }

    fn draw_indexed(&mut self, vertices: BufferId, indices: BufferId, first_index: u32, count: u32) {
        if count == 0 || !self.in_range("draw_indexed", indices, first_index, count) {
            return;
        }
        self.pending.push(DrawOp::Indexed { vertices, indices, first_index, count });
    }

    // ── targets ───────────────────────────────────────────────────────────

    fn create_target(&mut self, width: u32, height: u32, format: TargetFormat) -> Result<TextureId, ContextError> {
        if self.is_lost() {
            return Err(ContextError::Lost);
        }
        if width > self.limits.max_texture_size || height > self.limits.max_texture_size {
            return Err(ContextError::OutOfMemory);
        }
        let (texture_format, usage) = match format {
            TargetFormat::Color => (
                self.format,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            ),
            TargetFormat::DepthStencil => (DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT),
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("strata target"),
            size: wgpu::Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.next_id());
        self.targets.insert(id, GpuTarget { view, format });
        log::debug!("wgpu: created {format:?} target {id:?} ({width}x{height})");
        Ok(id)
    }

    fn destroy_target(&mut self, target: TextureId) {
        self.flush_pass();
        if self.bound.0 == Some(target) || self.bound.1 == Some(target) {
            self.bound = (None, None);
        }
        if self.targets.remove(&target).is_none() {
            log::error!("wgpu: destroying unknown target {target:?}");
        }
    }

    fn bind_target(&mut self, color: Option<TextureId>, depth: Option<TextureId>) {
        if self.bound == (color, depth) {
            return;
        }
        self.flush_pass();
        self.bound = (color, depth);
    }

    fn clear(&mut self, color: Color) {
        self.flush_pass();
        self.pending_clear = Some(color);
    }

    fn composite(&mut self, source: TextureId) {
        self.fullscreen(FullscreenPipeline::Composite, &[source]);
    }

    fn post_process(&mut self, pass: PostPass, inputs: &[TextureId]) {
        self.fullscreen(FullscreenPipeline::Post(pass), inputs);
    }

    fn present(&mut self) {
        self.flush_pass();
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.bound = (None, None);
    }
}
