//! [`GraphicsDevice`] backend on top of `wgpu`.
//!
//! wgpu has no global bind state, so the device keeps the GL-shaped state itself
//! and turns every draw into a self contained record: a render pipeline, its bind
//! groups and vertex streams. Records are collected into a pending render pass
//! for the bound framebuffer and submitted when the framebuffer changes, before a
//! blit, before a readback and at the end of the frame.
//!
//! Render pipelines depend on state that is only known at draw time (vertex
//! layout, topology, blending, target formats) and are therefore created lazily
//! and cached per combination.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    num::NonZeroU64,
    ops::Range,
    rc::Rc,
    time::Duration,
};

use anyhow::{Context as _, anyhow, bail};
use wgpu::util::DeviceExt;

use super::{
    Attachment, BlendMode, BufferHandle, BufferTarget, Category, DeviceLimits, DeviceRef, ElementType,
    FramebufferHandle, GraphicsDevice, IndexFormat, PipelineHandle, PolygonMode, PrimitiveType, ProgramHandle,
    ProgramSource, Rect, RenderState, TextureDescriptor, TextureHandle, TextureKind, VertexArrayHandle,
    VertexAttribute,
};
use crate::data_structures::program::{ProgramLayout, ShaderStage, UniformDescription, UniformType, VertexInput};

const BLIT_SHADER: &str = include_str!("blit.wgsl");

/// Adapter selection for [`WgpuDevice::new`].
#[derive(Clone, Debug)]
pub struct WgpuDeviceConfig {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub required_limits: wgpu::Limits,
}

impl Default for WgpuDeviceConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::default(),
            required_limits: wgpu::Limits::default(),
        }
    }
}

struct BufferEntry {
    target: BufferTarget,
    buffer: Option<wgpu::Buffer>,
    size: u64,
}

struct ProgramEntry {
    module: wgpu::ShaderModule,
    layout: ProgramLayout,
}

#[derive(Clone, Copy, Debug)]
enum BindingSource {
    Uniform { slot: u32 },
    Texture { program: ProgramHandle, location: i32, kind: TextureKind },
    Sampler,
}

struct PipelineEntry {
    vertex: ProgramHandle,
    fragment: ProgramHandle,
    layout: wgpu::PipelineLayout,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    /// Per bind group, the binding indices and what to bind there.
    groups: Vec<Vec<(u32, BindingSource)>>,
    inputs: Vec<VertexInput>,
}

#[derive(Default)]
struct VertexArray {
    attributes: BTreeMap<u32, (VertexAttribute, bool)>,
    index: Option<(BufferHandle, IndexFormat)>,
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct ColorAttachment {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    layer: u32,
}

struct DepthAttachment {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

struct Framebuffer {
    color: Option<ColorAttachment>,
    depth: Option<DepthAttachment>,
    width: u32,
    height: u32,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct RenderPipelineKey {
    pipeline: PipelineHandle,
    /// Shader location, format and stride of every vertex stream.
    streams: Vec<(u32, wgpu::VertexFormat, u64)>,
    topology: wgpu::PrimitiveTopology,
    strip_index_format: Option<wgpu::IndexFormat>,
    polygon_mode: wgpu::PolygonMode,
    blend: Option<BlendMode>,
    color_format: Option<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
    depth_test: bool,
}

struct PendingDraw {
    pipeline: wgpu::RenderPipeline,
    bind_groups: Vec<wgpu::BindGroup>,
    vertex_buffers: Vec<wgpu::Buffer>,
    index: Option<(wgpu::Buffer, wgpu::IndexFormat)>,
    range: Range<u32>,
    viewport: (f32, f32, f32, f32),
}

struct Pass {
    framebuffer: FramebufferHandle,
    clear: Option<([f32; 4], f32)>,
    draws: Vec<PendingDraw>,
}

impl Pass {
    fn new(framebuffer: FramebufferHandle) -> Self {
        Self {
            framebuffer,
            clear: None,
            draws: Vec::new(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitRect {
    origin: [f32; 2],
    extent: [f32; 2],
}

impl BlitRect {
    /// Maps a rectangle with lower left origin to texture coordinates with upper left origin.
    fn new(rect: Rect, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            origin: [rect.x0 as f32 / width, 1.0 - rect.y0 as f32 / height],
            extent: [rect.width() as f32 / width, -(rect.height() as f32) / height],
        }
    }
}

/// Converts a lower left origin rectangle into a wgpu viewport clamped to the target.
fn to_viewport(rect: Rect, width: u32, height: u32) -> Option<(f32, f32, f32, f32)> {
    let (width, height) = (width as i32, height as i32);
    let (x0, x1) = (rect.x0.clamp(0, width), rect.x1.clamp(0, width));
    let (y0, y1) = (rect.y0.clamp(0, height), rect.y1.clamp(0, height));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as f32, (height - y1) as f32, (x1 - x0) as f32, (y1 - y0) as f32))
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn buffer_usage(target: BufferTarget) -> wgpu::BufferUsages {
    let usage = match target {
        BufferTarget::Vertex => wgpu::BufferUsages::VERTEX,
        BufferTarget::Index => wgpu::BufferUsages::INDEX,
        BufferTarget::Uniform => wgpu::BufferUsages::UNIFORM,
    };
    usage | wgpu::BufferUsages::COPY_DST
}

fn view_dimension(kind: TextureKind) -> wgpu::TextureViewDimension {
    match kind {
        TextureKind::D2 => wgpu::TextureViewDimension::D2,
        TextureKind::D2Array => wgpu::TextureViewDimension::D2Array,
    }
}

fn index_format(format: IndexFormat) -> Option<wgpu::IndexFormat> {
    match format {
        IndexFormat::U8 => None,
        IndexFormat::U16 => Some(wgpu::IndexFormat::Uint16),
        IndexFormat::U32 => Some(wgpu::IndexFormat::Uint32),
    }
}

/// Renders through `wgpu` into offscreen framebuffers.
///
/// Programs must be WGSL. Geometry programs are refused since wgpu has no
/// geometry stage, see [`DeviceLimits::supports_geometry_stage`].
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    features: wgpu::Features,
    limits: DeviceLimits,
    next_handle: u32,
    buffers: HashMap<BufferHandle, BufferEntry>,
    programs: HashMap<ProgramHandle, ProgramEntry>,
    pipelines: HashMap<PipelineHandle, PipelineEntry>,
    render_pipelines: HashMap<RenderPipelineKey, wgpu::RenderPipeline>,
    vertex_arrays: HashMap<VertexArrayHandle, VertexArray>,
    textures: HashMap<TextureHandle, TextureEntry>,
    framebuffers: HashMap<FramebufferHandle, Framebuffer>,
    sampler_units: HashMap<(ProgramHandle, i32), u32>,
    texture_units: HashMap<u32, TextureHandle>,
    uniform_slots: HashMap<u32, (BufferHandle, Range<u64>)>,
    bound_pipeline: Option<PipelineHandle>,
    bound_vertex_array: Option<VertexArrayHandle>,
    viewport: Rect,
    render_state: RenderState,
    blend: Option<BlendMode>,
    polygon_mode: PolygonMode,
    pass: Option<Pass>,
    sampler: wgpu::Sampler,
    fallback_view: wgpu::TextureView,
    fallback_array_view: wgpu::TextureView,
    constant_attribute: wgpu::Buffer,
    blit_layout: wgpu::BindGroupLayout,
    blit_pipeline_layout: wgpu::PipelineLayout,
    blit_module: wgpu::ShaderModule,
    blit_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

impl WgpuDevice {
    /// Picks an adapter and opens a device on it. No surface is involved.
    pub async fn new(config: WgpuDeviceConfig) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable graphics adapter found")?;
        log::info!("Using adapter {:?}", adapter.get_info());

        let features = adapter.features() & (wgpu::Features::POLYGON_MODE_LINE | wgpu::Features::POLYGON_MODE_POINT);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("scene-ngin device"),
                required_features: features,
                required_limits: config.required_limits.clone(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
            })
            .await
            .context("Could not open the graphics device")?;
        Ok(Self::from_device(device, queue, features))
    }

    /// Blocks on [`WgpuDevice::new`] and returns the device both as [`DeviceRef`]
    /// and as concrete type for readbacks.
    pub fn shared(config: WgpuDeviceConfig) -> anyhow::Result<(DeviceRef, Rc<RefCell<WgpuDevice>>)> {
        let device = Rc::new(RefCell::new(futures::executor::block_on(Self::new(config))?));
        let shared: DeviceRef = device.clone();
        Ok((shared, device))
    }

    fn from_device(device: wgpu::Device, queue: wgpu::Queue, features: wgpu::Features) -> Self {
        let wgpu_limits = device.limits();
        let limits = DeviceLimits {
            max_uniform_buffer_bindings: wgpu_limits.max_uniform_buffers_per_shader_stage.min(12) * 3,
            uniform_offset_alignment: wgpu_limits.min_uniform_buffer_offset_alignment,
            supports_geometry_stage: false,
        };

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("default sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let fallback = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("fallback texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let fallback_view = fallback.create_view(&wgpu::TextureViewDescriptor::default());
        let fallback_array_view = fallback.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let constant_attribute = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("constant vertex attribute"),
            contents: bytemuck::cast_slice(&[0.0f32, 0.0, 0.0, 1.0]),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[&blit_layout],
            push_constant_ranges: &[],
        });
        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });

        Self {
            device,
            queue,
            features,
            limits,
            next_handle: 1,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            render_pipelines: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            sampler_units: HashMap::new(),
            texture_units: HashMap::new(),
            uniform_slots: HashMap::new(),
            bound_pipeline: None,
            bound_vertex_array: None,
            viewport: Rect::default(),
            render_state: RenderState::default(),
            blend: None,
            polygon_mode: PolygonMode::Fill,
            pass: None,
            sampler,
            fallback_view,
            fallback_array_view,
            constant_attribute,
            blit_layout,
            blit_pipeline_layout,
            blit_module,
            blit_pipelines: HashMap::new(),
        }
    }

    fn next(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Render pipelines created so far, one per distinct draw state.
    pub fn render_pipeline_count(&self) -> usize {
        self.render_pipelines.len()
    }

    /// Copies the color attachment of `framebuffer` into an image, top row first.
    ///
    /// Submits pending work first. Only 8-bit RGBA attachments can be read.
    pub fn read_pixels(&mut self, framebuffer: FramebufferHandle) -> anyhow::Result<image::RgbaImage> {
        self.flush();
        let fb = self
            .framebuffers
            .get(&framebuffer)
            .ok_or_else(|| anyhow!("Unknown framebuffer {:?}", framebuffer))?;
        let color = fb
            .color
            .as_ref()
            .ok_or_else(|| anyhow!("Framebuffer {:?} has no color attachment", framebuffer))?;
        if !matches!(
            color.format,
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb
        ) {
            bail!("Cannot read back color format {:?}", color.format);
        }
        let (width, height) = (fb.width, fb.height);
        let bytes_per_row = padded_bytes_per_row(width);

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size: (bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &color.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: color.layer,
                },
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        let buffer_slice = output_buffer.slice(..);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(Duration::from_secs(3)),
            })
            .map_err(|e| anyhow!("Waiting for the readback failed: {:?}", e))?;
        futures::executor::block_on(rx.receive())
            .ok_or_else(|| anyhow!("Readback was cancelled"))?
            .context("Could not map the readback buffer")?;

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks(bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..(width * 4) as usize]);
            }
        }
        output_buffer.unmap();
        image::RgbaImage::from_raw(width, height, pixels).ok_or_else(|| anyhow!("Readback size mismatch"))
    }

    /// Submits the pending render pass, if it has any work.
    fn flush(&mut self) {
        let Some(pass) = self.pass.as_mut() else {
            return;
        };
        if pass.clear.is_none() && pass.draws.is_empty() {
            return;
        }
        let clear = pass.clear.take();
        let draws = std::mem::take(&mut pass.draws);
        let Some(fb) = self.framebuffers.get(&pass.framebuffer) else {
            log::warn!("Dropping {} draws for deleted framebuffer {:?}", draws.len(), pass.framebuffer);
            return;
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let color_attachments: Vec<_> = fb
                .color
                .iter()
                .map(|color| {
                    Some(wgpu::RenderPassColorAttachment {
                        view: &color.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: match clear {
                                Some(([r, g, b, a], _)) => wgpu::LoadOp::Clear(wgpu::Color {
                                    r: r as f64,
                                    g: g as f64,
                                    b: b as f64,
                                    a: a as f64,
                                }),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })
                })
                .collect();
            let depth_stencil_attachment = fb
                .depth
                .as_ref()
                .map(|depth| wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: match clear {
                            Some((_, depth)) => wgpu::LoadOp::Clear(depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            for draw in draws.iter() {
                let (x, y, w, h) = draw.viewport;
                render_pass.set_viewport(x, y, w, h, 0.0, 1.0);
                render_pass.set_pipeline(&draw.pipeline);
                for (index, group) in draw.bind_groups.iter().enumerate() {
                    render_pass.set_bind_group(index as u32, group, &[]);
                }
                for (slot, buffer) in draw.vertex_buffers.iter().enumerate() {
                    render_pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                }
                match &draw.index {
                    Some((buffer, format)) => {
                        render_pass.set_index_buffer(buffer.slice(..), *format);
                        render_pass.draw_indexed(draw.range.clone(), 0, 0..1);
                    }
                    None => render_pass.draw(draw.range.clone(), 0..1),
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn polygon_mode(&self) -> wgpu::PolygonMode {
        let (mode, feature) = match self.polygon_mode {
            PolygonMode::Fill => return wgpu::PolygonMode::Fill,
            PolygonMode::Line => (wgpu::PolygonMode::Line, wgpu::Features::POLYGON_MODE_LINE),
            PolygonMode::Point => (wgpu::PolygonMode::Point, wgpu::Features::POLYGON_MODE_POINT),
        };
        if self.features.contains(feature) {
            mode
        } else {
            wgpu::PolygonMode::Fill
        }
    }

    /// Vertex streams for `inputs`. Inputs the vertex array does not provide read a
    /// constant `(0, 0, 0, 1)`.
    fn vertex_streams(&self, inputs: &[VertexInput], vao: &VertexArray) -> Vec<(u32, wgpu::VertexFormat, u64, wgpu::Buffer)> {
        inputs
            .iter()
            .map(|input| {
                let provided = vao
                    .attributes
                    .get(&input.location)
                    .filter(|(_, enabled)| *enabled)
                    .and_then(|(attribute, _)| {
                        let buffer = self.buffers.get(&attribute.buffer)?.buffer.clone()?;
                        let format = attribute.format.to_wgpu()?;
                        Some((input.location, format, attribute.format.stride(), buffer))
                    });
                provided.unwrap_or_else(|| {
                    let format = match input.format.element {
                        ElementType::Int => wgpu::VertexFormat::Sint32x4,
                        ElementType::UnsignedInt => wgpu::VertexFormat::Uint32x4,
                        _ => wgpu::VertexFormat::Float32x4,
                    };
                    (input.location, format, 0, self.constant_attribute.clone())
                })
            })
            .collect()
    }

    fn create_render_pipeline(&self, key: &RenderPipelineKey, entry: &PipelineEntry) -> anyhow::Result<wgpu::RenderPipeline> {
        let vertex = self.programs.get(&entry.vertex).context("Vertex program was deleted")?;
        let fragment = self.programs.get(&entry.fragment).context("Fragment program was deleted")?;
        if key.polygon_mode == wgpu::PolygonMode::Fill && self.polygon_mode != PolygonMode::Fill {
            log::warn!(
                "Polygon mode {:?} is not supported by the adapter, filling instead",
                self.polygon_mode
            );
        }

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
            .streams
            .iter()
            .map(|(location, format, _)| {
                [wgpu::VertexAttribute {
                    format: *format,
                    offset: 0,
                    shader_location: *location,
                }]
            })
            .collect();
        let vertex_layouts: Vec<_> = key
            .streams
            .iter()
            .zip(attributes.iter())
            .map(|((_, _, stride), attributes)| wgpu::VertexBufferLayout {
                array_stride: *stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();
        let targets: Vec<_> = key
            .color_format
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: key.blend.map(|BlendMode::Alpha| wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        Ok(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            cache: None,
            label: Some("Render Pipeline"),
            layout: Some(&entry.layout),
            vertex: wgpu::VertexState {
                module: &vertex.module,
                entry_point: Some(vertex.layout.entry_point.as_str()),
                buffers: &vertex_layouts,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment.module,
                entry_point: Some(fragment.layout.entry_point.as_str()),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: key.topology,
                strip_index_format: key.strip_index_format,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: key.polygon_mode,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: key.depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: key.depth_test,
                depth_compare: if key.depth_test {
                    wgpu::CompareFunction::Less
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        }))
    }

    /// Bind groups of `entry` built from the current uniform slots and texture units.
    fn bind_groups(&self, entry: &PipelineEntry) -> Option<Vec<wgpu::BindGroup>> {
        enum Resource {
            Buffer(wgpu::Buffer, u64, Option<NonZeroU64>),
            View(wgpu::TextureView),
            Sampler,
        }

        let mut groups = Vec::with_capacity(entry.groups.len());
        for (group, (bindings, layout)) in entry.groups.iter().zip(entry.bind_group_layouts.iter()).enumerate() {
            let mut resources = Vec::with_capacity(bindings.len());
            for (binding, source) in bindings.iter() {
                let resource = match *source {
                    BindingSource::Uniform { slot } => {
                        let Some((handle, range)) = self.uniform_slots.get(&slot) else {
                            log::warn!("Skipping draw: nothing bound to uniform slot {}", slot);
                            return None;
                        };
                        let Some(buffer) = self.buffers.get(handle).and_then(|b| b.buffer.clone()) else {
                            log::warn!("Skipping draw: uniform slot {} holds an empty buffer", slot);
                            return None;
                        };
                        Resource::Buffer(buffer, range.start, NonZeroU64::new(range.end - range.start))
                    }
                    BindingSource::Texture { program, location, kind } => {
                        let unit = self.sampler_units.get(&(program, location)).copied().unwrap_or(0);
                        let view = self
                            .texture_units
                            .get(&unit)
                            .and_then(|texture| self.textures.get(texture))
                            .filter(|texture| texture.desc.kind == kind)
                            .map(|texture| texture.view.clone())
                            .unwrap_or_else(|| match kind {
                                TextureKind::D2 => self.fallback_view.clone(),
                                TextureKind::D2Array => self.fallback_array_view.clone(),
                            });
                        Resource::View(view)
                    }
                    BindingSource::Sampler => Resource::Sampler,
                };
                resources.push((*binding, resource));
            }
            let entries: Vec<_> = resources
                .iter()
                .map(|(binding, resource)| wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: match resource {
                        Resource::Buffer(buffer, offset, size) => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: *offset,
                            size: *size,
                        }),
                        Resource::View(view) => wgpu::BindingResource::TextureView(view),
                        Resource::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
                    },
                })
                .collect();
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(format!("bind group {}", group).as_str()),
                layout,
                entries: &entries,
            }));
        }
        Some(groups)
    }

    fn record_draw(&mut self, primitive: PrimitiveType, index: Option<IndexFormat>, range: Range<u32>) {
        let Some(framebuffer) = self.pass.as_ref().map(|pass| pass.framebuffer) else {
            log::warn!("Draw without a bound framebuffer");
            return;
        };
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return;
        };
        let Some(viewport) = to_viewport(self.viewport, fb.width, fb.height) else {
            return;
        };
        let Some(pipeline) = self.bound_pipeline.and_then(|handle| self.pipelines.get(&handle).map(|p| (handle, p))) else {
            log::warn!("Draw without a bound pipeline");
            return;
        };
        let Some(vao) = self.bound_vertex_array.and_then(|handle| self.vertex_arrays.get(&handle)) else {
            log::warn!("Draw without a bound vertex array");
            return;
        };

        let index = match index {
            Some(format) => {
                let Some((buffer, wgpu_format)) = vao
                    .index
                    .and_then(|(handle, _)| self.buffers.get(&handle)?.buffer.clone())
                    .zip(index_format(format))
                else {
                    log::warn!("Indexed draw without an index buffer");
                    return;
                };
                Some((buffer, wgpu_format))
            }
            None => None,
        };

        let (pipeline_handle, entry) = pipeline;
        let streams = self.vertex_streams(&entry.inputs, vao);
        let topology = primitive.to_wgpu();
        let key = RenderPipelineKey {
            pipeline: pipeline_handle,
            streams: streams.iter().map(|(l, f, s, _)| (*l, *f, *s)).collect(),
            topology,
            strip_index_format: index
                .as_ref()
                .filter(|_| topology.is_strip())
                .map(|(_, format)| *format),
            polygon_mode: self.polygon_mode(),
            blend: self.blend,
            color_format: fb.color.as_ref().map(|color| color.format),
            depth_format: fb.depth.as_ref().map(|depth| depth.format),
            depth_test: self.render_state.depth_test,
        };
        let Some(bind_groups) = self.bind_groups(entry) else {
            return;
        };

        let render_pipeline = match self.render_pipelines.get(&key) {
            Some(render_pipeline) => render_pipeline.clone(),
            None => match self.create_render_pipeline(&key, entry) {
                Ok(render_pipeline) => {
                    self.render_pipelines.insert(key, render_pipeline.clone());
                    render_pipeline
                }
                Err(e) => {
                    log::error!("Could not create render pipeline: {:#}", e);
                    return;
                }
            },
        };

        if let Some(pass) = self.pass.as_mut() {
            pass.draws.push(PendingDraw {
                pipeline: render_pipeline,
                bind_groups,
                vertex_buffers: streams.into_iter().map(|(_, _, _, buffer)| buffer).collect(),
                index,
                range,
                viewport,
            });
        }
    }

    fn blit_pipeline(&mut self, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        if let Some(pipeline) = self.blit_pipelines.get(&format) {
            return pipeline.clone();
        }
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            cache: None,
            label: Some("Blit Pipeline"),
            layout: Some(&self.blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.blit_module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.blit_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        self.blit_pipelines.insert(format, pipeline.clone());
        pipeline
    }
}

impl GraphicsDevice for WgpuDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, target: BufferTarget) -> BufferHandle {
        let buffer = BufferHandle(self.next());
        self.buffers.insert(
            buffer,
            BufferEntry {
                target,
                buffer: None,
                size: 0,
            },
        );
        buffer
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, _category: Category, data: &[u8]) {
        let Some(entry) = self.buffers.get_mut(&buffer) else {
            log::warn!("Upload to unknown buffer {:?}", buffer);
            return;
        };
        // A fresh buffer keeps draws recorded against the old contents intact.
        entry.buffer = Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: None,
            contents: data,
            usage: buffer_usage(entry.target),
        }));
        entry.size = data.len() as u64;
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(entry) = self.buffers.get(&buffer) else {
            log::warn!("Write to unknown buffer {:?}", buffer);
            return;
        };
        let Some(wgpu_buffer) = entry.buffer.as_ref() else {
            log::warn!("Write to buffer {:?} before its first upload", buffer);
            return;
        };
        let aligned = offset % wgpu::COPY_BUFFER_ALIGNMENT == 0 && data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0;
        if !aligned || offset + data.len() as u64 > entry.size {
            log::warn!(
                "Skipping write of {} bytes at offset {} into a {} byte buffer",
                data.len(),
                offset,
                entry.size
            );
            return;
        }
        self.queue.write_buffer(wgpu_buffer, offset, data);
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.uniform_slots.retain(|_, (bound, _)| *bound != buffer);
    }

    fn create_program(&mut self, program: &ProgramSource) -> anyhow::Result<ProgramHandle> {
        if program.stage == ShaderStage::Geometry {
            bail!("wgpu has no geometry stage");
        }
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.layout.entry_point.as_str()),
            source: wgpu::ShaderSource::Wgsl(program.source.into()),
        });
        let handle = ProgramHandle(self.next());
        self.programs.insert(
            handle,
            ProgramEntry {
                module,
                layout: program.layout.clone(),
            },
        );
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.sampler_units.retain(|(owner, _), _| *owner != program);
    }

    fn create_pipeline(
        &mut self,
        vertex: ProgramHandle,
        geometry: Option<ProgramHandle>,
        fragment: ProgramHandle,
    ) -> anyhow::Result<PipelineHandle> {
        if geometry.is_some() {
            bail!("wgpu has no geometry stage");
        }
        let vertex_entry = self.programs.get(&vertex).context("Unknown vertex program")?;
        let fragment_entry = self.programs.get(&fragment).context("Unknown fragment program")?;

        let mut bindings: BTreeMap<(u32, u32), (wgpu::ShaderStages, BindingSource, wgpu::BindingType)> = BTreeMap::new();
        for (handle, visibility, layout) in [
            (vertex, wgpu::ShaderStages::VERTEX, &vertex_entry.layout),
            (fragment, wgpu::ShaderStages::FRAGMENT, &fragment_entry.layout),
        ] {
            let blocks = layout.blocks.iter().map(|block| {
                let ty = wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                };
                ((block.group, block.binding), BindingSource::Uniform { slot: block.slot }, ty)
            });
            let loose = layout.uniforms.iter().filter_map(|uniform: &UniformDescription| {
                let texture = |kind| {
                    (
                        BindingSource::Texture {
                            program: handle,
                            location: uniform.location,
                            kind,
                        },
                        wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: view_dimension(kind),
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                    )
                };
                let (source, ty) = match uniform.ty {
                    UniformType::Sampler2D => texture(TextureKind::D2),
                    UniformType::Sampler2DArray => texture(TextureKind::D2Array),
                    UniformType::Sampler => (
                        BindingSource::Sampler,
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    ),
                    _ => {
                        log::warn!("Uniform \"{}\" of type {:?} cannot be bound", uniform.name, uniform.ty);
                        return None;
                    }
                };
                Some(((uniform.group, uniform.binding), source, ty))
            });
            for (key, source, ty) in blocks.chain(loose) {
                bindings
                    .entry(key)
                    .and_modify(|(stages, _, _)| *stages |= visibility)
                    .or_insert((visibility, source, ty));
            }
        }

        let group_count = bindings.keys().map(|(group, _)| group + 1).max().unwrap_or(0);
        let mut groups = Vec::with_capacity(group_count as usize);
        let mut bind_group_layouts = Vec::with_capacity(group_count as usize);
        for group in 0..group_count {
            let members: Vec<_> = bindings
                .range((group, 0)..(group + 1, 0))
                .map(|((_, binding), value)| (*binding, *value))
                .collect();
            let entries: Vec<_> = members
                .iter()
                .map(|(binding, (visibility, _, ty))| wgpu::BindGroupLayoutEntry {
                    binding: *binding,
                    visibility: *visibility,
                    ty: *ty,
                    count: None,
                })
                .collect();
            bind_group_layouts.push(self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(format!("group {} layout", group).as_str()),
                entries: &entries,
            }));
            groups.push(members.into_iter().map(|(binding, (_, source, _))| (binding, source)).collect());
        }
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &bind_group_layouts.iter().collect::<Vec<_>>(),
            push_constant_ranges: &[],
        });

        let inputs = vertex_entry.layout.inputs.clone();
        let handle = PipelineHandle(self.next());
        self.pipelines.insert(
            handle,
            PipelineEntry {
                vertex,
                fragment,
                layout,
                bind_group_layouts,
                groups,
                inputs,
            },
        );
        Ok(handle)
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.bound_pipeline = Some(pipeline);
    }

    fn set_sampler_unit(&mut self, program: ProgramHandle, uniform: &UniformDescription, unit: u32) {
        self.sampler_units.insert((program, uniform.location), unit);
    }

    fn create_vertex_array(&mut self) -> VertexArrayHandle {
        let vao = VertexArrayHandle(self.next());
        self.vertex_arrays.insert(vao, VertexArray::default());
        vao
    }

    fn set_vertex_attribute(&mut self, vao: VertexArrayHandle, location: u32, attribute: VertexAttribute) {
        if let Some(vertex_array) = self.vertex_arrays.get_mut(&vao) {
            let enabled = vertex_array
                .attributes
                .get(&location)
                .map(|(_, enabled)| *enabled)
                .unwrap_or(false);
            vertex_array.attributes.insert(location, (attribute, enabled));
        }
    }

    fn enable_vertex_attribute(&mut self, vao: VertexArrayHandle, location: u32, enabled: bool) {
        if let Some((_, state)) = self
            .vertex_arrays
            .get_mut(&vao)
            .and_then(|vertex_array| vertex_array.attributes.get_mut(&location))
        {
            *state = enabled;
        }
    }

    fn set_index_buffer(&mut self, vao: VertexArrayHandle, buffer: BufferHandle, format: IndexFormat) {
        if let Some(vertex_array) = self.vertex_arrays.get_mut(&vao) {
            vertex_array.index = Some((buffer, format));
        }
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayHandle>) {
        self.bound_vertex_array = vao;
    }

    fn delete_vertex_array(&mut self, vao: VertexArrayHandle) {
        self.vertex_arrays.remove(&vao);
        if self.bound_vertex_array == Some(vao) {
            self.bound_vertex_array = None;
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor, data: Option<&[u8]>) -> TextureHandle {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING;
        if !desc.format.is_depth_stencil_format() {
            usage |= wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
        }
        if desc.render_attachment {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let size = wgpu::Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: desc.layers.max(1),
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: None,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage,
            view_formats: &[],
        });

        if let Some(data) = data {
            let bytes_per_pixel = desc.format.block_copy_size(None).unwrap_or(4);
            let expected = (bytes_per_pixel * size.width * size.height * size.depth_or_array_layers) as usize;
            if data.len() < expected || !usage.contains(wgpu::TextureUsages::COPY_DST) {
                log::warn!(
                    "Ignoring {} bytes of pixel data for a {}x{}x{} {:?} texture",
                    data.len(),
                    size.width,
                    size.height,
                    size.depth_or_array_layers,
                    desc.format
                );
            } else {
                self.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        aspect: wgpu::TextureAspect::All,
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                    },
                    &data[..expected],
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(bytes_per_pixel * size.width),
                        rows_per_image: Some(size.height),
                    },
                    size,
                );
            }
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(view_dimension(desc.kind)),
            ..Default::default()
        });
        let handle = TextureHandle(self.next());
        self.textures.insert(
            handle,
            TextureEntry {
                texture,
                view,
                desc: *desc,
            },
        );
        handle
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.texture_units.insert(unit, texture);
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        self.texture_units.retain(|_, bound| *bound != texture);
    }

    fn create_framebuffer(
        &mut self,
        color: Option<Attachment>,
        depth: Option<Attachment>,
    ) -> anyhow::Result<FramebufferHandle> {
        if color.is_none() && depth.is_none() {
            bail!("Framebuffer is incomplete: no attachments");
        }
        let layer_view = |attachment: Attachment| -> anyhow::Result<(wgpu::Texture, TextureDescriptor, wgpu::TextureView)> {
            let entry = self
                .textures
                .get(&attachment.texture)
                .ok_or_else(|| anyhow!("Framebuffer is incomplete: unknown texture {:?}", attachment.texture))?;
            if attachment.layer >= entry.desc.layers {
                bail!(
                    "Framebuffer is incomplete: layer {} of a texture with {} layers",
                    attachment.layer,
                    entry.desc.layers
                );
            }
            if !entry.desc.render_attachment {
                bail!("Framebuffer is incomplete: texture {:?} is not renderable", attachment.texture);
            }
            let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_array_layer: attachment.layer,
                array_layer_count: Some(1),
                ..Default::default()
            });
            Ok((entry.texture.clone(), entry.desc, view))
        };

        let color = match color {
            Some(attachment) => {
                let (texture, desc, view) = layer_view(attachment)?;
                if desc.format.is_depth_stencil_format() {
                    bail!("Framebuffer is incomplete: depth texture used as color attachment");
                }
                Some(ColorAttachment {
                    texture,
                    view,
                    format: desc.format,
                    layer: attachment.layer,
                })
            }
            None => None,
        };
        let depth = match depth {
            Some(attachment) => {
                let (_, desc, view) = layer_view(attachment)?;
                if !desc.format.is_depth_stencil_format() {
                    bail!("Framebuffer is incomplete: color texture used as depth attachment");
                }
                Some((
                    DepthAttachment {
                        view,
                        format: desc.format,
                    },
                    (desc.width, desc.height),
                ))
            }
            None => None,
        };

        let color_size = color.as_ref().map(|color| (color.texture.width(), color.texture.height()));
        let depth_size = depth.as_ref().map(|(_, size)| *size);
        if let (Some(color_size), Some(depth_size)) = (color_size, depth_size) {
            if color_size != depth_size {
                bail!(
                    "Framebuffer is incomplete: color is {:?} but depth is {:?}",
                    color_size,
                    depth_size
                );
            }
        }
        let (width, height) = color_size.or(depth_size).unwrap_or_default();

        let handle = FramebufferHandle(self.next());
        self.framebuffers.insert(
            handle,
            Framebuffer {
                color,
                depth: depth.map(|(depth, _)| depth),
                width,
                height,
            },
        );
        Ok(handle)
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferHandle, viewport: Rect) {
        if self.pass.as_ref().map(|pass| pass.framebuffer) != Some(framebuffer) {
            self.flush();
            self.pass = Some(Pass::new(framebuffer));
        }
        self.viewport = viewport;
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) {
        if self.pass.as_ref().is_some_and(|pass| !pass.draws.is_empty()) {
            self.flush();
        }
        match self.pass.as_mut() {
            Some(pass) => pass.clear = Some((color, depth)),
            None => log::warn!("Clear without a bound framebuffer"),
        }
    }

    fn blit_framebuffer(&mut self, src: FramebufferHandle, src_rect: Rect, dst: FramebufferHandle, dst_rect: Rect) {
        if src == dst {
            log::warn!("Skipping blit of framebuffer {:?} onto itself", src);
            return;
        }
        self.flush();

        let source = self
            .framebuffers
            .get(&src)
            .and_then(|fb| fb.color.as_ref().map(|color| (color.view.clone(), fb.width, fb.height)));
        let target = self
            .framebuffers
            .get(&dst)
            .and_then(|fb| fb.color.as_ref().map(|color| (color.view.clone(), color.format, fb.width, fb.height)));
        let (Some((source_view, src_width, src_height)), Some((target_view, format, dst_width, dst_height))) =
            (source, target)
        else {
            log::warn!("Blit needs color attachments on {:?} and {:?}", src, dst);
            return;
        };
        let Some((x, y, w, h)) = to_viewport(dst_rect, dst_width, dst_height) else {
            return;
        };

        let pipeline = self.blit_pipeline(format);
        let rect = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blit rect"),
            contents: bytemuck::bytes_of(&BlitRect::new(src_rect, src_width, src_height)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit bind group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: rect.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Blit Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_viewport(x, y, w, h, 0.0, 1.0);
            render_pass.set_pipeline(&pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.pass.as_ref().map(|pass| pass.framebuffer) == Some(framebuffer) {
            self.flush();
            self.pass = None;
        }
        self.framebuffers.remove(&framebuffer);
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.render_state = state;
    }

    fn set_blend(&mut self, blend: Option<BlendMode>) {
        self.blend = blend;
    }

    fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.polygon_mode = mode;
    }

    fn set_point_size(&mut self, size: f32) {
        // wgpu rasterizes points one pixel wide.
        log::trace!("Ignoring point size {}", size);
    }

    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferHandle, range: Range<u64>) {
        self.uniform_slots.insert(slot, (buffer, range));
    }

    fn draw_arrays(&mut self, primitive: PrimitiveType, first: u32, count: u32) {
        self.record_draw(primitive, None, first..first + count);
    }

    fn draw_elements(&mut self, primitive: PrimitiveType, format: IndexFormat, count: u32) {
        if format == IndexFormat::U8 {
            log::warn!("Skipping draw with 8-bit indices, wgpu only supports 16 and 32 bit");
            return;
        }
        self.record_draw(primitive, Some(format), 0..count);
    }

    fn end_frame(&mut self) {
        self.flush();
    }
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("limits", &self.limits)
            .field("features", &self.features)
            .field("buffers", &self.buffers.len())
            .field("programs", &self.programs.len())
            .field("pipelines", &self.pipelines.len())
            .field("render_pipelines", &self.render_pipelines.len())
            .field("textures", &self.textures.len())
            .field("framebuffers", &self.framebuffers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_flips_to_top_left_origin() {
        assert_eq!(to_viewport(Rect::new(0, 0, 64, 32), 64, 64), Some((0.0, 32.0, 64.0, 32.0)));
        assert_eq!(to_viewport(Rect::new(32, 32, 64, 64), 64, 64), Some((32.0, 0.0, 32.0, 32.0)));
    }

    #[test]
    fn viewport_is_clamped_to_the_target() {
        assert_eq!(to_viewport(Rect::new(-10, -10, 100, 100), 64, 32), Some((0.0, 0.0, 64.0, 32.0)));
        assert_eq!(to_viewport(Rect::new(70, 0, 90, 10), 64, 64), None);
    }

    #[test]
    fn blit_rect_addresses_texture_coordinates() {
        let rect = BlitRect::new(Rect::new(0, 0, 50, 100), 100, 100);
        assert_eq!(rect.origin, [0.0, 1.0]);
        assert_eq!(rect.extent, [0.5, -1.0]);
    }

    #[test]
    fn readback_rows_are_padded() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn eight_bit_indices_have_no_wgpu_format() {
        assert_eq!(index_format(IndexFormat::U8), None);
        assert_eq!(index_format(IndexFormat::U16), Some(wgpu::IndexFormat::Uint16));
    }
}
