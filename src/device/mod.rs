//! GPU device abstraction.
//!
//! The scene core talks to the GPU exclusively through the [`GraphicsDevice`]
//! trait. The trait is handle based: every GPU object lives inside the device and
//! the core only ever sees small copyable handles. This keeps buffers, meshes,
//! programs and materials independent of the backend in use.
//!
//! Backends
//! - [`headless::HeadlessDevice`] records every call for inspection and is what the
//!   test-suite renders with
//! - [`wgpu_device::WgpuDevice`] renders offscreen through `wgpu`
//!

use std::{cell::RefCell, ops::Range, rc::Rc};

use crate::data_structures::program::{ProgramLayout, ShaderStage, UniformDescription};

pub mod headless;
pub mod wgpu_device;

/// Shared, single-threaded access to the device.
///
/// GPU-owning types keep a clone of this so they can release their GPU object
/// when dropped. Borrows must stay statement scoped.
pub type DeviceRef = Rc<RefCell<dyn GraphicsDevice>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexArrayHandle(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub(crate) u32);

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Vertex,
    Index,
    Uniform,
}

/// Usage hint for a buffer. Never affects correctness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Category {
    /// Rarely updated.
    #[default]
    Static,
    /// Rewritten every frame or close to it.
    Dynamic,
}

/// Scalar type of a vertex attribute component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float,
    Int,
    UnsignedInt,
    UnsignedShort,
    UnsignedByte,
}

impl ElementType {
    pub fn size(&self) -> u32 {
        match self {
            ElementType::Float | ElementType::Int | ElementType::UnsignedInt => 4,
            ElementType::UnsignedShort => 2,
            ElementType::UnsignedByte => 1,
        }
    }
}

/// Layout of a single tightly packed vertex attribute stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeFormat {
    pub element: ElementType,
    pub components: u8,
}

impl AttributeFormat {
    pub const fn new(element: ElementType, components: u8) -> Self {
        Self {
            element,
            components,
        }
    }

    /// Bytes consumed by one vertex.
    pub fn stride(&self) -> u64 {
        self.element.size() as u64 * self.components as u64
    }

    pub fn to_wgpu(&self) -> Option<wgpu::VertexFormat> {
        use wgpu::VertexFormat as F;
        let format = match (self.element, self.components) {
            (ElementType::Float, 1) => F::Float32,
            (ElementType::Float, 2) => F::Float32x2,
            (ElementType::Float, 3) => F::Float32x3,
            (ElementType::Float, 4) => F::Float32x4,
            (ElementType::Int, 1) => F::Sint32,
            (ElementType::Int, 2) => F::Sint32x2,
            (ElementType::Int, 3) => F::Sint32x3,
            (ElementType::Int, 4) => F::Sint32x4,
            (ElementType::UnsignedInt, 1) => F::Uint32,
            (ElementType::UnsignedInt, 2) => F::Uint32x2,
            (ElementType::UnsignedInt, 3) => F::Uint32x3,
            (ElementType::UnsignedInt, 4) => F::Uint32x4,
            (ElementType::UnsignedShort, 2) => F::Uint16x2,
            (ElementType::UnsignedShort, 4) => F::Uint16x4,
            (ElementType::UnsignedByte, 4) => F::Unorm8x4,
            _ => return None,
        };
        Some(format)
    }
}

/// Index element width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U8,
    U16,
    #[default]
    U32,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::U8 => 1,
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

impl PrimitiveType {
    pub fn to_wgpu(&self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveType::Points => wgpu::PrimitiveTopology::PointList,
            PrimitiveType::Lines => wgpu::PrimitiveTopology::LineList,
            PrimitiveType::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            PrimitiveType::Triangles => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveType::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

/// Blend equation applied to color writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// `src * src_alpha + dst * (1 - src_alpha)`
    Alpha,
}

/// Global pipeline state set once per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub depth_test: bool,
    pub program_point_size: bool,
    pub srgb: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: true,
            program_point_size: true,
            srgb: true,
        }
    }
}

/// Pixel rectangle in framebuffer coordinates with the origin at the lower left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    D2Array,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: wgpu::TextureFormat,
    pub render_attachment: bool,
}

impl TextureDescriptor {
    pub fn color(width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::D2,
            width,
            height,
            layers: 1,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            render_attachment: false,
        }
    }

    pub fn depth(width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::D2,
            width,
            height,
            layers: 1,
            format: DEPTH_FORMAT,
            render_attachment: true,
        }
    }
}

/// Depth buffer format used for every render target.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A texture attachment of a framebuffer. `layer` selects the slice of an array texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub texture: TextureHandle,
    pub layer: u32,
}

/// One attribute stream of a vertex array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub buffer: BufferHandle,
    pub format: AttributeFormat,
}

/// Everything the device needs to create a program object.
pub struct ProgramSource<'a> {
    pub stage: ShaderStage,
    pub source: &'a str,
    pub layout: &'a ProgramLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Uniform buffer binding slots the device exposes across all stages.
    pub max_uniform_buffer_bindings: u32,
    /// Required alignment of a uniform buffer range offset.
    pub uniform_offset_alignment: u32,
    pub supports_geometry_stage: bool,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_uniform_buffer_bindings: 36,
            uniform_offset_alignment: 256,
            supports_geometry_stage: true,
        }
    }
}

/// GL-shaped command interface the scene core renders through.
///
/// State set with the `bind_*`/`set_*` methods persists until changed, draws use
/// whatever is currently bound.
pub trait GraphicsDevice {
    fn limits(&self) -> DeviceLimits;

    fn create_buffer(&mut self, target: BufferTarget) -> BufferHandle;
    /// Replaces the whole buffer store.
    fn upload_buffer(&mut self, buffer: BufferHandle, category: Category, data: &[u8]);
    /// Overwrites part of an existing store.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferHandle);

    fn create_program(&mut self, program: &ProgramSource) -> anyhow::Result<ProgramHandle>;
    fn delete_program(&mut self, program: ProgramHandle);
    fn create_pipeline(
        &mut self,
        vertex: ProgramHandle,
        geometry: Option<ProgramHandle>,
        fragment: ProgramHandle,
    ) -> anyhow::Result<PipelineHandle>;
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);
    /// Points a sampler uniform of `program` at a texture unit.
    fn set_sampler_unit(&mut self, program: ProgramHandle, uniform: &UniformDescription, unit: u32);

    fn create_vertex_array(&mut self) -> VertexArrayHandle;
    fn set_vertex_attribute(&mut self, vao: VertexArrayHandle, location: u32, attribute: VertexAttribute);
    fn enable_vertex_attribute(&mut self, vao: VertexArrayHandle, location: u32, enabled: bool);
    fn set_index_buffer(&mut self, vao: VertexArrayHandle, buffer: BufferHandle, format: IndexFormat);
    fn bind_vertex_array(&mut self, vao: Option<VertexArrayHandle>);
    fn delete_vertex_array(&mut self, vao: VertexArrayHandle);

    fn create_texture(&mut self, desc: &TextureDescriptor, data: Option<&[u8]>) -> TextureHandle;
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);
    fn delete_texture(&mut self, texture: TextureHandle);

    fn create_framebuffer(
        &mut self,
        color: Option<Attachment>,
        depth: Option<Attachment>,
    ) -> anyhow::Result<FramebufferHandle>;
    fn bind_framebuffer(&mut self, framebuffer: FramebufferHandle, viewport: Rect);
    fn clear(&mut self, color: [f32; 4], depth: f32);
    /// Copies the color attachment of `src` inside `src_rect` into `dst_rect` of `dst`.
    fn blit_framebuffer(&mut self, src: FramebufferHandle, src_rect: Rect, dst: FramebufferHandle, dst_rect: Rect);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn set_render_state(&mut self, state: RenderState);
    fn set_blend(&mut self, blend: Option<BlendMode>);
    fn set_polygon_mode(&mut self, mode: PolygonMode);
    fn set_point_size(&mut self, size: f32);
    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferHandle, range: Range<u64>);

    fn draw_arrays(&mut self, primitive: PrimitiveType, first: u32, count: u32);
    fn draw_elements(&mut self, primitive: PrimitiveType, format: IndexFormat, count: u32);

    /// Flushes any recorded work.
    fn end_frame(&mut self);
}
