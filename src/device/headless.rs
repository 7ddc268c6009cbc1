//! A device that executes nothing and records everything.

use std::{cell::RefCell, collections::HashMap, ops::Range, rc::Rc};

use anyhow::bail;

use crate::{
    data_structures::program::{ShaderStage, UniformDescription},
    device::{
        Attachment, BlendMode, BufferHandle, BufferTarget, Category, DeviceLimits, DeviceRef,
        FramebufferHandle, GraphicsDevice, IndexFormat, PipelineHandle, PolygonMode,
        PrimitiveType, ProgramHandle, ProgramSource, Rect, RenderState, TextureDescriptor,
        TextureHandle, VertexArrayHandle, VertexAttribute,
    },
};

/// One recorded device call.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    CreateBuffer(BufferHandle, BufferTarget),
    UploadBuffer {
        buffer: BufferHandle,
        category: Category,
        size: u64,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    DeleteBuffer(BufferHandle),
    CreateProgram(ProgramHandle, ShaderStage),
    DeleteProgram(ProgramHandle),
    CreatePipeline {
        pipeline: PipelineHandle,
        vertex: ProgramHandle,
        geometry: Option<ProgramHandle>,
        fragment: ProgramHandle,
    },
    BindPipeline(PipelineHandle),
    SetSamplerUnit {
        program: ProgramHandle,
        location: i32,
        unit: u32,
    },
    CreateVertexArray(VertexArrayHandle),
    SetVertexAttribute {
        vao: VertexArrayHandle,
        location: u32,
        attribute: VertexAttribute,
    },
    EnableVertexAttribute {
        vao: VertexArrayHandle,
        location: u32,
        enabled: bool,
    },
    SetIndexBuffer {
        vao: VertexArrayHandle,
        buffer: BufferHandle,
        format: IndexFormat,
    },
    BindVertexArray(Option<VertexArrayHandle>),
    DeleteVertexArray(VertexArrayHandle),
    CreateTexture(TextureHandle, TextureDescriptor),
    BindTexture {
        unit: u32,
        texture: TextureHandle,
    },
    DeleteTexture(TextureHandle),
    CreateFramebuffer(FramebufferHandle),
    BindFramebuffer(FramebufferHandle, Rect),
    Clear([f32; 4], f32),
    Blit {
        src: FramebufferHandle,
        src_rect: Rect,
        dst: FramebufferHandle,
        dst_rect: Rect,
    },
    DeleteFramebuffer(FramebufferHandle),
    SetRenderState(RenderState),
    SetBlend(Option<BlendMode>),
    SetPolygonMode(PolygonMode),
    SetPointSize(f32),
    BindUniformBuffer {
        slot: u32,
        buffer: BufferHandle,
        range: Range<u64>,
    },
    DrawArrays {
        primitive: PrimitiveType,
        vao: Option<VertexArrayHandle>,
        first: u32,
        count: u32,
    },
    DrawElements {
        primitive: PrimitiveType,
        vao: Option<VertexArrayHandle>,
        format: IndexFormat,
        count: u32,
    },
    EndFrame,
}

impl DeviceCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            DeviceCommand::DrawArrays { .. } | DeviceCommand::DrawElements { .. }
        )
    }

    /// Vertex array a draw was issued with.
    pub fn draw_vertex_array(&self) -> Option<VertexArrayHandle> {
        match self {
            DeviceCommand::DrawArrays { vao, .. } | DeviceCommand::DrawElements { vao, .. } => *vao,
            _ => None,
        }
    }
}

/// Records every call and keeps just enough state to answer queries
/// (buffer contents, current bindings).
#[derive(Debug)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    next_handle: u32,
    commands: Vec<DeviceCommand>,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    programs: HashMap<ProgramHandle, ShaderStage>,
    pipelines: HashMap<PipelineHandle, (ProgramHandle, Option<ProgramHandle>, ProgramHandle)>,
    textures: HashMap<TextureHandle, TextureDescriptor>,
    framebuffers: HashMap<FramebufferHandle, (Option<Attachment>, Option<Attachment>)>,
    vertex_arrays: HashMap<VertexArrayHandle, HashMap<u32, (VertexAttribute, bool)>>,
    bound_vertex_array: Option<VertexArrayHandle>,
    uniform_slots: HashMap<u32, (BufferHandle, Range<u64>)>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::with_limits(DeviceLimits::default())
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            next_handle: 1,
            commands: Vec::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            bound_vertex_array: None,
            uniform_slots: HashMap::new(),
        }
    }

    /// Type-erased shared device.
    pub fn shared() -> DeviceRef {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Shared device plus a typed handle to inspect the recording.
    pub fn shared_inspectable() -> (DeviceRef, Rc<RefCell<HeadlessDevice>>) {
        let device = Rc::new(RefCell::new(Self::new()));
        let shared: DeviceRef = device.clone();
        (shared, device)
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draw_calls(&self) -> Vec<&DeviceCommand> {
        self.commands.iter().filter(|c| c.is_draw()).collect()
    }

    pub fn count(&self, filter: impl Fn(&DeviceCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| filter(c)).count()
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Buffer and range currently bound to a uniform slot.
    pub fn uniform_slot(&self, slot: u32) -> Option<&(BufferHandle, Range<u64>)> {
        self.uniform_slots.get(&slot)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn pipeline_programs(
        &self,
        pipeline: PipelineHandle,
    ) -> Option<(ProgramHandle, Option<ProgramHandle>, ProgramHandle)> {
        self.pipelines.get(&pipeline).copied()
    }

    pub fn vertex_attribute(&self, vao: VertexArrayHandle, location: u32) -> Option<(VertexAttribute, bool)> {
        self.vertex_arrays.get(&vao)?.get(&location).copied()
    }

    fn next(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, target: BufferTarget) -> BufferHandle {
        let handle = BufferHandle(self.next());
        self.buffers.insert(handle, Vec::new());
        self.commands.push(DeviceCommand::CreateBuffer(handle, target));
        handle
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, category: Category, data: &[u8]) {
        self.buffers.insert(buffer, data.to_vec());
        self.commands.push(DeviceCommand::UploadBuffer {
            buffer,
            category,
            size: data.len() as u64,
        });
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let store = self.buffers.entry(buffer).or_default();
        let end = offset as usize + data.len();
        if store.len() < end {
            log::warn!(
                "Write of {} bytes at offset {} overflows buffer {:?} of {} bytes",
                data.len(),
                offset,
                buffer,
                store.len()
            );
            store.resize(end, 0);
        }
        store[offset as usize..end].copy_from_slice(data);
        self.commands.push(DeviceCommand::WriteBuffer {
            buffer,
            offset,
            size: data.len() as u64,
        });
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.commands.push(DeviceCommand::DeleteBuffer(buffer));
    }

    fn create_program(&mut self, program: &ProgramSource) -> anyhow::Result<ProgramHandle> {
        if program.stage == ShaderStage::Geometry && !self.limits.supports_geometry_stage {
            bail!("Device has no geometry stage");
        }
        let handle = ProgramHandle(self.next());
        self.programs.insert(handle, program.stage);
        self.commands.push(DeviceCommand::CreateProgram(handle, program.stage));
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.commands.push(DeviceCommand::DeleteProgram(program));
    }

    fn create_pipeline(
        &mut self,
        vertex: ProgramHandle,
        geometry: Option<ProgramHandle>,
        fragment: ProgramHandle,
    ) -> anyhow::Result<PipelineHandle> {
        for program in [Some(vertex), geometry, Some(fragment)].into_iter().flatten() {
            if !self.programs.contains_key(&program) {
                bail!("Pipeline references unknown program {:?}", program);
            }
        }
        let pipeline = PipelineHandle(self.next());
        self.pipelines.insert(pipeline, (vertex, geometry, fragment));
        self.commands.push(DeviceCommand::CreatePipeline {
            pipeline,
            vertex,
            geometry,
            fragment,
        });
        Ok(pipeline)
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(DeviceCommand::BindPipeline(pipeline));
    }

    fn set_sampler_unit(&mut self, program: ProgramHandle, uniform: &UniformDescription, unit: u32) {
        self.commands.push(DeviceCommand::SetSamplerUnit {
            program,
            location: uniform.location,
            unit,
        });
    }

    fn create_vertex_array(&mut self) -> VertexArrayHandle {
        let vao = VertexArrayHandle(self.next());
        self.vertex_arrays.insert(vao, HashMap::new());
        self.commands.push(DeviceCommand::CreateVertexArray(vao));
        vao
    }

    fn set_vertex_attribute(&mut self, vao: VertexArrayHandle, location: u32, attribute: VertexAttribute) {
        let attributes = self.vertex_arrays.entry(vao).or_default();
        let enabled = attributes.get(&location).map(|(_, enabled)| *enabled).unwrap_or(false);
        attributes.insert(location, (attribute, enabled));
        self.commands.push(DeviceCommand::SetVertexAttribute {
            vao,
            location,
            attribute,
        });
    }

    fn enable_vertex_attribute(&mut self, vao: VertexArrayHandle, location: u32, enabled: bool) {
        if let Some((_, state)) = self
            .vertex_arrays
            .get_mut(&vao)
            .and_then(|attributes| attributes.get_mut(&location))
        {
            *state = enabled;
        }
        self.commands.push(DeviceCommand::EnableVertexAttribute {
            vao,
            location,
            enabled,
        });
    }

    fn set_index_buffer(&mut self, vao: VertexArrayHandle, buffer: BufferHandle, format: IndexFormat) {
        self.commands.push(DeviceCommand::SetIndexBuffer { vao, buffer, format });
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayHandle>) {
        self.bound_vertex_array = vao;
        self.commands.push(DeviceCommand::BindVertexArray(vao));
    }

    fn delete_vertex_array(&mut self, vao: VertexArrayHandle) {
        self.vertex_arrays.remove(&vao);
        self.commands.push(DeviceCommand::DeleteVertexArray(vao));
    }

    fn create_texture(&mut self, desc: &TextureDescriptor, _data: Option<&[u8]>) -> TextureHandle {
        let texture = TextureHandle(self.next());
        self.textures.insert(texture, *desc);
        self.commands.push(DeviceCommand::CreateTexture(texture, *desc));
        texture
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.commands.push(DeviceCommand::BindTexture { unit, texture });
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        self.commands.push(DeviceCommand::DeleteTexture(texture));
    }

    fn create_framebuffer(
        &mut self,
        color: Option<Attachment>,
        depth: Option<Attachment>,
    ) -> anyhow::Result<FramebufferHandle> {
        if color.is_none() && depth.is_none() {
            bail!("Framebuffer is incomplete: no attachments");
        }
        for attachment in [color, depth].into_iter().flatten() {
            let Some(desc) = self.textures.get(&attachment.texture) else {
                bail!("Framebuffer is incomplete: unknown texture {:?}", attachment.texture);
            };
            if attachment.layer >= desc.layers {
                bail!(
                    "Framebuffer is incomplete: layer {} of a texture with {} layers",
                    attachment.layer,
                    desc.layers
                );
            }
        }
        let framebuffer = FramebufferHandle(self.next());
        self.framebuffers.insert(framebuffer, (color, depth));
        self.commands.push(DeviceCommand::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferHandle, viewport: Rect) {
        self.commands.push(DeviceCommand::BindFramebuffer(framebuffer, viewport));
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) {
        self.commands.push(DeviceCommand::Clear(color, depth));
    }

    fn blit_framebuffer(&mut self, src: FramebufferHandle, src_rect: Rect, dst: FramebufferHandle, dst_rect: Rect) {
        self.commands.push(DeviceCommand::Blit {
            src,
            src_rect,
            dst,
            dst_rect,
        });
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
        self.commands.push(DeviceCommand::DeleteFramebuffer(framebuffer));
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.commands.push(DeviceCommand::SetRenderState(state));
    }

    fn set_blend(&mut self, blend: Option<BlendMode>) {
        self.commands.push(DeviceCommand::SetBlend(blend));
    }

    fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.commands.push(DeviceCommand::SetPolygonMode(mode));
    }

    fn set_point_size(&mut self, size: f32) {
        self.commands.push(DeviceCommand::SetPointSize(size));
    }

    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferHandle, range: Range<u64>) {
        self.uniform_slots.insert(slot, (buffer, range.clone()));
        self.commands.push(DeviceCommand::BindUniformBuffer { slot, buffer, range });
    }

    fn draw_arrays(&mut self, primitive: PrimitiveType, first: u32, count: u32) {
        self.commands.push(DeviceCommand::DrawArrays {
            primitive,
            vao: self.bound_vertex_array,
            first,
            count,
        });
    }

    fn draw_elements(&mut self, primitive: PrimitiveType, format: IndexFormat, count: u32) {
        self.commands.push(DeviceCommand::DrawElements {
            primitive,
            vao: self.bound_vertex_array,
            format,
            count,
        });
    }

    fn end_frame(&mut self) {
        self.commands.push(DeviceCommand::EndFrame);
    }
}
