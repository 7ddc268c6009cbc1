//! Single-stage shader programs and their reflected interface.
//!
//! A [`Program`] compiles one WGSL stage and exposes
//! - its uniform blocks (`var<uniform>` globals) with member layout
//! - its loose uniforms, i.e. textures and samplers
//! - for vertex programs, the attribute locations the stage consumes
//!
//! Uniform block binding slots come from a [`BindingAllocator`] that splits the
//! device's slot range between the three stages so a vertex, geometry and
//! fragment program can be bound at the same time without collisions.

use std::ops::Range;

use crate::{
    data_structures::reflect,
    device::{AttributeFormat, DeviceRef, ProgramHandle, ProgramSource},
};

pub use crate::data_structures::reflect::GEOMETRY_ENTRY_POINT;

/// Uniform block names the renderer and materials look for.
pub const CAMERA_BLOCK: &str = "Camera";
pub const MODEL_BLOCK: &str = "Model";
pub const LIGHTS_BLOCK: &str = "Lights";
pub const MATERIAL_BLOCK: &str = "Material";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
}

impl ShaderStage {
    pub(crate) fn to_naga(self) -> Option<naga::ShaderStage> {
        match self {
            ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
            ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
            ShaderStage::Geometry => None,
        }
    }

    fn index(self) -> u32 {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Geometry => 1,
            ShaderStage::Fragment => 2,
        }
    }
}

/// Reflected type of a uniform or uniform block member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Sampler2D,
    Sampler2DArray,
    Sampler,
    Other,
}

impl UniformType {
    pub fn is_texture(&self) -> bool {
        matches!(self, UniformType::Sampler2D | UniformType::Sampler2DArray)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformDescription {
    pub name: String,
    pub ty: UniformType,
    /// Bytes, element size times array length.
    pub size: u64,
    /// Byte offset inside the enclosing block, zero for loose uniforms.
    pub offset: u64,
    /// `group << 16 | binding` for loose uniforms, -1 for block members.
    pub location: i32,
    pub group: u32,
    pub binding: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformBlockDescription {
    pub name: String,
    pub size: u64,
    /// Uniform buffer binding slot assigned by the [`BindingAllocator`].
    pub slot: u32,
    pub group: u32,
    pub binding: u32,
    pub members: Vec<UniformDescription>,
}

impl UniformBlockDescription {
    pub fn member(&self, name: &str) -> Option<&UniformDescription> {
        self.members.iter().find(|member| member.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInput {
    pub location: u32,
    pub format: AttributeFormat,
}

/// Everything reflection discovered about one stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramLayout {
    pub entry_point: String,
    pub blocks: Vec<UniformBlockDescription>,
    pub uniforms: Vec<UniformDescription>,
    pub inputs: Vec<VertexInput>,
}

/// Splits the device's uniform buffer binding slots three ways.
///
/// Created once per [`Context`](crate::context::Context) from the device limits.
/// Every program numbers its blocks upwards from the base of its stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingAllocator {
    slots_per_stage: u32,
}

impl BindingAllocator {
    pub fn new(max_uniform_buffer_bindings: u32) -> Self {
        Self {
            slots_per_stage: max_uniform_buffer_bindings / 3,
        }
    }

    pub fn slots_per_stage(&self) -> u32 {
        self.slots_per_stage
    }

    /// Slot range reserved for `stage`.
    pub fn range(&self, stage: ShaderStage) -> Range<u32> {
        let base = stage.index() * self.slots_per_stage;
        base..base + self.slots_per_stage
    }

    fn assign(&self, stage: ShaderStage, blocks: &mut [UniformBlockDescription]) {
        let range = self.range(stage);
        for (slot, block) in (range.start..).zip(blocks.iter_mut()) {
            if slot >= range.end {
                log::error!(
                    "{:?} program declares more uniform blocks than the {} slots reserved for its stage, \"{}\" spills into the next range",
                    stage,
                    self.slots_per_stage,
                    block.name
                );
            }
            block.slot = slot;
        }
    }
}

/// One compiled shader stage.
pub struct Program {
    device: DeviceRef,
    handle: ProgramHandle,
    stage: ShaderStage,
    layout: ProgramLayout,
}

impl Program {
    /// Compiles `source` and reflects its interface.
    ///
    /// Fails with the compiler diagnostic if the source does not compile or lacks
    /// an entry point for `stage`.
    pub fn new(
        device: &DeviceRef,
        bindings: &BindingAllocator,
        stage: ShaderStage,
        source: &str,
    ) -> anyhow::Result<Self> {
        let mut layout = reflect::reflect(stage, source)?;
        bindings.assign(stage, &mut layout.blocks);
        for block in layout.blocks.iter() {
            for member in block.members.iter() {
                log::debug!(
                    "Found uniform member: block({}), name({}), size({}), offset({}), type({:?})",
                    block.name,
                    member.name,
                    member.size,
                    member.offset,
                    member.ty
                );
            }
        }
        for uniform in layout.uniforms.iter() {
            log::debug!(
                "Found uniform: name({}), location({}), type({:?})",
                uniform.name,
                uniform.location,
                uniform.ty
            );
        }
        let handle = device.borrow_mut().create_program(&ProgramSource {
            stage,
            source,
            layout: &layout,
        })?;
        Ok(Self {
            device: device.clone(),
            handle,
            stage,
            layout,
        })
    }

    pub fn vertex(device: &DeviceRef, bindings: &BindingAllocator, source: &str) -> anyhow::Result<Self> {
        Self::new(device, bindings, ShaderStage::Vertex, source)
    }

    pub fn geometry(device: &DeviceRef, bindings: &BindingAllocator, source: &str) -> anyhow::Result<Self> {
        Self::new(device, bindings, ShaderStage::Geometry, source)
    }

    pub fn fragment(device: &DeviceRef, bindings: &BindingAllocator, source: &str) -> anyhow::Result<Self> {
        Self::new(device, bindings, ShaderStage::Fragment, source)
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn layout(&self) -> &ProgramLayout {
        &self.layout
    }

    pub fn uniform_block(&self, name: &str) -> Option<&UniformBlockDescription> {
        self.layout.blocks.iter().find(|block| block.name == name)
    }

    pub fn uniform_blocks(&self) -> &[UniformBlockDescription] {
        &self.layout.blocks
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformDescription> {
        self.layout.uniforms.iter().find(|uniform| uniform.name == name)
    }

    /// Loose uniforms in declaration order.
    pub fn uniforms(&self) -> &[UniformDescription] {
        &self.layout.uniforms
    }

    pub fn vertex_inputs(&self) -> &[VertexInput] {
        &self.layout.inputs
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("handle", &self.handle)
            .field("stage", &self.stage)
            .field("entry_point", &self.layout.entry_point)
            .finish()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Ok(mut device) = self.device.try_borrow_mut() {
            device.delete_program(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ElementType, headless::HeadlessDevice};

    const VERTEX: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    world_position: vec4<f32>,
}
struct Model {
    transform: mat4x4<f32>,
}
@group(0) @binding(0) var<uniform> camera: Camera;
@group(1) @binding(0) var<uniform> model: Model;

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(3) color: vec4<f32>) -> @builtin(position) vec4<f32> {
    return camera.view_proj * model.transform * vec4<f32>(position, 1.0) + color * 0.0;
}
"#;

    const FRAGMENT: &str = r#"
struct Material {
    color: vec4<f32>,
    strength: f32,
    tint: vec3<f32>,
    enabled: u32,
    channel: i32,
}
@group(2) @binding(0) var<uniform> material: Material;
@group(3) @binding(0) var albedo: texture_2d<f32>;
@group(3) @binding(1) var albedo_sampler: sampler;
@group(3) @binding(2) var unused: texture_2d<f32>;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let texel = textureSample(albedo, albedo_sampler, vec2<f32>(0.5, 0.5));
    return material.color * texel * material.strength;
}
"#;

    fn device() -> DeviceRef {
        HeadlessDevice::shared()
    }

    #[test]
    fn allocator_splits_slots_three_ways() {
        let bindings = BindingAllocator::new(36);
        assert_eq!(bindings.range(ShaderStage::Vertex), 0..12);
        assert_eq!(bindings.range(ShaderStage::Geometry), 12..24);
        assert_eq!(bindings.range(ShaderStage::Fragment), 24..36);
    }

    #[test]
    fn vertex_blocks_get_slots_from_vertex_range() {
        let device = device();
        let bindings = BindingAllocator::new(36);
        let program = Program::vertex(&device, &bindings, VERTEX).unwrap();

        let camera = program.uniform_block(CAMERA_BLOCK).unwrap();
        let model = program.uniform_block(MODEL_BLOCK).unwrap();
        assert_eq!(camera.slot, 0);
        assert_eq!(model.slot, 1);
        assert_eq!(camera.size, 80);
        assert_eq!(camera.member("world_position").unwrap().offset, 64);
        assert_eq!(model.member("transform").unwrap().ty, UniformType::Mat4);
        assert_eq!(program.layout().entry_point, "vs_main");
    }

    #[test]
    fn vertex_inputs_are_reflected() {
        let device = device();
        let program = Program::vertex(&device, &BindingAllocator::new(36), VERTEX).unwrap();
        let inputs = program.vertex_inputs();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].location, 0);
        assert_eq!(inputs[0].format, AttributeFormat::new(ElementType::Float, 3));
        assert_eq!(inputs[1].location, 3);
        assert_eq!(inputs[1].format.components, 4);
    }

    #[test]
    fn fragment_material_block_layout() {
        let device = device();
        let program = Program::fragment(&device, &BindingAllocator::new(36), FRAGMENT).unwrap();
        let block = program.uniform_block(MATERIAL_BLOCK).unwrap();
        assert_eq!(block.slot, 24);

        let expect = [
            ("color", UniformType::Vec4, 16, 0),
            ("strength", UniformType::Float, 4, 16),
            ("tint", UniformType::Vec3, 12, 32),
            ("enabled", UniformType::Bool, 4, 44),
            ("channel", UniformType::Int, 4, 48),
        ];
        for (name, ty, size, offset) in expect {
            let member = block.member(name).unwrap();
            assert_eq!(member.ty, ty, "{}", name);
            assert_eq!(member.size, size, "{}", name);
            assert_eq!(member.offset, offset, "{}", name);
        }
        assert_eq!(block.size, 64);
    }

    #[test]
    fn only_used_textures_are_reported() {
        let device = device();
        let program = Program::fragment(&device, &BindingAllocator::new(36), FRAGMENT).unwrap();
        let albedo = program.uniform("albedo").unwrap();
        assert_eq!(albedo.ty, UniformType::Sampler2D);
        assert_eq!(albedo.location, (3 << 16) | 0);
        assert_eq!(program.uniform("albedo_sampler").unwrap().ty, UniformType::Sampler);
        assert!(program.uniform("unused").is_none());
    }

    #[test]
    fn missing_block_is_none() {
        let device = device();
        let program = Program::fragment(&device, &BindingAllocator::new(36), FRAGMENT).unwrap();
        assert!(program.uniform_block(LIGHTS_BLOCK).is_none());
    }

    #[test]
    fn compile_errors_are_reported() {
        let device = device();
        let err = Program::fragment(&device, &BindingAllocator::new(36), "fn broken( {")
            .unwrap_err()
            .to_string();
        assert!(err.contains("Shader compilation failed"), "{}", err);
    }

    #[test]
    fn wrong_stage_is_an_error() {
        let device = device();
        assert!(Program::fragment(&device, &BindingAllocator::new(36), VERTEX).is_err());
    }
}
