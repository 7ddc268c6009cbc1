//! Materials: a program triple plus the parameters fed to it.
//!
//! The parameter set is not declared by hand. It is derived from the fragment
//! program: every member of its `Material` uniform block becomes a [`Variable`],
//! and so does every texture it samples. Values are staged in the variables,
//! packed into a CPU-side mirror of the block and uploaded on demand.
//!
//! Preset materials describe their parameters with [`material_properties!`],
//! which generates typed accessors over [`Material::set`]/[`Material::get`].

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::bail;

use crate::{
    data_structures::{
        buffer::Buffer,
        program::{MATERIAL_BLOCK, Program, ShaderStage, UniformBlockDescription, UniformDescription},
        texture::Texture,
        variable::{Variable, VariableType},
    },
    device::{BufferTarget, Category, DeviceRef, PolygonMode},
};

/// Materials are shared between renderables and compared by identity.
pub type SharedMaterial = Rc<RefCell<Material>>;

pub struct Material {
    name: String,
    device: DeviceRef,
    vertex: Rc<Program>,
    geometry: Option<Rc<Program>>,
    fragment: Rc<Program>,
    variables: HashMap<String, Variable>,
    block: Option<UniformBlockDescription>,
    uniform_buffer: Option<Buffer>,
    cache: Vec<u8>,
    textures: Vec<UniformDescription>,
    alpha_blending: bool,
    polygon_mode: PolygonMode,
    dirty: bool,
}

impl Material {
    /// Builds a material and derives its variables from `fragment`.
    pub fn new(
        device: &DeviceRef,
        name: impl Into<String>,
        vertex: Rc<Program>,
        fragment: Rc<Program>,
    ) -> anyhow::Result<Self> {
        expect_stage(&vertex, ShaderStage::Vertex)?;
        expect_stage(&fragment, ShaderStage::Fragment)?;
        let mut material = Self {
            name: name.into(),
            device: device.clone(),
            vertex,
            geometry: None,
            fragment,
            variables: HashMap::new(),
            block: None,
            uniform_buffer: None,
            cache: Vec::new(),
            textures: Vec::new(),
            alpha_blending: false,
            polygon_mode: PolygonMode::Fill,
            dirty: true,
        };
        material.build_variables()?;
        Ok(material)
    }

    pub fn into_shared(self) -> SharedMaterial {
        Rc::new(RefCell::new(self))
    }

    pub fn set_vertex_program(&mut self, program: Rc<Program>) -> anyhow::Result<()> {
        expect_stage(&program, ShaderStage::Vertex)?;
        self.vertex = program;
        Ok(())
    }

    pub fn set_geometry_program(&mut self, program: Option<Rc<Program>>) -> anyhow::Result<()> {
        if let Some(program) = &program {
            expect_stage(program, ShaderStage::Geometry)?;
        }
        self.geometry = program;
        Ok(())
    }

    /// Swaps the fragment program and rebuilds the variable set from it.
    /// Values of the previous variables are discarded.
    pub fn set_fragment_program(&mut self, program: Rc<Program>) -> anyhow::Result<()> {
        expect_stage(&program, ShaderStage::Fragment)?;
        self.fragment = program;
        self.build_variables()
    }

    fn build_variables(&mut self) -> anyhow::Result<()> {
        self.variables.clear();
        self.textures.clear();
        self.block = None;
        self.uniform_buffer = None;
        self.cache.clear();

        let fragment = self.fragment.clone();
        if let Some(block) = fragment.uniform_block(MATERIAL_BLOCK) {
            for member in block.members.iter() {
                let Some(variable) = Variable::from_uniform(member.name.as_str(), member.ty) else {
                    bail!(
                        "Material \"{}\": member \"{}\" of the {} block has unsupported type {:?}",
                        self.name,
                        member.name,
                        MATERIAL_BLOCK,
                        member.ty
                    );
                };
                self.variables.insert(member.name.clone(), variable);
            }
            self.uniform_buffer = Some(Buffer::new(&self.device, Category::Dynamic, BufferTarget::Uniform));
            self.cache = vec![0; block.size as usize];
            self.block = Some(block.clone());
        }

        for uniform in fragment.uniforms().iter().filter(|u| u.ty.is_texture()) {
            let unit = self.textures.len() as u32;
            self.device
                .borrow_mut()
                .set_sampler_unit(fragment.handle(), uniform, unit);
            if let Some(variable) = Variable::from_uniform(uniform.name.as_str(), uniform.ty) {
                self.variables.insert(uniform.name.clone(), variable);
            }
            self.textures.push(uniform.clone());
        }
        self.dirty = true;
        Ok(())
    }

    /// Writes a parameter. Unknown names are ignored, values of the wrong kind
    /// are refused with an error log.
    pub fn set<T: VariableType>(&mut self, name: &str, value: T) {
        let Some(variable) = self.variables.get_mut(name) else {
            return;
        };
        if variable.set(value) {
            self.dirty = true;
        } else {
            log::error!(
                "Material \"{}\": variable \"{}\" holds a {:?}, refusing a {:?}",
                self.name,
                name,
                variable.kind(),
                T::KIND
            );
        }
    }

    /// Reads a parameter, falling back to the type's zero value if absent.
    pub fn get<T: VariableType>(&self, name: &str) -> T {
        self.variables
            .get(name)
            .and_then(|variable| variable.get())
            .unwrap_or_else(T::absent)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Packs every variable of the `Material` block into the CPU mirror and
    /// uploads it.
    ///
    /// # Panics
    ///
    /// If a block member has no variable or the sizes disagree. Both mean
    /// reflection and variable construction went out of sync.
    pub fn update_uniform_buffer(&mut self) {
        let Some(block) = &self.block else {
            self.dirty = false;
            return;
        };
        for member in block.members.iter() {
            let Some(variable) = self.variables.get(&member.name) else {
                log::error!(
                    "Material \"{}\": no variable for {} block member \"{}\"",
                    self.name,
                    block.name,
                    member.name
                );
                panic!("material \"{}\" lost variable \"{}\"", self.name, member.name);
            };
            if variable.name() != member.name || variable.size() != member.size {
                log::error!(
                    "Material \"{}\": {} block member \"{}\" ({} bytes) does not match variable \"{}\" ({} bytes)",
                    self.name,
                    block.name,
                    member.name,
                    member.size,
                    variable.name(),
                    variable.size()
                );
                panic!(
                    "material \"{}\": uniform \"{}\" expects {} bytes, variable holds {}",
                    self.name,
                    member.name,
                    member.size,
                    variable.size()
                );
            }
            let offset = member.offset as usize;
            let bytes = variable.bytes();
            self.cache[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        if let Some(buffer) = &mut self.uniform_buffer {
            buffer.update(&self.cache);
        }
        self.dirty = false;
    }

    /// Binds every texture variable to its unit. Empty texture variables are skipped.
    pub fn update_uniforms(&self) {
        for (unit, uniform) in self.textures.iter().enumerate() {
            let texture = self
                .variables
                .get(&uniform.name)
                .and_then(|variable| variable.get::<Option<Rc<Texture>>>())
                .flatten();
            if let Some(texture) = texture {
                self.device
                    .borrow_mut()
                    .bind_texture(unit as u32, texture.handle());
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_program(&self) -> &Rc<Program> {
        &self.vertex
    }

    pub fn geometry_program(&self) -> Option<&Rc<Program>> {
        self.geometry.as_ref()
    }

    pub fn fragment_program(&self) -> &Rc<Program> {
        &self.fragment
    }

    pub fn uniform_block(&self) -> Option<&UniformBlockDescription> {
        self.block.as_ref()
    }

    pub fn uniform_buffer(&self) -> Option<&Buffer> {
        self.uniform_buffer.as_ref()
    }

    /// CPU-side mirror of the `Material` block.
    pub fn uniform_cache(&self) -> &[u8] {
        &self.cache
    }

    /// Texture uniforms in unit order.
    pub fn texture_uniforms(&self) -> &[UniformDescription] {
        &self.textures
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn alpha_blending(&self) -> bool {
        self.alpha_blending
    }

    pub fn set_alpha_blending(&mut self, enabled: bool) {
        self.alpha_blending = enabled;
    }

    pub fn polygon_mode(&self) -> PolygonMode {
        self.polygon_mode
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.polygon_mode = mode;
    }
}

/// Shares the programs, copies every value into a fresh uniform buffer.
impl Clone for Material {
    fn clone(&self) -> Self {
        let uniform_buffer = self
            .uniform_buffer
            .as_ref()
            .map(|_| Buffer::new(&self.device, Category::Dynamic, BufferTarget::Uniform));
        Self {
            name: self.name.clone(),
            device: self.device.clone(),
            vertex: self.vertex.clone(),
            geometry: self.geometry.clone(),
            fragment: self.fragment.clone(),
            variables: self.variables.clone(),
            block: self.block.clone(),
            uniform_buffer,
            cache: self.cache.clone(),
            textures: self.textures.clone(),
            alpha_blending: self.alpha_blending,
            polygon_mode: self.polygon_mode,
            dirty: true,
        }
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.name)
            .field("vertex", &self.vertex)
            .field("geometry", &self.geometry)
            .field("fragment", &self.fragment)
            .field("alpha_blending", &self.alpha_blending)
            .field("polygon_mode", &self.polygon_mode)
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn expect_stage(program: &Program, stage: ShaderStage) -> anyhow::Result<()> {
    if program.stage() != stage {
        bail!("Expected a {:?} program, got a {:?} program", stage, program.stage());
    }
    Ok(())
}

/// Declares typed accessors for named material parameters.
///
/// ```ignore
/// material_properties! {
///     pub trait FlatProperties {
///         "Color": Vector4<f32> => color, set_color;
///     }
/// }
/// ```
#[macro_export]
macro_rules! material_properties {
    ($vis:vis trait $name:ident { $($key:literal : $ty:ty => $get:ident, $set:ident;)* }) => {
        $vis trait $name {
            $(
                fn $get(&self) -> $ty;
                fn $set(&mut self, value: $ty);
            )*
        }

        impl $name for $crate::data_structures::material::Material {
            $(
                fn $get(&self) -> $ty {
                    self.get::<$ty>($key)
                }

                fn $set(&mut self, value: $ty) {
                    self.set::<$ty>($key, value)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_structures::program::BindingAllocator,
        device::headless::{DeviceCommand, HeadlessDevice},
    };
    use cgmath::Vector4;

    const VERTEX: &str = r#"
@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}
"#;

    const FRAGMENT: &str = r#"
struct Material {
    Color: vec4<f32>,
    Roughness: f32,
    HasAlbedo: u32,
}
@group(2) @binding(0) var<uniform> material: Material;
@group(3) @binding(0) var Albedo: texture_2d<f32>;
@group(3) @binding(1) var Normals: texture_2d<f32>;
@group(3) @binding(2) var linear_sampler: sampler;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let uv = vec2<f32>(0.5, 0.5);
    let albedo = textureSample(Albedo, linear_sampler, uv);
    let normal = textureSample(Normals, linear_sampler, uv);
    return material.Color * albedo * material.Roughness + normal * 0.0;
}
"#;

    const PLAIN_FRAGMENT: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;

    material_properties! {
        trait TestProperties {
            "Color": Vector4<f32> => color, set_color;
            "Roughness": f32 => roughness, set_roughness;
            "HasAlbedo": bool => has_albedo, set_has_albedo;
        }
    }

    fn material(device: &DeviceRef, fragment: &str) -> Material {
        let bindings = BindingAllocator::new(36);
        let vertex = Rc::new(Program::vertex(device, &bindings, VERTEX).unwrap());
        let fragment = Rc::new(Program::fragment(device, &bindings, fragment).unwrap());
        Material::new(device, "test", vertex, fragment).unwrap()
    }

    #[test]
    fn variables_follow_material_block_and_textures() {
        let device = HeadlessDevice::shared();
        let material = material(&device, FRAGMENT);
        for name in ["Color", "Roughness", "HasAlbedo", "Albedo", "Normals"] {
            assert!(material.variable(name).is_some(), "{}", name);
        }
        assert!(material.variable("linear_sampler").is_none());
        assert_eq!(material.uniform_cache().len(), 32);
        assert!(material.uniform_buffer().is_some());
    }

    #[test]
    fn sampler_units_follow_declaration_order() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let material = material(&device, FRAGMENT);
        let program = material.fragment_program().handle();
        let units: Vec<(i32, u32)> = recorder
            .borrow()
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::SetSamplerUnit { program: p, location, unit } if *p == program => {
                    Some((*location, *unit))
                }
                _ => None,
            })
            .collect();
        assert_eq!(units, vec![((3 << 16) | 0, 0), ((3 << 16) | 1, 1)]);
    }

    #[test]
    fn set_then_get_and_upload() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mut material = material(&device, FRAGMENT);
        material.update_uniform_buffer();
        assert!(!material.is_dirty());

        material.set_color(Vector4::new(0.25, 0.5, 0.75, 1.0));
        material.set_roughness(0.5);
        material.set_has_albedo(true);
        assert!(material.is_dirty());
        assert_eq!(material.color(), Vector4::new(0.25, 0.5, 0.75, 1.0));
        assert_eq!(material.roughness(), 0.5);
        assert!(material.has_albedo());

        material.update_uniform_buffer();
        assert!(!material.is_dirty());

        let handle = material.uniform_buffer().unwrap().handle();
        let recorder = recorder.borrow();
        let data = recorder.buffer_data(handle).unwrap();
        let floats: Vec<f32> = data[0..20]
            .chunks(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(floats, vec![0.25, 0.5, 0.75, 1.0, 0.5]);
        assert_eq!(&data[20..24], &[1, 0, 0, 0]);
    }

    #[test]
    fn absent_variable_reads_default_and_ignores_writes() {
        let device = HeadlessDevice::shared();
        let mut material = material(&device, PLAIN_FRAGMENT);
        material.update_uniform_buffer();
        material.set_color(Vector4::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(material.color(), Vector4::new(0.0, 0.0, 0.0, 0.0));
        assert!(!material.is_dirty());
        assert!(material.uniform_block().is_none());
    }

    #[test]
    fn wrong_kind_does_not_dirty() {
        let device = HeadlessDevice::shared();
        let mut material = material(&device, FRAGMENT);
        material.update_uniform_buffer();
        material.set::<i32>("Roughness", 3);
        assert!(!material.is_dirty());
        assert_eq!(material.roughness(), 0.0);
    }

    #[test]
    fn only_present_textures_are_bound() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mut material = material(&device, FRAGMENT);
        let normals = Rc::new(Texture::solid(&device, 1, 1, [127, 127, 255, 255]));
        material.set("Normals", Some(normals.clone()));
        recorder.borrow_mut().clear_commands();

        material.update_uniforms();
        let recorder = recorder.borrow();
        assert_eq!(
            recorder.commands(),
            &[DeviceCommand::BindTexture {
                unit: 1,
                texture: normals.handle()
            }]
        );
    }

    #[test]
    fn clone_shares_programs_and_copies_values() {
        let device = HeadlessDevice::shared();
        let mut original = material(&device, FRAGMENT);
        original.set_roughness(0.75);
        original.set_alpha_blending(true);

        let mut copy = original.clone();
        assert!(Rc::ptr_eq(copy.fragment_program(), original.fragment_program()));
        assert_ne!(
            copy.uniform_buffer().unwrap().handle(),
            original.uniform_buffer().unwrap().handle()
        );
        assert_eq!(copy.roughness(), 0.75);
        assert!(copy.alpha_blending());

        copy.set_roughness(0.1);
        assert_eq!(original.roughness(), 0.75);
        copy.update_uniform_buffer();
    }

    #[test]
    fn changing_fragment_program_rebuilds_variables() {
        let device = HeadlessDevice::shared();
        let mut material = material(&device, FRAGMENT);
        let plain = Rc::new(
            Program::fragment(&device, &BindingAllocator::new(36), PLAIN_FRAGMENT).unwrap(),
        );
        material.set_fragment_program(plain).unwrap();
        assert!(material.variable("Color").is_none());
        assert!(material.texture_uniforms().is_empty());
        assert!(material.uniform_buffer().is_none());
    }

    #[test]
    fn stage_mismatch_is_rejected() {
        let device = HeadlessDevice::shared();
        let bindings = BindingAllocator::new(36);
        let vertex = Rc::new(Program::vertex(&device, &bindings, VERTEX).unwrap());
        assert!(Material::new(&device, "bad", vertex.clone(), vertex).is_err());
    }
}
