use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::{
    data_structures::{
        material::SharedMaterial,
        mesh::SharedMesh,
        program::{BindingAllocator, Program, ShaderStage},
        texture::Texture,
    },
    device::DeviceRef,
    resources::mesh::PresetMesh,
};

/**
 * This module contains the caches for shared GPU resources and the logic for loading
 * textures and shader sources from files.
 */
pub mod mesh;
pub mod texture;

/// Caches programs, textures, preset meshes and named materials so that equal
/// requests share one GPU object.
///
/// Program keys are an explicit identifier or, without one, the source text.
/// Textures are keyed by path, preset meshes by kind and materials by name.
pub struct ResourcePool {
    device: DeviceRef,
    bindings: BindingAllocator,
    programs: HashMap<(ShaderStage, String), Rc<Program>>,
    textures: HashMap<PathBuf, Rc<Texture>>,
    meshes: HashMap<PresetMesh, SharedMesh>,
    materials: HashMap<String, SharedMaterial>,
}

impl ResourcePool {
    pub fn new(device: &DeviceRef) -> Self {
        let limits = device.borrow().limits();
        Self {
            device: device.clone(),
            bindings: BindingAllocator::new(limits.max_uniform_buffer_bindings),
            programs: HashMap::new(),
            textures: HashMap::new(),
            meshes: HashMap::new(),
            materials: HashMap::new(),
        }
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn bindings(&self) -> &BindingAllocator {
        &self.bindings
    }

    /// Compiles `source` once. `identifier` replaces the source text as cache key.
    pub fn load_program(
        &mut self,
        stage: ShaderStage,
        source: &str,
        identifier: Option<&str>,
    ) -> anyhow::Result<Rc<Program>> {
        let key = (stage, identifier.unwrap_or(source).to_string());
        if let Some(program) = self.programs.get(&key) {
            return Ok(program.clone());
        }
        let program = Rc::new(Program::new(&self.device, &self.bindings, stage, source)?);
        self.programs.insert(key, program.clone());
        Ok(program)
    }

    /// Reads a WGSL file and compiles it, keyed by its path.
    pub fn load_program_from_file(
        &mut self,
        stage: ShaderStage,
        path: impl AsRef<Path>,
    ) -> anyhow::Result<Rc<Program>> {
        let path = path.as_ref();
        let identifier = path.to_string_lossy().into_owned();
        if let Some(program) = self.programs.get(&(stage, identifier.clone())) {
            return Ok(program.clone());
        }
        let source = texture::load_string(path)?;
        self.load_program(stage, &source, Some(&identifier))
    }

    /// Loads the image at `path` once. The color space of the first load sticks.
    pub fn load_texture(&mut self, path: impl AsRef<Path>, srgb: bool) -> anyhow::Result<Rc<Texture>> {
        let path = path.as_ref();
        if let Some(texture) = self.textures.get(path) {
            return Ok(texture.clone());
        }
        let texture = Rc::new(texture::load_texture(&self.device, path, srgb)?);
        self.textures.insert(path.to_path_buf(), texture.clone());
        Ok(texture)
    }

    /// The shared instance of a preset mesh, built on first use.
    pub fn preset_mesh(&mut self, kind: PresetMesh) -> SharedMesh {
        let device = &self.device;
        self.meshes
            .entry(kind)
            .or_insert_with(|| kind.build(device).into_shared())
            .clone()
    }

    pub fn material(&self, name: &str) -> Option<SharedMaterial> {
        self.materials.get(name).cloned()
    }

    /// Registers `material` under its own name, replacing an earlier one.
    pub fn insert_material(&mut self, material: SharedMaterial) -> SharedMaterial {
        let name = material.borrow().name().to_string();
        self.materials.insert(name, material.clone());
        material
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Drops the pool's references. Resources still in use elsewhere stay alive.
    pub fn clear(&mut self) {
        self.programs.clear();
        self.textures.clear();
        self.meshes.clear();
        self.materials.clear();
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("programs", &self.programs.len())
            .field("textures", &self.textures.len())
            .field("meshes", &self.meshes.len())
            .field("materials", &self.materials.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_structures::material::Material,
        device::headless::{DeviceCommand, HeadlessDevice},
    };

    const VERTEX: &str = r#"
@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}
"#;

    const FRAGMENT: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 1.0, 1.0, 1.0);
}
"#;

    fn created_programs(device: &Rc<std::cell::RefCell<HeadlessDevice>>) -> usize {
        device.borrow().count(|c| matches!(c, DeviceCommand::CreateProgram(..)))
    }

    #[test]
    fn programs_are_cached_by_source() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mut pool = ResourcePool::new(&device);
        let a = pool.load_program(ShaderStage::Vertex, VERTEX, None).unwrap();
        let b = pool.load_program(ShaderStage::Vertex, VERTEX, None).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(created_programs(&recorder), 1);
    }

    #[test]
    fn identifier_overrides_source_key() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mut pool = ResourcePool::new(&device);
        let a = pool.load_program(ShaderStage::Fragment, FRAGMENT, Some("white")).unwrap();
        // Same identifier, the cached program wins even though the source differs.
        let b = pool
            .load_program(ShaderStage::Fragment, "not even wgsl", Some("white"))
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(created_programs(&recorder), 1);
    }

    #[test]
    fn failed_programs_are_not_cached() {
        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        assert!(pool.load_program(ShaderStage::Fragment, "fn broken( {", None).is_err());
        assert_eq!(pool.program_count(), 0);
    }

    #[test]
    fn programs_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("white.wgsl");
        std::fs::write(&path, FRAGMENT).unwrap();

        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        let a = pool.load_program_from_file(ShaderStage::Fragment, &path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let b = pool.load_program_from_file(ShaderStage::Fragment, &path).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn textures_are_cached_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("white.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 255, 255, 255]))
            .save(&path)
            .unwrap();

        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        let a = pool.load_texture(&path, true).unwrap();
        let b = pool.load_texture(&path, true).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(pool.texture_count(), 1);
    }

    #[test]
    fn preset_meshes_are_shared() {
        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        let a = pool.preset_mesh(PresetMesh::Cube);
        let b = pool.preset_mesh(PresetMesh::Cube);
        let quad = pool.preset_mesh(PresetMesh::Quad);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &quad));
    }

    #[test]
    fn materials_by_name() {
        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        let vertex = pool.load_program(ShaderStage::Vertex, VERTEX, None).unwrap();
        let fragment = pool.load_program(ShaderStage::Fragment, FRAGMENT, None).unwrap();
        let material = Material::new(&device, "white", vertex, fragment).unwrap().into_shared();
        pool.insert_material(material.clone());
        assert!(Rc::ptr_eq(&pool.material("white").unwrap(), &material));
        assert!(pool.material("black").is_none());
    }
}
