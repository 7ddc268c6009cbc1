use std::{path::Path, rc::Rc};

use crate::{
    data_structures::{
        material::SharedMaterial,
        mesh::SharedMesh,
        program::{Program, ShaderStage},
        texture::{RenderTarget, Texture},
    },
    device::{
        DeviceRef,
        headless::HeadlessDevice,
        wgpu_device::{WgpuDevice, WgpuDeviceConfig},
    },
    render::Renderer,
    resources::{ResourcePool, mesh::PresetMesh},
};

/// Initializes `env_logger` once. Later calls only print a warning.
pub fn init_logger() {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
}

/// The device together with the shared resources created on it.
///
/// One context is created at startup and handed to whatever needs to create
/// programs, textures or preset meshes.
pub struct Context {
    device: DeviceRef,
    resources: ResourcePool,
}

impl Context {
    pub fn new(device: DeviceRef) -> Self {
        init_logger();
        let resources = ResourcePool::new(&device);
        Self { device, resources }
    }

    /// A context on a [`HeadlessDevice`] that records commands instead of drawing.
    pub fn headless() -> Self {
        Self::new(HeadlessDevice::shared())
    }

    /// A context on a [`WgpuDevice`]. The returned device handle allows readbacks.
    pub fn wgpu(config: WgpuDeviceConfig) -> anyhow::Result<(Self, Rc<std::cell::RefCell<WgpuDevice>>)> {
        let (device, wgpu_device) = WgpuDevice::shared(config)?;
        Ok((Self::new(device), wgpu_device))
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn resources(&self) -> &ResourcePool {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourcePool {
        &mut self.resources
    }

    pub fn renderer(&self) -> Renderer {
        Renderer::new(&self.device)
    }

    pub fn load_program(
        &mut self,
        stage: ShaderStage,
        source: &str,
        identifier: Option<&str>,
    ) -> anyhow::Result<Rc<Program>> {
        self.resources.load_program(stage, source, identifier)
    }

    pub fn load_texture(&mut self, path: impl AsRef<Path>, srgb: bool) -> anyhow::Result<Rc<Texture>> {
        self.resources.load_texture(path, srgb)
    }

    pub fn preset_mesh(&mut self, kind: PresetMesh) -> SharedMesh {
        self.resources.preset_mesh(kind)
    }

    pub fn material(&self, name: &str) -> Option<SharedMaterial> {
        self.resources.material(name)
    }

    pub fn render_target(&self, width: u32, height: u32) -> anyhow::Result<Rc<RenderTarget>> {
        Ok(Rc::new(RenderTarget::new_offscreen(&self.device, width, height)?))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_context_shares_presets() {
        let mut ctx = Context::headless();
        let a = ctx.preset_mesh(PresetMesh::Axis);
        let b = ctx.preset_mesh(PresetMesh::Axis);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(ctx.material("flat").is_none());
    }

    #[test]
    fn render_targets_match_the_requested_size() {
        let ctx = Context::headless();
        let target = ctx.render_target(32, 16).unwrap();
        assert_eq!((target.width(), target.height()), (32, 16));
    }

    #[test]
    fn logger_init_is_repeatable() {
        init_logger();
        init_logger();
    }
}
