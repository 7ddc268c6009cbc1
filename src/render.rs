//! Single-pass forward rendering of a queued scene.
//!
//! Rendering happens in two phases per frame:
//!
//! - queueing: [`Renderer::visit`] is called for every node of a traversal and
//!   sorts the node's components into cameras, lights, opaque batches and
//!   transparent renderables
//! - drawing: [`Renderer::render`] renders the queues once per camera and clears
//!   them afterwards
//!
//! Opaque renderables are batched by material identity so each material is bound
//! once per camera. Transparent renderables are drawn after all opaque ones, back
//! to front, each with its own material bind.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use bytemuck::Zeroable;
use cgmath::{InnerSpace, Matrix4, SquareMatrix, Vector3};

use crate::{
    components::{CameraComponent, Component, LightComponent, MAXIMUM_LIGHTS},
    data_structures::{
        buffer::Buffer,
        material::{Material, SharedMaterial},
        mesh::SharedMesh,
        program::{CAMERA_BLOCK, LIGHTS_BLOCK, MODEL_BLOCK},
        scene_graph::{Node, NodeId, Scene},
        texture::RenderTarget,
    },
    device::{
        BlendMode, BufferTarget, Category, DeviceRef, PipelineHandle, PolygonMode, PrimitiveType,
        ProgramHandle, Rect, RenderState,
    },
};

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub world_position: [f32; 4],
}

impl CameraUniform {
    pub fn new(view_proj: Matrix4<f32>, world_position: Vector3<f32>) -> Self {
        Self {
            view_proj: view_proj.into(),
            world_position: world_position.extend(1.0).into(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniform {
    pub transform: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightRaw {
    pub position: [f32; 3],
    pub strength: f32,
    pub direction: [f32; 3],
    pub light_type: i32,
    pub color: [f32; 3],
    // Due to uniforms requiring 16 byte (4 float) spacing, we need to use a padding field here
    pub _padding: f32,
}

impl LightRaw {
    pub fn new(light: &LightComponent, position: Vector3<f32>) -> Self {
        Self {
            position: position.into(),
            strength: light.strength(),
            direction: light.direction().into(),
            light_type: light.light_type() as i32,
            color: light.color().into(),
            _padding: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightsUniform {
    pub lights: [LightRaw; MAXIMUM_LIGHTS],
    pub number_of_lights: i32,
    pub _padding: [i32; 3],
}

/// Counters of the last [`Renderer::render`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Cameras that had a render target.
    pub cameras: u32,
    pub material_binds: u32,
    pub draw_calls: u32,
}

pub type FrameCallback = Box<dyn FnMut()>;
pub type CameraCallback = Box<dyn FnMut(NodeId, &CameraComponent)>;

#[derive(Clone)]
struct QueuedRenderable {
    node: NodeId,
    mesh: SharedMesh,
    material: SharedMaterial,
}

struct QueuedCamera {
    node: NodeId,
    camera: CameraComponent,
}

struct Batch {
    material: SharedMaterial,
    renderables: Vec<QueuedRenderable>,
}

type PipelineKey = (ProgramHandle, Option<ProgramHandle>, ProgramHandle);

/// Queues the components of visited nodes and draws them per camera.
///
/// The camera, lights and model uniform buffers are owned by the renderer and
/// rewritten every frame. Model matrices of one camera pass are packed into one
/// buffer, each at an offset aligned to the device's uniform offset alignment.
pub struct Renderer {
    device: DeviceRef,
    camera_buffer: Buffer,
    lights_buffer: Buffer,
    model_buffer: Buffer,
    model_stride: u64,
    model_data: Vec<u8>,
    model_slots: Vec<u32>,
    pipelines: HashMap<PipelineKey, PipelineHandle>,
    cameras: Vec<QueuedCamera>,
    lights: Vec<(NodeId, LightComponent)>,
    opaque: Vec<Batch>,
    batch_index: HashMap<*const RefCell<Material>, usize>,
    transparent: Vec<QueuedRenderable>,
    overlay: Option<Rc<RenderTarget>>,
    pre_render: Option<FrameCallback>,
    post_render: Option<FrameCallback>,
    pre_camera: Option<CameraCallback>,
    post_camera: Option<CameraCallback>,
    stats: FrameStats,
}

impl Renderer {
    pub fn new(device: &DeviceRef) -> Self {
        let alignment = device.borrow().limits().uniform_offset_alignment.max(1) as u64;
        let model_size = std::mem::size_of::<ModelUniform>() as u64;
        Self {
            device: device.clone(),
            camera_buffer: Buffer::new(device, Category::Dynamic, BufferTarget::Uniform),
            lights_buffer: Buffer::new(device, Category::Dynamic, BufferTarget::Uniform),
            model_buffer: Buffer::new(device, Category::Dynamic, BufferTarget::Uniform),
            model_stride: model_size.div_ceil(alignment) * alignment,
            model_data: Vec::new(),
            model_slots: Vec::new(),
            pipelines: HashMap::new(),
            cameras: Vec::new(),
            lights: Vec::new(),
            opaque: Vec::new(),
            batch_index: HashMap::new(),
            transparent: Vec::new(),
            overlay: None,
            pre_render: None,
            post_render: None,
            pre_camera: None,
            post_camera: None,
            stats: FrameStats::default(),
        }
    }

    /// Queues the cameras, lights and visible renderables of `node`.
    pub fn visit(&mut self, id: NodeId, node: &Node) {
        for component in node.components() {
            match component {
                Component::Renderable(renderable) => {
                    if !renderable.visible() {
                        continue;
                    }
                    let queued = QueuedRenderable {
                        node: id,
                        mesh: renderable.mesh().clone(),
                        material: renderable.material().clone(),
                    };
                    if queued.material.borrow().alpha_blending() {
                        self.transparent.push(queued);
                    } else {
                        self.queue_opaque(queued);
                    }
                }
                Component::Camera(camera) => self.cameras.push(QueuedCamera {
                    node: id,
                    camera: camera.clone(),
                }),
                Component::Light(light) => self.lights.push((id, light.clone())),
                Component::Text(_) | Component::ConfidenceMesh(_) => {}
            }
        }
    }

    /// Visits every node of `scene`, parents before children.
    pub fn visit_scene(&mut self, scene: &Scene) {
        scene.walk(|id, node| self.visit(id, node));
    }

    fn queue_opaque(&mut self, queued: QueuedRenderable) {
        let key = Rc::as_ptr(&queued.material);
        match self.batch_index.get(&key) {
            Some(&index) => self.opaque[index].renderables.push(queued),
            None => {
                self.batch_index.insert(key, self.opaque.len());
                self.opaque.push(Batch {
                    material: queued.material.clone(),
                    renderables: vec![queued],
                });
            }
        }
    }

    /// Renders the queues through every queued camera, then clears them.
    ///
    /// Fails if the device cannot link a material's programs into a pipeline.
    pub fn render(&mut self, scene: &Scene) -> anyhow::Result<()> {
        self.stats = FrameStats::default();
        if let Some(callback) = self.pre_render.as_mut() {
            callback();
        }
        self.device
            .borrow_mut()
            .set_render_state(RenderState::default());

        let cameras = std::mem::take(&mut self.cameras);
        let result = if cameras.is_empty() {
            Ok(())
        } else {
            self.upload_lights(scene);
            cameras
                .iter()
                .try_for_each(|camera| self.render_camera(scene, camera))
        };

        if let Some(callback) = self.post_render.as_mut() {
            callback();
        }
        self.clear_queues();
        self.device.borrow_mut().end_frame();
        result
    }

    fn render_camera(&mut self, scene: &Scene, queued: &QueuedCamera) -> anyhow::Result<()> {
        if let Some(callback) = self.pre_camera.as_mut() {
            callback(queued.node, &queued.camera);
        }
        let camera = &queued.camera;
        let Some(target) = camera.render_target() else {
            return Ok(());
        };
        self.stats.cameras += 1;

        let world = scene.world_transform(queued.node);
        let position = scene.world_translation(queued.node);
        let view = world.invert().unwrap_or_else(|| {
            log::warn!("Camera node {} has a singular world transform", queued.node);
            Matrix4::identity()
        });
        let uniform = CameraUniform::new(camera.projection_matrix() * view, position);
        self.camera_buffer.update(bytemuck::bytes_of(&uniform));

        let transparent = self.sorted_transparent(scene, position);
        self.upload_models(scene, &transparent);

        {
            let mut device = self.device.borrow_mut();
            device.bind_framebuffer(target.framebuffer(), camera.viewport().to_rect());
            device.clear([0.0, 0.0, 0.0, 0.0], 1.0);
            device.set_blend(None);
        }

        let mut model_index = 0;
        let batches: Vec<(SharedMaterial, Vec<QueuedRenderable>)> = self
            .opaque
            .iter()
            .map(|batch| (batch.material.clone(), batch.renderables.clone()))
            .collect();
        for (material, renderables) in batches.iter() {
            self.use_material(material)?;
            for renderable in renderables.iter() {
                self.render_renderable(renderable, model_index);
                model_index += 1;
            }
        }

        self.device.borrow_mut().set_blend(Some(BlendMode::Alpha));
        for renderable in transparent.iter() {
            self.use_material(&renderable.material)?;
            self.render_renderable(renderable, model_index);
            model_index += 1;
        }

        {
            let mut device = self.device.borrow_mut();
            device.bind_vertex_array(None);
            device.set_polygon_mode(PolygonMode::Fill);
        }

        if let Some(blit_target) = camera.blit_target() {
            if !Rc::ptr_eq(blit_target, target) {
                self.blit(target, camera.viewport().to_rect(), blit_target);
            }
        }

        if let Some(callback) = self.post_camera.as_mut() {
            callback(queued.node, &queued.camera);
        }
        Ok(())
    }

    fn blit(&self, source: &RenderTarget, source_rect: Rect, blit_target: &RenderTarget) {
        let (width, height) = (blit_target.width() as i32, blit_target.height() as i32);
        let mut device = self.device.borrow_mut();
        device.blit_framebuffer(
            source.framebuffer(),
            source_rect,
            blit_target.framebuffer(),
            Rect::new(0, 0, width, height),
        );
        if let Some(overlay) = &self.overlay {
            device.blit_framebuffer(
                overlay.framebuffer(),
                Rect::from_size(overlay.width(), overlay.height()),
                blit_target.framebuffer(),
                Rect::new(width / 2, 0, width, height / 2),
            );
        }
    }

    /// Transparent renderables ordered farthest first as seen from `camera_position`.
    fn sorted_transparent(&self, scene: &Scene, camera_position: Vector3<f32>) -> Vec<QueuedRenderable> {
        let mut sorted: Vec<(f32, QueuedRenderable)> = self
            .transparent
            .iter()
            .map(|renderable| {
                let distance = (scene.world_translation(renderable.node) - camera_position).magnitude();
                (distance, renderable.clone())
            })
            .collect();
        sorted.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        sorted.into_iter().map(|(_, renderable)| renderable).collect()
    }

    /// Packs the world matrix of every renderable drawn in this camera pass,
    /// opaque batches first, then `transparent` in draw order.
    fn upload_models(&mut self, scene: &Scene, transparent: &[QueuedRenderable]) {
        let nodes: Vec<NodeId> = self
            .opaque
            .iter()
            .flat_map(|batch| batch.renderables.iter())
            .chain(transparent.iter())
            .map(|renderable| renderable.node)
            .collect();

        self.model_data.clear();
        self.model_data.resize(nodes.len() * self.model_stride as usize, 0);
        for (index, node) in nodes.into_iter().enumerate() {
            let uniform = ModelUniform {
                transform: scene.world_transform(node).into(),
            };
            let offset = index * self.model_stride as usize;
            let bytes = bytemuck::bytes_of(&uniform);
            self.model_data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        self.model_buffer.update(&self.model_data);
    }

    fn upload_lights(&mut self, scene: &Scene) {
        let mut uniform = LightsUniform::zeroed();
        let count = self.lights.len().min(MAXIMUM_LIGHTS);
        for (raw, (node, light)) in uniform.lights.iter_mut().zip(self.lights.iter()) {
            *raw = LightRaw::new(light, scene.world_translation(*node));
        }
        uniform.number_of_lights = count as i32;
        self.lights_buffer.update(bytemuck::bytes_of(&uniform));
    }

    /// Binds a material and the renderer's blocks for the material's programs.
    fn use_material(&mut self, material: &SharedMaterial) -> anyhow::Result<()> {
        self.stats.material_binds += 1;
        let mut material = material.borrow_mut();

        let camera_size = std::mem::size_of::<CameraUniform>() as u64;
        let lights_size = std::mem::size_of::<LightsUniform>() as u64;
        let programs: Vec<_> = [
            Some(material.vertex_program().clone()),
            material.geometry_program().cloned(),
            Some(material.fragment_program().clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        self.model_slots.clear();
        for program in programs.iter() {
            if let Some(block) = program.uniform_block(CAMERA_BLOCK) {
                self.device
                    .borrow_mut()
                    .bind_uniform_buffer(block.slot, self.camera_buffer.handle(), 0..camera_size);
            }
            if let Some(block) = program.uniform_block(MODEL_BLOCK) {
                self.model_slots.push(block.slot);
            }
        }

        let key = (
            material.vertex_program().handle(),
            material.geometry_program().map(|program| program.handle()),
            material.fragment_program().handle(),
        );
        let pipeline = match self.pipelines.get(&key) {
            Some(pipeline) => *pipeline,
            None => {
                let pipeline = self.device.borrow_mut().create_pipeline(key.0, key.1, key.2)?;
                self.pipelines.insert(key, pipeline);
                pipeline
            }
        };
        {
            let mut device = self.device.borrow_mut();
            device.set_polygon_mode(material.polygon_mode());
            device.bind_pipeline(pipeline);
        }

        if let Some(block) = material.fragment_program().uniform_block(LIGHTS_BLOCK) {
            self.device
                .borrow_mut()
                .bind_uniform_buffer(block.slot, self.lights_buffer.handle(), 0..lights_size);
        }

        material.update_uniforms();
        if let Some(slot) = material.uniform_block().map(|block| block.slot) {
            if material.is_dirty() {
                material.update_uniform_buffer();
            }
            if let Some(buffer) = material.uniform_buffer() {
                self.device
                    .borrow_mut()
                    .bind_uniform_buffer(slot, buffer.handle(), 0..buffer.size());
            }
        }
        Ok(())
    }

    fn render_renderable(&mut self, renderable: &QueuedRenderable, model_index: usize) {
        let offset = model_index as u64 * self.model_stride;
        let model_size = std::mem::size_of::<ModelUniform>() as u64;
        let mesh = renderable.mesh.borrow();
        let mut device = self.device.borrow_mut();
        for slot in self.model_slots.iter() {
            device.bind_uniform_buffer(*slot, self.model_buffer.handle(), offset..offset + model_size);
        }
        if mesh.primitive_type() == PrimitiveType::Points {
            device.set_point_size(mesh.point_size());
        }
        device.bind_vertex_array(Some(mesh.vertex_array()));
        if mesh.uses_indexed_rendering() {
            device.draw_elements(mesh.primitive_type(), mesh.index_format(), mesh.index_count());
        } else {
            device.draw_arrays(mesh.primitive_type(), 0, mesh.vertex_count());
        }
        self.stats.draw_calls += 1;
    }

    /// Drops everything queued since the last frame. Safe to call at any time.
    pub fn clear_queues(&mut self) {
        self.cameras.clear();
        self.lights.clear();
        self.opaque.clear();
        self.batch_index.clear();
        self.transparent.clear();
    }

    /// Render target blitted into the lower right quadrant of every blit target.
    pub fn set_overlay(&mut self, overlay: Option<Rc<RenderTarget>>) {
        self.overlay = overlay;
    }

    pub fn overlay(&self) -> Option<&Rc<RenderTarget>> {
        self.overlay.as_ref()
    }

    pub fn set_pre_render_callback(&mut self, callback: impl FnMut() + 'static) {
        self.pre_render = Some(Box::new(callback));
    }

    pub fn set_post_render_callback(&mut self, callback: impl FnMut() + 'static) {
        self.post_render = Some(Box::new(callback));
    }

    /// Called for every queued camera, including cameras without a render target.
    pub fn set_pre_camera_callback(&mut self, callback: impl FnMut(NodeId, &CameraComponent) + 'static) {
        self.pre_camera = Some(Box::new(callback));
    }

    /// Called after a camera finished drawing. Skipped for cameras without a render target.
    pub fn set_post_camera_callback(&mut self, callback: impl FnMut(NodeId, &CameraComponent) + 'static) {
        self.post_camera = Some(Box::new(callback));
    }

    pub fn last_frame_stats(&self) -> FrameStats {
        self.stats
    }

    pub fn queued_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn queued_lights(&self) -> usize {
        self.lights.len()
    }

    pub fn opaque_batches(&self) -> usize {
        self.opaque.len()
    }

    pub fn queued_transparent(&self) -> usize {
        self.transparent.len()
    }

    /// Pipelines linked so far.
    pub fn cached_pipelines(&self) -> usize {
        self.pipelines.len()
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("cameras", &self.cameras.len())
            .field("lights", &self.lights.len())
            .field("opaque_batches", &self.opaque.len())
            .field("transparent", &self.transparent.len())
            .field("pipelines", &self.pipelines.len())
            .field("stats", &self.stats)
            .finish()
    }
}
