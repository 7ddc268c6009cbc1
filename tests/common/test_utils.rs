#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use scene_ngin::{
    Deg, Vector3, Vector4,
    components::{CameraComponent, RenderableComponent},
    context::Context,
    data_structures::{
        material::SharedMaterial,
        scene_graph::{NodeId, Scene},
        texture::RenderTarget,
    },
    device::headless::{DeviceCommand, HeadlessDevice},
    pipelines::flat::{FlatProperties, mk_flat_material},
    resources::mesh::PresetMesh,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 64;

/// A context on a recording device plus the concrete device for inspection.
pub fn recording_context() -> (Context, Rc<RefCell<HeadlessDevice>>) {
    let (device, recorder) = HeadlessDevice::shared_inspectable();
    (Context::new(device), recorder)
}

/// A scene with one camera at `(0, 0, 5)` looking down -z into a fresh target.
pub fn scene_with_camera(ctx: &Context) -> (Scene, NodeId, Rc<RenderTarget>) {
    let target = ctx.render_target(WIDTH, HEIGHT).unwrap();
    let mut scene = Scene::new();
    let camera = scene.add_node("camera");
    scene.set_local_translation(camera, Vector3::new(0.0, 0.0, 5.0));
    let projection = CameraComponent::perspective(Deg(45.0), WIDTH as f32 / HEIGHT as f32, 0.1, 100.0);
    scene.add_component(camera, CameraComponent::with_target(projection, target.clone()));
    (scene, camera, target)
}

pub fn flat_material(ctx: &mut Context, color: Vector4<f32>) -> SharedMaterial {
    let mut material = mk_flat_material(ctx.resources_mut(), color).unwrap();
    material.set_override_vertex_color(true);
    material.into_shared()
}

pub fn add_mesh(
    ctx: &mut Context,
    scene: &mut Scene,
    kind: PresetMesh,
    material: &SharedMaterial,
    translation: Vector3<f32>,
) -> NodeId {
    let node = scene.add_node(format!("{:?}", kind));
    scene.set_local_translation(node, translation);
    let mesh = ctx.preset_mesh(kind);
    scene.add_component(node, RenderableComponent::new(mesh, material.clone()));
    node
}

pub fn draw_count(recorder: &Rc<RefCell<HeadlessDevice>>) -> usize {
    recorder.borrow().draw_calls().len()
}

pub fn count(recorder: &Rc<RefCell<HeadlessDevice>>, filter: impl Fn(&DeviceCommand) -> bool) -> usize {
    recorder.borrow().count(filter)
}

pub fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

pub fn close_vec(a: Vector3<f32>, b: Vector3<f32>) -> bool {
    close(a.x, b.x) && close(a.y, b.y) && close(a.z, b.z)
}
