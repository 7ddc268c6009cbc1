#![cfg(feature = "integration-tests")]

use std::{cell::RefCell, rc::Rc};

use scene_ngin::{
    Vector3, Vector4,
    components::CameraComponent,
    context::Context,
    device::wgpu_device::{WgpuDevice, WgpuDeviceConfig},
    resources::mesh::PresetMesh,
};

use crate::common::test_utils::*;
mod common;

fn wgpu_context() -> (Context, Rc<RefCell<WgpuDevice>>) {
    Context::wgpu(WgpuDeviceConfig::default()).expect("integration tests need a GPU adapter")
}

#[test]
fn should_render_clear_colour() {
    let (ctx, gpu) = wgpu_context();
    let (scene, _, target) = scene_with_camera(&ctx);
    let mut renderer = ctx.renderer();

    renderer.visit_scene(&scene);
    renderer.render(&scene).unwrap();

    let img = gpu.borrow_mut().read_pixels(target.framebuffer()).unwrap();
    assert_eq!(img.dimensions(), (WIDTH, HEIGHT));
    assert!(img.pixels().all(|p| *p == image::Rgba([0, 0, 0, 0])));
}

#[test]
fn flat_quad_covers_the_center() {
    let (mut ctx, gpu) = wgpu_context();
    let (mut scene, _, target) = scene_with_camera(&ctx);
    let red = flat_material(&mut ctx, Vector4::new(1.0, 0.0, 0.0, 1.0));
    add_mesh(&mut ctx, &mut scene, PresetMesh::Quad, &red, Vector3::new(0.0, 0.0, 3.0));
    let mut renderer = ctx.renderer();

    renderer.visit_scene(&scene);
    renderer.render(&scene).unwrap();

    let img = gpu.borrow_mut().read_pixels(target.framebuffer()).unwrap();
    assert_eq!(*img.get_pixel(WIDTH / 2, HEIGHT / 2), image::Rgba([255, 0, 0, 255]));
    assert_eq!(*img.get_pixel(0, 0), image::Rgba([0, 0, 0, 0]));
}

#[test]
fn blit_copies_into_the_blit_target() {
    let (mut ctx, gpu) = wgpu_context();
    let (mut scene, camera, _) = scene_with_camera(&ctx);
    let screen = ctx.render_target(WIDTH * 2, HEIGHT * 2).unwrap();
    scene
        .component_mut::<CameraComponent>(camera)
        .unwrap()
        .set_blit_target(Some(screen.clone()));
    let green = flat_material(&mut ctx, Vector4::new(0.0, 1.0, 0.0, 1.0));
    add_mesh(&mut ctx, &mut scene, PresetMesh::Quad, &green, Vector3::new(0.0, 0.0, 3.0));
    let mut renderer = ctx.renderer();

    renderer.visit_scene(&scene);
    renderer.render(&scene).unwrap();

    let img = gpu.borrow_mut().read_pixels(screen.framebuffer()).unwrap();
    assert_eq!(*img.get_pixel(WIDTH, HEIGHT), image::Rgba([0, 255, 0, 255]));
}
