use std::rc::Rc;

use cgmath::{Deg, Matrix4, SquareMatrix};

use crate::{data_structures::scene_graph::NodeId, data_structures::texture::RenderTarget, device::Rect};

/// Maps OpenGL clip space depth (-1..1) onto wgpu's (0..1).
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Pixel region of a render target, origin at the lower left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.x + self.width as i32,
            self.y + self.height as i32,
        )
    }
}

/// Renders the scene as seen from its node.
///
/// The view matrix is the inverse of the node's world transform. A camera
/// without a render target is skipped by the renderer.
#[derive(Clone, Debug)]
pub struct CameraComponent {
    pub(crate) node: Option<NodeId>,
    projection: Matrix4<f32>,
    viewport: Viewport,
    render_target: Option<Rc<RenderTarget>>,
    blit_target: Option<Rc<RenderTarget>>,
}

impl Default for CameraComponent {
    fn default() -> Self {
        Self {
            node: None,
            projection: Matrix4::identity(),
            viewport: Viewport::default(),
            render_target: None,
            blit_target: None,
        }
    }
}

impl CameraComponent {
    pub fn new(projection: Matrix4<f32>, viewport: Viewport) -> Self {
        Self {
            projection,
            viewport,
            ..Default::default()
        }
    }

    /// Right handed perspective projection with wgpu depth range.
    pub fn perspective(fovy: Deg<f32>, aspect: f32, znear: f32, zfar: f32) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * cgmath::perspective(fovy, aspect, znear, zfar)
    }

    /// Camera rendering into the whole of `target`.
    pub fn with_target(projection: Matrix4<f32>, target: Rc<RenderTarget>) -> Self {
        let viewport = Viewport::new(0, 0, target.width(), target.height());
        Self {
            projection,
            viewport,
            render_target: Some(target),
            ..Default::default()
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn projection_matrix(&self) -> Matrix4<f32> {
        self.projection
    }

    pub fn set_projection_matrix(&mut self, projection: Matrix4<f32>) {
        self.projection = projection;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn render_target(&self) -> Option<&Rc<RenderTarget>> {
        self.render_target.as_ref()
    }

    pub fn set_render_target(&mut self, target: Option<Rc<RenderTarget>>) {
        self.render_target = target;
    }

    /// Target the rendered viewport is mirrored into after the camera pass.
    pub fn blit_target(&self) -> Option<&Rc<RenderTarget>> {
        self.blit_target.as_ref()
    }

    pub fn set_blit_target(&mut self, target: Option<Rc<RenderTarget>>) {
        self.blit_target = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector4;

    #[test]
    fn perspective_maps_near_plane_to_zero_depth() {
        let projection = CameraComponent::perspective(Deg(90.0), 1.0, 0.1, 100.0);
        let clip = projection * Vector4::new(0.0, 0.0, -0.1, 1.0);
        assert!((clip.z / clip.w).abs() < 1e-5);
        let clip = projection * Vector4::new(0.0, 0.0, -100.0, 1.0);
        assert!((clip.z / clip.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn viewport_rect() {
        let viewport = Viewport::new(10, 20, 100, 50);
        assert_eq!(viewport.to_rect(), Rect::new(10, 20, 110, 70));
    }
}
