use crate::data_structures::{
    material::SharedMaterial,
    mesh::SharedMesh,
    scene_graph::NodeId,
};

/// Draws a mesh with a material at its node's world transform.
#[derive(Debug)]
pub struct RenderableComponent {
    pub(crate) node: Option<NodeId>,
    mesh: SharedMesh,
    material: SharedMaterial,
    visible: bool,
}

impl RenderableComponent {
    pub fn new(mesh: SharedMesh, material: SharedMaterial) -> Self {
        Self {
            node: None,
            mesh,
            material,
            visible: true,
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn mesh(&self) -> &SharedMesh {
        &self.mesh
    }

    pub fn set_mesh(&mut self, mesh: SharedMesh) {
        self.mesh = mesh;
    }

    pub fn material(&self) -> &SharedMaterial {
        &self.material
    }

    pub fn set_material(&mut self, material: SharedMaterial) {
        self.material = material;
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}
