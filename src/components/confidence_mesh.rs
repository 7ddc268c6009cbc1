use crate::{
    data_structures::{
        buffer::VertexBuffer,
        mesh::{Indices, Mesh, SharedMesh, attribute_locations},
        scene_graph::NodeId,
    },
    device::{Category, DeviceRef, ElementType, IndexFormat},
};

/// A reconstructed surface mesh carrying a per-vertex confidence value.
///
/// Confidences are streamed as one float per vertex at
/// [`attribute_locations::CONFIDENCE`].
#[derive(Debug)]
pub struct ConfidenceMeshComponent {
    pub(crate) node: Option<NodeId>,
    mesh: SharedMesh,
    staging: Vec<f32>,
}

impl ConfidenceMeshComponent {
    pub fn new(device: &DeviceRef) -> Self {
        let mut mesh = Mesh::new(device, Category::Dynamic, IndexFormat::U16);
        mesh.set_custom_buffer(
            attribute_locations::CONFIDENCE,
            VertexBuffer::new(device, Category::Dynamic, ElementType::Float, 1),
        );
        Self {
            node: None,
            mesh: mesh.into_shared(),
            staging: Vec::new(),
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn mesh(&self) -> &SharedMesh {
        &self.mesh
    }

    /// Uploads a new surface. Vertices without a confidence get `0.0`.
    pub fn update_mesh_with_confidence(
        &mut self,
        vertices: &[[f32; 3]],
        normals: Option<&[[f32; 3]]>,
        confidences: Option<&[f32]>,
        indices: &[u16],
    ) {
        let mut mesh = self.mesh.borrow_mut();
        mesh.update_mesh(Some(vertices), normals, vertices.len(), Some(Indices::U16(indices)));

        let count = mesh.vertex_count() as usize;
        let supplied = confidences.unwrap_or(&[]);
        self.staging.clear();
        self.staging.extend_from_slice(&supplied[..count.min(supplied.len())]);
        self.staging.resize(count, 0.0);
        if let Some(buffer) = mesh.custom_buffer_mut(attribute_locations::CONFIDENCE) {
            buffer.update(bytemuck::cast_slice(&self.staging));
        }
    }
}
