use crate::{
    data_structures::{
        buffer::VertexBuffer,
        mesh::{Indices, Mesh, attribute_locations},
    },
    device::{Category, DeviceRef, ElementType, IndexFormat, PrimitiveType},
};

/// Built-in meshes the resource pool can hand out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresetMesh {
    /// Unit wireframe cube centered at the origin, one color per corner.
    Cube,
    /// Unit quad in the xy plane with texture coordinates.
    Quad,
    /// Red, green and blue lines along the positive x, y and z axes.
    Axis,
}

impl PresetMesh {
    pub fn build(self, device: &DeviceRef) -> Mesh {
        match self {
            PresetMesh::Cube => cube_mesh(device),
            PresetMesh::Quad => quad_mesh(device),
            PresetMesh::Axis => axis_mesh(device),
        }
    }
}

fn color_buffer(device: &DeviceRef, colors: &[[f32; 4]]) -> VertexBuffer {
    let mut buffer = VertexBuffer::new(device, Category::Static, ElementType::Float, 4);
    buffer.update(bytemuck::cast_slice(colors));
    buffer
}

pub fn cube_mesh(device: &DeviceRef) -> Mesh {
    let mut positions = [[0.0f32; 3]; 8];
    let mut colors = [[0.0f32; 4]; 8];
    // Corner i has bit 2 set for +x, bit 1 for +y and bit 0 for +z.
    for i in 0..8 {
        let bit = |b: usize| ((i >> b) & 1) as f32;
        positions[i] = [bit(2) - 0.5, bit(1) - 0.5, bit(0) - 0.5];
        colors[i] = [bit(2), bit(1), bit(0), 1.0];
    }
    #[rustfmt::skip]
    let indices: [u16; 24] = [
        0, 4, 4, 6, 6, 2, 2, 0,
        1, 5, 5, 7, 7, 3, 3, 1,
        5, 4, 7, 6, 1, 0, 3, 2,
    ];

    let mut mesh = Mesh::new(device, Category::Static, IndexFormat::U16);
    mesh.update_mesh(Some(&positions), None, positions.len(), Some(Indices::U16(&indices)));
    mesh.set_custom_buffer(attribute_locations::COLOR, color_buffer(device, &colors));
    mesh.set_primitive_type(PrimitiveType::Lines);
    mesh
}

pub fn quad_mesh(device: &DeviceRef) -> Mesh {
    let positions = [
        [-0.5, -0.5, 0.0],
        [-0.5, 0.5, 0.0],
        [0.5, -0.5, 0.0],
        [0.5, 0.5, 0.0],
    ];
    let tex_coords = [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
    let indices: [u16; 6] = [0, 1, 2, 3, 2, 1];

    let mut mesh = Mesh::new(device, Category::Static, IndexFormat::U16);
    mesh.update_mesh(Some(&positions), None, positions.len(), Some(Indices::U16(&indices)));
    mesh.update_tex_coords(Some(&tex_coords));
    mesh
}

pub fn axis_mesh(device: &DeviceRef) -> Mesh {
    let positions = [
        [0.0, 0.0, 0.0],
        [0.5, 0.0, 0.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.5, 0.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.5],
    ];
    let colors = [
        [1.0, 0.0, 0.0, 1.0],
        [1.0, 0.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
        [0.0, 0.0, 1.0, 1.0],
        [0.0, 0.0, 1.0, 1.0],
    ];

    let mut mesh = Mesh::new(device, Category::Static, IndexFormat::U32);
    mesh.update_mesh(Some(&positions), None, positions.len(), None);
    mesh.set_custom_buffer(attribute_locations::COLOR, color_buffer(device, &colors));
    mesh.set_primitive_type(PrimitiveType::Lines);
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessDevice;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn cube_is_twelve_colored_lines() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mesh = cube_mesh(&device);
        assert_eq!(mesh.primitive_type(), PrimitiveType::Lines);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.index_count(), 24);
        assert!(mesh.uses_indexed_rendering());

        let recorder = recorder.borrow();
        let (position, _) = recorder
            .vertex_attribute(mesh.vertex_array(), attribute_locations::POSITION)
            .unwrap();
        let positions = floats(recorder.buffer_data(position.buffer).unwrap());
        // Corner 5 is (+x, -y, +z).
        assert_eq!(&positions[15..18], &[0.5, -0.5, 0.5]);

        let colors = mesh.custom_buffer(attribute_locations::COLOR).unwrap();
        assert_eq!(colors.vertex_count(), 8);
        let colors = floats(recorder.buffer_data(colors.handle()).unwrap());
        assert_eq!(&colors[20..24], &[1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn quad_is_two_textured_triangles() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mesh = quad_mesh(&device);
        assert_eq!(mesh.primitive_type(), PrimitiveType::Triangles);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.index_count(), 6);
        let (_, enabled) = recorder
            .borrow()
            .vertex_attribute(mesh.vertex_array(), attribute_locations::TEXTURE_COORDINATES)
            .unwrap();
        assert!(enabled);
    }

    #[test]
    fn axis_draws_without_indices() {
        let device = HeadlessDevice::shared();
        let mesh = PresetMesh::Axis.build(&device);
        assert_eq!(mesh.vertex_count(), 6);
        assert!(!mesh.uses_indexed_rendering());
        assert_eq!(mesh.primitive_type(), PrimitiveType::Lines);
        assert!(mesh.custom_buffer(attribute_locations::COLOR).is_some());
    }
}
