//! Meshes: vertex streams, indices and the vertex array tying them together.
//!
//! Every mesh owns position, normal and texcoord streams plus an index buffer.
//! Extra per-vertex streams (color, confidence, ...) are attached with
//! [`Mesh::set_custom_buffer`]. Attribute locations are fixed, see
//! [`attribute_locations`].

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::{
    data_structures::buffer::{IndexBuffer, VertexBuffer},
    device::{
        Category, DeviceRef, ElementType, IndexFormat, PrimitiveType, VertexArrayHandle,
        VertexAttribute,
    },
};

pub mod attribute_locations {
    pub const POSITION: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const TEXTURE_COORDINATES: u32 = 2;
    pub const COLOR: u32 = 3;
    pub const CONFIDENCE: u32 = 4;
}

/// Index data in one of the three supported widths.
#[derive(Clone, Copy, Debug)]
pub enum Indices<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl<'a> Indices<'a> {
    pub fn format(&self) -> IndexFormat {
        match self {
            Indices::U8(_) => IndexFormat::U8,
            Indices::U16(_) => IndexFormat::U16,
            Indices::U32(_) => IndexFormat::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Indices::U8(i) => i.len(),
            Indices::U16(i) => i.len(),
            Indices::U32(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bytes(&self, count: usize) -> &'a [u8] {
        match *self {
            Indices::U8(i) => &i[..count.min(i.len())],
            Indices::U16(i) => bytemuck::cast_slice(&i[..count.min(i.len())]),
            Indices::U32(i) => bytemuck::cast_slice(&i[..count.min(i.len())]),
        }
    }
}

/// Meshes are shared between renderables and the components that update them.
pub type SharedMesh = Rc<RefCell<Mesh>>;

pub struct Mesh {
    device: DeviceRef,
    vertex_array: VertexArrayHandle,
    positions: VertexBuffer,
    normals: VertexBuffer,
    tex_coords: VertexBuffer,
    indices: IndexBuffer,
    custom: BTreeMap<u32, VertexBuffer>,
    primitive: PrimitiveType,
    point_size: f32,
    vertex_count: u32,
}

impl Mesh {
    pub fn new(device: &DeviceRef, category: Category, index_format: IndexFormat) -> Self {
        let positions = VertexBuffer::new(device, category, ElementType::Float, 3);
        let normals = VertexBuffer::new(device, category, ElementType::Float, 3);
        let tex_coords = VertexBuffer::new(device, category, ElementType::Float, 2);
        let indices = IndexBuffer::new(device, category, index_format);

        let vertex_array = {
            let mut gpu = device.borrow_mut();
            let vao = gpu.create_vertex_array();
            for (location, buffer) in [
                (attribute_locations::POSITION, &positions),
                (attribute_locations::NORMAL, &normals),
                (attribute_locations::TEXTURE_COORDINATES, &tex_coords),
            ] {
                gpu.set_vertex_attribute(
                    vao,
                    location,
                    VertexAttribute {
                        buffer: buffer.handle(),
                        format: buffer.format(),
                    },
                );
                gpu.enable_vertex_attribute(vao, location, false);
            }
            gpu.set_index_buffer(vao, indices.handle(), index_format);
            vao
        };

        Self {
            device: device.clone(),
            vertex_array,
            positions,
            normals,
            tex_coords,
            indices,
            custom: BTreeMap::new(),
            primitive: PrimitiveType::default(),
            point_size: 1.0,
            vertex_count: 0,
        }
    }

    pub fn into_shared(self) -> SharedMesh {
        Rc::new(RefCell::new(self))
    }

    /// Attaches an extra attribute stream at `location`, always enabled.
    pub fn set_custom_buffer(&mut self, location: u32, buffer: VertexBuffer) {
        {
            let mut gpu = self.device.borrow_mut();
            gpu.set_vertex_attribute(
                self.vertex_array,
                location,
                VertexAttribute {
                    buffer: buffer.handle(),
                    format: buffer.format(),
                },
            );
            gpu.enable_vertex_attribute(self.vertex_array, location, true);
        }
        self.custom.insert(location, buffer);
    }

    pub fn custom_buffer(&self, location: u32) -> Option<&VertexBuffer> {
        self.custom.get(&location)
    }

    pub fn custom_buffer_mut(&mut self, location: u32) -> Option<&mut VertexBuffer> {
        self.custom.get_mut(&location)
    }

    /// Uploads geometry.
    ///
    /// Missing positions or normals disable their attribute. Indices of a width
    /// other than the mesh's index format are rejected.
    pub fn update_mesh(
        &mut self,
        vertices: Option<&[[f32; 3]]>,
        normals: Option<&[[f32; 3]]>,
        vertex_count: usize,
        indices: Option<Indices>,
    ) {
        let supplied = [vertices.map(<[_]>::len), normals.map(<[_]>::len)]
            .into_iter()
            .flatten()
            .fold(vertex_count, usize::min);
        if supplied < vertex_count {
            log::warn!(
                "Mesh update announces {} vertices but only {} were supplied",
                vertex_count,
                supplied
            );
        }
        let vertex_count = supplied;
        self.update_stream(attribute_locations::POSITION, vertices, vertex_count);
        self.update_stream(attribute_locations::NORMAL, normals, vertex_count);

        if let Some(indices) = indices {
            if indices.format() != self.indices.format() {
                log::error!(
                    "Mesh expects {:?} indices but got {:?}, indices left unchanged",
                    self.indices.format(),
                    indices.format()
                );
            } else {
                self.indices.update(indices.bytes(indices.len()));
            }
        }

        self.vertex_count = vertex_count as u32;
    }

    fn update_stream(&mut self, location: u32, data: Option<&[[f32; 3]]>, vertex_count: usize) {
        let buffer = match location {
            attribute_locations::POSITION => &mut self.positions,
            _ => &mut self.normals,
        };
        match data {
            Some(data) => {
                buffer.update(bytemuck::cast_slice(&data[..vertex_count]));
                self.device
                    .borrow_mut()
                    .enable_vertex_attribute(self.vertex_array, location, true);
            }
            None => self
                .device
                .borrow_mut()
                .enable_vertex_attribute(self.vertex_array, location, false),
        }
    }

    /// Uploads one texcoord per vertex of the last [`update_mesh`](Self::update_mesh).
    pub fn update_tex_coords(&mut self, tex_coords: Option<&[[f32; 2]]>) {
        match tex_coords {
            Some(coords) => {
                let count = self.vertex_count as usize;
                if coords.len() >= count {
                    self.tex_coords.update(bytemuck::cast_slice(&coords[..count]));
                } else {
                    let mut padded = coords.to_vec();
                    padded.resize(count, [0.0, 0.0]);
                    self.tex_coords.update(bytemuck::cast_slice(&padded));
                }
                self.device.borrow_mut().enable_vertex_attribute(
                    self.vertex_array,
                    attribute_locations::TEXTURE_COORDINATES,
                    true,
                );
            }
            None => self.device.borrow_mut().enable_vertex_attribute(
                self.vertex_array,
                attribute_locations::TEXTURE_COORDINATES,
                false,
            ),
        }
    }

    /// Whether draws go through the index buffer. Points and meshes without
    /// indices draw `vertex_count` vertices instead.
    pub fn uses_indexed_rendering(&self) -> bool {
        self.primitive != PrimitiveType::Points && self.indices.index_count() > 0
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.indices.index_count()
    }

    pub fn index_format(&self) -> IndexFormat {
        self.indices.format()
    }

    pub fn vertex_array(&self) -> VertexArrayHandle {
        self.vertex_array
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive
    }

    pub fn set_primitive_type(&mut self, primitive: PrimitiveType) {
        self.primitive = primitive;
    }

    pub fn point_size(&self) -> f32 {
        self.point_size
    }

    pub fn set_point_size(&mut self, point_size: f32) {
        self.point_size = point_size;
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("vertex_array", &self.vertex_array)
            .field("primitive", &self.primitive)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.indices.index_count())
            .finish()
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        if let Ok(mut device) = self.device.try_borrow_mut() {
            device.delete_vertex_array(self.vertex_array);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::{DeviceCommand, HeadlessDevice};

    const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

    #[test]
    fn update_enables_only_supplied_streams() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mut mesh = Mesh::new(&device, Category::Static, IndexFormat::U16);
        mesh.update_mesh(Some(&TRIANGLE), None, 3, Some(Indices::U16(&[0, 1, 2])));

        let recorder = recorder.borrow();
        let vao = mesh.vertex_array();
        assert_eq!(recorder.vertex_attribute(vao, attribute_locations::POSITION).unwrap().1, true);
        assert_eq!(recorder.vertex_attribute(vao, attribute_locations::NORMAL).unwrap().1, false);
        assert_eq!(recorder.vertex_attribute(vao, attribute_locations::TEXTURE_COORDINATES).unwrap().1, false);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.index_count(), 3);
    }

    #[test]
    fn vertex_count_recorded_without_normals() {
        let device = HeadlessDevice::shared();
        let mut mesh = Mesh::new(&device, Category::Static, IndexFormat::U32);
        mesh.update_mesh(Some(&TRIANGLE), None, 3, None);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.index_count(), 0);
    }

    #[test]
    fn indexed_rendering_rules() {
        let device = HeadlessDevice::shared();
        let mut mesh = Mesh::new(&device, Category::Static, IndexFormat::U16);
        mesh.update_mesh(Some(&TRIANGLE), None, 3, None);
        assert!(!mesh.uses_indexed_rendering());

        mesh.update_mesh(Some(&TRIANGLE), None, 3, Some(Indices::U16(&[0, 1, 2])));
        assert!(mesh.uses_indexed_rendering());

        mesh.set_primitive_type(PrimitiveType::Points);
        assert!(!mesh.uses_indexed_rendering());
    }

    #[test]
    fn emptied_mesh_stops_indexing() {
        let device = HeadlessDevice::shared();
        let mut mesh = Mesh::new(&device, Category::Dynamic, IndexFormat::U16);
        mesh.update_mesh(Some(&TRIANGLE), None, 3, Some(Indices::U16(&[0, 1, 2])));
        mesh.update_mesh(Some(&[]), None, 0, Some(Indices::U16(&[])));
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.index_count(), 0);
        assert!(!mesh.uses_indexed_rendering());
    }

    #[test]
    fn vertex_count_clamped_to_supplied_streams() {
        let device = HeadlessDevice::shared();
        let mut mesh = Mesh::new(&device, Category::Static, IndexFormat::U16);
        mesh.update_mesh(Some(&TRIANGLE), Some(&TRIANGLE[..2]), 5, None);
        assert_eq!(mesh.vertex_count(), 2);
        mesh.update_tex_coords(Some(&[[1.0, 1.0]]));
        assert_eq!(mesh.tex_coords.size(), 16);
    }

    #[test]
    fn mismatched_index_width_is_rejected() {
        let device = HeadlessDevice::shared();
        let mut mesh = Mesh::new(&device, Category::Static, IndexFormat::U16);
        mesh.update_mesh(Some(&TRIANGLE), None, 3, Some(Indices::U32(&[0, 1, 2])));
        assert_eq!(mesh.index_count(), 0);
    }

    #[test]
    fn tex_coords_toggle_attribute() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mut mesh = Mesh::new(&device, Category::Static, IndexFormat::U16);
        mesh.update_mesh(Some(&TRIANGLE), None, 3, None);
        mesh.update_tex_coords(Some(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]));
        let vao = mesh.vertex_array();
        assert!(recorder.borrow().vertex_attribute(vao, attribute_locations::TEXTURE_COORDINATES).unwrap().1);
        mesh.update_tex_coords(None);
        assert!(!recorder.borrow().vertex_attribute(vao, attribute_locations::TEXTURE_COORDINATES).unwrap().1);
    }

    #[test]
    fn custom_buffer_is_enabled_at_its_location() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mut mesh = Mesh::new(&device, Category::Static, IndexFormat::U16);
        let colors = VertexBuffer::new(&device, Category::Static, ElementType::Float, 4);
        let handle = colors.handle();
        mesh.set_custom_buffer(attribute_locations::COLOR, colors);

        let (attribute, enabled) = recorder
            .borrow()
            .vertex_attribute(mesh.vertex_array(), attribute_locations::COLOR)
            .unwrap();
        assert!(enabled);
        assert_eq!(attribute.buffer, handle);
        assert!(mesh.custom_buffer(attribute_locations::COLOR).is_some());
    }

    #[test]
    fn drop_deletes_vertex_array() {
        let (device, recorder) = HeadlessDevice::shared_inspectable();
        let mesh = Mesh::new(&device, Category::Static, IndexFormat::U16);
        let vao = mesh.vertex_array();
        drop(mesh);
        assert!(recorder.borrow().commands().contains(&DeviceCommand::DeleteVertexArray(vao)));
    }
}
