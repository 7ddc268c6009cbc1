//! GPU memory backed byte arrays.
//!
//! - [`Buffer`] is the raw store, tagged with its target and [`Category`]
//! - [`VertexBuffer`] adds the per-vertex attribute layout
//! - [`IndexBuffer`] tracks element width and derives the index count

use std::ops::{Deref, DerefMut};

use crate::device::{
    AttributeFormat, BufferHandle, BufferTarget, Category, DeviceRef, ElementType, IndexFormat,
};

pub struct Buffer {
    device: DeviceRef,
    handle: BufferHandle,
    target: BufferTarget,
    category: Category,
    size: u64,
}

impl Buffer {
    pub fn new(device: &DeviceRef, category: Category, target: BufferTarget) -> Self {
        let handle = device.borrow_mut().create_buffer(target);
        Self {
            device: device.clone(),
            handle,
            target,
            category,
            size: 0,
        }
    }

    /// Replaces the contents. Empty data only resets the size, the device
    /// buffer keeps its old bytes but nothing reads past `size`.
    pub fn update(&mut self, data: &[u8]) {
        self.size = data.len() as u64;
        if data.is_empty() {
            return;
        }
        self.device
            .borrow_mut()
            .upload_buffer(self.handle, self.category, data);
    }

    /// Overwrites `data.len()` bytes at `offset` without reallocating.
    pub fn write(&mut self, offset: u64, data: &[u8]) {
        if offset + data.len() as u64 > self.size {
            log::warn!(
                "Writing {} bytes at offset {} past the end of a {} byte buffer",
                data.len(),
                offset,
                self.size
            );
        }
        self.device.borrow_mut().write_buffer(self.handle, offset, data);
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Size in bytes of the last upload.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("target", &self.target)
            .field("category", &self.category)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Ok(mut device) = self.device.try_borrow_mut() {
            device.delete_buffer(self.handle);
        }
    }
}

#[derive(Debug)]
pub struct VertexBuffer {
    buffer: Buffer,
    format: AttributeFormat,
}

impl VertexBuffer {
    pub fn new(device: &DeviceRef, category: Category, element: ElementType, components: u8) -> Self {
        Self {
            buffer: Buffer::new(device, category, BufferTarget::Vertex),
            format: AttributeFormat::new(element, components),
        }
    }

    pub fn format(&self) -> AttributeFormat {
        self.format
    }

    pub fn element_type(&self) -> ElementType {
        self.format.element
    }

    pub fn element_count(&self) -> u8 {
        self.format.components
    }

    /// Bytes per vertex.
    pub fn vertex_size(&self) -> u64 {
        self.format.stride()
    }

    pub fn vertex_count(&self) -> u64 {
        self.buffer.size() / self.vertex_size().max(1)
    }
}

impl Deref for VertexBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for VertexBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

#[derive(Debug)]
pub struct IndexBuffer {
    buffer: Buffer,
    format: IndexFormat,
    count: u32,
}

impl IndexBuffer {
    pub fn new(device: &DeviceRef, category: Category, format: IndexFormat) -> Self {
        Self {
            buffer: Buffer::new(device, category, BufferTarget::Index),
            format,
            count: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.buffer.update(data);
        self.count = (self.buffer.size() / self.format.size()) as u32;
    }

    pub fn format(&self) -> IndexFormat {
        self.format
    }

    /// Byte width of one index.
    pub fn index_size(&self) -> u64 {
        self.format.size()
    }

    pub fn index_count(&self) -> u32 {
        self.count
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }
}
