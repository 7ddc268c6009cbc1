//! Textures and render targets.
//!
//! This module provides [`Texture`], a handle to a 2D or 2D-array GPU texture,
//! and [`RenderTarget`], a framebuffer assembled from a color and a depth texture
//! that cameras render into.

use std::rc::Rc;

use anyhow::*;
use image::{GenericImageView, ImageFormat, load_from_memory_with_format};

use crate::device::{
    Attachment, DeviceRef, FramebufferHandle, TextureDescriptor, TextureHandle, TextureKind,
};

/// A GPU texture.
///
/// Textures created through [`new`](Self::new) or the image loaders are owned and
/// released on drop. [`wrap`](Self::wrap) adopts a texture that somebody else
/// manages and never deletes it.
pub struct Texture {
    device: DeviceRef,
    handle: TextureHandle,
    desc: TextureDescriptor,
    owned: bool,
}

impl Texture {
    pub fn new(device: &DeviceRef, desc: TextureDescriptor, data: Option<&[u8]>) -> Self {
        let handle = device.borrow_mut().create_texture(&desc, data);
        Self {
            device: device.clone(),
            handle,
            desc,
            owned: true,
        }
    }

    pub fn wrap(device: &DeviceRef, handle: TextureHandle, desc: TextureDescriptor) -> Self {
        Self {
            device: device.clone(),
            handle,
            desc,
            owned: false,
        }
    }

    /// Load a texture from encoded image bytes (PNG, JPEG, etc.).
    ///
    /// # Arguments
    ///
    /// * `format` is an optional file extension hint (e.g. "png"). If None, auto-detect.
    /// * `srgb` picks between an sRGB (color data) and a linear (normal maps, masks) format
    pub fn from_bytes(device: &DeviceRef, bytes: &[u8], format: Option<&str>, srgb: bool) -> Result<Self> {
        let img = match format {
            None => image::load_from_memory(bytes)?,
            Some(ext) => {
                let format = ImageFormat::from_extension(ext)
                    .with_context(|| format!("Unknown image format \"{}\"", ext))?;
                load_from_memory_with_format(bytes, format)?
            }
        };
        Ok(Self::from_image(device, &img, srgb))
    }

    pub fn from_image(device: &DeviceRef, img: &image::DynamicImage, srgb: bool) -> Self {
        let (width, height) = img.dimensions();
        let rgba = img.to_rgba8();
        let desc = TextureDescriptor {
            format: if srgb {
                wgpu::TextureFormat::Rgba8UnormSrgb
            } else {
                wgpu::TextureFormat::Rgba8Unorm
            },
            ..TextureDescriptor::color(width, height)
        };
        Self::new(device, desc, Some(&rgba))
    }

    /// A `width`×`height` texture filled with one RGBA8 color.
    pub fn solid(device: &DeviceRef, width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data: Vec<u8> = rgba
            .iter()
            .cycle()
            .take(width as usize * height as usize * 4)
            .copied()
            .collect();
        Self::new(device, TextureDescriptor::color(width, height), Some(&data))
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn kind(&self) -> TextureKind {
        self.desc.kind
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn layers(&self) -> u32 {
        self.desc.layers
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.desc.format
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("handle", &self.handle)
            .field("desc", &self.desc)
            .field("owned", &self.owned)
            .finish()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let std::result::Result::Ok(mut device) = self.device.try_borrow_mut() {
            device.delete_texture(self.handle);
        }
    }
}

/// The destination a camera renders into: a framebuffer with color and depth.
pub struct RenderTarget {
    device: DeviceRef,
    framebuffer: FramebufferHandle,
    color: Option<Rc<Texture>>,
    depth: Option<Rc<Texture>>,
    color_layer: u32,
    depth_layer: u32,
    width: u32,
    height: u32,
}

impl RenderTarget {
    /// Assembles a framebuffer from existing textures.
    ///
    /// Fails if the device reports the framebuffer incomplete.
    pub fn new(
        device: &DeviceRef,
        color: Option<Rc<Texture>>,
        depth: Option<Rc<Texture>>,
        color_layer: u32,
        depth_layer: u32,
    ) -> Result<Self> {
        let framebuffer = device.borrow_mut().create_framebuffer(
            color.as_ref().map(|texture| Attachment {
                texture: texture.handle(),
                layer: color_layer,
            }),
            depth.as_ref().map(|texture| Attachment {
                texture: texture.handle(),
                layer: depth_layer,
            }),
        )?;
        let (width, height) = color
            .as_ref()
            .or(depth.as_ref())
            .map(|texture| (texture.width(), texture.height()))
            .unwrap_or_default();
        Ok(Self {
            device: device.clone(),
            framebuffer,
            color,
            depth,
            color_layer,
            depth_layer,
            width,
            height,
        })
    }

    /// A target with a fresh sRGB color texture and a depth texture.
    pub fn new_offscreen(device: &DeviceRef, width: u32, height: u32) -> Result<Self> {
        let color = Texture::new(
            device,
            TextureDescriptor {
                render_attachment: true,
                ..TextureDescriptor::color(width, height)
            },
            None,
        );
        let depth = Texture::new(device, TextureDescriptor::depth(width, height), None);
        Self::new(device, Some(Rc::new(color)), Some(Rc::new(depth)), 0, 0)
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn color_texture(&self) -> Option<&Rc<Texture>> {
        self.color.as_ref()
    }

    pub fn depth_texture(&self) -> Option<&Rc<Texture>> {
        self.depth.as_ref()
    }

    pub fn color_layer(&self) -> u32 {
        self.color_layer
    }

    pub fn depth_layer(&self) -> u32 {
        self.depth_layer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("framebuffer", &self.framebuffer)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if let std::result::Result::Ok(mut device) = self.device.try_borrow_mut() {
            device.delete_framebuffer(self.framebuffer);
        }
    }
}
