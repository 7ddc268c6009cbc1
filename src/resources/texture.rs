use std::path::Path;

use anyhow::Context;

use crate::{data_structures::texture::Texture, device::DeviceRef};

pub fn load_string(path: impl AsRef<Path>) -> anyhow::Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))
}

pub fn load_binary(path: impl AsRef<Path>) -> anyhow::Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).with_context(|| format!("Could not read {}", path.display()))
}

/// Decodes the image at `path`. The file extension, if any, picks the decoder.
pub fn load_texture(device: &DeviceRef, path: impl AsRef<Path>, srgb: bool) -> anyhow::Result<Texture> {
    let path = path.as_ref();
    let data = load_binary(path)?;
    let extension = path.extension().and_then(|ext| ext.to_str());
    Texture::from_bytes(device, &data, extension, srgb)
        .with_context(|| format!("Could not decode texture {}", path.display()))
}
