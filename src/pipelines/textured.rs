use std::rc::Rc;

use crate::{
    data_structures::{material::Material, program::ShaderStage, texture::Texture},
    material_properties,
    resources::ResourcePool,
};

pub const TEXTURED_VERTEX_SHADER: &str = include_str!("textured_vertex.wgsl");
pub const TEXTURED_FRAGMENT_SHADER: &str = include_str!("textured_fragment.wgsl");

material_properties! {
    pub trait TexturedProperties {
        "Texture0": Option<Rc<Texture>> => texture0, set_texture0;
    }
}

/// Unlit material sampling `texture` with the mesh's texture coordinates.
pub fn mk_textured_material(
    pool: &mut ResourcePool,
    texture: Option<Rc<Texture>>,
) -> anyhow::Result<Material> {
    let vertex = pool.load_program(ShaderStage::Vertex, TEXTURED_VERTEX_SHADER, Some("textured_vertex"))?;
    let fragment = pool.load_program(
        ShaderStage::Fragment,
        TEXTURED_FRAGMENT_SHADER,
        Some("textured_fragment"),
    )?;
    let mut material = Material::new(pool.device(), "textured", vertex, fragment)?;
    material.set_texture0(texture);
    Ok(material)
}
