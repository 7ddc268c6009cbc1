use std::rc::Rc;

use crate::{
    data_structures::{material::Material, program::ShaderStage, texture::Texture},
    material_properties,
    resources::ResourcePool,
};

pub const PBR_VERTEX_SHADER: &str = include_str!("pbr_vertex.wgsl");
pub const PBR_FRAGMENT_SHADER: &str = include_str!("pbr_fragment.wgsl");

material_properties! {
    pub trait PbrProperties {
        "Albedo": Option<Rc<Texture>> => albedo, set_albedo;
        "Metallic": Option<Rc<Texture>> => metallic, set_metallic;
        "Roughness": Option<Rc<Texture>> => roughness, set_roughness;
        "AmbientOcclusion": Option<Rc<Texture>> => ambient_occlusion, set_ambient_occlusion;
        "Emissive": Option<Rc<Texture>> => emissive, set_emissive;
        "Normals": Option<Rc<Texture>> => normals, set_normals;
        "MetallicChannel": i32 => metallic_channel, set_metallic_channel;
        "RoughnessChannel": i32 => roughness_channel, set_roughness_channel;
        "HasNormals": bool => has_normals, set_has_normals;
        "HasAlbedo": bool => has_albedo, set_has_albedo;
        "HasNormalMap": bool => has_normal_map, set_has_normal_map;
        "HasMetallic": bool => has_metallic, set_has_metallic;
        "HasRoughness": bool => has_roughness, set_has_roughness;
        "HasAmbientOcclusion": bool => has_ambient_occlusion, set_has_ambient_occlusion;
        "HasEmissive": bool => has_emissive, set_has_emissive;
    }
}

/// Metallic/roughness material lit by every queued light.
///
/// All maps start out unset. Each map only contributes once its `Has*` flag is
/// raised; the channel indices pick which component of the metallic and
/// roughness maps is read (0 = r ... 3 = a).
pub fn mk_pbr_material(pool: &mut ResourcePool) -> anyhow::Result<Material> {
    let vertex = pool.load_program(ShaderStage::Vertex, PBR_VERTEX_SHADER, Some("pbr_vertex"))?;
    let fragment = pool.load_program(ShaderStage::Fragment, PBR_FRAGMENT_SHADER, Some("pbr_fragment"))?;
    Material::new(pool.device(), "pbr", vertex, fragment)
}
