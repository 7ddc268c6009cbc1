use cgmath::Vector4;

use crate::{
    data_structures::{material::Material, program::ShaderStage},
    material_properties,
    resources::ResourcePool,
};

pub const FLAT_VERTEX_SHADER: &str = include_str!("flat_vertex.wgsl");
/// Also the fragment stage of the mesh visualization.
pub const SOLID_COLOR_FRAGMENT_SHADER: &str = include_str!("flat_fragment.wgsl");

material_properties! {
    pub trait FlatProperties {
        "Color": Vector4<f32> => color, set_color;
        "OverrideVertexColor": bool => override_vertex_color, set_override_vertex_color;
    }
}

/// Draws the mesh's vertex colors. With `OverrideVertexColor` set, every
/// fragment gets `color` instead.
pub fn mk_flat_material(pool: &mut ResourcePool, color: Vector4<f32>) -> anyhow::Result<Material> {
    let vertex = pool.load_program(ShaderStage::Vertex, FLAT_VERTEX_SHADER, Some("flat_vertex"))?;
    let fragment = pool.load_program(
        ShaderStage::Fragment,
        SOLID_COLOR_FRAGMENT_SHADER,
        Some("solid_color_fragment"),
    )?;
    let mut material = Material::new(pool.device(), "flat", vertex, fragment)?;
    material.set_color(color);
    Ok(material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_structures::program::MATERIAL_BLOCK, device::headless::HeadlessDevice};
    use std::rc::Rc;

    #[test]
    fn flat_material_sets_color_only() {
        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        let material = mk_flat_material(&mut pool, Vector4::new(0.2, 0.4, 0.6, 1.0)).unwrap();

        assert_eq!(material.color(), Vector4::new(0.2, 0.4, 0.6, 1.0));
        assert!(!material.override_vertex_color());
        assert!(material.is_dirty());
        assert_eq!(material.uniform_block().unwrap().name, MATERIAL_BLOCK);
        assert_eq!(material.uniform_block().unwrap().size, 32);
        assert!(material.texture_uniforms().is_empty());
    }

    #[test]
    fn flat_materials_share_programs() {
        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        let red = mk_flat_material(&mut pool, Vector4::new(1.0, 0.0, 0.0, 1.0)).unwrap();
        let blue = mk_flat_material(&mut pool, Vector4::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        assert!(Rc::ptr_eq(red.vertex_program(), blue.vertex_program()));
        assert!(Rc::ptr_eq(red.fragment_program(), blue.fragment_program()));
        assert_eq!(pool.program_count(), 2);
    }

    #[test]
    fn override_flag_is_packed_after_color() {
        let device = HeadlessDevice::shared();
        let mut pool = ResourcePool::new(&device);
        let mut material = mk_flat_material(&mut pool, Vector4::new(1.0, 1.0, 1.0, 1.0)).unwrap();
        material.set_override_vertex_color(true);
        material.update_uniform_buffer();

        let cache = material.uniform_cache();
        assert_eq!(u32::from_le_bytes(cache[16..20].try_into().unwrap()), 1);
        assert_eq!(f32::from_le_bytes(cache[0..4].try_into().unwrap()), 1.0);
        assert!(!material.is_dirty());
    }
}
