use crate::{
    data_structures::{material::Material, program::ShaderStage},
    pipelines::flat::SOLID_COLOR_FRAGMENT_SHADER,
    resources::ResourcePool,
};

pub const MESH_VISUALIZATION_VERTEX_SHADER: &str = include_str!("mesh_visualization_vertex.wgsl");
pub const MESH_VISUALIZATION_GEOMETRY_SHADER: &str = include_str!("mesh_visualization_geometry.wgsl");

/// Colors a [`ConfidenceMeshComponent`](crate::components::ConfidenceMeshComponent)
/// from red (confidence 0) to green (confidence 1).
///
/// On devices with a geometry stage the triangles are drawn as wireframe plus
/// vertex normals.
pub fn mk_mesh_visualization_material(pool: &mut ResourcePool) -> anyhow::Result<Material> {
    let vertex = pool.load_program(
        ShaderStage::Vertex,
        MESH_VISUALIZATION_VERTEX_SHADER,
        Some("mesh_visualization_vertex"),
    )?;
    let fragment = pool.load_program(
        ShaderStage::Fragment,
        SOLID_COLOR_FRAGMENT_SHADER,
        Some("solid_color_fragment"),
    )?;
    let mut material = Material::new(pool.device(), "mesh_visualization", vertex, fragment)?;

    let supports_geometry_stage = pool.device().borrow().limits().supports_geometry_stage;
    if supports_geometry_stage {
        let geometry = pool.load_program(
            ShaderStage::Geometry,
            MESH_VISUALIZATION_GEOMETRY_SHADER,
            Some("mesh_visualization_geometry"),
        )?;
        material.set_geometry_program(Some(geometry))?;
    }

    material.set("OverrideVertexColor", false);
    Ok(material)
}
