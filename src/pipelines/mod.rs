//! Material presets and their WGSL shaders.
//!
//! Every preset pulls its programs through the [`ResourcePool`](crate::resources::ResourcePool)
//! so materials of the same kind share compiled programs.
//!
//! - `flat` draws vertex colors or a single override color
//! - `textured` samples one texture
//! - `pbr` is a metallic/roughness material lit by the queued lights
//! - `mesh_visualization` colors a confidence mesh from red to green
//!
//! Shaders follow one binding convention: the camera block sits in group 0, the
//! model block in group 1, the material and lights blocks in group 2 and textures
//! in group 3 with the sampler last.

pub mod flat;
pub mod mesh_visualization;
pub mod pbr;
pub mod textured;
