//! scene-ngin
//!
//! A scene graph with a single-pass forward renderer. Nodes form a transform
//! hierarchy and carry components (cameras, lights, renderables). Materials derive
//! their parameters from shader reflection, so a material only needs its programs
//! to know which values it accepts and where they live in its uniform block.
//!
//! High-level modules
//! - `components`: typed capabilities attached to nodes (camera, light, renderable, text)
//! - `context`: the device plus the shared resource caches created on it
//! - `data_structures`: scene graph, buffers, meshes, textures, programs and materials
//! - `device`: the handle based GPU abstraction with a headless and a `wgpu` backend
//! - `pipelines`: material presets and their WGSL shaders
//! - `resources`: resource caching, preset meshes and file loading
//! - `render`: queueing, sorting and drawing of a scene per camera
//!

pub mod components;
pub mod context;
pub mod data_structures;
pub mod device;
pub mod pipelines;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
