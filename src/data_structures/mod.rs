//! Engine data structures: scene graph, GPU buffers and the objects built on them.
//!
//! - `scene_graph` holds nodes with a lazily cached transform hierarchy
//! - `buffer` wraps device buffers (raw, vertex and index)
//! - `mesh` combines vertex streams and indices into a drawable vertex array
//! - `texture` contains textures and render targets
//! - `program` and `reflect` compile shader stages and describe their interface
//! - `variable` holds typed material parameters
//! - `material` binds parameters of a program pair through reflection

pub mod buffer;
pub mod material;
pub mod mesh;
pub mod program;
pub mod reflect;
pub mod scene_graph;
pub mod texture;
pub mod variable;
