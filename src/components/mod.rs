//! Typed capabilities attached to scene nodes.
//!
//! A node carries at most one component per [`ComponentKind`]. Components are a
//! closed set, so they are modelled as the [`Component`] enum and accessed through
//! the [`ComponentType`] trait.

use crate::data_structures::scene_graph::NodeId;

pub mod camera;
pub mod confidence_mesh;
pub mod light;
pub mod renderable;
pub mod text;

pub use camera::CameraComponent;
pub use confidence_mesh::ConfidenceMeshComponent;
pub use light::{LightComponent, LightType, MAXIMUM_LIGHTS};
pub use renderable::RenderableComponent;
pub use text::TextComponent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Camera,
    Renderable,
    Light,
    Text,
    ConfidenceMesh,
}

#[derive(Debug)]
pub enum Component {
    Camera(CameraComponent),
    Renderable(RenderableComponent),
    Light(LightComponent),
    Text(TextComponent),
    ConfidenceMesh(ConfidenceMeshComponent),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Camera(_) => ComponentKind::Camera,
            Component::Renderable(_) => ComponentKind::Renderable,
            Component::Light(_) => ComponentKind::Light,
            Component::Text(_) => ComponentKind::Text,
            Component::ConfidenceMesh(_) => ComponentKind::ConfidenceMesh,
        }
    }

    /// The node this component is attached to.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Component::Camera(c) => c.node,
            Component::Renderable(c) => c.node,
            Component::Light(c) => c.node,
            Component::Text(c) => c.node,
            Component::ConfidenceMesh(c) => c.node,
        }
    }

    pub(crate) fn attach(&mut self, node: NodeId) {
        let slot = match self {
            Component::Camera(c) => &mut c.node,
            Component::Renderable(c) => &mut c.node,
            Component::Light(c) => &mut c.node,
            Component::Text(c) => &mut c.node,
            Component::ConfidenceMesh(c) => &mut c.node,
        };
        *slot = Some(node);
    }
}

/// Concrete component types, for typed lookup on a node.
pub trait ComponentType: Sized {
    const KIND: ComponentKind;

    fn from_component(component: &Component) -> Option<&Self>;
    fn from_component_mut(component: &mut Component) -> Option<&mut Self>;
    fn into_component(self) -> Component;
}

macro_rules! component_type {
    ($ty:ty, $variant:ident) => {
        impl ComponentType for $ty {
            const KIND: ComponentKind = ComponentKind::$variant;

            fn from_component(component: &Component) -> Option<&Self> {
                match component {
                    Component::$variant(c) => Some(c),
                    _ => None,
                }
            }

            fn from_component_mut(component: &mut Component) -> Option<&mut Self> {
                match component {
                    Component::$variant(c) => Some(c),
                    _ => None,
                }
            }

            fn into_component(self) -> Component {
                Component::$variant(self)
            }
        }

        impl From<$ty> for Component {
            fn from(component: $ty) -> Self {
                Component::$variant(component)
            }
        }
    };
}

component_type!(CameraComponent, Camera);
component_type!(RenderableComponent, Renderable);
component_type!(LightComponent, Light);
component_type!(TextComponent, Text);
component_type!(ConfidenceMeshComponent, ConfidenceMesh);
