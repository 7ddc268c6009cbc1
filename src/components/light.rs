use cgmath::{InnerSpace, Vector3};

use crate::data_structures::scene_graph::NodeId;

/// Upper bound of lights uploaded per material bind. Extra lights are ignored.
pub const MAXIMUM_LIGHTS: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum LightType {
    #[default]
    Point = 0,
    Directional = 1,
}

/// A light source. Its position is the world translation of its node.
#[derive(Clone, Debug)]
pub struct LightComponent {
    pub(crate) node: Option<NodeId>,
    light_type: LightType,
    color: Vector3<f32>,
    direction: Vector3<f32>,
    strength: f32,
}

impl Default for LightComponent {
    fn default() -> Self {
        Self {
            node: None,
            light_type: LightType::Point,
            color: Vector3::new(1.0, 1.0, 1.0),
            direction: Vector3::new(0.0, -1.0, -1.0).normalize(),
            strength: 1.0,
        }
    }
}

impl LightComponent {
    pub fn new(light_type: LightType) -> Self {
        Self {
            light_type,
            ..Default::default()
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn light_type(&self) -> LightType {
        self.light_type
    }

    pub fn set_light_type(&mut self, light_type: LightType) {
        self.light_type = light_type;
    }

    pub fn color(&self) -> Vector3<f32> {
        self.color
    }

    pub fn set_color(&mut self, color: Vector3<f32>) {
        self.color = color;
    }

    /// Only meaningful for directional lights.
    pub fn direction(&self) -> Vector3<f32> {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Vector3<f32>) {
        self.direction = direction;
    }

    pub fn strength(&self) -> f32 {
        self.strength
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.strength = strength;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let light = LightComponent::default();
        assert_eq!(light.light_type(), LightType::Point);
        assert_eq!(light.color(), Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(light.strength(), 1.0);
        let half = std::f32::consts::FRAC_1_SQRT_2;
        assert!((light.direction() - Vector3::new(0.0, -half, -half)).magnitude() < 1e-6);
        assert_eq!(LightType::Directional as i32, 1);
    }
}
