//! Named, typed material parameters.
//!
//! A [`Variable`] stages one value of a material until it is packed into the
//! material's uniform buffer (or, for textures, bound to a texture unit). The
//! value is a closed sum type over the kinds a shader can declare.

use std::rc::Rc;

use cgmath::{Matrix4, Vector2, Vector3, Vector4, Zero};

use crate::data_structures::{program::UniformType, texture::Texture};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Texture,
}

#[derive(Clone, Debug)]
pub enum VariableValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vector2<f32>),
    Vec3(Vector3<f32>),
    Vec4(Vector4<f32>),
    Mat4(Matrix4<f32>),
    Texture(Option<Rc<Texture>>),
}

impl VariableValue {
    pub fn kind(&self) -> VariableKind {
        match self {
            VariableValue::Bool(_) => VariableKind::Bool,
            VariableValue::Int(_) => VariableKind::Int,
            VariableValue::Float(_) => VariableKind::Float,
            VariableValue::Vec2(_) => VariableKind::Vec2,
            VariableValue::Vec3(_) => VariableKind::Vec3,
            VariableValue::Vec4(_) => VariableKind::Vec4,
            VariableValue::Mat4(_) => VariableKind::Mat4,
            VariableValue::Texture(_) => VariableKind::Texture,
        }
    }

    /// Zero value of a reflected uniform type, `None` for types no variable can hold.
    pub fn default_for(ty: UniformType) -> Option<Self> {
        let value = match ty {
            UniformType::Bool => VariableValue::Bool(false),
            UniformType::Int => VariableValue::Int(0),
            UniformType::Float => VariableValue::Float(0.0),
            UniformType::Vec2 => VariableValue::Vec2(Vector2::zero()),
            UniformType::Vec3 => VariableValue::Vec3(Vector3::zero()),
            UniformType::Vec4 => VariableValue::Vec4(Vector4::zero()),
            UniformType::Mat4 => VariableValue::Mat4(Matrix4::zero()),
            UniformType::Sampler2D | UniformType::Sampler2DArray => VariableValue::Texture(None),
            UniformType::Sampler | UniformType::Other => return None,
        };
        Some(value)
    }
}

#[derive(Clone, Debug)]
pub struct Variable {
    name: String,
    value: VariableValue,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: VariableValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Builds the variable matching a reflected uniform.
    pub fn from_uniform(name: impl Into<String>, ty: UniformType) -> Option<Self> {
        VariableValue::default_for(ty).map(|value| Self::new(name, value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.value.kind()
    }

    pub fn value(&self) -> &VariableValue {
        &self.value
    }

    /// Bytes the value occupies in a uniform block. Textures occupy none.
    pub fn size(&self) -> u64 {
        match &self.value {
            VariableValue::Bool(_) | VariableValue::Int(_) | VariableValue::Float(_) => 4,
            VariableValue::Vec2(_) => 8,
            VariableValue::Vec3(_) => 12,
            VariableValue::Vec4(_) => 16,
            VariableValue::Mat4(_) => 64,
            VariableValue::Texture(_) => 0,
        }
    }

    /// Little-endian bytes as laid out in a uniform block.
    pub fn bytes(&self) -> Vec<u8> {
        match &self.value {
            VariableValue::Bool(v) => (*v as u32).to_le_bytes().to_vec(),
            VariableValue::Int(v) => v.to_le_bytes().to_vec(),
            VariableValue::Float(v) => v.to_le_bytes().to_vec(),
            VariableValue::Vec2(v) => {
                let v: [f32; 2] = (*v).into();
                bytemuck::cast_slice(&v).to_vec()
            }
            VariableValue::Vec3(v) => {
                let v: [f32; 3] = (*v).into();
                bytemuck::cast_slice(&v).to_vec()
            }
            VariableValue::Vec4(v) => {
                let v: [f32; 4] = (*v).into();
                bytemuck::cast_slice(&v).to_vec()
            }
            VariableValue::Mat4(m) => {
                let m: [[f32; 4]; 4] = (*m).into();
                bytemuck::cast_slice(&m).to_vec()
            }
            VariableValue::Texture(_) => Vec::new(),
        }
    }

    /// Takes over the value of `other` if both hold the same kind.
    pub fn copy_value(&mut self, other: &Variable) -> bool {
        if self.kind() != other.kind() {
            return false;
        }
        self.value = other.value.clone();
        true
    }

    pub fn get<T: VariableType>(&self) -> Option<T> {
        T::extract(&self.value)
    }

    /// Stores `value`, refusing values of a different kind.
    pub fn set<T: VariableType>(&mut self, value: T) -> bool {
        if T::KIND != self.kind() {
            return false;
        }
        self.value = value.wrap();
        true
    }
}

/// Rust types a [`Variable`] can be read as or written from.
pub trait VariableType: Sized {
    const KIND: VariableKind;

    fn extract(value: &VariableValue) -> Option<Self>;
    fn wrap(self) -> VariableValue;
    /// Value read back for parameters a material does not have.
    fn absent() -> Self;
}

macro_rules! variable_type {
    ($ty:ty, $variant:ident, $zero:expr) => {
        impl VariableType for $ty {
            const KIND: VariableKind = VariableKind::$variant;

            fn extract(value: &VariableValue) -> Option<Self> {
                match value {
                    VariableValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn wrap(self) -> VariableValue {
                VariableValue::$variant(self)
            }

            fn absent() -> Self {
                $zero
            }
        }
    };
}

variable_type!(bool, Bool, false);
variable_type!(i32, Int, 0);
variable_type!(f32, Float, 0.0);
variable_type!(Vector2<f32>, Vec2, Vector2::zero());
variable_type!(Vector3<f32>, Vec3, Vector3::zero());
variable_type!(Vector4<f32>, Vec4, Vector4::zero());
variable_type!(Matrix4<f32>, Mat4, Matrix4::zero());
variable_type!(Option<Rc<Texture>>, Texture, None);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_packs_as_u32() {
        let mut flag = Variable::from_uniform("HasAlbedo", UniformType::Bool).unwrap();
        assert_eq!(flag.bytes(), vec![0, 0, 0, 0]);
        assert!(flag.set(true));
        assert_eq!(flag.bytes(), vec![1, 0, 0, 0]);
        assert_eq!(flag.size(), 4);
    }

    #[test]
    fn vec4_bytes_are_component_order() {
        let mut color = Variable::from_uniform("Color", UniformType::Vec4).unwrap();
        color.set(Vector4::new(1.0f32, 2.0, 3.0, 4.0));
        let floats: Vec<f32> = color
            .bytes()
            .chunks(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(floats, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(color.size(), 16);
    }

    #[test]
    fn wrong_kind_is_refused() {
        let mut channel = Variable::from_uniform("MetallicChannel", UniformType::Int).unwrap();
        assert!(!channel.set(1.5f32));
        assert_eq!(channel.get::<i32>(), Some(0));
        assert_eq!(channel.get::<f32>(), None);
    }

    #[test]
    fn copy_value_requires_same_kind() {
        let mut a = Variable::new("a", VariableValue::Float(1.0));
        let b = Variable::new("b", VariableValue::Float(2.0));
        let c = Variable::new("c", VariableValue::Int(3));
        assert!(a.copy_value(&b));
        assert_eq!(a.get::<f32>(), Some(2.0));
        assert!(!a.copy_value(&c));
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn samplers_without_texture_type_have_no_variable() {
        assert!(Variable::from_uniform("s", UniformType::Sampler).is_none());
        assert!(Variable::from_uniform("o", UniformType::Other).is_none());
        let texture = Variable::from_uniform("t", UniformType::Sampler2DArray).unwrap();
        assert_eq!(texture.kind(), VariableKind::Texture);
        assert_eq!(texture.size(), 0);
    }
}
