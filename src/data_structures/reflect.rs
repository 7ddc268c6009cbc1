//! Shader reflection on top of `naga`.
//!
//! Only globals the stage's entry point actually touches are reported, which
//! mirrors the "active uniform" notion of a linked GL program.

use anyhow::{Context as _, anyhow};
use naga::{
    AddressSpace, ArraySize, Binding, Handle, ImageClass, ImageDimension, Module, ScalarKind,
    Type, TypeInner, VectorSize,
    valid::{Capabilities, FunctionInfo, ValidationFlags, Validator},
};

use crate::{
    data_structures::program::{
        ProgramLayout, ShaderStage, UniformBlockDescription, UniformDescription, UniformType,
        VertexInput,
    },
    device::{AttributeFormat, ElementType},
};

/// WGSL has no geometry stage. Geometry programs are plain functions with this name.
pub const GEOMETRY_ENTRY_POINT: &str = "gs_main";

pub(crate) fn reflect(stage: ShaderStage, source: &str) -> anyhow::Result<ProgramLayout> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("Shader compilation failed: {}", e.emit_to_string(source)))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| anyhow!("Shader validation failed: {}", e.emit_to_string(source)))?;

    let (entry_point, function_info, inputs) = match stage.to_naga() {
        Some(naga_stage) => {
            let index = module
                .entry_points
                .iter()
                .position(|ep| ep.stage == naga_stage)
                .with_context(|| format!("No {:?} entry point in shader", stage))?;
            let ep = &module.entry_points[index];
            let inputs = if stage == ShaderStage::Vertex {
                vertex_inputs(&module, &ep.function)
            } else {
                Vec::new()
            };
            (ep.name.clone(), info.get_entry_point(index), inputs)
        }
        None => {
            let (handle, _) = module
                .functions
                .iter()
                .find(|(_, f)| f.name.as_deref() == Some(GEOMETRY_ENTRY_POINT))
                .with_context(|| format!("No `{}` function in geometry shader", GEOMETRY_ENTRY_POINT))?;
            (GEOMETRY_ENTRY_POINT.to_string(), &info[handle], Vec::new())
        }
    };

    let mut blocks = Vec::new();
    let mut uniforms = Vec::new();
    for (handle, global) in module.global_variables.iter() {
        if is_unused(function_info, handle) {
            continue;
        }
        let Some(binding) = &global.binding else {
            continue;
        };
        let name = global.name.clone().unwrap_or_default();
        match global.space {
            AddressSpace::Uniform => {
                blocks.push(uniform_block(&module, global.ty, name, binding.group, binding.binding));
            }
            AddressSpace::Handle => {
                let ty = match &module.types[global.ty].inner {
                    TypeInner::Image {
                        dim: ImageDimension::D2,
                        arrayed,
                        class: ImageClass::Sampled { .. },
                    } => {
                        if *arrayed {
                            UniformType::Sampler2DArray
                        } else {
                            UniformType::Sampler2D
                        }
                    }
                    TypeInner::Sampler { .. } => UniformType::Sampler,
                    _ => UniformType::Other,
                };
                uniforms.push(UniformDescription {
                    name,
                    ty,
                    size: 0,
                    offset: 0,
                    location: ((binding.group << 16) | binding.binding) as i32,
                    group: binding.group,
                    binding: binding.binding,
                });
            }
            _ => {}
        }
    }

    Ok(ProgramLayout {
        entry_point,
        blocks,
        uniforms,
        inputs,
    })
}

fn is_unused(info: &FunctionInfo, handle: Handle<naga::GlobalVariable>) -> bool {
    info[handle].is_empty()
}

fn uniform_block(
    module: &Module,
    handle: Handle<Type>,
    variable: String,
    group: u32,
    binding: u32,
) -> UniformBlockDescription {
    let ty = &module.types[handle];
    let (name, size, members) = match &ty.inner {
        TypeInner::Struct { members, span } => {
            let members = members
                .iter()
                .map(|member| {
                    let (member_ty, size) = uniform_type(module, member.ty);
                    UniformDescription {
                        name: member.name.clone().unwrap_or_default(),
                        ty: member_ty,
                        size,
                        offset: member.offset as u64,
                        location: -1,
                        group,
                        binding,
                    }
                })
                .collect();
            (ty.name.clone().unwrap_or(variable), *span as u64, members)
        }
        _ => {
            // a bare `var<uniform> x: T` is a block holding one member named like the variable
            let (member_ty, size) = uniform_type(module, handle);
            let member = UniformDescription {
                name: variable.clone(),
                ty: member_ty,
                size,
                offset: 0,
                location: -1,
                group,
                binding,
            };
            (variable, size, vec![member])
        }
    };
    log::debug!("Found uniform block: name({}), size({}), members({})", name, size, members.len());
    UniformBlockDescription {
        name,
        size,
        slot: 0,
        group,
        binding,
        members,
    }
}

/// Reflected type plus its size in bytes, `element size × array length` for arrays.
fn uniform_type(module: &Module, ty: Handle<Type>) -> (UniformType, u64) {
    let inner = &module.types[ty].inner;
    let size = inner.size(module.to_ctx()) as u64;
    let ty = match inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            // WGSL has no host-shareable bool, flags travel as u32
            ScalarKind::Uint | ScalarKind::Bool => UniformType::Bool,
            ScalarKind::Sint => UniformType::Int,
            ScalarKind::Float => UniformType::Float,
            _ => UniformType::Other,
        },
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => UniformType::Vec2,
            VectorSize::Tri => UniformType::Vec3,
            VectorSize::Quad => UniformType::Vec4,
        },
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            ..
        } => UniformType::Mat4,
        TypeInner::Array { base, size: count, .. } => {
            let (element, element_size) = uniform_type(module, *base);
            let count = match count {
                ArraySize::Constant(n) => n.get() as u64,
                _ => 1,
            };
            return (element, element_size * count);
        }
        _ => UniformType::Other,
    };
    (ty, size)
}

fn vertex_inputs(module: &Module, function: &naga::Function) -> Vec<VertexInput> {
    let mut inputs = Vec::new();
    for argument in function.arguments.iter() {
        match (&argument.binding, &module.types[argument.ty].inner) {
            (Some(Binding::Location { location, .. }), inner) => {
                if let Some(format) = attribute_format(inner) {
                    inputs.push(VertexInput {
                        location: *location,
                        format,
                    });
                }
            }
            (None, TypeInner::Struct { members, .. }) => {
                for member in members {
                    if let Some(Binding::Location { location, .. }) = &member.binding {
                        if let Some(format) = attribute_format(&module.types[member.ty].inner) {
                            inputs.push(VertexInput {
                                location: *location,
                                format,
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }
    inputs.sort_by_key(|input| input.location);
    inputs
}

fn attribute_format(inner: &TypeInner) -> Option<AttributeFormat> {
    let (scalar, components) = match inner {
        TypeInner::Scalar(scalar) => (scalar, 1),
        TypeInner::Vector { size, scalar } => (scalar, *size as u8),
        _ => return None,
    };
    let element = match scalar.kind {
        ScalarKind::Float => ElementType::Float,
        ScalarKind::Sint => ElementType::Int,
        ScalarKind::Uint => ElementType::UnsignedInt,
        _ => return None,
    };
    Some(AttributeFormat::new(element, components))
}
