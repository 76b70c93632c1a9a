//! Size, alignment and offset computation for buffer-visible types,
//! following std140-flavoured rules: vectors align to their
//! power-of-two-rounded component count, matrix columns stride in 16-byte
//! steps, and struct sizes round up to the largest member alignment.

use super::ast::{Type, TypeInner};
use crate::arena::{Arena, Handle};

pub fn round_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        value
    } else {
        ((value + alignment - 1) / alignment) * alignment
    }
}

pub fn size_of(types: &Arena<Type>, handle: Handle<Type>) -> u32 {
    match types[handle].inner {
        TypeInner::Scalar { width, .. } => width as u32,
        TypeInner::Vector { elem, size } => size_of(types, elem) * size,
        TypeInner::Matrix { columns, column } => matrix_stride(types, column) * columns,
        TypeInner::Struct { ref members, .. } => {
            let align = struct_align(types, handle);
            let end = members
                .last()
                .map(|member| member.offset + size_of(types, member.ty))
                .unwrap_or(0);
            round_up(end, align)
        }
        TypeInner::ConstantBuffer { base }
        | TypeInner::StructuredBuffer { base }
        | TypeInner::RwStructuredBuffer { base } => size_of(types, base),
        // Opaque and non-data types do not take part in layout.
        _ => 0,
    }
}

pub fn align_of(types: &Arena<Type>, handle: Handle<Type>) -> u32 {
    match types[handle].inner {
        TypeInner::Scalar { width, .. } => width as u32,
        TypeInner::Vector { elem, size } => {
            // A 3-component vector aligns like a 4-component one.
            let rounded = if size == 3 { 4 } else { size };
            size_of(types, elem) * rounded
        }
        TypeInner::Matrix { .. } => 16,
        TypeInner::Struct { .. } => struct_align(types, handle),
        TypeInner::ConstantBuffer { base }
        | TypeInner::StructuredBuffer { base }
        | TypeInner::RwStructuredBuffer { base } => align_of(types, base),
        _ => 1,
    }
}

/// Byte stride between the column vectors of a matrix.
pub fn matrix_stride(types: &Arena<Type>, column: Handle<Type>) -> u32 {
    round_up(size_of(types, column), 16)
}

fn struct_align(types: &Arena<Type>, handle: Handle<Type>) -> u32 {
    match types[handle].inner {
        TypeInner::Struct { ref members, .. } => members
            .iter()
            .map(|member| align_of(types, member.ty))
            .max()
            .unwrap_or(1),
        _ => 1,
    }
}

/// Sequential layout of a struct body: the byte offset of each member.
pub fn member_offsets(types: &Arena<Type>, members: &[Handle<Type>]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(members.len());
    let mut cursor = 0;
    for &ty in members {
        cursor = round_up(cursor, align_of(types, ty));
        offsets.push(cursor);
        cursor += size_of(types, ty);
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScalarKind;

    fn float_type(types: &mut Arena<Type>) -> Handle<Type> {
        types.fetch_or_append(Type {
            name: None,
            inner: TypeInner::Scalar {
                kind: ScalarKind::Float,
                width: 4,
            },
        })
    }

    fn vector_type(types: &mut Arena<Type>, size: u32) -> Handle<Type> {
        let elem = float_type(types);
        types.fetch_or_append(Type {
            name: None,
            inner: TypeInner::Vector { elem, size },
        })
    }

    #[test]
    fn vector_rules() {
        let mut types = Arena::new();
        let vec2 = vector_type(&mut types, 2);
        let vec3 = vector_type(&mut types, 3);
        let vec4 = vector_type(&mut types, 4);
        assert_eq!((size_of(&types, vec2), align_of(&types, vec2)), (8, 8));
        assert_eq!((size_of(&types, vec3), align_of(&types, vec3)), (12, 16));
        assert_eq!((size_of(&types, vec4), align_of(&types, vec4)), (16, 16));
    }

    #[test]
    fn matrix_column_stride() {
        let mut types = Arena::new();
        let vec3 = vector_type(&mut types, 3);
        let mat = types.fetch_or_append(Type {
            name: None,
            inner: TypeInner::Matrix {
                columns: 3,
                column: vec3,
            },
        });
        assert_eq!(matrix_stride(&types, vec3), 16);
        assert_eq!(size_of(&types, mat), 48);
        assert_eq!(align_of(&types, mat), 16);
    }

    #[test]
    fn padded_member_offsets() {
        // float4 a; float b; float4 c; -> 0, 16, 32
        let mut types = Arena::new();
        let float = float_type(&mut types);
        let vec4 = vector_type(&mut types, 4);
        assert_eq!(member_offsets(&types, &[vec4, float, vec4]), vec![0, 16, 32]);
    }
}
