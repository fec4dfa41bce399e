//! Size, alignment and static-data layout.
//!
//! Layout is parameterised by the two architectural constants: pointers
//! and slice words are address-sized, booleans occupy the default integer
//! size. A static array's stride is the element size, and the same stride
//! is used by index lowering and constant serialisation, so the three can
//! never disagree.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::config::TargetConfig;
use crate::ir::{ParameterLayout, ReturnLayout};
use crate::types::{FloatSize, RegisterSize, StructMember, Type};
use crate::value::ConstantValue;

pub fn align_to(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return offset;
    }
    offset.div_ceil(alignment) * alignment
}

/// Size in bytes of a runtime type. Non-runtime types have no size and
/// report zero; callers guard with `is_runtime_type`.
pub fn size_of(value_type: &Type, options: &TargetConfig) -> u64 {
    match value_type {
        Type::Integer { size, .. } => size.byte_count(),
        Type::Float { size } => size.byte_count(),
        Type::Boolean => options.default_integer_size.byte_count(),
        Type::Pointer { .. } => options.address_size.byte_count(),
        Type::ArraySlice { .. } => 2 * options.address_size.byte_count(),
        Type::StaticArray { length, element } => length * size_of(element, options),
        Type::Struct(struct_type) => {
            struct_size(&struct_type.members, struct_type.is_union, options)
        }
        _ => 0,
    }
}

pub fn alignment_of(value_type: &Type, options: &TargetConfig) -> u64 {
    match value_type {
        Type::Integer { size, .. } => size.byte_count(),
        Type::Float { size } => size.byte_count(),
        Type::Boolean => options.default_integer_size.byte_count(),
        Type::Pointer { .. } | Type::ArraySlice { .. } => options.address_size.byte_count(),
        Type::StaticArray { element, .. } => alignment_of(element, options),
        Type::Struct(struct_type) => struct_alignment(&struct_type.members, options),
        _ => 1,
    }
}

pub fn struct_alignment(members: &[StructMember], options: &TargetConfig) -> u64 {
    members
        .iter()
        .map(|member| alignment_of(&member.member_type, options))
        .max()
        .unwrap_or(1)
}

/// Non-union structs pad each member to its alignment and accumulate;
/// union storage is the largest member and every offset is zero.
pub fn struct_size(members: &[StructMember], is_union: bool, options: &TargetConfig) -> u64 {
    if is_union {
        members
            .iter()
            .map(|member| size_of(&member.member_type, options))
            .max()
            .unwrap_or(0)
    } else {
        let mut offset = 0;
        for member in members {
            offset = align_to(offset, alignment_of(&member.member_type, options));
            offset += size_of(&member.member_type, options);
        }
        offset
    }
}

pub fn member_offset(
    members: &[StructMember],
    index: usize,
    is_union: bool,
    options: &TargetConfig,
) -> u64 {
    if is_union {
        return 0;
    }
    let mut offset = 0;
    for member in &members[..index] {
        offset = align_to(offset, alignment_of(&member.member_type, options));
        offset += size_of(&member.member_type, options);
    }
    align_to(offset, alignment_of(&members[index].member_type, options))
}

/// The register width a scalar occupies.
pub fn scalar_register_size(value_type: &Type, options: &TargetConfig) -> RegisterSize {
    match value_type {
        Type::Integer { size, .. } => *size,
        Type::Boolean => options.default_integer_size,
        Type::Pointer { .. } => options.address_size,
        _ => options.address_size,
    }
}

/// How a value of this type is passed to a function: scalars in their own
/// register, aggregates as an address.
pub fn parameter_layout(value_type: &Type, options: &TargetConfig) -> ParameterLayout {
    match value_type {
        Type::Float { size } => ParameterLayout {
            size: match size {
                FloatSize::Size32 => RegisterSize::Size32,
                FloatSize::Size64 => RegisterSize::Size64,
            },
            is_float: true,
        },
        _ if value_type.fits_in_register() => ParameterLayout {
            size: scalar_register_size(value_type, options),
            is_float: false,
        },
        _ => ParameterLayout {
            size: options.address_size,
            is_float: false,
        },
    }
}

/// How a function's result comes back; `None` for void.
pub fn return_layout(return_type: &Type, options: &TargetConfig) -> Option<ReturnLayout> {
    match return_type {
        Type::Void => None,
        Type::Float { size } => Some(ReturnLayout::Register {
            size: match size {
                FloatSize::Size32 => RegisterSize::Size32,
                FloatSize::Size64 => RegisterSize::Size64,
            },
            is_float: true,
        }),
        _ if return_type.fits_in_register() => Some(ReturnLayout::Register {
            size: scalar_register_size(return_type, options),
            is_float: false,
        }),
        _ => Some(ReturnLayout::ByReference),
    }
}

fn write_integer(out: &mut Vec<u8>, value: u64, size: RegisterSize) {
    out.write_uint::<LittleEndian>(size.mask(value), size.byte_count() as usize)
        .expect("writing to an in-memory buffer cannot fail");
}

fn write_float(out: &mut Vec<u8>, value: f64, size: FloatSize) {
    match size {
        FloatSize::Size32 => out
            .write_f32::<LittleEndian>(value as f32)
            .expect("writing to an in-memory buffer cannot fail"),
        FloatSize::Size64 => out
            .write_f64::<LittleEndian>(value)
            .expect("writing to an in-memory buffer cannot fail"),
    }
}

fn constant_bits(value: &ConstantValue) -> u64 {
    match value {
        ConstantValue::Integer(bits) | ConstantValue::Pointer(bits) => *bits,
        ConstantValue::Boolean(flag) => *flag as u64,
        _ => 0,
    }
}

/// Serialise a constant into the byte image of a static of the given type.
/// Integers are little-endian and zero-extended to their declared size;
/// booleans occupy the default integer size; aggregates follow the layout
/// rules above, with padding bytes zeroed.
pub fn serialize_constant(
    value_type: &Type,
    value: &ConstantValue,
    options: &TargetConfig,
    out: &mut Vec<u8>,
) {
    let start = out.len();
    match (value_type, value) {
        (Type::Integer { size, .. }, _) => write_integer(out, constant_bits(value), *size),
        (Type::Boolean, _) => {
            write_integer(out, constant_bits(value), options.default_integer_size)
        }
        (Type::Pointer { .. }, _) => write_integer(out, constant_bits(value), options.address_size),
        (Type::Float { size }, ConstantValue::Float(float)) => write_float(out, *float, *size),
        (Type::ArraySlice { .. }, ConstantValue::ArraySlice { pointer, length }) => {
            write_integer(out, *pointer, options.address_size);
            write_integer(out, *length, options.address_size);
        }
        (Type::StaticArray { length, element }, ConstantValue::StaticArray(elements)) => {
            let stride = size_of(element, options) as usize;
            for index in 0..*length as usize {
                pad_to(out, start + index * stride);
                if let Some(element_value) = elements.get(index) {
                    serialize_constant(element, element_value, options, out);
                }
            }
        }
        (Type::Struct(struct_type), ConstantValue::Struct(members)) => {
            for (index, member) in struct_type.members.iter().enumerate() {
                let offset = member_offset(
                    &struct_type.members,
                    index,
                    struct_type.is_union,
                    options,
                );
                pad_to(out, start + offset as usize);
                if let Some(member_value) = members.get(index) {
                    serialize_constant(&member.member_type, member_value, options, out);
                }
            }
        }
        _ => {}
    }
    // Trailing padding up to the type's full size.
    pad_to(out, start + size_of(value_type, options) as usize);
}

/// Grow the buffer with zero padding; never shrinks, so overlapping
/// offsets (unions) leave earlier bytes intact.
fn pad_to(out: &mut Vec<u8>, length: usize) {
    if out.len() < length {
        out.resize(length, 0);
    }
}
