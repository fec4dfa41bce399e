//! The coercion engine.
//!
//! One rule set, two modes: constant mode returns a new constant value,
//! runtime mode writes into a register (scalar targets) or through a
//! destination address (aggregate targets), emitting instructions as it
//! goes. The `probing` flag turns a failed coercion into a silent `None`
//! so the engine doubles as a speculative predicate inside the cast
//! operator.

use std::path::Path;

use crate::config::TargetConfig;
use crate::ir::{Instruction, Register};
use crate::span::Span;
use crate::types::{StructMember, Type};
use crate::value::{ConstantValue, TypedConstant};

use super::generator::{FunctionGenerator, RuntimeValueKind, TypedValue};
use super::layout;
use super::{error_at, CResult, ErrorKind};

/// The structural shape a slice accepts: exactly two members named
/// `pointer` and `length`, in that order.
fn is_slice_shape(members: &[StructMember]) -> bool {
    members.len() == 2 && members[0].name == "pointer" && members[1].name == "length"
}

/// Apply the coercion rules in constant mode. `None` means no rule
/// matched; the caller decides whether that is silent (probing) or a
/// diagnostic.
pub fn constant_coercion(
    options: &TargetConfig,
    constant: &TypedConstant,
    target: &Type,
) -> Option<TypedConstant> {
    let source = &constant.constant_type;
    match target {
        Type::Integer { size, .. } => match source {
            Type::Integer { .. } if source == target => Some(constant.clone()),
            Type::UndeterminedInteger => {
                let ConstantValue::Integer(bits) = constant.value else {
                    return None;
                };
                Some(TypedConstant::new(
                    target.clone(),
                    ConstantValue::Integer(size.mask(bits)),
                ))
            }
            _ => None,
        },
        Type::UndeterminedInteger => match source {
            Type::UndeterminedInteger => Some(constant.clone()),
            Type::Integer { size, .. } => {
                let ConstantValue::Integer(bits) = constant.value else {
                    return None;
                };
                Some(TypedConstant::new(
                    Type::UndeterminedInteger,
                    ConstantValue::Integer(size.mask(bits)),
                ))
            }
            _ => None,
        },
        Type::Float { size } => match source {
            Type::Float { .. } if source == target => Some(constant.clone()),
            Type::UndeterminedFloat => {
                let ConstantValue::Float(value) = constant.value else {
                    return None;
                };
                Some(TypedConstant::new(
                    target.clone(),
                    ConstantValue::Float(size.round(value)),
                ))
            }
            Type::UndeterminedInteger => {
                let ConstantValue::Integer(bits) = constant.value else {
                    return None;
                };
                Some(TypedConstant::new(
                    target.clone(),
                    ConstantValue::Float(size.round(bits as i64 as f64)),
                ))
            }
            _ => None,
        },
        Type::UndeterminedFloat => match source {
            Type::UndeterminedFloat => Some(constant.clone()),
            Type::UndeterminedInteger => {
                let ConstantValue::Integer(bits) = constant.value else {
                    return None;
                };
                Some(TypedConstant::new(
                    Type::UndeterminedFloat,
                    ConstantValue::Float(bits as i64 as f64),
                ))
            }
            _ => None,
        },
        Type::Pointer { .. } => match source {
            Type::Pointer { .. } if source == target => Some(constant.clone()),
            Type::UndeterminedInteger => {
                let ConstantValue::Integer(bits) = constant.value else {
                    return None;
                };
                Some(TypedConstant::new(
                    target.clone(),
                    ConstantValue::Pointer(bits),
                ))
            }
            _ => None,
        },
        Type::ArraySlice { element } => match source {
            Type::ArraySlice { .. } if source == target => Some(constant.clone()),
            // A constant static array has no address to wrap; that path
            // only exists at run time.
            Type::UndeterminedStruct { members } if is_slice_shape(members) => {
                let ConstantValue::Struct(values) = &constant.value else {
                    return None;
                };
                let pointer = constant_coercion(
                    options,
                    &TypedConstant::new(members[0].member_type.clone(), values[0].clone()),
                    &Type::pointer_to((**element).clone()),
                )?;
                let length = constant_coercion(
                    options,
                    &TypedConstant::new(members[1].member_type.clone(), values[1].clone()),
                    &options.address_integer(),
                )?;
                let ConstantValue::Pointer(pointer_bits) = pointer.value else {
                    return None;
                };
                let ConstantValue::Integer(length_bits) = length.value else {
                    return None;
                };
                Some(TypedConstant::new(
                    target.clone(),
                    ConstantValue::ArraySlice {
                        pointer: pointer_bits,
                        length: length_bits,
                    },
                ))
            }
            _ => None,
        },
        Type::StaticArray { .. } => {
            if source == target {
                Some(constant.clone())
            } else {
                None
            }
        }
        Type::Struct(struct_type) => match source {
            Type::Struct(_) if source == target => Some(constant.clone()),
            // Union literals need storage to overlap into; they are
            // materialised at run time only.
            Type::UndeterminedStruct { members } if !struct_type.is_union => {
                if members.len() != struct_type.members.len() {
                    return None;
                }
                let names_match = members
                    .iter()
                    .zip(&struct_type.members)
                    .all(|(member, declared)| member.name == declared.name);
                if !names_match {
                    return None;
                }
                let ConstantValue::Struct(values) = &constant.value else {
                    return None;
                };
                let mut coerced = Vec::with_capacity(values.len());
                for (index, value) in values.iter().enumerate() {
                    let member = TypedConstant::new(
                        members[index].member_type.clone(),
                        value.clone(),
                    );
                    coerced.push(
                        constant_coercion(
                            options,
                            &member,
                            &struct_type.members[index].member_type,
                        )?
                        .value,
                    );
                }
                Some(TypedConstant::new(
                    target.clone(),
                    ConstantValue::Struct(coerced),
                ))
            }
            _ => None,
        },
        // Identity covers the remaining types (bool, void, type, ...).
        _ => {
            if source == target {
                Some(constant.clone())
            } else {
                None
            }
        }
    }
}

/// Constant-mode coercion with diagnostics. Non-probing failure reports
/// "cannot implicitly convert" at the given range and fails the
/// compilation.
pub fn coerce_constant(
    options: &TargetConfig,
    path: &Path,
    span: Span,
    constant: &TypedConstant,
    target: &Type,
    probing: bool,
) -> CResult<Option<TypedConstant>> {
    match constant_coercion(options, constant, target) {
        Some(coerced) => Ok(Some(coerced)),
        None if probing => Ok(None),
        None => error_at(
            ErrorKind::Type,
            path,
            span,
            format!(
                "cannot implicitly convert '{}' to '{}'",
                constant.constant_type, target
            ),
        ),
    }
}

/// Non-probing constant coercion: succeeds or fails the compilation.
pub fn require_constant(
    options: &TargetConfig,
    path: &Path,
    span: Span,
    constant: &TypedConstant,
    target: &Type,
) -> CResult<TypedConstant> {
    Ok(coerce_constant(options, path, span, constant, target, false)?
        .expect("non-probing coercion reports its own failure"))
}

/// The member values of a struct literal, whether it is still symbolic or
/// already folded into a constant.
fn undetermined_members(value: &TypedValue) -> Option<Vec<TypedValue>> {
    match (&value.value_type, &value.kind) {
        (_, RuntimeValueKind::UndeterminedStruct(members)) => Some(members.clone()),
        (
            Type::UndeterminedStruct { members },
            RuntimeValueKind::Constant(ConstantValue::Struct(values)),
        ) => Some(
            members
                .iter()
                .zip(values)
                .map(|(member, value)| TypedValue {
                    value_type: member.member_type.clone(),
                    kind: RuntimeValueKind::Constant(value.clone()),
                })
                .collect(),
        ),
        _ => None,
    }
}

impl FunctionGenerator<'_, '_> {
    fn convert_failure<T>(&self, span: Span, source: &Type, target: &Type) -> CResult<T> {
        self.fail(
            ErrorKind::Type,
            span,
            format!("cannot implicitly convert '{}' to '{}'", source, target),
        )
    }

    /// Runtime coercion to a scalar target. Returns the register holding
    /// the coerced value, or `None` when probing and no rule matched.
    pub fn coerce_to_register(
        &mut self,
        value: &TypedValue,
        target: &Type,
        span: Span,
        probing: bool,
    ) -> CResult<Option<Register>> {
        let source = value.value_type.clone();
        match target {
            Type::Integer { size, .. } => {
                if source == *target {
                    return self.value_register(value, span).map(Some);
                }
                if matches!(source, Type::UndeterminedInteger) {
                    if let RuntimeValueKind::Constant(ConstantValue::Integer(bits)) = &value.kind {
                        return Ok(Some(self.emit_integer_constant(*size, *bits)));
                    }
                }
            }
            Type::Float { size } => {
                if source == *target {
                    return self.value_register(value, span).map(Some);
                }
                match (&source, &value.kind) {
                    (
                        Type::UndeterminedFloat,
                        RuntimeValueKind::Constant(ConstantValue::Float(float)),
                    ) => {
                        return Ok(Some(self.emit_float_constant(*size, *float)));
                    }
                    (
                        Type::UndeterminedInteger,
                        RuntimeValueKind::Constant(ConstantValue::Integer(bits)),
                    ) => {
                        return Ok(Some(self.emit_float_constant(*size, *bits as i64 as f64)));
                    }
                    _ => {}
                }
            }
            Type::Pointer { .. } => {
                if source == *target {
                    return self.value_register(value, span).map(Some);
                }
                if let (
                    Type::UndeterminedInteger,
                    RuntimeValueKind::Constant(ConstantValue::Integer(bits)),
                ) = (&source, &value.kind)
                {
                    let address_size = self.options().address_size;
                    return Ok(Some(self.emit_integer_constant(address_size, *bits)));
                }
            }
            Type::Boolean => {
                if source == Type::Boolean {
                    return self.value_register(value, span).map(Some);
                }
            }
            _ => {}
        }
        if probing {
            Ok(None)
        } else {
            self.convert_failure(span, &source, target)
        }
    }

    /// Non-probing scalar coercion: succeeds or fails the compilation.
    pub fn coerce_register(
        &mut self,
        value: &TypedValue,
        target: &Type,
        span: Span,
    ) -> CResult<Register> {
        Ok(self
            .coerce_to_register(value, target, span, false)?
            .expect("non-probing coercion reports its own failure"))
    }

    /// Runtime coercion to an aggregate target, writing the result through
    /// `destination`. Returns `false` when probing and no rule matched.
    pub fn coerce_into_address(
        &mut self,
        value: &TypedValue,
        target: &Type,
        destination: Register,
        span: Span,
        probing: bool,
    ) -> CResult<bool> {
        let options = self.options();
        let address_size = options.address_size;
        let source = value.value_type.clone();

        match target {
            Type::ArraySlice { element } => {
                if source == *target {
                    let source_address = self.value_address(value, span)?;
                    self.emit(Instruction::CopyMemory {
                        length: 2 * address_size.byte_count(),
                        source_address,
                        destination_address: destination,
                    });
                    return Ok(true);
                }
                if let Type::StaticArray {
                    length,
                    element: source_element,
                } = &source
                {
                    if source_element == element {
                        // Auto-wrap: the array's address into word 0, its
                        // length into word 1.
                        let base = self.value_address(value, span)?;
                        self.emit(Instruction::IntegerStore {
                            size: address_size,
                            source: base,
                            address: destination,
                        });
                        let length_register =
                            self.emit_integer_constant(address_size, *length);
                        let length_address =
                            self.offset_address(destination, address_size.byte_count());
                        self.emit(Instruction::IntegerStore {
                            size: address_size,
                            source: length_register,
                            address: length_address,
                        });
                        return Ok(true);
                    }
                }
                if let Type::UndeterminedStruct { members } = &source {
                    if is_slice_shape(members) {
                        if let Some(values) = undetermined_members(value) {
                            let pointer_type = Type::pointer_to((**element).clone());
                            let Some(pointer_register) =
                                self.coerce_to_register(&values[0], &pointer_type, span, probing)?
                            else {
                                return Ok(false);
                            };
                            self.emit(Instruction::IntegerStore {
                                size: address_size,
                                source: pointer_register,
                                address: destination,
                            });
                            let Some(length_register) = self.coerce_to_register(
                                &values[1],
                                &options.address_integer(),
                                span,
                                probing,
                            )?
                            else {
                                return Ok(false);
                            };
                            let length_address =
                                self.offset_address(destination, address_size.byte_count());
                            self.emit(Instruction::IntegerStore {
                                size: address_size,
                                source: length_register,
                                address: length_address,
                            });
                            return Ok(true);
                        }
                    }
                }
            }
            Type::StaticArray { .. } => {
                if source == *target {
                    let source_address = self.value_address(value, span)?;
                    self.emit(Instruction::CopyMemory {
                        length: layout::size_of(target, &options),
                        source_address,
                        destination_address: destination,
                    });
                    return Ok(true);
                }
            }
            Type::Struct(struct_type) => {
                if source == *target {
                    let source_address = self.value_address(value, span)?;
                    self.emit(Instruction::CopyMemory {
                        length: layout::size_of(target, &options),
                        source_address,
                        destination_address: destination,
                    });
                    return Ok(true);
                }
                if let Type::UndeterminedStruct { members } = &source {
                    if let Some(values) = undetermined_members(value) {
                        if struct_type.is_union {
                            // A union literal names exactly one of the
                            // declared members; it lands at offset zero.
                            if members.len() == 1 {
                                if let Some(index) =
                                    struct_type.member_index(&members[0].name)
                                {
                                    let member_type =
                                        struct_type.members[index].member_type.clone();
                                    return self.write_member(
                                        &values[0],
                                        &member_type,
                                        destination,
                                        span,
                                        probing,
                                    );
                                }
                            }
                        } else if members.len() == struct_type.members.len()
                            && members
                                .iter()
                                .zip(&struct_type.members)
                                .all(|(member, declared)| member.name == declared.name)
                        {
                            let declared_members = struct_type.members.clone();
                            let is_union = struct_type.is_union;
                            for (index, member_value) in values.iter().enumerate() {
                                let offset = layout::member_offset(
                                    &declared_members,
                                    index,
                                    is_union,
                                    &options,
                                );
                                let member_destination =
                                    self.offset_address(destination, offset);
                                let done = self.write_member(
                                    member_value,
                                    &declared_members[index].member_type,
                                    member_destination,
                                    span,
                                    probing,
                                )?;
                                if !done {
                                    return Ok(false);
                                }
                            }
                            return Ok(true);
                        }
                    }
                }
            }
            _ => {}
        }
        if probing {
            Ok(false)
        } else {
            self.convert_failure(span, &source, target)
        }
    }

    /// Write one member of an aggregate during coercion, dispatching on
    /// the member's representation.
    fn write_member(
        &mut self,
        value: &TypedValue,
        target: &Type,
        destination: Register,
        span: Span,
        probing: bool,
    ) -> CResult<bool> {
        if target.fits_in_register() {
            let Some(register) = self.coerce_to_register(value, target, span, probing)? else {
                return Ok(false);
            };
            self.store_scalar(target, register, destination);
            Ok(true)
        } else {
            self.coerce_into_address(value, target, destination, span, probing)
        }
    }

    /// Coerce-and-write: the store used by variable initialisers, member
    /// writes and assignments.
    pub fn write_value(
        &mut self,
        value: &TypedValue,
        target: &Type,
        destination: Register,
        span: Span,
    ) -> CResult<()> {
        if target.fits_in_register() {
            let register = self.coerce_register(value, target, span)?;
            self.store_scalar(target, register, destination);
        } else {
            self.coerce_into_address(value, target, destination, span, false)?;
        }
        Ok(())
    }

    /// Coerce a call argument to a formal parameter type. Scalars travel
    /// in registers; aggregates travel as addresses, reusing the value's
    /// own storage when the types already agree.
    pub fn coerce_argument(
        &mut self,
        value: &TypedValue,
        target: &Type,
        span: Span,
    ) -> CResult<Register> {
        if target.fits_in_register() {
            return self.coerce_register(value, target, span);
        }
        if value.value_type == *target {
            return self.value_address(value, span);
        }
        let local = self.allocate_local(target);
        self.coerce_into_address(value, target, local, span, false)?;
        Ok(local)
    }
}
