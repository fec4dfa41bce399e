//! The pure constant evaluator.
//!
//! `evaluate_constant` walks an expression and produces a typed constant
//! value without emitting anything; its only side effect is lazily parsing
//! imported files through the parsed-file table. Type expressions, array
//! lengths and polymorphic arguments all come through here.

use std::path::Path;
use std::rc::Rc;

use crate::ast::{Expression, Statement, UnaryOperator};
use crate::config::TargetConfig;
use crate::scope::{ConstantParameter, DeclarationScope};
use crate::span::Span;
use crate::types::{
    FunctionSignature, PolymorphicStructType, RegisterSize, StructMember, Type,
};
use crate::value::{BuiltinFunction, ConstantValue, TypedConstant};

use super::coerce;
use super::context::GenerationContext;
use super::layout;
use super::promotion::{self, BinaryFailure};
use super::resolve;
use super::{error_at, CResult, ErrorKind};

fn u8_type() -> Type {
    Type::Integer {
        size: RegisterSize::Size8,
        signed: false,
    }
}

/// Apply the default-type rule: undetermined numerics collapse to the
/// configured defaults, undetermined structs cannot exist at runtime.
pub fn default_constant(
    options: &TargetConfig,
    path: &Path,
    span: Span,
    constant: TypedConstant,
) -> CResult<TypedConstant> {
    if !constant.constant_type.is_undetermined() {
        return Ok(constant);
    }
    let Some(target) = constant.constant_type.defaulted(options) else {
        return error_at(
            ErrorKind::Type,
            path,
            span,
            format!("'{}' cannot exist at runtime", constant.constant_type),
        );
    };
    match coerce::constant_coercion(options, &constant, &target) {
        Some(coerced) => Ok(coerced),
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

/// Evaluate an expression that must denote a type.
pub fn evaluate_type_expression(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    expression: &Expression,
) -> CResult<Type> {
    let constant = evaluate_constant(context, scope, expression)?;
    match (constant.constant_type, constant.value) {
        (Type::TypeOfType, ConstantValue::Type(resolved)) => Ok(resolved),
        (other, _) => error_at(
            ErrorKind::Type,
            scope.source_path(),
            expression.span(),
            format!("expected a type, got a value of type '{}'", other),
        ),
    }
}

/// The explicit conversions the cast operator falls back to once implicit
/// coercion has been ruled out: integer resizes wrap, integer/float
/// conversions respect the source signedness, and pointers round-trip
/// through `usize`.
pub fn explicit_constant_cast(
    options: &TargetConfig,
    value: &TypedConstant,
    target: &Type,
) -> Option<TypedConstant> {
    let source = &value.constant_type;
    match (source, target, &value.value) {
        (
            Type::Integer { .. } | Type::UndeterminedInteger,
            Type::Integer { size, .. },
            ConstantValue::Integer(bits),
        ) => Some(TypedConstant::new(
            target.clone(),
            ConstantValue::Integer(size.mask(*bits)),
        )),
        (
            Type::Integer {
                size: source_size,
                signed,
            },
            Type::Float { size },
            ConstantValue::Integer(bits),
        ) => {
            let float = if *signed {
                source_size.sign_extend(*bits) as f64
            } else {
                source_size.mask(*bits) as f64
            };
            Some(TypedConstant::new(
                target.clone(),
                ConstantValue::Float(size.round(float)),
            ))
        }
        (
            Type::Float { .. } | Type::UndeterminedFloat,
            Type::Integer { size, signed },
            ConstantValue::Float(float),
        ) => {
            let bits = if *signed {
                *float as i64 as u64
            } else {
                *float as u64
            };
            Some(TypedConstant::new(
                target.clone(),
                ConstantValue::Integer(size.mask(bits)),
            ))
        }
        (
            Type::Float { .. } | Type::UndeterminedFloat,
            Type::Float { size },
            ConstantValue::Float(float),
        ) => Some(TypedConstant::new(
            target.clone(),
            ConstantValue::Float(size.round(*float)),
        )),
        (Type::Pointer { .. }, Type::Integer { size, signed: false }, ConstantValue::Pointer(bits))
            if *size == options.address_size =>
        {
            Some(TypedConstant::new(
                target.clone(),
                ConstantValue::Integer(*bits),
            ))
        }
        (
            Type::Integer { size, signed: false },
            Type::Pointer { .. },
            ConstantValue::Integer(bits),
        ) if *size == options.address_size => Some(TypedConstant::new(
            target.clone(),
            ConstantValue::Pointer(*bits),
        )),
        _ => None,
    }
}

/// Instantiate a parameterised struct with constant arguments. The member
/// types are evaluated under a fresh scope with the parameters bound; the
/// result shares the original definition node, so two instantiations with
/// equal arguments are the same type.
pub fn instantiate_polymorphic_struct(
    context: &mut GenerationContext,
    struct_type: &PolymorphicStructType,
    arguments: &[TypedConstant],
    path: &Path,
    span: Span,
) -> CResult<Type> {
    let Statement::StructDefinition {
        parameters,
        members,
        is_union,
        ..
    } = &*struct_type.definition
    else {
        return error_at(ErrorKind::Structural, path, span, "expected a struct definition");
    };
    if arguments.len() != parameters.len() {
        return error_at(
            ErrorKind::Polymorphism,
            path,
            span,
            format!(
                "expected {} arguments, got {}",
                parameters.len(),
                arguments.len()
            ),
        );
    }
    let options = context.options;
    let mut bound = Vec::with_capacity(parameters.len());
    for (index, parameter) in parameters.iter().enumerate() {
        let coerced = coerce::require_constant(
            &options,
            path,
            span,
            &arguments[index],
            &struct_type.parameter_types[index],
        )?;
        bound.push(ConstantParameter {
            name: parameter.name.clone(),
            parameter_type: struct_type.parameter_types[index].clone(),
            value: coerced.value,
        });
    }
    let instantiation_scope = DeclarationScope::nested(
        struct_type.definition.clone(),
        bound,
        struct_type.scope.clone(),
    );
    resolve::resolve_struct_members(
        context,
        &instantiation_scope,
        &struct_type.definition,
        members,
        *is_union,
    )
}

fn builtin_constant_call(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    builtin: BuiltinFunction,
    arguments: &[Expression],
    span: Span,
) -> CResult<TypedConstant> {
    let path = scope.source_path().to_path_buf();
    if arguments.len() != 1 {
        return error_at(
            ErrorKind::Evaluation,
            &path,
            span,
            format!("expected 1 argument, got {}", arguments.len()),
        );
    }
    let options = context.options;
    match builtin {
        BuiltinFunction::SizeOf => {
            let target = evaluate_type_expression(context, scope, &arguments[0])?;
            Ok(TypedConstant::new(
                options.address_integer(),
                ConstantValue::Integer(layout::size_of(&target, &options)),
            ))
        }
        BuiltinFunction::TypeOf => {
            let value = evaluate_constant(context, scope, &arguments[0])?;
            let defaulted =
                default_constant(&options, &path, arguments[0].span(), value)?;
            Ok(TypedConstant::new(
                Type::TypeOfType,
                ConstantValue::Type(defaulted.constant_type),
            ))
        }
    }
}

/// Evaluate an expression at compile time.
pub fn evaluate_constant(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    expression: &Expression,
) -> CResult<TypedConstant> {
    let options = context.options;
    let path = scope.source_path().to_path_buf();
    match expression {
        Expression::IntegerLiteral { value, .. } => Ok(TypedConstant::new(
            Type::UndeterminedInteger,
            ConstantValue::Integer(*value),
        )),
        Expression::FloatLiteral { value, .. } => Ok(TypedConstant::new(
            Type::UndeterminedFloat,
            ConstantValue::Float(*value),
        )),
        Expression::StringLiteral { value, .. } => {
            let bytes: Vec<ConstantValue> = value
                .as_bytes()
                .iter()
                .map(|byte| ConstantValue::Integer(u64::from(*byte)))
                .collect();
            Ok(TypedConstant::new(
                Type::static_array_of(bytes.len() as u64, u8_type()),
                ConstantValue::StaticArray(bytes),
            ))
        }
        Expression::BooleanLiteral { value, .. } => Ok(TypedConstant::new(
            Type::Boolean,
            ConstantValue::Boolean(*value),
        )),
        Expression::NamedReference { name, span } => {
            resolve::resolve_name(context, scope, name, *span)
        }
        Expression::ArrayLiteral { elements, span } => {
            if elements.is_empty() {
                return error_at(
                    ErrorKind::Type,
                    &path,
                    *span,
                    "cannot determine the element type of an empty array literal",
                );
            }
            let first = evaluate_constant(context, scope, &elements[0])?;
            let first = default_constant(&options, &path, elements[0].span(), first)?;
            let element_type = first.constant_type.clone();
            let mut values = vec![first.value];
            for element in &elements[1..] {
                let value = evaluate_constant(context, scope, element)?;
                let coerced = coerce::require_constant(
                    &options,
                    &path,
                    element.span(),
                    &value,
                    &element_type,
                )?;
                values.push(coerced.value);
            }
            Ok(TypedConstant::new(
                Type::static_array_of(values.len() as u64, element_type),
                ConstantValue::StaticArray(values),
            ))
        }
        Expression::StructLiteral { members, .. } => {
            let mut member_types: Vec<StructMember> = Vec::with_capacity(members.len());
            let mut values = Vec::with_capacity(members.len());
            for (name, member_expression) in members {
                if member_types.iter().any(|existing| existing.name == *name) {
                    return error_at(
                        ErrorKind::Evaluation,
                        &path,
                        member_expression.span(),
                        format!("duplicate member name '{}'", name),
                    );
                }
                let value = evaluate_constant(context, scope, member_expression)?;
                member_types.push(StructMember {
                    name: name.clone(),
                    member_type: value.constant_type,
                });
                values.push(value.value);
            }
            Ok(TypedConstant::new(
                Type::UndeterminedStruct {
                    members: member_types,
                },
                ConstantValue::Struct(values),
            ))
        }
        Expression::MemberReference { object, name, span } => {
            let object = evaluate_constant(context, scope, object)?;
            constant_member(context, scope, object, name, *span)
        }
        Expression::IndexReference {
            object,
            index,
            span,
        } => {
            let object = evaluate_constant(context, scope, object)?;
            let index_value = evaluate_constant(context, scope, index)?;
            let index_value = coerce::require_constant(
                &options,
                &path,
                index.span(),
                &index_value,
                &options.address_integer(),
            )?;
            let ConstantValue::Integer(index_bits) = index_value.value else {
                return error_at(ErrorKind::Evaluation, &path, index.span(), "expected an index");
            };
            match (&object.constant_type, &object.value) {
                (
                    Type::StaticArray { length, element },
                    ConstantValue::StaticArray(values),
                ) => {
                    if index_bits >= *length {
                        return error_at(
                            ErrorKind::Evaluation,
                            &path,
                            *span,
                            format!(
                                "index {} out of bounds of '{}'",
                                index_bits, object.constant_type
                            ),
                        );
                    }
                    Ok(TypedConstant::new(
                        (**element).clone(),
                        values[index_bits as usize].clone(),
                    ))
                }
                _ => error_at(
                    ErrorKind::Type,
                    &path,
                    *span,
                    format!("cannot index '{}'", object.constant_type),
                ),
            }
        }
        Expression::BinaryOperation {
            operator,
            left,
            right,
            span,
        } => {
            let left = evaluate_constant(context, scope, left)?;
            let right = evaluate_constant(context, scope, right)?;
            match promotion::constant_binary(&options, *operator, &left, &right) {
                Ok(result) => Ok(result),
                Err(failure) => binary_failure(&path, *span, &failure),
            }
        }
        Expression::UnaryOperation {
            operator,
            operand,
            span,
        } => {
            let operand_value = evaluate_constant(context, scope, operand)?;
            match operator {
                UnaryOperator::Pointer => match (
                    &operand_value.constant_type,
                    &operand_value.value,
                ) {
                    (Type::TypeOfType, ConstantValue::Type(pointee)) => Ok(TypedConstant::new(
                        Type::TypeOfType,
                        ConstantValue::Type(Type::pointer_to(pointee.clone())),
                    )),
                    _ => error_at(
                        ErrorKind::Evaluation,
                        &path,
                        *span,
                        "cannot take an address in a constant context",
                    ),
                },
                UnaryOperator::BooleanInvert => match operand_value.value {
                    ConstantValue::Boolean(flag) => Ok(TypedConstant::new(
                        Type::Boolean,
                        ConstantValue::Boolean(!flag),
                    )),
                    _ => error_at(
                        ErrorKind::Type,
                        &path,
                        *span,
                        format!("expected 'bool', got '{}'", operand_value.constant_type),
                    ),
                },
                UnaryOperator::Negation => match promotion::fold_negation(&operand_value) {
                    Some(negated) => Ok(negated),
                    None => error_at(
                        ErrorKind::Type,
                        &path,
                        *span,
                        format!("cannot negate '{}'", operand_value.constant_type),
                    ),
                },
            }
        }
        Expression::Cast {
            value,
            target,
            span,
        } => {
            let evaluated = evaluate_constant(context, scope, value)?;
            let target_type = evaluate_type_expression(context, scope, target)?;
            if let Some(coerced) =
                coerce::constant_coercion(&options, &evaluated, &target_type)
            {
                return Ok(coerced);
            }
            if let Some(converted) = explicit_constant_cast(&options, &evaluated, &target_type) {
                return Ok(converted);
            }
            error_at(
                ErrorKind::Evaluation,
                &path,
                *span,
                format!(
                    "cannot cast '{}' to '{}'",
                    evaluated.constant_type, target_type
                ),
            )
        }
        Expression::FunctionCall {
            callee,
            arguments,
            span,
        } => {
            let callee_value = evaluate_constant(context, scope, callee)?;
            match (&callee_value.constant_type, &callee_value.value) {
                (Type::BuiltinFunction, ConstantValue::Builtin(builtin)) => {
                    builtin_constant_call(context, scope, *builtin, arguments, *span)
                }
                (Type::TypeOfType, ConstantValue::Type(Type::PolymorphicStruct(struct_type))) => {
                    let mut evaluated = Vec::with_capacity(arguments.len());
                    for argument in arguments {
                        evaluated.push(evaluate_constant(context, scope, argument)?);
                    }
                    let instantiated = instantiate_polymorphic_struct(
                        context,
                        struct_type,
                        &evaluated,
                        &path,
                        *span,
                    )?;
                    Ok(TypedConstant::new(
                        Type::TypeOfType,
                        ConstantValue::Type(instantiated),
                    ))
                }
                (Type::Function(_), _) | (Type::PolymorphicFunction, _) => error_at(
                    ErrorKind::Evaluation,
                    &path,
                    *span,
                    "cannot call a function in a constant context",
                ),
                _ => error_at(
                    ErrorKind::Type,
                    &path,
                    *span,
                    format!("cannot call '{}'", callee_value.constant_type),
                ),
            }
        }
        Expression::ArrayType {
            length,
            element,
            span: _,
        } => {
            let element_type = evaluate_type_expression(context, scope, element)?;
            if !element_type.is_runtime_type() {
                return error_at(
                    ErrorKind::Type,
                    &path,
                    element.span(),
                    format!("array elements must be runtime types, got '{}'", element_type),
                );
            }
            match length {
                Some(length_expression) => {
                    let length_value = evaluate_constant(context, scope, length_expression)?;
                    let length_value = coerce::require_constant(
                        &options,
                        &path,
                        length_expression.span(),
                        &length_value,
                        &options.address_integer(),
                    )?;
                    let ConstantValue::Integer(length_bits) = length_value.value else {
                        return error_at(
                            ErrorKind::Evaluation,
                            &path,
                            length_expression.span(),
                            "expected an array length",
                        );
                    };
                    Ok(TypedConstant::new(
                        Type::TypeOfType,
                        ConstantValue::Type(Type::static_array_of(length_bits, element_type)),
                    ))
                }
                None => Ok(TypedConstant::new(
                    Type::TypeOfType,
                    ConstantValue::Type(Type::slice_of(element_type)),
                )),
            }
        }
        Expression::FunctionType {
            parameters,
            return_type,
            ..
        } => {
            let mut parameter_types = Vec::with_capacity(parameters.len());
            for parameter in parameters {
                if matches!(parameter, Expression::PolymorphicDeterminer { .. }) {
                    return error_at(
                        ErrorKind::Polymorphism,
                        &path,
                        parameter.span(),
                        "function types cannot have polymorphic parameters",
                    );
                }
                let parameter_type = evaluate_type_expression(context, scope, parameter)?;
                if !parameter_type.is_runtime_type() {
                    return error_at(
                        ErrorKind::Type,
                        &path,
                        parameter.span(),
                        format!(
                            "function parameters must be runtime types, got '{}'",
                            parameter_type
                        ),
                    );
                }
                parameter_types.push(parameter_type);
            }
            let resolved_return_type = match return_type {
                Some(expression) => {
                    let resolved = evaluate_type_expression(context, scope, expression)?;
                    if !resolved.is_runtime_type() {
                        return error_at(
                            ErrorKind::Type,
                            &path,
                            expression.span(),
                            format!(
                                "function return types must be runtime types, got '{}'",
                                resolved
                            ),
                        );
                    }
                    resolved
                }
                None => Type::Void,
            };
            Ok(TypedConstant::new(
                Type::TypeOfType,
                ConstantValue::Type(Type::Function(FunctionSignature {
                    parameters: parameter_types,
                    return_type: Box::new(resolved_return_type),
                })),
            ))
        }
        Expression::PolymorphicDeterminer { span, .. } => error_at(
            ErrorKind::Polymorphism,
            &path,
            *span,
            "a polymorphic determiner is not allowed here",
        ),
    }
}

/// Member access in constant mode, dispatched on the object's type.
fn constant_member(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    object: TypedConstant,
    name: &str,
    span: Span,
) -> CResult<TypedConstant> {
    let options = context.options;
    let path = scope.source_path().to_path_buf();
    match (&object.constant_type, &object.value) {
        (Type::ArraySlice { element }, ConstantValue::ArraySlice { pointer, length }) => {
            match name {
                "length" => Ok(TypedConstant::new(
                    options.address_integer(),
                    ConstantValue::Integer(*length),
                )),
                "pointer" => Ok(TypedConstant::new(
                    Type::pointer_to((**element).clone()),
                    ConstantValue::Pointer(*pointer),
                )),
                _ => no_member(&path, span, name, &object.constant_type),
            }
        }
        (Type::StaticArray { length, .. }, _) => match name {
            "length" => Ok(TypedConstant::new(
                options.address_integer(),
                ConstantValue::Integer(*length),
            )),
            "pointer" => error_at(
                ErrorKind::Evaluation,
                &path,
                span,
                "cannot take an address in a constant context",
            ),
            _ => no_member(&path, span, name, &object.constant_type),
        },
        (Type::Struct(struct_type), ConstantValue::Struct(values)) => {
            match struct_type.member_index(name) {
                Some(index) => Ok(TypedConstant::new(
                    struct_type.members[index].member_type.clone(),
                    values[index].clone(),
                )),
                None => no_member(&path, span, name, &object.constant_type),
            }
        }
        (Type::UndeterminedStruct { members }, ConstantValue::Struct(values)) => {
            match members.iter().position(|member| member.name == name) {
                Some(index) => Ok(TypedConstant::new(
                    members[index].member_type.clone(),
                    values[index].clone(),
                )),
                None => no_member(&path, span, name, &object.constant_type),
            }
        }
        (Type::FileModule, ConstantValue::FileModule(reference)) => {
            match resolve::search_module(context, reference, name)? {
                Some(found) => Ok(found),
                None => error_at(
                    ErrorKind::Resolution,
                    &path,
                    span,
                    format!("cannot find named reference '{}'", name),
                ),
            }
        }
        _ => no_member(&path, span, name, &object.constant_type),
    }
}

fn no_member<T>(path: &Path, span: Span, name: &str, object_type: &Type) -> CResult<T> {
    error_at(
        ErrorKind::Resolution,
        path,
        span,
        format!("no member '{}' on type '{}'", name, object_type),
    )
}

/// Map a shared fold failure onto a diagnostic at the operation's range.
pub fn binary_failure<T>(path: &Path, span: Span, failure: &BinaryFailure) -> CResult<T> {
    let kind = match failure {
        BinaryFailure::DivisionByZero => ErrorKind::Evaluation,
        _ => ErrorKind::Type,
    };
    error_at(kind, path, span, promotion::binary_failure_message(failure))
}
