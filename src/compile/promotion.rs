//! The mode-independent rule layer for binary operations.
//!
//! Both evaluation modes agree on three decisions before any value moves:
//! which type an operation happens at, whether the operator is defined at
//! that type, and what a constant fold produces. Keeping the decisions
//! here means the pure evaluator and the instruction-emitting evaluator
//! cannot drift apart.

use crate::ast::BinaryOperator;
use crate::config::TargetConfig;
use crate::types::{FloatSize, RegisterSize, Type};
use crate::value::{ConstantValue, TypedConstant};

use super::coerce;

/// Why a binary operation could not be performed. The caller turns these
/// into diagnostics at the operation's source range.
#[derive(Debug, Clone)]
pub enum BinaryFailure {
    /// No operation type exists for the operand pair.
    MismatchedOperands(Type, Type),
    /// The operator is not defined at the chosen operation type.
    InvalidOperator(Type),
    /// An operand cannot be coerced to the operation type.
    Coercion { source: Type, target: Type },
    DivisionByZero,
}

pub fn binary_failure_message(failure: &BinaryFailure) -> String {
    match failure {
        BinaryFailure::MismatchedOperands(left, right) => {
            format!("cannot perform that operation on '{}' and '{}'", left, right)
        }
        BinaryFailure::InvalidOperator(operation_type) => {
            format!("cannot perform that operation on '{}'", operation_type)
        }
        BinaryFailure::Coercion { source, target } => {
            format!("cannot implicitly convert '{}' to '{}'", source, target)
        }
        BinaryFailure::DivisionByZero => "division by zero".to_string(),
    }
}

fn concrete_integer(value_type: &Type) -> Option<(RegisterSize, bool)> {
    match value_type {
        Type::Integer { size, signed } => Some((*size, *signed)),
        _ => None,
    }
}

/// The type both operands are coerced to before the operator applies.
/// `None` means the operand pair has no common operation type.
pub fn operation_type(left: &Type, right: &Type) -> Option<Type> {
    if matches!(left, Type::Boolean) || matches!(right, Type::Boolean) {
        return Some(Type::Boolean);
    }
    if matches!(left, Type::Pointer { .. }) {
        return Some(left.clone());
    }
    if matches!(right, Type::Pointer { .. }) {
        return Some(right.clone());
    }
    if let (Some((left_size, left_signed)), Some((right_size, right_signed))) =
        (concrete_integer(left), concrete_integer(right))
    {
        return Some(Type::Integer {
            size: if left_size.byte_count() >= right_size.byte_count() {
                left_size
            } else {
                right_size
            },
            signed: left_signed || right_signed,
        });
    }
    if let (Type::Float { size: left_size }, Type::Float { size: right_size }) = (left, right) {
        return Some(Type::Float {
            size: if left_size.byte_count() >= right_size.byte_count() {
                *left_size
            } else {
                *right_size
            },
        });
    }
    if let Type::Float { .. } = left {
        return Some(left.clone());
    }
    if let Type::Float { .. } = right {
        return Some(right.clone());
    }
    if matches!(left, Type::UndeterminedFloat) || matches!(right, Type::UndeterminedFloat) {
        return Some(Type::UndeterminedFloat);
    }
    if concrete_integer(left).is_some() {
        return Some(left.clone());
    }
    if concrete_integer(right).is_some() {
        return Some(right.clone());
    }
    if matches!(left, Type::UndeterminedInteger) && matches!(right, Type::UndeterminedInteger) {
        return Some(Type::UndeterminedInteger);
    }
    None
}

/// Whether the operator is defined at the operation type: arithmetic on
/// numerics only, `&`/`|` on integers, `&&`/`||` on booleans, ordering on
/// numerics, equality on any scalar.
pub fn operator_defined(operator: BinaryOperator, operation_type: &Type) -> bool {
    let integer = matches!(
        operation_type,
        Type::Integer { .. } | Type::UndeterminedInteger
    );
    let float = matches!(operation_type, Type::Float { .. } | Type::UndeterminedFloat);
    match operator {
        BinaryOperator::Addition
        | BinaryOperator::Subtraction
        | BinaryOperator::Multiplication
        | BinaryOperator::Division
        | BinaryOperator::Modulus => integer || float,
        BinaryOperator::BitwiseAnd | BinaryOperator::BitwiseOr => integer,
        BinaryOperator::BooleanAnd | BinaryOperator::BooleanOr => {
            matches!(operation_type, Type::Boolean)
        }
        BinaryOperator::LessThan | BinaryOperator::GreaterThan => integer || float,
        BinaryOperator::Equal | BinaryOperator::NotEqual => {
            integer || float || matches!(operation_type, Type::Boolean | Type::Pointer { .. })
        }
    }
}

/// The integer width and signedness arithmetic happens at. Undetermined
/// integers fold at 64 bits, signed.
fn integer_properties(operation_type: &Type) -> Option<(RegisterSize, bool)> {
    match operation_type {
        Type::Integer { size, signed } => Some((*size, *signed)),
        Type::UndeterminedInteger => Some((RegisterSize::Size64, true)),
        _ => None,
    }
}

fn float_properties(operation_type: &Type) -> Option<FloatSize> {
    match operation_type {
        Type::Float { size } => Some(*size),
        Type::UndeterminedFloat => Some(FloatSize::Size64),
        _ => None,
    }
}

fn boolean_result(flag: bool) -> TypedConstant {
    TypedConstant::new(Type::Boolean, ConstantValue::Boolean(flag))
}

fn fold_integer(
    operator: BinaryOperator,
    operation_type: &Type,
    left: u64,
    right: u64,
) -> Result<TypedConstant, BinaryFailure> {
    let (size, signed) = integer_properties(operation_type)
        .expect("integer fold is only reached for integer operation types");
    let result = |bits: u64| {
        TypedConstant::new(operation_type.clone(), ConstantValue::Integer(size.mask(bits)))
    };
    let signed_left = size.sign_extend(left);
    let signed_right = size.sign_extend(right);
    let unsigned_left = size.mask(left);
    let unsigned_right = size.mask(right);
    match operator {
        BinaryOperator::Addition => Ok(result(left.wrapping_add(right))),
        BinaryOperator::Subtraction => Ok(result(left.wrapping_sub(right))),
        BinaryOperator::Multiplication => Ok(result(left.wrapping_mul(right))),
        BinaryOperator::Division => {
            if unsigned_right == 0 {
                return Err(BinaryFailure::DivisionByZero);
            }
            if signed {
                Ok(result(signed_left.wrapping_div(signed_right) as u64))
            } else {
                Ok(result(unsigned_left / unsigned_right))
            }
        }
        BinaryOperator::Modulus => {
            if unsigned_right == 0 {
                return Err(BinaryFailure::DivisionByZero);
            }
            if signed {
                Ok(result(signed_left.wrapping_rem(signed_right) as u64))
            } else {
                Ok(result(unsigned_left % unsigned_right))
            }
        }
        BinaryOperator::BitwiseAnd => Ok(result(left & right)),
        BinaryOperator::BitwiseOr => Ok(result(left | right)),
        BinaryOperator::Equal => Ok(boolean_result(unsigned_left == unsigned_right)),
        BinaryOperator::NotEqual => Ok(boolean_result(unsigned_left != unsigned_right)),
        BinaryOperator::LessThan => Ok(boolean_result(if signed {
            signed_left < signed_right
        } else {
            unsigned_left < unsigned_right
        })),
        BinaryOperator::GreaterThan => Ok(boolean_result(if signed {
            signed_left > signed_right
        } else {
            unsigned_left > unsigned_right
        })),
        _ => Err(BinaryFailure::InvalidOperator(operation_type.clone())),
    }
}

fn fold_float(
    operator: BinaryOperator,
    operation_type: &Type,
    left: f64,
    right: f64,
) -> Result<TypedConstant, BinaryFailure> {
    let size = float_properties(operation_type)
        .expect("float fold is only reached for float operation types");
    let left = size.round(left);
    let right = size.round(right);
    let result = |value: f64| {
        TypedConstant::new(
            operation_type.clone(),
            ConstantValue::Float(size.round(value)),
        )
    };
    match operator {
        BinaryOperator::Addition => Ok(result(left + right)),
        BinaryOperator::Subtraction => Ok(result(left - right)),
        BinaryOperator::Multiplication => Ok(result(left * right)),
        BinaryOperator::Division => Ok(result(left / right)),
        BinaryOperator::Modulus => Ok(result(left % right)),
        BinaryOperator::Equal => Ok(boolean_result(left == right)),
        BinaryOperator::NotEqual => Ok(boolean_result(left != right)),
        BinaryOperator::LessThan => Ok(boolean_result(left < right)),
        BinaryOperator::GreaterThan => Ok(boolean_result(left > right)),
        _ => Err(BinaryFailure::InvalidOperator(operation_type.clone())),
    }
}

/// Constant-fold a binary operation: decide the operation type, coerce
/// both operands to it, apply the operator. Both evaluation modes funnel
/// their all-constant cases through here, so the folded bits are identical
/// no matter which walk produced them.
pub fn constant_binary(
    options: &TargetConfig,
    operator: BinaryOperator,
    left: &TypedConstant,
    right: &TypedConstant,
) -> Result<TypedConstant, BinaryFailure> {
    let operation_type = operation_type(&left.constant_type, &right.constant_type).ok_or_else(
        || BinaryFailure::MismatchedOperands(left.constant_type.clone(), right.constant_type.clone()),
    )?;
    if !operator_defined(operator, &operation_type) {
        return Err(BinaryFailure::InvalidOperator(operation_type));
    }
    let coerce_operand = |operand: &TypedConstant| {
        coerce::constant_coercion(options, operand, &operation_type).ok_or_else(|| {
            BinaryFailure::Coercion {
                source: operand.constant_type.clone(),
                target: operation_type.clone(),
            }
        })
    };
    let left = coerce_operand(left)?;
    let right = coerce_operand(right)?;

    match (&left.value, &right.value) {
        (ConstantValue::Integer(left_bits), ConstantValue::Integer(right_bits))
            if integer_properties(&operation_type).is_some() =>
        {
            fold_integer(operator, &operation_type, *left_bits, *right_bits)
        }
        (ConstantValue::Float(left_value), ConstantValue::Float(right_value)) => {
            fold_float(operator, &operation_type, *left_value, *right_value)
        }
        (ConstantValue::Boolean(left_flag), ConstantValue::Boolean(right_flag)) => {
            match operator {
                BinaryOperator::BooleanAnd => Ok(boolean_result(*left_flag && *right_flag)),
                BinaryOperator::BooleanOr => Ok(boolean_result(*left_flag || *right_flag)),
                BinaryOperator::Equal => Ok(boolean_result(left_flag == right_flag)),
                BinaryOperator::NotEqual => Ok(boolean_result(left_flag != right_flag)),
                _ => Err(BinaryFailure::InvalidOperator(operation_type)),
            }
        }
        (ConstantValue::Pointer(left_address), ConstantValue::Pointer(right_address)) => {
            match operator {
                BinaryOperator::Equal => Ok(boolean_result(left_address == right_address)),
                BinaryOperator::NotEqual => Ok(boolean_result(left_address != right_address)),
                _ => Err(BinaryFailure::InvalidOperator(operation_type)),
            }
        }
        _ => Err(BinaryFailure::InvalidOperator(operation_type)),
    }
}

/// Constant-fold unary negation. `None` when the operand is not numeric.
pub fn fold_negation(constant: &TypedConstant) -> Option<TypedConstant> {
    match (&constant.constant_type, &constant.value) {
        (Type::Integer { size, .. }, ConstantValue::Integer(bits)) => Some(TypedConstant::new(
            constant.constant_type.clone(),
            ConstantValue::Integer(size.mask(bits.wrapping_neg())),
        )),
        (Type::UndeterminedInteger, ConstantValue::Integer(bits)) => Some(TypedConstant::new(
            Type::UndeterminedInteger,
            ConstantValue::Integer(bits.wrapping_neg()),
        )),
        (Type::Float { size }, ConstantValue::Float(value)) => Some(TypedConstant::new(
            constant.constant_type.clone(),
            ConstantValue::Float(size.round(-value)),
        )),
        (Type::UndeterminedFloat, ConstantValue::Float(value)) => Some(TypedConstant::new(
            Type::UndeterminedFloat,
            ConstantValue::Float(-value),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i32_type() -> Type {
        Type::Integer {
            size: RegisterSize::Size32,
            signed: true,
        }
    }

    fn u64_type() -> Type {
        Type::Integer {
            size: RegisterSize::Size64,
            signed: false,
        }
    }

    fn undetermined(bits: u64) -> TypedConstant {
        TypedConstant::new(Type::UndeterminedInteger, ConstantValue::Integer(bits))
    }

    #[test]
    fn test_ladder_prefers_booleans_then_pointers() {
        assert_eq!(
            operation_type(&Type::Boolean, &i32_type()),
            Some(Type::Boolean)
        );
        let pointer = Type::pointer_to(i32_type());
        assert_eq!(
            operation_type(&pointer, &Type::UndeterminedInteger),
            Some(pointer.clone())
        );
    }

    #[test]
    fn test_ladder_widens_integers_and_ors_signedness() {
        assert_eq!(
            operation_type(&i32_type(), &u64_type()),
            Some(Type::Integer {
                size: RegisterSize::Size64,
                signed: true,
            })
        );
    }

    #[test]
    fn test_ladder_concrete_side_wins_over_undetermined() {
        assert_eq!(
            operation_type(&Type::UndeterminedInteger, &i32_type()),
            Some(i32_type())
        );
        assert_eq!(
            operation_type(
                &Type::UndeterminedInteger,
                &Type::Float {
                    size: FloatSize::Size32
                }
            ),
            Some(Type::Float {
                size: FloatSize::Size32
            })
        );
        assert_eq!(
            operation_type(&Type::UndeterminedInteger, &Type::UndeterminedFloat),
            Some(Type::UndeterminedFloat)
        );
    }

    #[test]
    fn test_ladder_rejects_unrelated_types() {
        assert_eq!(operation_type(&Type::Void, &i32_type()), None);
        assert_eq!(
            operation_type(
                &Type::UndeterminedStruct {
                    members: Vec::new()
                },
                &i32_type()
            ),
            None
        );
    }

    #[test]
    fn test_fold_undetermined_arithmetic() {
        let options = TargetConfig::default();
        let result = constant_binary(
            &options,
            BinaryOperator::Addition,
            &undetermined(2),
            &constant_binary(
                &options,
                BinaryOperator::Multiplication,
                &undetermined(3),
                &undetermined(4),
            )
            .unwrap(),
        )
        .unwrap();
        assert!(matches!(result.constant_type, Type::UndeterminedInteger));
        assert!(matches!(result.value, ConstantValue::Integer(14)));
    }

    #[test]
    fn test_fold_signed_division_respects_sign() {
        let options = TargetConfig::default();
        let minus_six = TypedConstant::new(
            i32_type(),
            ConstantValue::Integer(RegisterSize::Size32.mask((-6i64) as u64)),
        );
        let two = TypedConstant::new(i32_type(), ConstantValue::Integer(2));
        let result =
            constant_binary(&options, BinaryOperator::Division, &minus_six, &two).unwrap();
        assert!(matches!(
            result.value,
            ConstantValue::Integer(bits) if RegisterSize::Size32.sign_extend(bits) == -3
        ));
    }

    #[test]
    fn test_fold_division_by_zero_fails() {
        let options = TargetConfig::default();
        let result = constant_binary(
            &options,
            BinaryOperator::Division,
            &undetermined(1),
            &undetermined(0),
        );
        assert!(matches!(result, Err(BinaryFailure::DivisionByZero)));
    }

    #[test]
    fn test_fold_unsigned_comparison() {
        let options = TargetConfig::default();
        let big = TypedConstant::new(u64_type(), ConstantValue::Integer(u64::MAX));
        let one = TypedConstant::new(u64_type(), ConstantValue::Integer(1));
        let result = constant_binary(&options, BinaryOperator::LessThan, &big, &one).unwrap();
        assert!(matches!(result.value, ConstantValue::Boolean(false)));
    }

    #[test]
    fn test_boolean_operators_require_booleans() {
        let options = TargetConfig::default();
        let result = constant_binary(
            &options,
            BinaryOperator::BooleanAnd,
            &undetermined(1),
            &undetermined(1),
        );
        assert!(matches!(result, Err(BinaryFailure::InvalidOperator(_))));
    }
}
