//! Runtime expression lowering.
//!
//! Mirrors the constant evaluator over the same grammar, emitting
//! instructions whenever an operand is not constant. All-constant subtrees
//! are folded through the shared rule layer, so they produce the same bits
//! the pure evaluator would and leave no instructions behind.

use std::rc::Rc;

use crate::ast::{BinaryOperator, Expression, FunctionParameter, Statement, UnaryOperator};
use crate::ir::{
    FloatArithmeticOperation, FloatComparisonOperation, Instruction,
    IntegerArithmeticOperation, IntegerComparisonOperation, Register,
};
use crate::scope::{ConstantParameter, DeclarationScope};
use crate::span::Span;
use crate::types::{FloatSize, FunctionSignature, StructMember, Type};
use crate::value::{
    BuiltinFunction, ConstantValue, FunctionReference, PolymorphicFunctionReference,
    TypedConstant,
};

use super::coerce;
use super::constants;
use super::context::{InstantiationKey, RuntimeFunctionEntry};
use super::generator::{FunctionGenerator, RuntimeValueKind, TypedValue};
use super::layout;
use super::promotion;
use super::resolve;
use super::{CResult, ErrorKind};

/// A stable rendering of a type for the instantiation cache. Nominal
/// types key on their definition node, so two same-named structs from
/// different files never collide.
fn instantiation_type_key(value_type: &Type) -> String {
    match value_type {
        Type::Struct(struct_type) => {
            format!("struct:{:p}", Rc::as_ptr(&struct_type.definition))
        }
        Type::PolymorphicStruct(struct_type) => {
            format!("polystruct:{:p}", Rc::as_ptr(&struct_type.definition))
        }
        Type::Pointer { pointee } => format!("*{}", instantiation_type_key(pointee)),
        Type::ArraySlice { element } => format!("[]{}", instantiation_type_key(element)),
        Type::StaticArray { length, element } => {
            format!("[{}]{}", length, instantiation_type_key(element))
        }
        Type::Function(signature) => {
            let parameters: Vec<String> = signature
                .parameters
                .iter()
                .map(instantiation_type_key)
                .collect();
            format!(
                "({})->{}",
                parameters.join(","),
                instantiation_type_key(&signature.return_type)
            )
        }
        _ => value_type.to_string(),
    }
}

fn instantiation_value_key(value: &ConstantValue) -> String {
    match value {
        ConstantValue::Integer(bits) => format!("i{}", bits),
        ConstantValue::Float(float) => format!("f{}", float.to_bits()),
        ConstantValue::Boolean(flag) => format!("b{}", flag),
        ConstantValue::Void => "void".to_string(),
        ConstantValue::Pointer(address) => format!("p{}", address),
        ConstantValue::ArraySlice { pointer, length } => format!("s{}:{}", pointer, length),
        ConstantValue::StaticArray(values) | ConstantValue::Struct(values) => {
            let rendered: Vec<String> = values.iter().map(instantiation_value_key).collect();
            format!("[{}]", rendered.join(","))
        }
        ConstantValue::Function(reference) => format!("fn:{}", reference.mangled_name),
        ConstantValue::PolymorphicFunction(reference) => {
            format!("pfn:{:p}", Rc::as_ptr(&reference.declaration))
        }
        ConstantValue::Builtin(builtin) => builtin.name().to_string(),
        ConstantValue::FileModule(module) => format!("mod:{}", module.path.display()),
        ConstantValue::Type(value_type) => format!("t{}", instantiation_type_key(value_type)),
    }
}

impl FunctionGenerator<'_, '_> {
    fn evaluate_in_scope(&mut self, expression: &Expression) -> CResult<TypedConstant> {
        let scope = self.scope.clone();
        constants::evaluate_constant(self.context, &scope, expression)
    }

    pub fn generate_expression(&mut self, expression: &Expression) -> CResult<TypedValue> {
        match expression {
            Expression::IntegerLiteral { .. }
            | Expression::FloatLiteral { .. }
            | Expression::StringLiteral { .. }
            | Expression::BooleanLiteral { .. }
            | Expression::ArrayType { .. }
            | Expression::FunctionType { .. }
            | Expression::PolymorphicDeterminer { .. } => {
                self.evaluate_in_scope(expression).map(TypedValue::from_constant)
            }
            Expression::NamedReference { name, span } => {
                if let Some(variable) = self.find_variable(name) {
                    return Ok(TypedValue::address(
                        variable.variable_type,
                        variable.address_register,
                    ));
                }
                let scope = self.scope.clone();
                resolve::resolve_name(self.context, &scope, name, *span)
                    .map(TypedValue::from_constant)
            }
            Expression::StructLiteral { members, .. } => {
                let mut member_types: Vec<StructMember> = Vec::with_capacity(members.len());
                let mut values = Vec::with_capacity(members.len());
                for (name, member_expression) in members {
                    if member_types.iter().any(|existing| existing.name == *name) {
                        return self.fail(
                            ErrorKind::Evaluation,
                            member_expression.span(),
                            format!("duplicate member name '{}'", name),
                        );
                    }
                    let value = self.generate_expression(member_expression)?;
                    member_types.push(StructMember {
                        name: name.clone(),
                        member_type: value.value_type.clone(),
                    });
                    values.push(value);
                }
                Ok(TypedValue {
                    value_type: Type::UndeterminedStruct {
                        members: member_types,
                    },
                    kind: RuntimeValueKind::UndeterminedStruct(values),
                })
            }
            Expression::ArrayLiteral { elements, span } => {
                self.generate_array_literal(expression, elements, *span)
            }
            Expression::MemberReference { object, name, span } => {
                let object_value = self.generate_expression(object)?;
                self.generate_member(object_value, name, *span)
            }
            Expression::IndexReference {
                object,
                index,
                span,
            } => self.generate_index(expression, object, index, *span),
            Expression::BinaryOperation {
                operator,
                left,
                right,
                span,
            } => self.generate_binary(*operator, left, right, *span),
            Expression::UnaryOperation {
                operator,
                operand,
                span,
            } => self.generate_unary(*operator, operand, *span),
            Expression::Cast {
                value,
                target,
                span,
            } => self.generate_cast(value, target, *span),
            Expression::FunctionCall {
                callee,
                arguments,
                span,
            } => self.generate_call(callee, arguments, *span),
        }
    }

    fn generate_array_literal(
        &mut self,
        expression: &Expression,
        elements: &[Expression],
        span: Span,
    ) -> CResult<TypedValue> {
        if elements.is_empty() {
            return self.fail(
                ErrorKind::Type,
                span,
                "cannot determine the element type of an empty array literal",
            );
        }
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            values.push(self.generate_expression(element)?);
        }
        if values.iter().all(TypedValue::is_constant) {
            return self.evaluate_in_scope(expression).map(TypedValue::from_constant);
        }
        let options = self.options();
        let Some(element_type) = values[0].value_type.defaulted(&options) else {
            return self.fail(
                ErrorKind::Type,
                elements[0].span(),
                format!("'{}' cannot exist at runtime", values[0].value_type),
            );
        };
        let element_size = layout::size_of(&element_type, &options);
        let array_type = Type::static_array_of(values.len() as u64, element_type.clone());
        let local = self.allocate_local(&array_type);
        for (index, value) in values.iter().enumerate() {
            let destination = self.offset_address(local, index as u64 * element_size);
            self.write_value(value, &element_type, destination, elements[index].span())?;
        }
        Ok(TypedValue::register(array_type, local))
    }

    fn no_member<T>(&self, span: Span, name: &str, object_type: &Type) -> CResult<T> {
        self.fail(
            ErrorKind::Resolution,
            span,
            format!("no member '{}' on type '{}'", name, object_type),
        )
    }

    fn generate_member(
        &mut self,
        object: TypedValue,
        name: &str,
        span: Span,
    ) -> CResult<TypedValue> {
        let options = self.options();
        match &object.value_type {
            Type::FileModule => {
                let RuntimeValueKind::Constant(ConstantValue::FileModule(reference)) =
                    &object.kind
                else {
                    return self.no_member(span, name, &object.value_type);
                };
                let reference = reference.clone();
                match resolve::search_module(self.context, &reference, name)? {
                    Some(found) => Ok(TypedValue::from_constant(found)),
                    None => self.fail(
                        ErrorKind::Resolution,
                        span,
                        format!("cannot find named reference '{}'", name),
                    ),
                }
            }
            Type::UndeterminedStruct { members } => {
                let Some(index) = members.iter().position(|member| member.name == name) else {
                    return self.no_member(span, name, &object.value_type);
                };
                match &object.kind {
                    RuntimeValueKind::UndeterminedStruct(values) => Ok(values[index].clone()),
                    RuntimeValueKind::Constant(ConstantValue::Struct(values)) => {
                        Ok(TypedValue::from_constant(TypedConstant::new(
                            members[index].member_type.clone(),
                            values[index].clone(),
                        )))
                    }
                    _ => self.no_member(span, name, &object.value_type),
                }
            }
            Type::Struct(struct_type) => {
                let Some(index) = struct_type.member_index(name) else {
                    return self.no_member(span, name, &object.value_type);
                };
                let member_type = struct_type.members[index].member_type.clone();
                let offset = layout::member_offset(
                    &struct_type.members,
                    index,
                    struct_type.is_union,
                    &options,
                );
                match &object.kind {
                    RuntimeValueKind::Constant(ConstantValue::Struct(values)) => {
                        Ok(TypedValue::from_constant(TypedConstant::new(
                            member_type,
                            values[index].clone(),
                        )))
                    }
                    RuntimeValueKind::Address(base) => {
                        let base = *base;
                        let address = self.offset_address(base, offset);
                        Ok(TypedValue::address(member_type, address))
                    }
                    RuntimeValueKind::Register(base) => {
                        let base = *base;
                        let address = self.offset_address(base, offset);
                        if member_type.fits_in_register() {
                            let loaded = self.load_scalar(&member_type, address);
                            Ok(TypedValue::register(member_type, loaded))
                        } else {
                            Ok(TypedValue::register(member_type, address))
                        }
                    }
                    _ => self.no_member(span, name, &object.value_type),
                }
            }
            Type::ArraySlice { element } => {
                let (offset, member_type) = match name {
                    "pointer" => (0, Type::pointer_to((**element).clone())),
                    "length" => (options.address_size.byte_count(), options.address_integer()),
                    _ => return self.no_member(span, name, &object.value_type),
                };
                match &object.kind {
                    RuntimeValueKind::Constant(ConstantValue::ArraySlice {
                        pointer,
                        length,
                    }) => {
                        let value = if name == "pointer" {
                            ConstantValue::Pointer(*pointer)
                        } else {
                            ConstantValue::Integer(*length)
                        };
                        Ok(TypedValue::from_constant(TypedConstant::new(
                            member_type,
                            value,
                        )))
                    }
                    RuntimeValueKind::Address(base) => {
                        let base = *base;
                        let address = self.offset_address(base, offset);
                        Ok(TypedValue::address(member_type, address))
                    }
                    RuntimeValueKind::Register(base) => {
                        let base = *base;
                        let address = self.offset_address(base, offset);
                        let loaded = self.load_scalar(&member_type, address);
                        Ok(TypedValue::register(member_type, loaded))
                    }
                    _ => self.no_member(span, name, &object.value_type),
                }
            }
            Type::StaticArray { length, element } => match name {
                "length" => Ok(TypedValue::from_constant(TypedConstant::new(
                    options.address_integer(),
                    ConstantValue::Integer(*length),
                ))),
                "pointer" => {
                    let pointer_type = Type::pointer_to((**element).clone());
                    let address = self.value_address(&object, span)?;
                    Ok(TypedValue::register(pointer_type, address))
                }
                _ => self.no_member(span, name, &object.value_type),
            },
            _ => self.no_member(span, name, &object.value_type),
        }
    }

    fn generate_index(
        &mut self,
        expression: &Expression,
        object_expression: &Expression,
        index_expression: &Expression,
        span: Span,
    ) -> CResult<TypedValue> {
        let object = self.generate_expression(object_expression)?;
        let index = self.generate_expression(index_expression)?;
        if object.is_constant() && index.is_constant() {
            // Fully constant: fold through the pure evaluator, which also
            // bounds-checks.
            return self.evaluate_in_scope(expression).map(TypedValue::from_constant);
        }
        let options = self.options();
        match &object.value_type {
            Type::StaticArray { element, .. } => {
                let element_type = (**element).clone();
                let base = self.value_address(&object, span)?;
                self.index_address(base, &index, &element_type, index_expression.span())
            }
            Type::ArraySlice { element } => {
                let element_type = (**element).clone();
                let base = match &object.kind {
                    RuntimeValueKind::Constant(ConstantValue::ArraySlice { pointer, .. }) => {
                        self.emit_integer_constant(options.address_size, *pointer)
                    }
                    RuntimeValueKind::Register(storage) | RuntimeValueKind::Address(storage) => {
                        // Word 0 of the slice is the data pointer.
                        let storage = *storage;
                        let destination = self.allocate_register();
                        self.emit(Instruction::IntegerLoad {
                            size: options.address_size,
                            address: storage,
                            destination,
                        });
                        destination
                    }
                    _ => {
                        return self.fail(
                            ErrorKind::Type,
                            span,
                            format!("cannot index '{}'", object.value_type),
                        )
                    }
                };
                self.index_address(base, &index, &element_type, index_expression.span())
            }
            _ => self.fail(
                ErrorKind::Type,
                span,
                format!("cannot index '{}'", object.value_type),
            ),
        }
    }

    /// `address = base + index * element_size`, at address width.
    fn index_address(
        &mut self,
        base: Register,
        index: &TypedValue,
        element_type: &Type,
        span: Span,
    ) -> CResult<TypedValue> {
        let options = self.options();
        let index_register = self.coerce_register(index, &options.address_integer(), span)?;
        let size_register = self.emit_integer_constant(
            options.address_size,
            layout::size_of(element_type, &options),
        );
        let scaled = self.allocate_register();
        self.emit(Instruction::IntegerArithmetic {
            operation: IntegerArithmeticOperation::Multiply,
            size: options.address_size,
            left: index_register,
            right: size_register,
            destination: scaled,
        });
        let destination = self.allocate_register();
        self.emit(Instruction::IntegerArithmetic {
            operation: IntegerArithmeticOperation::Add,
            size: options.address_size,
            left: base,
            right: scaled,
            destination,
        });
        Ok(TypedValue::address(element_type.clone(), destination))
    }

    fn generate_binary(
        &mut self,
        operator: BinaryOperator,
        left_expression: &Expression,
        right_expression: &Expression,
        span: Span,
    ) -> CResult<TypedValue> {
        let left = self.generate_expression(left_expression)?;
        let right = self.generate_expression(right_expression)?;

        if let (Some(left_constant), Some(right_constant)) =
            (left.as_constant(), right.as_constant())
        {
            let options = self.options();
            return match promotion::constant_binary(
                &options,
                operator,
                &left_constant,
                &right_constant,
            ) {
                Ok(result) => Ok(TypedValue::from_constant(result)),
                Err(failure) => constants::binary_failure(&self.path, span, &failure),
            };
        }

        let Some(operation_type) =
            promotion::operation_type(&left.value_type, &right.value_type)
        else {
            return self.fail(
                ErrorKind::Type,
                span,
                format!(
                    "cannot perform that operation on '{}' and '{}'",
                    left.value_type, right.value_type
                ),
            );
        };
        if !promotion::operator_defined(operator, &operation_type) {
            return self.fail(
                ErrorKind::Type,
                span,
                format!("cannot perform that operation on '{}'", operation_type),
            );
        }
        let left_register = self.coerce_register(&left, &operation_type, span)?;
        let right_register = self.coerce_register(&right, &operation_type, span)?;
        self.emit_binary_operation(operator, &operation_type, left_register, right_register, span)
    }

    fn emit_integer_binary(
        &mut self,
        operation: IntegerArithmeticOperation,
        size: crate::types::RegisterSize,
        left: Register,
        right: Register,
    ) -> Register {
        let destination = self.allocate_register();
        self.emit(Instruction::IntegerArithmetic {
            operation,
            size,
            left,
            right,
            destination,
        });
        destination
    }

    fn emit_integer_compare(
        &mut self,
        comparison: IntegerComparisonOperation,
        size: crate::types::RegisterSize,
        left: Register,
        right: Register,
    ) -> Register {
        let destination = self.allocate_register();
        self.emit(Instruction::IntegerComparison {
            comparison,
            size,
            left,
            right,
            destination,
        });
        destination
    }

    fn emit_float_binary(
        &mut self,
        operation: FloatArithmeticOperation,
        size: FloatSize,
        left: Register,
        right: Register,
    ) -> Register {
        let destination = self.allocate_register();
        self.emit(Instruction::FloatArithmetic {
            operation,
            size,
            left,
            right,
            destination,
        });
        destination
    }

    fn emit_float_compare(
        &mut self,
        comparison: FloatComparisonOperation,
        size: FloatSize,
        left: Register,
        right: Register,
    ) -> Register {
        let destination = self.allocate_register();
        self.emit(Instruction::FloatComparison {
            comparison,
            size,
            left,
            right,
            destination,
        });
        destination
    }

    fn emit_binary_operation(
        &mut self,
        operator: BinaryOperator,
        operation_type: &Type,
        left: Register,
        right: Register,
        span: Span,
    ) -> CResult<TypedValue> {
        use BinaryOperator as Op;
        use IntegerArithmeticOperation as Arith;
        use IntegerComparisonOperation as Compare;

        let options = self.options();
        let invalid = |generator: &Self| {
            generator.fail::<TypedValue>(
                ErrorKind::Type,
                span,
                format!("cannot perform that operation on '{}'", operation_type),
            )
        };
        match operation_type {
            Type::Integer { size, signed } => {
                let arithmetic = |operator: Op| -> Option<Arith> {
                    match operator {
                        Op::Addition => Some(Arith::Add),
                        Op::Subtraction => Some(Arith::Subtract),
                        Op::Multiplication => Some(Arith::Multiply),
                        Op::Division => Some(if *signed {
                            Arith::SignedDivide
                        } else {
                            Arith::UnsignedDivide
                        }),
                        Op::Modulus => Some(if *signed {
                            Arith::SignedModulus
                        } else {
                            Arith::UnsignedModulus
                        }),
                        Op::BitwiseAnd => Some(Arith::BitwiseAnd),
                        Op::BitwiseOr => Some(Arith::BitwiseOr),
                        _ => None,
                    }
                };
                if let Some(operation) = arithmetic(operator) {
                    let result = self.emit_integer_binary(operation, *size, left, right);
                    return Ok(TypedValue::register(operation_type.clone(), result));
                }
                let comparison = match operator {
                    Op::Equal | Op::NotEqual => Compare::Equal,
                    Op::LessThan => {
                        if *signed {
                            Compare::SignedLessThan
                        } else {
                            Compare::UnsignedLessThan
                        }
                    }
                    Op::GreaterThan => {
                        if *signed {
                            Compare::SignedGreaterThan
                        } else {
                            Compare::UnsignedGreaterThan
                        }
                    }
                    _ => return invalid(self),
                };
                let mut result = self.emit_integer_compare(comparison, *size, left, right);
                if operator == Op::NotEqual {
                    result = self.emit_boolean_invert(result);
                }
                Ok(TypedValue::register(Type::Boolean, result))
            }
            Type::Boolean => {
                let size = options.default_integer_size;
                match operator {
                    Op::BooleanAnd => {
                        let result =
                            self.emit_integer_binary(Arith::BitwiseAnd, size, left, right);
                        Ok(TypedValue::register(Type::Boolean, result))
                    }
                    Op::BooleanOr => {
                        let result = self.emit_integer_binary(Arith::BitwiseOr, size, left, right);
                        Ok(TypedValue::register(Type::Boolean, result))
                    }
                    Op::Equal | Op::NotEqual => {
                        let mut result =
                            self.emit_integer_compare(Compare::Equal, size, left, right);
                        if operator == Op::NotEqual {
                            result = self.emit_boolean_invert(result);
                        }
                        Ok(TypedValue::register(Type::Boolean, result))
                    }
                    _ => invalid(self),
                }
            }
            Type::Float { size } => {
                let arithmetic = match operator {
                    Op::Addition => Some(FloatArithmeticOperation::Add),
                    Op::Subtraction => Some(FloatArithmeticOperation::Subtract),
                    Op::Multiplication => Some(FloatArithmeticOperation::Multiply),
                    Op::Division => Some(FloatArithmeticOperation::Divide),
                    _ => None,
                };
                if let Some(operation) = arithmetic {
                    let result = self.emit_float_binary(operation, *size, left, right);
                    return Ok(TypedValue::register(operation_type.clone(), result));
                }
                let comparison = match operator {
                    Op::Equal | Op::NotEqual => FloatComparisonOperation::Equal,
                    Op::LessThan => FloatComparisonOperation::LessThan,
                    Op::GreaterThan => FloatComparisonOperation::GreaterThan,
                    _ => return invalid(self),
                };
                let mut result = self.emit_float_compare(comparison, *size, left, right);
                if operator == Op::NotEqual {
                    result = self.emit_boolean_invert(result);
                }
                Ok(TypedValue::register(Type::Boolean, result))
            }
            Type::Pointer { .. } => {
                let size = options.address_size;
                match operator {
                    Op::Equal | Op::NotEqual => {
                        let mut result =
                            self.emit_integer_compare(Compare::Equal, size, left, right);
                        if operator == Op::NotEqual {
                            result = self.emit_boolean_invert(result);
                        }
                        Ok(TypedValue::register(Type::Boolean, result))
                    }
                    _ => invalid(self),
                }
            }
            _ => invalid(self),
        }
    }

    fn generate_unary(
        &mut self,
        operator: UnaryOperator,
        operand_expression: &Expression,
        span: Span,
    ) -> CResult<TypedValue> {
        let operand = self.generate_expression(operand_expression)?;
        match operator {
            UnaryOperator::Pointer => match (&operand.value_type, &operand.kind) {
                (Type::TypeOfType, RuntimeValueKind::Constant(ConstantValue::Type(pointee))) => {
                    Ok(TypedValue::from_constant(TypedConstant::new(
                        Type::TypeOfType,
                        ConstantValue::Type(Type::pointer_to(pointee.clone())),
                    )))
                }
                (_, RuntimeValueKind::Address(register)) => Ok(TypedValue::register(
                    Type::pointer_to(operand.value_type.clone()),
                    *register,
                )),
                (value_type, RuntimeValueKind::Register(register))
                    if !value_type.fits_in_register() && value_type.is_runtime_type() =>
                {
                    Ok(TypedValue::register(
                        Type::pointer_to(operand.value_type.clone()),
                        *register,
                    ))
                }
                _ => self.fail(
                    ErrorKind::Type,
                    span,
                    "cannot take the address of this expression",
                ),
            },
            UnaryOperator::BooleanInvert => {
                if let Some(constant) = operand.as_constant() {
                    let ConstantValue::Boolean(flag) = constant.value else {
                        return self.fail(
                            ErrorKind::Type,
                            span,
                            format!("expected 'bool', got '{}'", constant.constant_type),
                        );
                    };
                    return Ok(TypedValue::from_constant(TypedConstant::new(
                        Type::Boolean,
                        ConstantValue::Boolean(!flag),
                    )));
                }
                let register = self.coerce_register(&operand, &Type::Boolean, span)?;
                let inverted = self.emit_boolean_invert(register);
                Ok(TypedValue::register(Type::Boolean, inverted))
            }
            UnaryOperator::Negation => {
                if let Some(constant) = operand.as_constant() {
                    return match promotion::fold_negation(&constant) {
                        Some(negated) => Ok(TypedValue::from_constant(negated)),
                        None => self.fail(
                            ErrorKind::Type,
                            span,
                            format!("cannot negate '{}'", constant.constant_type),
                        ),
                    };
                }
                match operand.value_type.clone() {
                    Type::Integer { size, .. } => {
                        let value_register = self.value_register(&operand, span)?;
                        let zero = self.emit_integer_constant(size, 0);
                        let result = self.emit_integer_binary(
                            IntegerArithmeticOperation::Subtract,
                            size,
                            zero,
                            value_register,
                        );
                        Ok(TypedValue::register(operand.value_type, result))
                    }
                    Type::Float { size } => {
                        let value_register = self.value_register(&operand, span)?;
                        let zero = self.emit_float_constant(size, 0.0);
                        let result = self.emit_float_binary(
                            FloatArithmeticOperation::Subtract,
                            size,
                            zero,
                            value_register,
                        );
                        Ok(TypedValue::register(operand.value_type, result))
                    }
                    other => self.fail(
                        ErrorKind::Type,
                        span,
                        format!("cannot negate '{}'", other),
                    ),
                }
            }
        }
    }

    fn generate_cast(
        &mut self,
        value_expression: &Expression,
        target_expression: &Expression,
        span: Span,
    ) -> CResult<TypedValue> {
        let value = self.generate_expression(value_expression)?;
        let scope = self.scope.clone();
        let target = constants::evaluate_type_expression(self.context, &scope, target_expression)?;
        let options = self.options();

        if let Some(constant) = value.as_constant() {
            if let Some(coerced) = coerce::constant_coercion(&options, &constant, &target) {
                return Ok(TypedValue::from_constant(coerced));
            }
            if let Some(converted) = constants::explicit_constant_cast(&options, &constant, &target)
            {
                return Ok(TypedValue::from_constant(converted));
            }
            return self.fail(
                ErrorKind::Evaluation,
                span,
                format!("cannot cast '{}' to '{}'", constant.constant_type, target),
            );
        }

        if !target.fits_in_register() {
            // Aggregate casts are coercions into fresh storage.
            let local = self.allocate_local(&target);
            if self.coerce_into_address(&value, &target, local, span, true)? {
                return Ok(TypedValue::register(target, local));
            }
            return self.fail(
                ErrorKind::Evaluation,
                span,
                format!("cannot cast '{}' to '{}'", value.value_type, target),
            );
        }

        if let Some(register) = self.coerce_to_register(&value, &target, span, true)? {
            return Ok(TypedValue::register(target, register));
        }
        let source = value.value_type.clone();
        match (&source, &target) {
            (
                Type::Integer {
                    size: source_size,
                    signed,
                },
                Type::Integer {
                    size: target_size, ..
                },
            ) => {
                let register = self.value_register(&value, span)?;
                if target_size.byte_count() > source_size.byte_count() {
                    let destination = self.allocate_register();
                    self.emit(Instruction::IntegerUpcast {
                        signed: *signed,
                        source_size: *source_size,
                        source: register,
                        destination_size: *target_size,
                        destination,
                    });
                    Ok(TypedValue::register(target, destination))
                } else {
                    // Narrowing reinterprets the low bits.
                    Ok(TypedValue::register(target, register))
                }
            }
            (Type::Integer { size, signed }, Type::Float { size: float_size }) => {
                let register = self.value_register(&value, span)?;
                let destination = self.allocate_register();
                self.emit(Instruction::FloatFromInteger {
                    signed: *signed,
                    source_size: *size,
                    source: register,
                    destination_size: *float_size,
                    destination,
                });
                Ok(TypedValue::register(target, destination))
            }
            (Type::Float { size }, Type::Integer { size: integer_size, .. }) => {
                let register = self.value_register(&value, span)?;
                let destination = self.allocate_register();
                self.emit(Instruction::FloatTruncation {
                    source_size: *size,
                    source: register,
                    destination_size: *integer_size,
                    destination,
                });
                Ok(TypedValue::register(target, destination))
            }
            (Type::Float { size: source_size }, Type::Float { size: target_size }) => {
                let register = self.value_register(&value, span)?;
                let destination = self.allocate_register();
                self.emit(Instruction::FloatConversion {
                    source_size: *source_size,
                    source: register,
                    destination_size: *target_size,
                    destination,
                });
                Ok(TypedValue::register(target, destination))
            }
            (Type::Pointer { .. }, Type::Integer { size, signed: false })
                if *size == options.address_size =>
            {
                let register = self.value_register(&value, span)?;
                Ok(TypedValue::register(target, register))
            }
            (Type::Integer { size, signed: false }, Type::Pointer { .. })
                if *size == options.address_size =>
            {
                let register = self.value_register(&value, span)?;
                Ok(TypedValue::register(target, register))
            }
            _ => self.fail(
                ErrorKind::Evaluation,
                span,
                format!("cannot cast '{}' to '{}'", source, target),
            ),
        }
    }

    fn generate_call(
        &mut self,
        callee_expression: &Expression,
        arguments: &[Expression],
        span: Span,
    ) -> CResult<TypedValue> {
        let callee = self.generate_expression(callee_expression)?;
        match (&callee.value_type, &callee.kind) {
            (
                Type::BuiltinFunction,
                RuntimeValueKind::Constant(ConstantValue::Builtin(builtin)),
            ) => {
                let builtin = *builtin;
                self.generate_builtin_call(builtin, arguments, span)
            }
            (
                Type::TypeOfType,
                RuntimeValueKind::Constant(ConstantValue::Type(Type::PolymorphicStruct(
                    struct_type,
                ))),
            ) => {
                let struct_type = struct_type.clone();
                let scope = self.scope.clone();
                let mut evaluated = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    evaluated.push(constants::evaluate_constant(
                        self.context,
                        &scope,
                        argument,
                    )?);
                }
                let path = self.path.clone();
                let instantiated = constants::instantiate_polymorphic_struct(
                    self.context,
                    &struct_type,
                    &evaluated,
                    &path,
                    span,
                )?;
                Ok(TypedValue::from_constant(TypedConstant::new(
                    Type::TypeOfType,
                    ConstantValue::Type(instantiated),
                )))
            }
            (
                Type::Function(signature),
                RuntimeValueKind::Constant(ConstantValue::Function(reference)),
            ) => {
                let signature = signature.clone();
                let reference = reference.clone();
                self.generate_function_call(&signature, &reference, arguments, span)
            }
            (
                Type::PolymorphicFunction,
                RuntimeValueKind::Constant(ConstantValue::PolymorphicFunction(reference)),
            ) => {
                let reference = reference.clone();
                self.generate_polymorphic_call(&reference, arguments, span)
            }
            _ => self.fail(
                ErrorKind::Type,
                span,
                format!("cannot call '{}'", callee.value_type),
            ),
        }
    }

    fn generate_builtin_call(
        &mut self,
        builtin: BuiltinFunction,
        arguments: &[Expression],
        span: Span,
    ) -> CResult<TypedValue> {
        if arguments.len() != 1 {
            return self.fail(
                ErrorKind::Evaluation,
                span,
                format!("expected 1 argument, got {}", arguments.len()),
            );
        }
        let options = self.options();
        match builtin {
            BuiltinFunction::SizeOf => {
                let scope = self.scope.clone();
                let target =
                    constants::evaluate_type_expression(self.context, &scope, &arguments[0])?;
                Ok(TypedValue::from_constant(TypedConstant::new(
                    options.address_integer(),
                    ConstantValue::Integer(layout::size_of(&target, &options)),
                )))
            }
            BuiltinFunction::TypeOf => {
                let value = self.generate_expression(&arguments[0])?;
                let Some(defaulted) = value.value_type.defaulted(&options) else {
                    return self.fail(
                        ErrorKind::Type,
                        arguments[0].span(),
                        format!("'{}' cannot exist at runtime", value.value_type),
                    );
                };
                Ok(TypedValue::from_constant(TypedConstant::new(
                    Type::TypeOfType,
                    ConstantValue::Type(defaulted),
                )))
            }
        }
    }

    /// Shared call tail: scalar results come back in a register, aggregate
    /// results are written through a caller-allocated local passed as an
    /// implicit trailing argument.
    fn emit_call(
        &mut self,
        name: &str,
        mut argument_registers: Vec<Register>,
        return_type: &Type,
    ) -> TypedValue {
        if matches!(return_type, Type::Void) {
            self.emit(Instruction::FunctionCall {
                name: name.to_string(),
                arguments: argument_registers,
                return_register: None,
            });
            TypedValue::from_constant(TypedConstant::new(Type::Void, ConstantValue::Void))
        } else if return_type.fits_in_register() {
            let destination = self.allocate_register();
            self.emit(Instruction::FunctionCall {
                name: name.to_string(),
                arguments: argument_registers,
                return_register: Some(destination),
            });
            TypedValue::register(return_type.clone(), destination)
        } else {
            let local = self.allocate_local(return_type);
            argument_registers.push(local);
            self.emit(Instruction::FunctionCall {
                name: name.to_string(),
                arguments: argument_registers,
                return_register: None,
            });
            TypedValue::register(return_type.clone(), local)
        }
    }

    fn ensure_function_registered(
        &mut self,
        reference: &FunctionReference,
        signature: &FunctionSignature,
        span: Span,
    ) -> CResult<()> {
        let Statement::FunctionDeclaration { is_external, .. } = &*reference.declaration else {
            return self.fail(ErrorKind::Structural, span, "expected a function declaration");
        };
        let body_scope = DeclarationScope::nested(
            reference.declaration.clone(),
            Vec::new(),
            reference.scope.clone(),
        );
        let entry = RuntimeFunctionEntry {
            mangled_name: reference.mangled_name.clone(),
            declaration: reference.declaration.clone(),
            body_scope,
            parameter_types: signature.parameters.clone(),
            return_type: (*signature.return_type).clone(),
            is_external: *is_external,
            generated: false,
        };
        let path = self.path.clone();
        self.context.register_runtime_function(entry, &path, span)
    }

    fn generate_function_call(
        &mut self,
        signature: &FunctionSignature,
        reference: &FunctionReference,
        arguments: &[Expression],
        span: Span,
    ) -> CResult<TypedValue> {
        if arguments.len() != signature.parameters.len() {
            return self.fail(
                ErrorKind::Type,
                span,
                format!(
                    "expected {} arguments, got {}",
                    signature.parameters.len(),
                    arguments.len()
                ),
            );
        }
        let mut registers = Vec::with_capacity(arguments.len());
        for (argument, parameter_type) in arguments.iter().zip(&signature.parameters) {
            let value = self.generate_expression(argument)?;
            registers.push(self.coerce_argument(&value, parameter_type, argument.span())?);
        }
        self.ensure_function_registered(reference, signature, span)?;
        Ok(self.emit_call(&reference.mangled_name, registers, &signature.return_type))
    }

    /// Instantiate and call a polymorphic function: bind its constant
    /// parameters and determiners from the call site, type the runtime
    /// parameters under the new scope, and register the instantiation
    /// under a generated name. The cache keyed on (declaration, constant
    /// arguments) makes repeated identical instantiations share one
    /// registration.
    fn generate_polymorphic_call(
        &mut self,
        reference: &PolymorphicFunctionReference,
        arguments: &[Expression],
        span: Span,
    ) -> CResult<TypedValue> {
        let declaration = reference.declaration.clone();
        let Statement::FunctionDeclaration {
            parameters,
            return_type,
            is_external,
            ..
        } = &*declaration
        else {
            return self.fail(ErrorKind::Structural, span, "expected a function declaration");
        };
        if *is_external {
            return self.fail(
                ErrorKind::Polymorphism,
                span,
                "external functions cannot be polymorphic",
            );
        }
        if arguments.len() != parameters.len() {
            return self.fail(
                ErrorKind::Polymorphism,
                span,
                format!(
                    "expected {} arguments, got {}",
                    parameters.len(),
                    arguments.len()
                ),
            );
        }

        let options = self.options();
        let mut bound: Vec<ConstantParameter> = Vec::new();
        let mut constant_keys: Vec<String> = Vec::new();
        let mut runtime_parameter_types: Vec<Type> = Vec::new();
        let mut runtime_arguments: Vec<(TypedValue, Span)> = Vec::new();

        for (parameter, argument_expression) in parameters.iter().zip(arguments) {
            let argument = self.generate_expression(argument_expression)?;
            let argument_span = argument_expression.span();
            if parameter.is_constant {
                let Some(constant) = argument.as_constant() else {
                    return self.fail(
                        ErrorKind::Polymorphism,
                        argument_span,
                        format!(
                            "argument for constant parameter '{}' must be a constant",
                            parameter.name
                        ),
                    );
                };
                let parameter_type =
                    self.polymorphic_parameter_type(&declaration, reference, &bound, parameter)?;
                let path = self.path.clone();
                let coerced = coerce::require_constant(
                    &options,
                    &path,
                    argument_span,
                    &constant,
                    &parameter_type,
                )?;
                constant_keys.push(format!(
                    "{}={}:{}",
                    parameter.name,
                    instantiation_type_key(&coerced.constant_type),
                    instantiation_value_key(&coerced.value)
                ));
                bound.push(ConstantParameter {
                    name: parameter.name.clone(),
                    parameter_type,
                    value: coerced.value,
                });
            } else if let Expression::PolymorphicDeterminer { name, .. } =
                &parameter.type_expression
            {
                let Some(determined) = argument.value_type.defaulted(&options) else {
                    return self.fail(
                        ErrorKind::Type,
                        argument_span,
                        format!("'{}' cannot exist at runtime", argument.value_type),
                    );
                };
                constant_keys.push(format!(
                    "{}={}",
                    name,
                    instantiation_type_key(&determined)
                ));
                bound.push(ConstantParameter {
                    name: name.clone(),
                    parameter_type: Type::TypeOfType,
                    value: ConstantValue::Type(determined.clone()),
                });
                runtime_parameter_types.push(determined);
                runtime_arguments.push((argument, argument_span));
            } else {
                let parameter_type =
                    self.polymorphic_parameter_type(&declaration, reference, &bound, parameter)?;
                if !parameter_type.is_runtime_type() {
                    return self.fail(
                        ErrorKind::Type,
                        parameter.span,
                        format!(
                            "function parameters must be runtime types, got '{}'",
                            parameter_type
                        ),
                    );
                }
                runtime_parameter_types.push(parameter_type);
                runtime_arguments.push((argument, argument_span));
            }
        }

        let body_scope =
            DeclarationScope::nested(declaration.clone(), bound, reference.scope.clone());
        let resolved_return_type = match return_type {
            Some(expression) => {
                let resolved = constants::evaluate_type_expression(
                    self.context,
                    &body_scope,
                    expression,
                )?;
                if !resolved.is_runtime_type() {
                    return self.fail(
                        ErrorKind::Type,
                        expression.span(),
                        format!("function return types must be runtime types, got '{}'", resolved),
                    );
                }
                resolved
            }
            None => Type::Void,
        };

        let key = InstantiationKey {
            declaration: Rc::as_ptr(&declaration) as *const () as usize,
            arguments: constant_keys.join(","),
        };
        let mangled_name = if let Some(existing) = self.context.instantiations.get(&key) {
            existing.clone()
        } else {
            let mangled_name = format!("function_{}", self.context.functions.len());
            let entry = RuntimeFunctionEntry {
                mangled_name: mangled_name.clone(),
                declaration: declaration.clone(),
                body_scope,
                parameter_types: runtime_parameter_types.clone(),
                return_type: resolved_return_type.clone(),
                is_external: false,
                generated: false,
            };
            let path = self.path.clone();
            self.context.register_runtime_function(entry, &path, span)?;
            self.context.instantiations.insert(key, mangled_name.clone());
            mangled_name
        };

        let mut registers = Vec::with_capacity(runtime_arguments.len());
        for ((argument, argument_span), parameter_type) in
            runtime_arguments.iter().zip(&runtime_parameter_types)
        {
            registers.push(self.coerce_argument(argument, parameter_type, *argument_span)?);
        }
        Ok(self.emit_call(&mangled_name, registers, &resolved_return_type))
    }

    /// Evaluate a polymorphic parameter's type expression under the
    /// constant parameters bound so far.
    fn polymorphic_parameter_type(
        &mut self,
        declaration: &Rc<Statement>,
        reference: &PolymorphicFunctionReference,
        bound: &[ConstantParameter],
        parameter: &FunctionParameter,
    ) -> CResult<Type> {
        let evaluation_scope = DeclarationScope::nested(
            declaration.clone(),
            bound.to_vec(),
            reference.scope.clone(),
        );
        constants::evaluate_type_expression(
            self.context,
            &evaluation_scope,
            &parameter.type_expression,
        )
    }
}
