//! Statement lowering and function-body generation.
//!
//! Control flow lowers to branch/jump pairs over instruction indices,
//! forward-patched once the target position is known. Each lexical block
//! pushes a fresh variable list; declarations inside a body emit nothing
//! and are resolved on demand by the name search.

use std::rc::Rc;

use crate::ast::{Expression, Statement};
use crate::ir::{Instruction, RuntimeFunction};
use crate::scope::Variable;
use crate::span::Span;
use crate::types::Type;

use super::constants;
use super::context::{GenerationContext, RuntimeFunctionEntry};
use super::generator::{FunctionGenerator, RuntimeValueKind};
use super::layout;
use super::{error_at, CResult, ErrorKind};

/// Generate the body of a registered runtime function into a backend
/// function entry.
pub fn generate_function(
    context: &mut GenerationContext,
    entry: &RuntimeFunctionEntry,
) -> CResult<RuntimeFunction> {
    let path = entry.body_scope.source_path().to_path_buf();
    let Statement::FunctionDeclaration {
        name,
        parameters,
        body,
        span,
        ..
    } = &*entry.declaration
    else {
        return error_at(
            ErrorKind::Structural,
            &path,
            entry.declaration.span(),
            "expected a function declaration",
        );
    };
    let Some(body) = body else {
        return error_at(
            ErrorKind::Structural,
            &path,
            *span,
            format!("function '{}' has no body", name),
        );
    };

    let options = context.options;
    let by_reference_return =
        !matches!(entry.return_type, Type::Void) && !entry.return_type.fits_in_register();
    let mut generator = FunctionGenerator::new(
        context,
        entry.body_scope.clone(),
        entry.return_type.clone(),
        entry.parameter_types.len(),
        by_reference_return,
    );

    // Parameter prologue: scalars are spilled to addressable locals so
    // they behave like every other variable; aggregates arrive as
    // addresses already.
    let runtime_parameters = parameters.iter().filter(|parameter| !parameter.is_constant);
    for (index, parameter) in runtime_parameters.enumerate() {
        let parameter_type = entry.parameter_types[index].clone();
        let address_register = if parameter_type.fits_in_register() {
            let address = generator.allocate_local(&parameter_type);
            generator.store_scalar(&parameter_type, index, address);
            address
        } else {
            index
        };
        generator.declare_variable(
            Variable {
                name: parameter.name.clone(),
                variable_type: parameter_type,
                type_span: parameter.span,
                address_register,
            },
            parameter.span,
        )?;
    }

    generator.generate_statements(body)?;

    let ends_with_return = matches!(
        generator.instructions.last(),
        Some(Instruction::Return { .. })
    );
    if matches!(entry.return_type, Type::Void) {
        if !ends_with_return {
            generator.emit(Instruction::Return { value: None });
        }
    } else if !ends_with_return {
        return error_at(
            ErrorKind::Structural,
            &path,
            *span,
            format!("function '{}' does not return a value", name),
        );
    }

    let instructions = generator.instructions;
    Ok(RuntimeFunction {
        name: entry.mangled_name.clone(),
        is_external: false,
        parameters: entry
            .parameter_types
            .iter()
            .map(|parameter_type| layout::parameter_layout(parameter_type, &options))
            .collect(),
        return_layout: layout::return_layout(&entry.return_type, &options),
        path,
        line: span.start_line,
        instructions,
    })
}

impl FunctionGenerator<'_, '_> {
    pub fn generate_statements(&mut self, statements: &[Rc<Statement>]) -> CResult<()> {
        for statement in statements {
            self.generate_statement(statement)?;
        }
        Ok(())
    }

    /// Generate a nested block with its own variable list.
    fn generate_block(&mut self, statements: &[Rc<Statement>]) -> CResult<()> {
        self.push_variable_list();
        let result = self.generate_statements(statements);
        self.pop_variable_list();
        result
    }

    fn generate_statement(&mut self, statement: &Rc<Statement>) -> CResult<()> {
        match &**statement {
            // Declarations emit nothing; the name search resolves them on
            // demand.
            Statement::FunctionDeclaration { .. }
            | Statement::ConstantDefinition { .. }
            | Statement::StructDefinition { .. }
            | Statement::Import { .. }
            | Statement::Using { .. } => Ok(()),
            Statement::VariableDeclaration {
                name,
                type_expression,
                initializer,
                span,
            } => self.generate_variable_declaration(
                name,
                type_expression.as_ref(),
                initializer.as_ref(),
                *span,
            ),
            Statement::Assignment {
                target,
                value,
                span: _,
            } => {
                let target_value = self.generate_expression(target)?;
                let RuntimeValueKind::Address(address) = target_value.kind else {
                    return self.fail(
                        ErrorKind::Type,
                        target.span(),
                        "cannot assign to this expression",
                    );
                };
                let value_result = self.generate_expression(value)?;
                self.write_value(
                    &value_result,
                    &target_value.value_type,
                    address,
                    value.span(),
                )
            }
            Statement::If {
                condition,
                body,
                else_ifs,
                else_body,
                span: _,
            } => self.generate_if(condition, body, else_ifs, else_body.as_deref()),
            Statement::While {
                condition,
                body,
                span: _,
            } => self.generate_while(condition, body),
            Statement::Return { value, span } => self.generate_return(value.as_ref(), *span),
            Statement::Expression { expression, .. } => {
                self.generate_expression(expression)?;
                Ok(())
            }
        }
    }

    fn generate_variable_declaration(
        &mut self,
        name: &str,
        type_expression: Option<&Expression>,
        initializer: Option<&Expression>,
        span: Span,
    ) -> CResult<()> {
        let options = self.options();
        let annotated = match type_expression {
            Some(expression) => {
                let scope = self.scope.clone();
                let resolved =
                    constants::evaluate_type_expression(self.context, &scope, expression)?;
                if !resolved.is_runtime_type() {
                    return self.fail(
                        ErrorKind::Type,
                        expression.span(),
                        format!("variables must have runtime types, got '{}'", resolved),
                    );
                }
                Some(resolved)
            }
            None => None,
        };

        let initializer_value = match initializer {
            Some(expression) => Some((self.generate_expression(expression)?, expression.span())),
            None => None,
        };

        let variable_type = match (&annotated, &initializer_value) {
            (Some(resolved), _) => resolved.clone(),
            (None, Some((value, value_span))) => {
                match value.value_type.defaulted(&options) {
                    Some(concrete) => concrete,
                    None => {
                        return self.fail(
                            ErrorKind::Type,
                            *value_span,
                            format!("'{}' cannot exist at runtime", value.value_type),
                        )
                    }
                }
            }
            (None, None) => {
                return self.fail(
                    ErrorKind::Type,
                    span,
                    "variable declarations need a type or an initializer",
                )
            }
        };

        let address = self.allocate_local(&variable_type);
        if let Some((value, value_span)) = initializer_value {
            self.write_value(&value, &variable_type, address, value_span)?;
        }
        let type_span = type_expression.map_or(span, Expression::span);
        self.declare_variable(
            Variable {
                name: name.to_string(),
                variable_type,
                type_span,
                address_register: address,
            },
            span,
        )
    }

    /// A condition coerced to a boolean register.
    fn generate_condition(&mut self, condition: &Expression) -> CResult<usize> {
        let value = self.generate_expression(condition)?;
        self.coerce_register(&value, &Type::Boolean, condition.span())
    }

    fn generate_if(
        &mut self,
        condition: &Expression,
        body: &[Rc<Statement>],
        else_ifs: &[(Expression, Vec<Rc<Statement>>)],
        else_body: Option<&[Rc<Statement>]>,
    ) -> CResult<()> {
        // Conditions first, each branching to its arm; the else body runs
        // on fall-through, then jumps past the arms.
        let mut arm_branches = Vec::with_capacity(1 + else_ifs.len());
        let register = self.generate_condition(condition)?;
        arm_branches.push(self.position());
        self.emit(Instruction::Branch {
            condition: register,
            destination: 0,
        });
        for (else_if_condition, _) in else_ifs {
            let register = self.generate_condition(else_if_condition)?;
            arm_branches.push(self.position());
            self.emit(Instruction::Branch {
                condition: register,
                destination: 0,
            });
        }

        let mut end_jumps = Vec::new();
        if let Some(else_statements) = else_body {
            self.generate_block(else_statements)?;
        }
        end_jumps.push(self.position());
        self.emit(Instruction::Jump { destination: 0 });

        let arms = std::iter::once(body).chain(else_ifs.iter().map(|(_, arm)| arm.as_slice()));
        for (branch_index, arm) in arm_branches.iter().zip(arms) {
            let arm_start = self.position();
            self.patch_destination(*branch_index, arm_start);
            self.generate_block(arm)?;
            end_jumps.push(self.position());
            self.emit(Instruction::Jump { destination: 0 });
        }

        let end = self.position();
        for jump_index in end_jumps {
            self.patch_destination(jump_index, end);
        }
        Ok(())
    }

    fn generate_while(
        &mut self,
        condition: &Expression,
        body: &[Rc<Statement>],
    ) -> CResult<()> {
        let head = self.position();
        let register = self.generate_condition(condition)?;
        let enter_branch = self.position();
        self.emit(Instruction::Branch {
            condition: register,
            destination: 0,
        });
        let exit_jump = self.position();
        self.emit(Instruction::Jump { destination: 0 });

        let body_start = self.position();
        self.patch_destination(enter_branch, body_start);
        self.generate_block(body)?;
        self.emit(Instruction::Jump { destination: head });

        let end = self.position();
        self.patch_destination(exit_jump, end);
        Ok(())
    }

    fn generate_return(&mut self, value: Option<&Expression>, span: Span) -> CResult<()> {
        let return_type = self.return_type.clone();
        match value {
            Some(expression) => {
                let result = self.generate_expression(expression)?;
                if matches!(return_type, Type::Void) {
                    return self.fail(
                        ErrorKind::Type,
                        expression.span(),
                        format!(
                            "cannot implicitly convert '{}' to 'void'",
                            result.value_type
                        ),
                    );
                }
                if return_type.fits_in_register() {
                    let register =
                        self.coerce_register(&result, &return_type, expression.span())?;
                    self.emit(Instruction::Return {
                        value: Some(register),
                    });
                } else {
                    let destination = match self.return_address {
                        Some(register) => register,
                        None => {
                            return self.fail(
                                ErrorKind::Structural,
                                span,
                                "function has no return storage",
                            )
                        }
                    };
                    self.coerce_into_address(
                        &result,
                        &return_type,
                        destination,
                        expression.span(),
                        false,
                    )?;
                    self.emit(Instruction::Return { value: None });
                }
                Ok(())
            }
            None => {
                if !matches!(return_type, Type::Void) {
                    return self.fail(
                        ErrorKind::Type,
                        span,
                        format!("expected a return value of type '{}'", return_type),
                    );
                }
                self.emit(Instruction::Return { value: None });
                Ok(())
            }
        }
    }
}
