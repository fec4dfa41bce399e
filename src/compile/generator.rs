//! Per-function generation state: the instruction buffer, the register
//! counter, and the stack of lexical variable lists.
//!
//! The register counter restarts at zero for every function; registers are
//! allocated monotonically and never reused. Incoming parameters occupy
//! the lowest register numbers, followed by the return-address register
//! when the function returns an aggregate by reference.

use std::path::PathBuf;
use std::rc::Rc;

use crate::ir::{
    Instruction, IntegerArithmeticOperation, IntegerComparisonOperation, Register,
};
use crate::config::TargetConfig;
use crate::scope::{DeclarationScope, Variable};
use crate::span::Span;
use crate::types::{FloatSize, RegisterSize, Type};
use crate::value::{ConstantValue, TypedConstant};

use super::layout;
use super::{error_at, CResult, ErrorKind};
use super::context::GenerationContext;

/// How an expression result is represented during generation. A constant
/// stays deferred until an instruction actually needs it; an address value
/// is the assignable (l-value) form.
#[derive(Debug, Clone)]
pub enum RuntimeValueKind {
    Constant(ConstantValue),
    /// A scalar held in a register, or an aggregate whose address is held
    /// in a register.
    Register(Register),
    /// A register holding the address of the value: the l-value form.
    Address(Register),
    /// A struct literal that has not been materialised yet; member values
    /// in declaration order, names carried by the value's type.
    UndeterminedStruct(Vec<TypedValue>),
}

/// An expression result: a type paired with its representation.
#[derive(Debug, Clone)]
pub struct TypedValue {
    pub value_type: Type,
    pub kind: RuntimeValueKind,
}

impl TypedValue {
    pub fn from_constant(constant: TypedConstant) -> Self {
        Self {
            value_type: constant.constant_type,
            kind: RuntimeValueKind::Constant(constant.value),
        }
    }

    pub fn register(value_type: Type, register: Register) -> Self {
        Self {
            value_type,
            kind: RuntimeValueKind::Register(register),
        }
    }

    pub fn address(value_type: Type, register: Register) -> Self {
        Self {
            value_type,
            kind: RuntimeValueKind::Address(register),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, RuntimeValueKind::Constant(_))
    }

    /// View the value as a typed constant, when it is one.
    pub fn as_constant(&self) -> Option<TypedConstant> {
        match &self.kind {
            RuntimeValueKind::Constant(value) => Some(TypedConstant::new(
                self.value_type.clone(),
                value.clone(),
            )),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FunctionGenerator<'c, 'f> {
    pub context: &'c mut GenerationContext<'f>,
    /// Scope the body resolves names under: the declaration plus any
    /// constant parameters bound at instantiation.
    pub scope: Rc<DeclarationScope>,
    pub path: PathBuf,
    pub return_type: Type,
    /// Register holding the caller-provided destination for an aggregate
    /// return.
    pub return_address: Option<Register>,
    pub instructions: Vec<Instruction>,
    next_register: usize,
    variables: Vec<Vec<Variable>>,
}

impl<'c, 'f> FunctionGenerator<'c, 'f> {
    pub fn new(
        context: &'c mut GenerationContext<'f>,
        scope: Rc<DeclarationScope>,
        return_type: Type,
        parameter_count: usize,
        by_reference_return: bool,
    ) -> Self {
        let path = scope.source_path().to_path_buf();
        Self {
            context,
            scope,
            path,
            return_type,
            return_address: by_reference_return.then_some(parameter_count),
            instructions: Vec::new(),
            next_register: parameter_count + usize::from(by_reference_return),
            variables: vec![Vec::new()],
        }
    }

    pub fn options(&self) -> TargetConfig {
        self.context.options
    }

    pub fn fail<T>(&self, kind: ErrorKind, span: Span, message: impl Into<String>) -> CResult<T> {
        error_at(kind, &self.path, span, message)
    }

    pub fn allocate_register(&mut self) -> Register {
        let register = self.next_register;
        self.next_register += 1;
        register
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Index the next emitted instruction will occupy; used as a branch or
    /// jump target.
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    /// Forward-patch a branch or jump emitted earlier.
    pub fn patch_destination(&mut self, index: usize, target: usize) {
        match &mut self.instructions[index] {
            Instruction::Branch { destination, .. } | Instruction::Jump { destination } => {
                *destination = target;
            }
            _ => {}
        }
    }

    pub fn emit_integer_constant(&mut self, size: RegisterSize, value: u64) -> Register {
        let destination = self.allocate_register();
        self.emit(Instruction::IntegerConstant {
            size,
            value: size.mask(value),
            destination,
        });
        destination
    }

    pub fn emit_float_constant(&mut self, size: FloatSize, value: f64) -> Register {
        let destination = self.allocate_register();
        self.emit(Instruction::FloatConstant {
            size,
            value: size.round(value),
            destination,
        });
        destination
    }

    /// Reserve stack storage for a value of the given type.
    pub fn allocate_local(&mut self, value_type: &Type) -> Register {
        let options = self.options();
        let destination = self.allocate_register();
        self.emit(Instruction::AllocateLocal {
            size: layout::size_of(value_type, &options),
            alignment: layout::alignment_of(value_type, &options),
            destination,
        });
        destination
    }

    /// Address arithmetic: `base + offset` at address width. Zero offsets
    /// reuse the base register.
    pub fn offset_address(&mut self, base: Register, offset: u64) -> Register {
        if offset == 0 {
            return base;
        }
        let address_size = self.options().address_size;
        let offset_register = self.emit_integer_constant(address_size, offset);
        let destination = self.allocate_register();
        self.emit(Instruction::IntegerArithmetic {
            operation: IntegerArithmeticOperation::Add,
            size: address_size,
            left: base,
            right: offset_register,
            destination,
        });
        destination
    }

    pub fn load_scalar(&mut self, value_type: &Type, address: Register) -> Register {
        let options = self.options();
        let destination = self.allocate_register();
        match value_type {
            Type::Float { size } => self.emit(Instruction::FloatLoad {
                size: *size,
                address,
                destination,
            }),
            _ => self.emit(Instruction::IntegerLoad {
                size: layout::scalar_register_size(value_type, &options),
                address,
                destination,
            }),
        }
        destination
    }

    pub fn store_scalar(&mut self, value_type: &Type, source: Register, address: Register) {
        let options = self.options();
        match value_type {
            Type::Float { size } => self.emit(Instruction::FloatStore {
                size: *size,
                source,
                address,
            }),
            _ => self.emit(Instruction::IntegerStore {
                size: layout::scalar_register_size(value_type, &options),
                source,
                address,
            }),
        }
    }

    /// Boolean inversion: compare-equal against zero.
    pub fn emit_boolean_invert(&mut self, source: Register) -> Register {
        let size = self.options().default_integer_size;
        let zero = self.emit_integer_constant(size, 0);
        let destination = self.allocate_register();
        self.emit(Instruction::IntegerComparison {
            comparison: IntegerComparisonOperation::Equal,
            size,
            left: source,
            right: zero,
            destination,
        });
        destination
    }

    pub fn push_variable_list(&mut self) {
        self.variables.push(Vec::new());
    }

    pub fn pop_variable_list(&mut self) {
        self.variables.pop();
    }

    /// Add a variable to the innermost lexical block. A duplicate name in
    /// the same block is an error; shadowing an outer block is allowed.
    pub fn declare_variable(&mut self, variable: Variable, span: Span) -> CResult<()> {
        let duplicate = self
            .variables
            .last()
            .is_some_and(|list| list.iter().any(|existing| existing.name == variable.name));
        if duplicate {
            return self.fail(
                ErrorKind::Evaluation,
                span,
                format!("duplicate name '{}'", variable.name),
            );
        }
        if let Some(list) = self.variables.last_mut() {
            list.push(variable);
        }
        Ok(())
    }

    pub fn find_variable(&self, name: &str) -> Option<Variable> {
        self.variables
            .iter()
            .rev()
            .find_map(|list| list.iter().find(|variable| variable.name == name))
            .cloned()
    }

    /// Serialise a constant aggregate into static data and load its
    /// address.
    pub fn materialize_constant(&mut self, value_type: &Type, value: &ConstantValue) -> Register {
        let options = self.options();
        let mut data = Vec::new();
        layout::serialize_constant(value_type, value, &options, &mut data);
        let alignment = layout::alignment_of(value_type, &options);
        let name = self.context.register_static_constant(data, alignment);
        let destination = self.allocate_register();
        self.emit(Instruction::ReferenceStatic { name, destination });
        destination
    }

    /// Force a value into a register: scalars hold their bits, aggregates
    /// hold their address. Constants emit their instruction here, which is
    /// what keeps all-constant subtrees free of code.
    pub fn value_register(&mut self, value: &TypedValue, span: Span) -> CResult<Register> {
        match &value.kind {
            RuntimeValueKind::Register(register) => Ok(*register),
            RuntimeValueKind::Address(register) => {
                if value.value_type.fits_in_register() {
                    Ok(self.load_scalar(&value.value_type, *register))
                } else {
                    Ok(*register)
                }
            }
            RuntimeValueKind::UndeterminedStruct(_) => self.fail(
                ErrorKind::Type,
                span,
                format!("'{}' cannot exist at runtime", value.value_type),
            ),
            RuntimeValueKind::Constant(constant) => {
                let options = self.options();
                let Some(concrete) = value.value_type.defaulted(&options) else {
                    return self.fail(
                        ErrorKind::Type,
                        span,
                        format!("'{}' cannot exist at runtime", value.value_type),
                    );
                };
                match (&concrete, constant) {
                    (Type::Integer { size, .. }, ConstantValue::Integer(bits)) => {
                        Ok(self.emit_integer_constant(*size, *bits))
                    }
                    (Type::Boolean, ConstantValue::Boolean(flag)) => {
                        let size = options.default_integer_size;
                        Ok(self.emit_integer_constant(size, u64::from(*flag)))
                    }
                    (Type::Pointer { .. }, ConstantValue::Pointer(bits)) => {
                        Ok(self.emit_integer_constant(options.address_size, *bits))
                    }
                    (Type::Float { size }, ConstantValue::Float(float)) => {
                        Ok(self.emit_float_constant(*size, *float))
                    }
                    _ if !concrete.fits_in_register() && concrete.is_runtime_type() => {
                        Ok(self.materialize_constant(&concrete, constant))
                    }
                    _ => self.fail(
                        ErrorKind::Type,
                        span,
                        format!("cannot use a value of type '{}' at runtime", concrete),
                    ),
                }
            }
        }
    }

    /// The address of an aggregate value, materialising constants into
    /// static data when needed.
    pub fn value_address(&mut self, value: &TypedValue, span: Span) -> CResult<Register> {
        match &value.kind {
            RuntimeValueKind::Register(register) | RuntimeValueKind::Address(register) => {
                Ok(*register)
            }
            RuntimeValueKind::Constant(constant) => {
                if value.value_type.is_runtime_type() {
                    Ok(self.materialize_constant(&value.value_type, constant))
                } else {
                    self.fail(
                        ErrorKind::Type,
                        span,
                        format!("'{}' cannot exist at runtime", value.value_type),
                    )
                }
            }
            RuntimeValueKind::UndeterminedStruct(_) => self.fail(
                ErrorKind::Type,
                span,
                format!("'{}' cannot exist at runtime", value.value_type),
            ),
        }
    }
}
