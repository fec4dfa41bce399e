//! The type model: a single tagged sum over every type the language can
//! express, with structural equality everywhere except nominal structs.
//!
//! Undetermined variants (`UndeterminedInteger`, `UndeterminedFloat`,
//! `UndeterminedStruct`) are the types of literals before context forces a
//! concrete one. They are collapsed by the coercion engine or the
//! default-type rule and never survive into generated instructions.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::Statement;
use crate::config::TargetConfig;
use crate::scope::DeclarationScope;

/// Width of an integer register or integer storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterSize {
    Size8,
    Size16,
    Size32,
    Size64,
}

impl RegisterSize {
    pub fn byte_count(self) -> u64 {
        match self {
            Self::Size8 => 1,
            Self::Size16 => 2,
            Self::Size32 => 4,
            Self::Size64 => 8,
        }
    }

    pub fn bit_count(self) -> u32 {
        self.byte_count() as u32 * 8
    }

    /// Mask a 64-bit pattern down to this width.
    pub fn mask(self, value: u64) -> u64 {
        match self {
            Self::Size8 => value & 0xff,
            Self::Size16 => value & 0xffff,
            Self::Size32 => value & 0xffff_ffff,
            Self::Size64 => value,
        }
    }

    /// Sign-extend a value of this width to 64 bits.
    pub fn sign_extend(self, value: u64) -> i64 {
        match self {
            Self::Size8 => value as u8 as i8 as i64,
            Self::Size16 => value as u16 as i16 as i64,
            Self::Size32 => value as u32 as i32 as i64,
            Self::Size64 => value as i64,
        }
    }
}

/// Width of a floating-point register or storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatSize {
    Size32,
    Size64,
}

impl FloatSize {
    pub fn byte_count(self) -> u64 {
        match self {
            Self::Size32 => 4,
            Self::Size64 => 8,
        }
    }

    /// Round a value through this width.
    pub fn round(self, value: f64) -> f64 {
        match self {
            Self::Size32 => value as f32 as f64,
            Self::Size64 => value,
        }
    }
}

/// Named member of a concrete or undetermined struct type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub member_type: Type,
}

/// A nominal struct type. Equality requires the same definition node:
/// two independently declared structs with identical layouts are distinct
/// types.
#[derive(Debug, Clone)]
pub struct StructType {
    pub definition: Rc<Statement>,
    pub members: Vec<StructMember>,
    pub is_union: bool,
}

impl PartialEq for StructType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.definition, &other.definition)
            && self.is_union == other.is_union
            && self.members == other.members
    }
}

impl StructType {
    pub fn name(&self) -> &str {
        self.definition.declared_name().unwrap_or("<struct>")
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|member| member.name == name)
    }
}

/// A parameterised struct before instantiation. Calling it with constant
/// arguments produces a concrete [`StructType`] sharing the same
/// definition node.
#[derive(Debug, Clone)]
pub struct PolymorphicStructType {
    pub definition: Rc<Statement>,
    pub parameter_types: Vec<Type>,
    pub scope: Rc<DeclarationScope>,
}

impl PartialEq for PolymorphicStructType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.definition, &other.definition)
    }
}

impl PolymorphicStructType {
    pub fn name(&self) -> &str {
        self.definition.declared_name().unwrap_or("<struct>")
    }
}

/// Signature of a concrete (non-polymorphic) function type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub parameters: Vec<Type>,
    pub return_type: Box<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Integer { size: RegisterSize, signed: bool },
    UndeterminedInteger,
    Float { size: FloatSize },
    UndeterminedFloat,
    Boolean,
    Void,
    /// The type of types: what a type expression evaluates to.
    TypeOfType,
    Pointer { pointee: Box<Type> },
    /// Two-word `{pointer, length}` view of a run of elements.
    ArraySlice { element: Box<Type> },
    /// Inline storage of `length` elements.
    StaticArray { length: u64, element: Box<Type> },
    Struct(StructType),
    PolymorphicStruct(PolymorphicStructType),
    /// Structural type of a struct literal before coercion targets it.
    UndeterminedStruct { members: Vec<StructMember> },
    Function(FunctionSignature),
    PolymorphicFunction,
    BuiltinFunction,
    FileModule,
}

impl Type {
    pub fn pointer_to(pointee: Type) -> Self {
        Self::Pointer {
            pointee: Box::new(pointee),
        }
    }

    pub fn slice_of(element: Type) -> Self {
        Self::ArraySlice {
            element: Box::new(element),
        }
    }

    pub fn static_array_of(length: u64, element: Type) -> Self {
        Self::StaticArray {
            length,
            element: Box::new(element),
        }
    }

    /// A runtime type is one whose values can be laid out in memory at
    /// run time.
    pub fn is_runtime_type(&self) -> bool {
        match self {
            Self::Integer { .. } | Self::Float { .. } | Self::Boolean | Self::Pointer { .. } => {
                true
            }
            Self::ArraySlice { element } => element.is_runtime_type(),
            Self::StaticArray { element, .. } => element.is_runtime_type(),
            Self::Struct(_) => true,
            _ => false,
        }
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(
            self,
            Self::UndeterminedInteger | Self::UndeterminedFloat | Self::UndeterminedStruct { .. }
        )
    }

    /// Whether a value of this type lives in a register (scalars) or at an
    /// address (aggregates). Only meaningful for runtime types.
    pub fn fits_in_register(&self) -> bool {
        matches!(
            self,
            Self::Integer { .. } | Self::Float { .. } | Self::Boolean | Self::Pointer { .. }
        )
    }

    /// The default-type rule: the concrete type an undetermined type
    /// becomes when no coercion target is available. Undetermined structs
    /// have no default; the caller diagnoses those.
    pub fn defaulted(&self, options: &TargetConfig) -> Option<Type> {
        match self {
            Self::UndeterminedInteger => Some(options.default_integer()),
            Self::UndeterminedFloat => Some(options.default_float()),
            Self::UndeterminedStruct { .. } => None,
            _ => Some(self.clone()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer { size, signed } => {
                let prefix = if *signed { 'i' } else { 'u' };
                write!(f, "{}{}", prefix, size.bit_count())
            }
            Self::UndeterminedInteger => write!(f, "{{integer}}"),
            Self::Float { size } => write!(f, "f{}", size.byte_count() * 8),
            Self::UndeterminedFloat => write!(f, "{{float}}"),
            Self::Boolean => write!(f, "bool"),
            Self::Void => write!(f, "void"),
            Self::TypeOfType => write!(f, "type"),
            Self::Pointer { pointee } => write!(f, "*{}", pointee),
            Self::ArraySlice { element } => write!(f, "[]{}", element),
            Self::StaticArray { length, element } => write!(f, "[{}]{}", length, element),
            Self::Struct(struct_type) => write!(f, "{}", struct_type.name()),
            Self::PolymorphicStruct(struct_type) => write!(f, "{}", struct_type.name()),
            Self::UndeterminedStruct { members } => {
                write!(f, ".{{")?;
                for (index, member) in members.iter().enumerate() {
                    if index != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", member.name, member.member_type)?;
                }
                write!(f, "}}")
            }
            Self::Function(signature) => {
                write!(f, "(")?;
                for (index, parameter) in signature.parameters.iter().enumerate() {
                    if index != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", parameter)?;
                }
                write!(f, ") -> {}", signature.return_type)
            }
            Self::PolymorphicFunction => write!(f, "polymorphic function"),
            Self::BuiltinFunction => write!(f, "builtin function"),
            Self::FileModule => write!(f, "module"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn struct_definition(name: &str) -> Rc<Statement> {
        Rc::new(Statement::StructDefinition {
            name: name.to_string(),
            parameters: Vec::new(),
            members: Vec::new(),
            is_union: false,
            span: Span::default(),
        })
    }

    fn i32_type() -> Type {
        Type::Integer {
            size: RegisterSize::Size32,
            signed: true,
        }
    }

    #[test]
    fn test_integer_equality_requires_size_and_signedness() {
        assert_eq!(i32_type(), i32_type());
        assert_ne!(
            i32_type(),
            Type::Integer {
                size: RegisterSize::Size32,
                signed: false,
            }
        );
        assert_ne!(
            i32_type(),
            Type::Integer {
                size: RegisterSize::Size64,
                signed: true,
            }
        );
    }

    #[test]
    fn test_pointer_equality_requires_equal_pointee() {
        assert_eq!(Type::pointer_to(i32_type()), Type::pointer_to(i32_type()));
        assert_ne!(Type::pointer_to(i32_type()), Type::pointer_to(Type::Boolean));
    }

    #[test]
    fn test_struct_equality_is_nominal() {
        let members = vec![StructMember {
            name: "x".to_string(),
            member_type: i32_type(),
        }];
        let first = Type::Struct(StructType {
            definition: struct_definition("A"),
            members: members.clone(),
            is_union: false,
        });
        // Identical layout, distinct definition node: a different type.
        let second = Type::Struct(StructType {
            definition: struct_definition("A"),
            members,
            is_union: false,
        });
        assert_ne!(first, second);
        assert_eq!(first, first.clone());
    }

    #[test]
    fn test_runtime_type_predicate() {
        assert!(i32_type().is_runtime_type());
        assert!(Type::slice_of(Type::Boolean).is_runtime_type());
        assert!(!Type::TypeOfType.is_runtime_type());
        assert!(!Type::UndeterminedInteger.is_runtime_type());
        assert!(!Type::slice_of(Type::Void).is_runtime_type());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(i32_type().to_string(), "i32");
        assert_eq!(Type::pointer_to(Type::Boolean).to_string(), "*bool");
        assert_eq!(
            Type::static_array_of(3, i32_type()).to_string(),
            "[3]i32"
        );
        assert_eq!(Type::slice_of(i32_type()).to_string(), "[]i32");
        assert_eq!(
            Type::Float {
                size: FloatSize::Size32
            }
            .to_string(),
            "f32"
        );
        assert_eq!(Type::UndeterminedInteger.to_string(), "{integer}");
    }

    #[test]
    fn test_defaulted_collapses_undetermined_numerics() {
        let options = TargetConfig::default();
        assert_eq!(
            Type::UndeterminedInteger.defaulted(&options),
            Some(Type::Integer {
                size: RegisterSize::Size64,
                signed: true,
            })
        );
        assert_eq!(
            Type::UndeterminedFloat.defaulted(&options),
            Some(Type::Float {
                size: FloatSize::Size64
            })
        );
        assert_eq!(
            Type::UndeterminedStruct {
                members: Vec::new()
            }
            .defaulted(&options),
            None
        );
    }
}
