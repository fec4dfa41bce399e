//! The flat intermediate representation handed to the backend.
//!
//! A function body is a list of instructions over virtual registers
//! numbered from zero. Registers are allocated monotonically per function
//! and never reused; branch and jump targets are instruction indices into
//! the same list. The whole output is serde-serialisable so a backend can
//! consume it out of process as JSON.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{FloatSize, RegisterSize};

/// Index of a virtual register within one function.
pub type Register = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegerArithmeticOperation {
    Add,
    Subtract,
    Multiply,
    SignedDivide,
    UnsignedDivide,
    SignedModulus,
    UnsignedModulus,
    BitwiseAnd,
    BitwiseOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegerComparisonOperation {
    Equal,
    SignedLessThan,
    UnsignedLessThan,
    SignedGreaterThan,
    UnsignedGreaterThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloatArithmeticOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloatComparisonOperation {
    Equal,
    LessThan,
    GreaterThan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    IntegerArithmetic {
        operation: IntegerArithmeticOperation,
        size: RegisterSize,
        left: Register,
        right: Register,
        destination: Register,
    },
    /// Comparison result is a boolean: zero or one at the default integer
    /// size.
    IntegerComparison {
        comparison: IntegerComparisonOperation,
        size: RegisterSize,
        left: Register,
        right: Register,
        destination: Register,
    },
    IntegerUpcast {
        signed: bool,
        source_size: RegisterSize,
        source: Register,
        destination_size: RegisterSize,
        destination: Register,
    },
    IntegerConstant {
        size: RegisterSize,
        value: u64,
        destination: Register,
    },
    FloatArithmetic {
        operation: FloatArithmeticOperation,
        size: FloatSize,
        left: Register,
        right: Register,
        destination: Register,
    },
    FloatComparison {
        comparison: FloatComparisonOperation,
        size: FloatSize,
        left: Register,
        right: Register,
        destination: Register,
    },
    /// Change a float's width.
    FloatConversion {
        source_size: FloatSize,
        source: Register,
        destination_size: FloatSize,
        destination: Register,
    },
    /// Truncate a float to an integer.
    FloatTruncation {
        source_size: FloatSize,
        source: Register,
        destination_size: RegisterSize,
        destination: Register,
    },
    FloatFromInteger {
        signed: bool,
        source_size: RegisterSize,
        source: Register,
        destination_size: FloatSize,
        destination: Register,
    },
    FloatConstant {
        size: FloatSize,
        value: f64,
        destination: Register,
    },
    IntegerLoad {
        size: RegisterSize,
        address: Register,
        destination: Register,
    },
    IntegerStore {
        size: RegisterSize,
        source: Register,
        address: Register,
    },
    FloatLoad {
        size: FloatSize,
        address: Register,
        destination: Register,
    },
    FloatStore {
        size: FloatSize,
        source: Register,
        address: Register,
    },
    /// Reserve stack storage; the destination register receives its
    /// address.
    AllocateLocal {
        size: u64,
        alignment: u64,
        destination: Register,
    },
    CopyMemory {
        length: u64,
        source_address: Register,
        destination_address: Register,
    },
    /// Transfer to `destination` when the condition register is non-zero.
    Branch {
        condition: Register,
        destination: usize,
    },
    Jump {
        destination: usize,
    },
    FunctionCall {
        name: String,
        arguments: Vec<Register>,
        return_register: Option<Register>,
    },
    Return {
        value: Option<Register>,
    },
    /// Load the address of a named static into a register.
    ReferenceStatic {
        name: String,
        destination: Register,
    },
}

/// How one parameter is passed: its register width and whether it uses a
/// float register. Aggregates are passed as addresses at address width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterLayout {
    pub size: RegisterSize,
    pub is_float: bool,
}

/// How a function's result comes back: in a register, or written through
/// a caller-provided address passed as an implicit trailing parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnLayout {
    Register { size: RegisterSize, is_float: bool },
    ByReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeFunction {
    pub name: String,
    pub is_external: bool,
    pub parameters: Vec<ParameterLayout>,
    /// `None` for void functions.
    pub return_layout: Option<ReturnLayout>,
    pub path: PathBuf,
    pub line: usize,
    /// Empty for external functions.
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticConstant {
    pub name: String,
    pub data: Vec<u8>,
    pub alignment: u64,
}

/// One entry of the backend hand-off: everything the build produced is a
/// sequence of these, each identified by a build-unique mangled name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuntimeStatic {
    Function(RuntimeFunction),
    Constant(StaticConstant),
}

impl RuntimeStatic {
    pub fn name(&self) -> &str {
        match self {
            Self::Function(function) => &function.name,
            Self::Constant(constant) => &constant.name,
        }
    }
}
