//! Architectural configuration supplied by the driver at start-up.

use serde::{Deserialize, Serialize};

use crate::types::{FloatSize, RegisterSize, Type};

/// The two architectural constants that parameterise the core: pointer
/// width and the width an integer literal defaults to when no context
/// forces one. Slice layout and boolean storage follow from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub address_size: RegisterSize,
    pub default_integer_size: RegisterSize,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            address_size: RegisterSize::Size64,
            default_integer_size: RegisterSize::Size64,
        }
    }
}

impl TargetConfig {
    /// The `usize` type: unsigned integer at address width.
    pub fn address_integer(&self) -> Type {
        Type::Integer {
            size: self.address_size,
            signed: false,
        }
    }

    /// The `isize` type: signed integer at address width.
    pub fn signed_address_integer(&self) -> Type {
        Type::Integer {
            size: self.address_size,
            signed: true,
        }
    }

    /// The type an undetermined integer collapses to.
    pub fn default_integer(&self) -> Type {
        Type::Integer {
            size: self.default_integer_size,
            signed: true,
        }
    }

    /// The type an undetermined float collapses to. Floats only exist at
    /// 32 and 64 bits, so a narrow default integer size still yields `f64`.
    pub fn default_float(&self) -> Type {
        let size = match self.default_integer_size {
            RegisterSize::Size32 => FloatSize::Size32,
            _ => FloatSize::Size64,
        };
        Type::Float { size }
    }
}
