//! Declaration scopes and the values bound inside them.
//!
//! Scopes form an immutable chain: a nested scope owns a reference to its
//! parent, never the inverse. The evaluator passes a scope by parameter on
//! every recursive call, so resolving an imported declaration cannot leak
//! its module's scope back into the caller.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::Statement;
use crate::span::Span;
use crate::types::Type;
use crate::value::ConstantValue;

/// A compile-time value bound to a name inside a declaration scope:
/// a polymorphic type determiner or an explicit constant parameter.
#[derive(Debug, Clone)]
pub struct ConstantParameter {
    pub name: String,
    pub parameter_type: Type,
    pub value: ConstantValue,
}

/// A runtime local. `address_register` holds the address of its storage.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub variable_type: Type,
    pub type_span: Span,
    pub address_register: usize,
}

#[derive(Debug)]
pub enum DeclarationScope {
    /// The top level of a source file.
    TopLevel {
        path: PathBuf,
        statements: Vec<Rc<Statement>>,
    },
    /// The inside of a declaration (function or parameterised struct),
    /// together with the constant parameters bound for it.
    Nested {
        declaration: Rc<Statement>,
        constant_parameters: Vec<ConstantParameter>,
        parent: Rc<DeclarationScope>,
    },
}

impl DeclarationScope {
    pub fn top_level(path: PathBuf, statements: Vec<Rc<Statement>>) -> Rc<Self> {
        Rc::new(Self::TopLevel { path, statements })
    }

    pub fn nested(
        declaration: Rc<Statement>,
        constant_parameters: Vec<ConstantParameter>,
        parent: Rc<DeclarationScope>,
    ) -> Rc<Self> {
        Rc::new(Self::Nested {
            declaration,
            constant_parameters,
            parent,
        })
    }

    pub fn parent(&self) -> Option<&Rc<DeclarationScope>> {
        match self {
            Self::TopLevel { .. } => None,
            Self::Nested { parent, .. } => Some(parent),
        }
    }

    /// The source file this scope chain belongs to.
    pub fn source_path(&self) -> &Path {
        match self {
            Self::TopLevel { path, .. } => path,
            Self::Nested { parent, .. } => parent.source_path(),
        }
    }

    /// The statements searched at this level: a file's top-level statements
    /// or a function declaration's body. Parameterised structs have no
    /// statement list of their own.
    pub fn statements(&self) -> &[Rc<Statement>] {
        match self {
            Self::TopLevel { statements, .. } => statements,
            Self::Nested { declaration, .. } => match &**declaration {
                Statement::FunctionDeclaration {
                    body: Some(body), ..
                } => body,
                _ => &[],
            },
        }
    }

    pub fn constant_parameters(&self) -> &[ConstantParameter] {
        match self {
            Self::TopLevel { .. } => &[],
            Self::Nested {
                constant_parameters,
                ..
            } => constant_parameters,
        }
    }

}

/// The mangled name of a declaration: its source name followed by the
/// names of its enclosing declarations, terminated with the stem of the
/// owning file. External functions keep their source name verbatim and do
/// not pass through here.
pub fn mangled_name(name: &str, scope: &DeclarationScope) -> String {
    let mut parts = vec![name.to_string()];
    let mut level = scope;
    loop {
        match level {
            DeclarationScope::TopLevel { path, .. } => {
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                parts.push(stem);
                break;
            }
            DeclarationScope::Nested {
                declaration,
                parent,
                ..
            } => {
                if let Some(enclosing) = declaration.declared_name() {
                    parts.push(enclosing.to_string());
                }
                level = parent;
            }
        }
    }
    parts.join("_")
}
