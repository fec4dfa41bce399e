//! Shared generation context.
//!
//! Owns the four resources of the build: the parsed-file table, the
//! runtime-function worklist, the emitted statics, and the polymorphic
//! instantiation cache. All of it belongs to the single evaluation thread.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::Statement;
use crate::config::TargetConfig;
use crate::frontend::Frontend;
use crate::ir::{RuntimeStatic, StaticConstant};
use crate::scope::DeclarationScope;
use crate::span::Span;
use crate::types::Type;

use super::{error_at, CResult, ErrorKind};

/// One entry of the parsed-file table. Consulted before every import so a
/// file is parsed at most once; statement nodes are shared from here, which
/// is what makes nominal identity work across import sites.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub statements: Vec<Rc<Statement>>,
}

/// A runtime function awaiting (or done with) body generation.
#[derive(Debug, Clone)]
pub struct RuntimeFunctionEntry {
    pub mangled_name: String,
    pub declaration: Rc<Statement>,
    /// The scope the body is generated under: the declaration itself plus
    /// any constant parameters bound at instantiation.
    pub body_scope: Rc<DeclarationScope>,
    /// Types of the runtime (non-constant) parameters, in order.
    pub parameter_types: Vec<Type>,
    pub return_type: Type,
    pub is_external: bool,
    pub generated: bool,
}

/// Key of the polymorphic instantiation cache. Two call sites that bind
/// the same declaration to the same constant-argument tuple share one
/// registered instantiation.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct InstantiationKey {
    pub declaration: usize,
    pub arguments: String,
}

pub struct GenerationContext<'f> {
    pub options: TargetConfig,
    pub frontend: &'f dyn Frontend,
    /// Top-level scope of the root source file; the final fallback of every
    /// name search before the ambient globals.
    pub root: Rc<DeclarationScope>,
    pub sources: Vec<SourceFile>,
    pub functions: Vec<RuntimeFunctionEntry>,
    pub statics: Vec<RuntimeStatic>,
    pub instantiations: HashMap<InstantiationKey, String>,
    constant_count: usize,
}

impl fmt::Debug for GenerationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationContext")
            .field("options", &self.options)
            .field("sources", &self.sources)
            .field("functions", &self.functions)
            .field("statics", &self.statics)
            .finish_non_exhaustive()
    }
}

impl<'f> GenerationContext<'f> {
    pub fn new(
        frontend: &'f dyn Frontend,
        options: TargetConfig,
        root_path: PathBuf,
        root_statements: Vec<Rc<Statement>>,
    ) -> Self {
        let root = DeclarationScope::top_level(root_path.clone(), root_statements.clone());
        Self {
            options,
            frontend,
            root,
            sources: vec![SourceFile {
                path: root_path,
                statements: root_statements,
            }],
            functions: Vec::new(),
            statics: Vec::new(),
            instantiations: HashMap::new(),
            constant_count: 0,
        }
    }

    pub fn find_source(&self, path: &Path) -> Option<&SourceFile> {
        self.sources.iter().find(|source| source.path == path)
    }

    pub fn add_source(&mut self, path: PathBuf, statements: Vec<Rc<Statement>>) {
        self.sources.push(SourceFile { path, statements });
    }

    pub fn find_function(&self, mangled_name: &str) -> Option<usize> {
        self.functions
            .iter()
            .position(|entry| entry.mangled_name == mangled_name)
    }

    /// Add a function to the worklist. Registration is idempotent on the
    /// mangled name; two distinct declarations mapping to one name is a
    /// structural error, since a mangled name must identify exactly one
    /// runtime static across the whole build.
    pub fn register_runtime_function(
        &mut self,
        entry: RuntimeFunctionEntry,
        path: &Path,
        span: Span,
    ) -> CResult<()> {
        if let Some(index) = self.find_function(&entry.mangled_name) {
            if Rc::ptr_eq(&self.functions[index].declaration, &entry.declaration) {
                return Ok(());
            }
            return error_at(
                ErrorKind::Structural,
                path,
                span,
                format!("duplicate mangled name '{}'", entry.mangled_name),
            );
        }
        self.functions.push(entry);
        Ok(())
    }

    /// Serialise a constant into static data under a fresh build-unique
    /// name and return that name.
    pub fn register_static_constant(&mut self, data: Vec<u8>, alignment: u64) -> String {
        let name = format!("constant_{}", self.constant_count);
        self.constant_count += 1;
        self.statics.push(RuntimeStatic::Constant(StaticConstant {
            name: name.clone(),
            data,
            alignment,
        }));
        name
    }

    /// Index of the next runtime function whose static has not been
    /// produced yet. The driver loop marks it generated before descending,
    /// so progress is guaranteed.
    pub fn next_pending(&self) -> Option<usize> {
        self.functions.iter().position(|entry| !entry.generated)
    }
}
