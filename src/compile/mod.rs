//! The semantic core: name resolution, constant evaluation, coercion and
//! instruction generation.
//!
//! Everything fallible returns a [`CResult`]. Errors are fatal to the
//! compilation: the helper that constructs one prints its diagnostic
//! (including the source excerpt) immediately, so by the time a
//! [`CompileError`] reaches the driver the user has already seen it.

pub mod coerce;
pub mod constants;
pub mod context;
pub mod generator;
pub mod layout;
pub mod promotion;
pub mod resolve;
pub mod stmt;

mod expr;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::diagnostics;
use crate::span::Span;

pub use context::{GenerationContext, RuntimeFunctionEntry, SourceFile};
pub use generator::{FunctionGenerator, RuntimeValueKind, TypedValue};

/// Category of a compile error. These are kinds, not distinct types: every
/// error renders the same way and ends the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown identifier, unknown member, module not found.
    Resolution,
    /// Implicit conversion failures, invalid operator/operand combinations,
    /// undetermined aggregates escaping into runtime contexts.
    Type,
    /// Bad polymorphic argument lists and constant-argument violations.
    Polymorphism,
    /// Constant evaluation failures: bad casts, out-of-bounds indexes,
    /// duplicate names.
    Evaluation,
    /// Program-shape errors: missing or malformed `main`, bodies that do
    /// not return, duplicate mangled names.
    Structural,
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub path: PathBuf,
    pub span: Span,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({},{}): {}",
            self.path.display(),
            self.span.start_line,
            self.span.start_column,
            self.message
        )
    }
}

impl std::error::Error for CompileError {}

pub type CResult<T> = Result<T, CompileError>;

/// Report a diagnostic at a source range and fail.
pub fn error_at<T>(
    kind: ErrorKind,
    path: &Path,
    span: Span,
    message: impl Into<String>,
) -> CResult<T> {
    let message = message.into();
    diagnostics::report(path, span, &message);
    Err(CompileError {
        kind,
        message,
        path: path.to_path_buf(),
        span,
    })
}
