//! The driver: find `main`, then generate runtime statics until the set
//! closes.
//!
//! Each loop iteration takes one pending runtime function and generates
//! its body, which may register further functions and static constants.
//! Every generation removes exactly one entry from the pending set, so the
//! loop terminates once nothing new is referenced.

use std::path::Path;

use crate::ast::Statement;
use crate::compile::context::RuntimeFunctionEntry;
use crate::compile::{error_at, layout, resolve, stmt, CResult, ErrorKind, GenerationContext};
use crate::config::TargetConfig;
use crate::diagnostics::Diagnostic;
use crate::frontend::Frontend;
use crate::ir::{RuntimeFunction, RuntimeStatic};
use crate::scope::DeclarationScope;
use crate::span::Span;
use crate::types::Type;
use crate::value::ConstantValue;

/// Compile everything reachable from the `main` declaration of the root
/// file into the backend's static list. The first diagnostic is fatal; it
/// has already been printed when this returns an error.
pub fn compile_program(
    frontend: &dyn Frontend,
    root_path: &Path,
    options: TargetConfig,
) -> CResult<Vec<RuntimeStatic>> {
    let statements = match frontend.parse_file(root_path) {
        Ok(statements) => statements,
        Err(failure) => {
            let message = failure.to_string();
            Diagnostic::new(root_path, Span::default(), &message).report();
            return Err(crate::compile::CompileError {
                kind: ErrorKind::Structural,
                message,
                path: root_path.to_path_buf(),
                span: Span::default(),
            });
        }
    };
    let mut context = GenerationContext::new(frontend, options, root_path.to_path_buf(), statements);

    register_main(&mut context, root_path)?;

    while let Some(index) = context.next_pending() {
        context.functions[index].generated = true;
        let entry = context.functions[index].clone();
        let function = if entry.is_external {
            external_function(&context, &entry)
        } else {
            stmt::generate_function(&mut context, &entry)?
        };
        context.statics.push(RuntimeStatic::Function(function));
    }

    Ok(context.statics)
}

/// Find and enqueue the entry point.
fn register_main(context: &mut GenerationContext, root_path: &Path) -> CResult<()> {
    let root = context.root.clone();
    let Some(main_declaration) = root
        .statements()
        .iter()
        .find(|statement| statement.declared_name() == Some("main"))
        .cloned()
    else {
        return error_at(
            ErrorKind::Structural,
            root_path,
            Span::default(),
            "cannot find 'main'",
        );
    };
    if !matches!(&*main_declaration, Statement::FunctionDeclaration { .. }) {
        return error_at(
            ErrorKind::Structural,
            root_path,
            main_declaration.span(),
            "'main' must be a function",
        );
    }
    let resolved = resolve::resolve_declaration(context, &root, &main_declaration)?;
    match (&resolved.constant_type, &resolved.value) {
        (Type::Function(signature), ConstantValue::Function(reference)) => {
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
                is_external: false,
                generated: false,
            };
            context.register_runtime_function(entry, root_path, main_declaration.span())
        }
        (Type::PolymorphicFunction, _) => error_at(
            ErrorKind::Structural,
            root_path,
            main_declaration.span(),
            "'main' cannot be polymorphic",
        ),
        _ => error_at(
            ErrorKind::Structural,
            root_path,
            main_declaration.span(),
            "'main' must be a function",
        ),
    }
}

/// External functions carry their signature only; the backend links them
/// by source name.
fn external_function(
    context: &GenerationContext,
    entry: &RuntimeFunctionEntry,
) -> RuntimeFunction {
    let options = context.options;
    RuntimeFunction {
        name: entry.mangled_name.clone(),
        is_external: true,
        parameters: entry
            .parameter_types
            .iter()
            .map(|parameter_type| layout::parameter_layout(parameter_type, &options))
            .collect(),
        return_layout: layout::return_layout(&entry.return_type, &options),
        path: entry.body_scope.source_path().to_path_buf(),
        line: entry.declaration.span().start_line,
        instructions: Vec::new(),
    }
}

/// Serialise the backend hand-off as JSON, the out-of-process transport
/// for the IR.
pub fn statics_to_json(statics: &[RuntimeStatic]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(statics)
}
