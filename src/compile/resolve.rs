//! Name resolution and on-demand declaration resolution.
//!
//! A bare identifier is searched in this order: the innermost constant
//! parameters, then each enclosing declaration level (its statement list,
//! the modules its `using`s pull in, then its own constant parameters),
//! then the root file's top level, and finally the ambient table of global
//! constants. Finding a declaration triggers its resolution, evaluated in
//! the scope the declaration lives in, never the caller's.

use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use once_cell::unsync::Lazy;

use crate::ast::Statement;
use crate::config::TargetConfig;
use crate::scope::{mangled_name, DeclarationScope};
use crate::span::Span;
use crate::types::{
    FloatSize, FunctionSignature, PolymorphicStructType, RegisterSize, StructMember, StructType,
    Type,
};
use crate::value::{
    BuiltinFunction, ConstantValue, FileModuleReference, FunctionReference,
    PolymorphicFunctionReference, TypedConstant,
};

use super::constants::{evaluate_constant, evaluate_type_expression};
use super::context::GenerationContext;
use super::{error_at, CResult, ErrorKind};

thread_local! {
/// Primitive type names, independent of the target configuration.
/// `usize` and `isize` depend on the address size and are added by
/// [`global_constant`].
static PRIMITIVE_TYPES: Lazy<Vec<(&'static str, Type)>> = Lazy::new(|| {
    let integer = |size, signed| Type::Integer { size, signed };
    vec![
        ("u8", integer(RegisterSize::Size8, false)),
        ("u16", integer(RegisterSize::Size16, false)),
        ("u32", integer(RegisterSize::Size32, false)),
        ("u64", integer(RegisterSize::Size64, false)),
        ("i8", integer(RegisterSize::Size8, true)),
        ("i16", integer(RegisterSize::Size16, true)),
        ("i32", integer(RegisterSize::Size32, true)),
        ("i64", integer(RegisterSize::Size64, true)),
        (
            "f32",
            Type::Float {
                size: FloatSize::Size32,
            },
        ),
        (
            "f64",
            Type::Float {
                size: FloatSize::Size64,
            },
        ),
        ("bool", Type::Boolean),
        ("void", Type::Void),
        ("type", Type::TypeOfType),
    ]
});
}

/// The ambient global constants: primitive type names, the boolean
/// literals, and the two builtins.
pub fn global_constant(options: &TargetConfig, name: &str) -> Option<TypedConstant> {
    let found_primitive = PRIMITIVE_TYPES.with(|types| {
        types
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, found)| found.clone())
    });
    if let Some(found) = found_primitive {
        return Some(TypedConstant::new(
            Type::TypeOfType,
            ConstantValue::Type(found),
        ));
    }
    match name {
        "usize" => Some(TypedConstant::new(
            Type::TypeOfType,
            ConstantValue::Type(options.address_integer()),
        )),
        "isize" => Some(TypedConstant::new(
            Type::TypeOfType,
            ConstantValue::Type(options.signed_address_integer()),
        )),
        "true" => Some(TypedConstant::new(
            Type::Boolean,
            ConstantValue::Boolean(true),
        )),
        "false" => Some(TypedConstant::new(
            Type::Boolean,
            ConstantValue::Boolean(false),
        )),
        _ => BuiltinFunction::from_name(name).map(|builtin| {
            TypedConstant::new(Type::BuiltinFunction, ConstantValue::Builtin(builtin))
        }),
    }
}

/// Lexically normalise a path: resolve `.` and `..` without touching the
/// filesystem, so the parsed-file table keys stay stable.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// True when the declaration needs per-call-site instantiation: any
/// constant parameter, or a determiner in any parameter type.
pub fn declaration_is_polymorphic(declaration: &Statement) -> bool {
    match declaration {
        Statement::FunctionDeclaration { parameters, .. } => parameters
            .iter()
            .any(|parameter| parameter.is_constant || parameter.type_expression.contains_determiner()),
        _ => false,
    }
}

/// Resolve a bare identifier to its typed constant value.
pub fn resolve_name(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    name: &str,
    span: Span,
) -> CResult<TypedConstant> {
    // Constant parameters bound at the innermost declaration win.
    for parameter in scope.constant_parameters() {
        if parameter.name == name {
            return Ok(TypedConstant::new(
                parameter.parameter_type.clone(),
                parameter.value.clone(),
            ));
        }
    }

    let mut level = Some(scope.clone());
    let mut outermost = scope.clone();
    while let Some(current) = level {
        if let Some(found) = search_level(context, &current, name)? {
            return Ok(found);
        }
        level = current.parent().cloned();
        outermost = current;
    }

    // The root file's top level, unless the chain already ended there.
    let root = context.root.clone();
    if !Rc::ptr_eq(&outermost, &root) {
        if let Some(found) = search_level(context, &root, name)? {
            return Ok(found);
        }
    }

    match global_constant(&context.options, name) {
        Some(found) => Ok(found),
        None => error_at(
            ErrorKind::Resolution,
            scope.source_path(),
            span,
            format!("cannot find named reference '{}'", name),
        ),
    }
}

/// Search one scope level: its declarations, then the modules its
/// `using`s import, then its constant parameters.
fn search_level(
    context: &mut GenerationContext,
    level: &Rc<DeclarationScope>,
    name: &str,
) -> CResult<Option<TypedConstant>> {
    let statements: Vec<Rc<Statement>> = level.statements().to_vec();
    for statement in &statements {
        if statement.declared_name() == Some(name) {
            return resolve_declaration(context, level, statement).map(Some);
        }
    }
    for statement in &statements {
        if let Statement::Using { module, span } = &**statement {
            let module_value = evaluate_constant(context, level, module)?;
            let ConstantValue::FileModule(reference) = module_value.value else {
                return error_at(
                    ErrorKind::Resolution,
                    level.source_path(),
                    *span,
                    "expected a module",
                );
            };
            if let Some(found) = search_module(context, &reference, name)? {
                return Ok(Some(found));
            }
        }
    }
    for parameter in level.constant_parameters() {
        if parameter.name == name {
            return Ok(Some(TypedConstant::new(
                parameter.parameter_type.clone(),
                parameter.value.clone(),
            )));
        }
    }
    Ok(None)
}

/// Search a module's public declarations: everything except imports.
/// Found declarations resolve under the module's own top-level scope.
pub fn search_module(
    context: &mut GenerationContext,
    module: &FileModuleReference,
    name: &str,
) -> CResult<Option<TypedConstant>> {
    for statement in &module.statements {
        if matches!(&**statement, Statement::Import { .. }) {
            continue;
        }
        if statement.declared_name() == Some(name) {
            let module_scope =
                DeclarationScope::top_level(module.path.clone(), module.statements.clone());
            return resolve_declaration(context, &module_scope, statement).map(Some);
        }
    }
    Ok(None)
}

/// Resolve a declaration found by the name search, producing its typed
/// constant value.
pub fn resolve_declaration(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    declaration: &Rc<Statement>,
) -> CResult<TypedConstant> {
    match &**declaration {
        Statement::FunctionDeclaration {
            name,
            parameters,
            return_type,
            is_external,
            ..
        } => {
            if declaration_is_polymorphic(declaration) {
                return Ok(TypedConstant::new(
                    Type::PolymorphicFunction,
                    ConstantValue::PolymorphicFunction(PolymorphicFunctionReference {
                        declaration: declaration.clone(),
                        scope: scope.clone(),
                    }),
                ));
            }
            let mut parameter_types = Vec::with_capacity(parameters.len());
            for parameter in parameters {
                let parameter_type =
                    evaluate_type_expression(context, scope, &parameter.type_expression)?;
                if !parameter_type.is_runtime_type() {
                    return error_at(
                        ErrorKind::Type,
                        scope.source_path(),
                        parameter.span,
                        format!(
                            "function parameters must be runtime types, got '{}'",
                            parameter_type
                        ),
                    );
                }
                parameter_types.push(parameter_type);
            }
            let resolved_return_type = match return_type {
                Some(expression) => {
                    let resolved = evaluate_type_expression(context, scope, expression)?;
                    if !resolved.is_runtime_type() {
                        return error_at(
                            ErrorKind::Type,
                            scope.source_path(),
                            expression.span(),
                            format!("function return types must be runtime types, got '{}'", resolved),
                        );
                    }
                    resolved
                }
                None => Type::Void,
            };
            let mangled = if *is_external {
                name.clone()
            } else {
                mangled_name(name, scope)
            };
            Ok(TypedConstant::new(
                Type::Function(FunctionSignature {
                    parameters: parameter_types,
                    return_type: Box::new(resolved_return_type),
                }),
                ConstantValue::Function(FunctionReference {
                    mangled_name: mangled,
                    declaration: declaration.clone(),
                    scope: scope.clone(),
                }),
            ))
        }
        Statement::ConstantDefinition { value, .. } => evaluate_constant(context, scope, value),
        Statement::StructDefinition {
            parameters,
            members,
            is_union,
            ..
        } => {
            if parameters.is_empty() {
                let resolved =
                    resolve_struct_members(context, scope, declaration, members, *is_union)?;
                return Ok(TypedConstant::new(
                    Type::TypeOfType,
                    ConstantValue::Type(resolved),
                ));
            }
            let mut parameter_types = Vec::with_capacity(parameters.len());
            for parameter in parameters {
                parameter_types.push(evaluate_type_expression(
                    context,
                    scope,
                    &parameter.type_expression,
                )?);
            }
            Ok(TypedConstant::new(
                Type::TypeOfType,
                ConstantValue::Type(Type::PolymorphicStruct(PolymorphicStructType {
                    definition: declaration.clone(),
                    parameter_types,
                    scope: scope.clone(),
                })),
            ))
        }
        Statement::Import { path, span, .. } => resolve_import(context, scope, path, *span),
        _ => error_at(
            ErrorKind::Resolution,
            scope.source_path(),
            declaration.span(),
            "expected a declaration",
        ),
    }
}

/// Evaluate a struct definition's member types under the given scope.
/// Shared between plain structs and polymorphic instantiations, which pass
/// a scope with the struct's constant parameters bound.
pub fn resolve_struct_members(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    declaration: &Rc<Statement>,
    members: &[crate::ast::StructField],
    is_union: bool,
) -> CResult<Type> {
    let mut resolved = Vec::with_capacity(members.len());
    for member in members {
        if resolved
            .iter()
            .any(|existing: &StructMember| existing.name == member.name)
        {
            return error_at(
                ErrorKind::Evaluation,
                scope.source_path(),
                member.span,
                format!("duplicate struct member name '{}'", member.name),
            );
        }
        let member_type = evaluate_type_expression(context, scope, &member.type_expression)?;
        if !member_type.is_runtime_type() {
            return error_at(
                ErrorKind::Type,
                scope.source_path(),
                member.span,
                format!("struct members must be runtime types, got '{}'", member_type),
            );
        }
        resolved.push(StructMember {
            name: member.name.clone(),
            member_type,
        });
    }
    Ok(Type::Struct(StructType {
        definition: declaration.clone(),
        members: resolved,
        is_union,
    }))
}

/// Resolve an import: the path is relative to the importing file, the
/// parsed-file table is consulted first, and only a genuinely new file
/// reaches the external frontend.
fn resolve_import(
    context: &mut GenerationContext,
    scope: &Rc<DeclarationScope>,
    path: &str,
    span: Span,
) -> CResult<TypedConstant> {
    let importing_directory = scope.source_path().parent().unwrap_or(Path::new(""));
    let resolved = normalize_path(&importing_directory.join(path));

    let statements = if let Some(source) = context.find_source(&resolved) {
        source.statements.clone()
    } else {
        match context.frontend.parse_file(&resolved) {
            Ok(statements) => {
                context.add_source(resolved.clone(), statements.clone());
                statements
            }
            Err(failure) => {
                return error_at(
                    ErrorKind::Resolution,
                    scope.source_path(),
                    span,
                    failure.to_string(),
                )
            }
        }
    };
    Ok(TypedConstant::new(
        Type::FileModule,
        ConstantValue::FileModule(FileModuleReference {
            path: resolved,
            statements,
        }),
    ))
}
