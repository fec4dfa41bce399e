//! Shared helpers for integration tests
// This helper module is consumed selectively by many integration test
// files; keep the builders available without requiring every test target
// to use all of them.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use silica_core::ast::{
    BinaryOperator, Expression, FunctionParameter, Statement, StructField, StructParameter,
    UnaryOperator,
};
use silica_core::compile::{constants, resolve};
use silica_core::frontend::{Frontend, FrontendError};
use silica_core::ir::{RuntimeFunction, RuntimeStatic};
use silica_core::span::Span;
use silica_core::value::TypedConstant;
use silica_core::{compile_program, CResult, GenerationContext, TargetConfig};

pub const ROOT: &str = "/src/main.si";

pub fn span() -> Span {
    Span::default()
}

// ── expression builders ──────────────────────────────────────────────────

pub fn int(value: u64) -> Expression {
    Expression::IntegerLiteral { value, span: span() }
}

pub fn float(value: f64) -> Expression {
    Expression::FloatLiteral { value, span: span() }
}

pub fn string(value: &str) -> Expression {
    Expression::StringLiteral {
        value: value.to_string(),
        span: span(),
    }
}

pub fn boolean(value: bool) -> Expression {
    Expression::BooleanLiteral { value, span: span() }
}

pub fn name(name: &str) -> Expression {
    Expression::NamedReference {
        name: name.to_string(),
        span: span(),
    }
}

pub fn member(object: Expression, name: &str) -> Expression {
    Expression::MemberReference {
        object: Box::new(object),
        name: name.to_string(),
        span: span(),
    }
}

pub fn index(object: Expression, index: Expression) -> Expression {
    Expression::IndexReference {
        object: Box::new(object),
        index: Box::new(index),
        span: span(),
    }
}

pub fn array_literal(elements: Vec<Expression>) -> Expression {
    Expression::ArrayLiteral {
        elements,
        span: span(),
    }
}

pub fn struct_literal(members: Vec<(&str, Expression)>) -> Expression {
    Expression::StructLiteral {
        members: members
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
        span: span(),
    }
}

pub fn call(callee: Expression, arguments: Vec<Expression>) -> Expression {
    Expression::FunctionCall {
        callee: Box::new(callee),
        arguments,
        span: span(),
    }
}

pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::BinaryOperation {
        operator,
        left: Box::new(left),
        right: Box::new(right),
        span: span(),
    }
}

pub fn unary(operator: UnaryOperator, operand: Expression) -> Expression {
    Expression::UnaryOperation {
        operator,
        operand: Box::new(operand),
        span: span(),
    }
}

pub fn cast(value: Expression, target: Expression) -> Expression {
    Expression::Cast {
        value: Box::new(value),
        target: Box::new(target),
        span: span(),
    }
}

pub fn slice_type(element: Expression) -> Expression {
    Expression::ArrayType {
        length: None,
        element: Box::new(element),
        span: span(),
    }
}

pub fn array_type(length: Expression, element: Expression) -> Expression {
    Expression::ArrayType {
        length: Some(Box::new(length)),
        element: Box::new(element),
        span: span(),
    }
}

pub fn determiner(name: &str) -> Expression {
    Expression::PolymorphicDeterminer {
        name: name.to_string(),
        span: span(),
    }
}

// ── statement builders ───────────────────────────────────────────────────

pub fn constant(name: &str, value: Expression) -> Rc<Statement> {
    Rc::new(Statement::ConstantDefinition {
        name: name.to_string(),
        value,
        span: span(),
    })
}

pub fn parameter(name: &str, type_expression: Expression) -> FunctionParameter {
    FunctionParameter {
        name: name.to_string(),
        type_expression,
        is_constant: false,
        span: span(),
    }
}

pub fn constant_parameter(name: &str, type_expression: Expression) -> FunctionParameter {
    FunctionParameter {
        name: name.to_string(),
        type_expression,
        is_constant: true,
        span: span(),
    }
}

pub fn function(
    name: &str,
    parameters: Vec<FunctionParameter>,
    return_type: Option<Expression>,
    body: Vec<Rc<Statement>>,
) -> Rc<Statement> {
    Rc::new(Statement::FunctionDeclaration {
        name: name.to_string(),
        parameters,
        return_type,
        body: Some(body),
        is_external: false,
        span: span(),
    })
}

pub fn external_function(
    name: &str,
    parameters: Vec<FunctionParameter>,
    return_type: Option<Expression>,
) -> Rc<Statement> {
    Rc::new(Statement::FunctionDeclaration {
        name: name.to_string(),
        parameters,
        return_type,
        body: None,
        is_external: true,
        span: span(),
    })
}

pub fn struct_def(name: &str, members: Vec<(&str, Expression)>) -> Rc<Statement> {
    make_struct(name, Vec::new(), members, false)
}

pub fn union_def(name: &str, members: Vec<(&str, Expression)>) -> Rc<Statement> {
    make_struct(name, Vec::new(), members, true)
}

pub fn poly_struct(
    name: &str,
    parameters: Vec<(&str, Expression)>,
    members: Vec<(&str, Expression)>,
) -> Rc<Statement> {
    make_struct(name, parameters, members, false)
}

fn make_struct(
    name: &str,
    parameters: Vec<(&str, Expression)>,
    members: Vec<(&str, Expression)>,
    is_union: bool,
) -> Rc<Statement> {
    Rc::new(Statement::StructDefinition {
        name: name.to_string(),
        parameters: parameters
            .into_iter()
            .map(|(name, type_expression)| StructParameter {
                name: name.to_string(),
                type_expression,
                span: span(),
            })
            .collect(),
        members: members
            .into_iter()
            .map(|(name, type_expression)| StructField {
                name: name.to_string(),
                type_expression,
                span: span(),
            })
            .collect(),
        is_union,
        span: span(),
    })
}

pub fn import(name: &str, path: &str) -> Rc<Statement> {
    Rc::new(Statement::Import {
        name: name.to_string(),
        path: path.to_string(),
        span: span(),
    })
}

pub fn using(module: Expression) -> Rc<Statement> {
    Rc::new(Statement::Using {
        module,
        span: span(),
    })
}

pub fn var(
    name: &str,
    type_expression: Option<Expression>,
    initializer: Option<Expression>,
) -> Rc<Statement> {
    Rc::new(Statement::VariableDeclaration {
        name: name.to_string(),
        type_expression,
        initializer,
        span: span(),
    })
}

pub fn assign(target: Expression, value: Expression) -> Rc<Statement> {
    Rc::new(Statement::Assignment {
        target,
        value,
        span: span(),
    })
}

pub fn if_stmt(condition: Expression, body: Vec<Rc<Statement>>) -> Rc<Statement> {
    Rc::new(Statement::If {
        condition,
        body,
        else_ifs: Vec::new(),
        else_body: None,
        span: span(),
    })
}

pub fn if_else(
    condition: Expression,
    body: Vec<Rc<Statement>>,
    else_body: Vec<Rc<Statement>>,
) -> Rc<Statement> {
    Rc::new(Statement::If {
        condition,
        body,
        else_ifs: Vec::new(),
        else_body: Some(else_body),
        span: span(),
    })
}

pub fn while_stmt(condition: Expression, body: Vec<Rc<Statement>>) -> Rc<Statement> {
    Rc::new(Statement::While {
        condition,
        body,
        span: span(),
    })
}

pub fn ret(value: Option<Expression>) -> Rc<Statement> {
    Rc::new(Statement::Return {
        value,
        span: span(),
    })
}

pub fn expr_stmt(expression: Expression) -> Rc<Statement> {
    Rc::new(Statement::Expression {
        expression,
        span: span(),
    })
}

/// `main :: () { body }`
pub fn main_function(body: Vec<Rc<Statement>>) -> Rc<Statement> {
    function("main", Vec::new(), None, body)
}

// ── fixture frontend ─────────────────────────────────────────────────────

/// An in-memory frontend: pre-built ASTs keyed by absolute path, plus a
/// log of every parse request so tests can assert each file is parsed at
/// most once.
#[derive(Debug, Default)]
pub struct FixtureFrontend {
    files: HashMap<PathBuf, Vec<Rc<Statement>>>,
    parsed: RefCell<Vec<PathBuf>>,
}

impl FixtureFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &str, statements: Vec<Rc<Statement>>) {
        self.files.insert(PathBuf::from(path), statements);
    }

    pub fn parse_count(&self) -> usize {
        self.parsed.borrow().len()
    }

    pub fn parsed_paths(&self) -> Vec<PathBuf> {
        self.parsed.borrow().clone()
    }
}

impl Frontend for FixtureFrontend {
    fn parse_file(&self, path: &Path) -> Result<Vec<Rc<Statement>>, FrontendError> {
        self.parsed.borrow_mut().push(path.to_path_buf());
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| FrontendError::Parse {
                path: path.to_path_buf(),
                message: "no such fixture".to_string(),
            })
    }
}

// ── compilation helpers ──────────────────────────────────────────────────

pub fn compile_single(statements: Vec<Rc<Statement>>) -> CResult<Vec<RuntimeStatic>> {
    compile_single_with(statements, TargetConfig::default())
}

pub fn compile_single_with(
    statements: Vec<Rc<Statement>>,
    options: TargetConfig,
) -> CResult<Vec<RuntimeStatic>> {
    let mut frontend = FixtureFrontend::new();
    frontend.add(ROOT, statements);
    compile_program(&frontend, Path::new(ROOT), options)
}

/// Evaluate an expression at compile time against a root file's
/// statements.
pub fn evaluate(
    statements: Vec<Rc<Statement>>,
    expression: &Expression,
) -> CResult<TypedConstant> {
    evaluate_with(statements, expression, TargetConfig::default())
}

pub fn evaluate_with(
    statements: Vec<Rc<Statement>>,
    expression: &Expression,
    options: TargetConfig,
) -> CResult<TypedConstant> {
    let frontend = FixtureFrontend::new();
    let mut context =
        GenerationContext::new(&frontend, options, PathBuf::from(ROOT), statements);
    let root = context.root.clone();
    constants::evaluate_constant(&mut context, &root, expression)
}

/// Resolve a bare name against a root file's statements.
pub fn resolve_in(statements: Vec<Rc<Statement>>, reference: &str) -> CResult<TypedConstant> {
    let frontend = FixtureFrontend::new();
    let mut context = GenerationContext::new(
        &frontend,
        TargetConfig::default(),
        PathBuf::from(ROOT),
        statements,
    );
    let root = context.root.clone();
    resolve::resolve_name(&mut context, &root, reference, Span::default())
}

pub fn find_function<'a>(statics: &'a [RuntimeStatic], name: &str) -> &'a RuntimeFunction {
    statics
        .iter()
        .find_map(|entry| match entry {
            RuntimeStatic::Function(function) if function.name == name => Some(function),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no function named '{}' in {:?}", name, names(statics)))
}

pub fn functions(statics: &[RuntimeStatic]) -> Vec<&RuntimeFunction> {
    statics
        .iter()
        .filter_map(|entry| match entry {
            RuntimeStatic::Function(function) => Some(function),
            _ => None,
        })
        .collect()
}

pub fn names(statics: &[RuntimeStatic]) -> Vec<&str> {
    statics.iter().map(RuntimeStatic::name).collect()
}
