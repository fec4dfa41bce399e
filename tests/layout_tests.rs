//! Cross-cutting layout and equivalence properties, checked end to end.

mod common;

use common::*;
use silica_core::ast::BinaryOperator;
use silica_core::ir::{Instruction, RuntimeStatic};
use silica_core::types::RegisterSize;
use silica_core::value::ConstantValue;
use silica_core::TargetConfig;

#[test]
fn test_size_of_matches_serialised_static_length() {
    // A constant aggregate materialised into static data occupies exactly
    // size_of bytes.
    let statements = vec![
        struct_def("Mixed", vec![("a", name("u8")), ("b", name("i32")), ("c", name("u8"))]),
        constant("size", call(name("size_of"), vec![name("Mixed")])),
    ];
    let size = resolve_in(statements, "size").expect("size_of evaluates");
    let ConstantValue::Integer(expected) = size.value else {
        panic!("size_of should be an integer");
    };
    // u8 at 0, i32 padded to 4, u8 at 8.
    assert_eq!(expected, 9);

    let program = vec![
        struct_def("Mixed", vec![("a", name("u8")), ("b", name("i32")), ("c", name("u8"))]),
        constant(
            "m",
            cast(
                struct_literal(vec![("a", int(1)), ("b", int(2)), ("c", int(3))]),
                name("Mixed"),
            ),
        ),
        main_function(vec![var("copy", Some(name("Mixed")), Some(name("m")))]),
    ];
    let statics = compile_single(program).expect("compiles");
    let data = statics
        .iter()
        .find_map(|entry| match entry {
            RuntimeStatic::Constant(constant) => Some(&constant.data),
            _ => None,
        })
        .expect("the constant struct is materialised");
    assert_eq!(data.len() as u64, expected);
}

#[test]
fn test_boolean_storage_follows_default_integer_size() {
    let narrow = TargetConfig {
        address_size: RegisterSize::Size64,
        default_integer_size: RegisterSize::Size16,
    };
    let statements = vec![main_function(vec![var(
        "flag",
        Some(name("bool")),
        Some(boolean(true)),
    )])];
    let statics = compile_single_with(statements, narrow).expect("compiles");
    let main = find_function(&statics, "main_main");
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::AllocateLocal {
            size: 2,
            alignment: 2,
            ..
        }
    )));
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerStore {
            size: RegisterSize::Size16,
            ..
        }
    )));
}

#[test]
fn test_constant_and_runtime_folds_agree() {
    // The same arithmetic expression, once through the pure evaluator and
    // once through the generator, produces bit-identical constants.
    let expression = binary(
        BinaryOperator::Division,
        binary(
            BinaryOperator::Subtraction,
            binary(BinaryOperator::Multiplication, int(3), int(4)),
            int(5),
        ),
        int(2),
    );
    let evaluated = evaluate(Vec::new(), &expression).expect("evaluates");
    let ConstantValue::Integer(expected) = evaluated.value else {
        panic!("expected an integer fold");
    };
    assert_eq!(expected, 3);

    let statements = vec![main_function(vec![var(
        "x",
        Some(name("i64")),
        Some(expression),
    )])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    let stored = main
        .instructions
        .iter()
        .find_map(|instruction| match instruction {
            Instruction::IntegerConstant { value, .. } => Some(*value),
            _ => None,
        })
        .expect("the fold reaches the IR as one constant");
    assert_eq!(stored, expected);
    // And no arithmetic instructions were emitted at all.
    assert!(!main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerArithmetic { .. }
    )));
}

#[test]
fn test_undetermined_types_never_reach_the_ir() {
    // Mixed constant/runtime arithmetic: every emitted instruction carries
    // a concrete width.
    let statements = vec![main_function(vec![
        var("x", Some(name("i32")), Some(int(1))),
        var(
            "y",
            Some(name("i32")),
            Some(binary(BinaryOperator::Addition, name("x"), int(2))),
        ),
        var("z", None, Some(int(7))),
    ])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    // The literal 2 joins x at i32; the annotation-free z defaults to i64.
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerConstant {
            size: RegisterSize::Size32,
            value: 2,
            ..
        }
    )));
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerConstant {
            size: RegisterSize::Size64,
            value: 7,
            ..
        }
    )));
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::AllocateLocal { size: 8, .. }
    )));
}

#[test]
fn test_string_constant_serialises_byte_per_element() {
    let statements = vec![main_function(vec![var(
        "s",
        Some(array_type(int(2), name("u8"))),
        Some(string("hi")),
    )])];
    let statics = compile_single(statements).expect("compiles");
    let data = statics
        .iter()
        .find_map(|entry| match entry {
            RuntimeStatic::Constant(constant) => Some(&constant.data),
            _ => None,
        })
        .expect("string bytes materialised");
    assert_eq!(data.as_slice(), b"hi");
}
