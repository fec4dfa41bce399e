//! Tests for statement and expression lowering: exact instruction shapes
//! for the simple cases, structural assertions for the larger ones.

mod common;

use common::*;
use silica_core::ast::{BinaryOperator, UnaryOperator};
use silica_core::ir::{
    FloatComparisonOperation, Instruction, IntegerArithmeticOperation,
    IntegerComparisonOperation, ParameterLayout, ReturnLayout, RuntimeStatic,
};
use silica_core::types::{FloatSize, RegisterSize};
use silica_core::{ErrorKind, TargetConfig};

fn thirty_two_bit_defaults() -> TargetConfig {
    TargetConfig {
        address_size: RegisterSize::Size64,
        default_integer_size: RegisterSize::Size32,
    }
}

#[test]
fn test_integer_initialiser_folds_and_stores() {
    // main :: () { x: i32 = 1 + 2; }
    let statements = vec![main_function(vec![var(
        "x",
        Some(name("i32")),
        Some(binary(BinaryOperator::Addition, int(1), int(2))),
    )])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    assert_eq!(
        main.instructions,
        vec![
            Instruction::AllocateLocal {
                size: 4,
                alignment: 4,
                destination: 0,
            },
            Instruction::IntegerConstant {
                size: RegisterSize::Size32,
                value: 3,
                destination: 1,
            },
            Instruction::IntegerStore {
                size: RegisterSize::Size32,
                source: 1,
                address: 0,
            },
            Instruction::Return { value: None },
        ]
    );
    assert!(main.parameters.is_empty());
    assert_eq!(main.return_layout, None);
}

#[test]
fn test_slice_auto_wrap_writes_pointer_then_length() {
    // main :: () { a: [3]i32 = .[1, 2, 3]; b: []i32 = a; }
    let statements = vec![main_function(vec![
        var(
            "a",
            Some(array_type(int(3), name("i32"))),
            Some(array_literal(vec![int(1), int(2), int(3)])),
        ),
        var("b", Some(slice_type(name("i32"))), Some(name("a"))),
    ])];
    let statics =
        compile_single_with(statements, thirty_two_bit_defaults()).expect("compiles");
    let main = find_function(&statics, "main_main");

    // b's local is a two-word (16 byte) slice.
    let slice_local = main
        .instructions
        .iter()
        .position(|instruction| {
            matches!(
                instruction,
                Instruction::AllocateLocal { size: 16, .. }
            )
        })
        .expect("slice local allocated");
    let &Instruction::AllocateLocal {
        destination: slice_register,
        alignment: 8,
        ..
    } = &main.instructions[slice_local]
    else {
        panic!("expected the slice local");
    };

    // The array's address goes into word 0...
    let tail = &main.instructions[slice_local + 1..];
    let pointer_store = tail
        .iter()
        .position(|instruction| {
            matches!(
                instruction,
                Instruction::IntegerStore {
                    size: RegisterSize::Size64,
                    address,
                    ..
                } if *address == slice_register
            )
        })
        .expect("pointer word written");
    let &Instruction::IntegerStore {
        source: pointer_source,
        ..
    } = &tail[pointer_store]
    else {
        unreachable!();
    };
    // ...and that source is the array local, not a constant.
    assert!(matches!(
        main.instructions[0],
        Instruction::AllocateLocal { size: 12, destination, .. } if destination == pointer_source
    ));

    // The length 3 is materialised and stored into word 1 (offset 8).
    assert!(tail.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerConstant {
            size: RegisterSize::Size64,
            value: 3,
            ..
        }
    )));
    assert!(tail.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerConstant {
            size: RegisterSize::Size64,
            value: 8,
            ..
        }
    )));
}

#[test]
fn test_union_literal_writes_member_at_offset_zero() {
    // U :: union { i: i32; f: f32; }  u: U = .{ f = 1.5 };
    let statements = vec![
        union_def("U", vec![("i", name("i32")), ("f", name("f32"))]),
        main_function(vec![var(
            "u",
            Some(name("U")),
            Some(struct_literal(vec![("f", float(1.5))])),
        )]),
    ];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    assert_eq!(
        main.instructions,
        vec![
            // Union storage is max(size(i32), size(f32)) = 4 bytes.
            Instruction::AllocateLocal {
                size: 4,
                alignment: 4,
                destination: 0,
            },
            Instruction::FloatConstant {
                size: FloatSize::Size32,
                value: 1.5,
                destination: 1,
            },
            Instruction::FloatStore {
                size: FloatSize::Size32,
                source: 1,
                address: 0,
            },
            Instruction::Return { value: None },
        ]
    );
}

#[test]
fn test_if_else_branch_targets_are_patched() {
    // main :: () { x: i64 = 0; if true { x = 1; } else { x = 2; } }
    let statements = vec![main_function(vec![
        var("x", Some(name("i64")), Some(int(0))),
        if_else(
            boolean(true),
            vec![assign(name("x"), int(1))],
            vec![assign(name("x"), int(2))],
        ),
    ])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");

    let mut branch_targets = Vec::new();
    let mut jump_targets = Vec::new();
    for instruction in &main.instructions {
        match instruction {
            Instruction::Branch { destination, .. } => branch_targets.push(*destination),
            Instruction::Jump { destination } => jump_targets.push(*destination),
            _ => {}
        }
    }
    assert_eq!(branch_targets.len(), 1);
    assert_eq!(jump_targets.len(), 2);
    let limit = main.instructions.len();
    for target in branch_targets.iter().chain(&jump_targets) {
        assert!(*target <= limit, "target {} out of range {}", target, limit);
    }
    // The branch skips forward over the else arm.
    let branch_position = main
        .instructions
        .iter()
        .position(|instruction| matches!(instruction, Instruction::Branch { .. }))
        .expect("branch emitted");
    assert!(branch_targets[0] > branch_position);
}

#[test]
fn test_while_loop_jumps_back_to_head() {
    // main :: () { x: i64 = 0; while x < 10 { x = x + 1; } }
    let statements = vec![main_function(vec![
        var("x", Some(name("i64")), Some(int(0))),
        while_stmt(
            binary(BinaryOperator::LessThan, name("x"), int(10)),
            vec![assign(
                name("x"),
                binary(BinaryOperator::Addition, name("x"), int(1)),
            )],
        ),
    ])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");

    // The loop condition starts after the two initialiser instructions
    // plus the store; the final jump of the body must return to it.
    let head = 3;
    assert!(main
        .instructions
        .iter()
        .any(|instruction| matches!(
            instruction,
            Instruction::Jump { destination } if *destination == head
        )));
    // Signed comparison for i64 operands.
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerComparison {
            comparison: IntegerComparisonOperation::SignedLessThan,
            size: RegisterSize::Size64,
            ..
        }
    )));
}

#[test]
fn test_scalar_call_and_return() {
    // add :: (a: i32, b: i32) -> i32 { return a + b; }
    // main :: () { x: i32 = add(1, 2); }
    let statements = vec![
        function(
            "add",
            vec![parameter("a", name("i32")), parameter("b", name("i32"))],
            Some(name("i32")),
            vec![ret(Some(binary(BinaryOperator::Addition, name("a"), name("b"))))],
        ),
        main_function(vec![var(
            "x",
            Some(name("i32")),
            Some(call(name("add"), vec![int(1), int(2)])),
        )]),
    ];
    let statics = compile_single(statements).expect("compiles");

    let add = find_function(&statics, "add_main");
    assert_eq!(
        add.parameters,
        vec![
            ParameterLayout {
                size: RegisterSize::Size32,
                is_float: false,
            };
            2
        ]
    );
    assert_eq!(
        add.return_layout,
        Some(ReturnLayout::Register {
            size: RegisterSize::Size32,
            is_float: false,
        })
    );
    // Parameters spill to locals, reload for the add, return in register.
    assert!(add.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerArithmetic {
            operation: IntegerArithmeticOperation::Add,
            size: RegisterSize::Size32,
            ..
        }
    )));
    assert!(matches!(
        add.instructions.last(),
        Some(Instruction::Return { value: Some(_) })
    ));

    let main = find_function(&statics, "main_main");
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::FunctionCall {
            name,
            arguments,
            return_register: Some(_),
        } if name == "add_main" && arguments.len() == 2
    )));
}

#[test]
fn test_aggregate_return_uses_trailing_address() {
    // make :: () -> Pair { return .{ a = 1, b = 2 }; }
    let statements = vec![
        struct_def("Pair", vec![("a", name("i64")), ("b", name("i64"))]),
        function(
            "make",
            Vec::new(),
            Some(name("Pair")),
            vec![ret(Some(struct_literal(vec![("a", int(1)), ("b", int(2))])))],
        ),
        main_function(vec![var(
            "p",
            Some(name("Pair")),
            Some(call(name("make"), Vec::new())),
        )]),
    ];
    let statics = compile_single(statements).expect("compiles");

    let make = find_function(&statics, "make_main");
    assert_eq!(make.return_layout, Some(ReturnLayout::ByReference));
    // Register 0 is the return address; members store through it.
    assert!(make.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerStore { address: 0, .. }
    )));
    assert!(matches!(
        make.instructions.last(),
        Some(Instruction::Return { value: None })
    ));

    // The caller allocates the destination and passes it as the only
    // argument.
    let main = find_function(&statics, "main_main");
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::FunctionCall {
            name,
            arguments,
            return_register: None,
        } if name == "make_main" && arguments.len() == 1
    )));
}

#[test]
fn test_member_assignment_through_offset() {
    let statements = vec![
        struct_def("Pair", vec![("a", name("i64")), ("b", name("i64"))]),
        main_function(vec![
            var(
                "p",
                Some(name("Pair")),
                Some(struct_literal(vec![("a", int(1)), ("b", int(2))])),
            ),
            assign(member(name("p"), "b"), int(9)),
        ]),
    ];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    // The second member sits at offset 8: expect that constant feeding an
    // address add, then a store of 9.
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerConstant { value: 8, .. }
    )));
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerConstant { value: 9, .. }
    )));
}

#[test]
fn test_index_scales_by_element_size() {
    // main :: () { a: [4]i32 = .[1,2,3,4]; i: usize = 2; x: i32 = a[i]; }
    let statements = vec![main_function(vec![
        var(
            "a",
            Some(array_type(int(4), name("i32"))),
            Some(array_literal(vec![int(1), int(2), int(3), int(4)])),
        ),
        var("i", Some(name("usize")), Some(int(2))),
        var("x", Some(name("i32")), Some(index(name("a"), name("i")))),
    ])];
    let statics =
        compile_single_with(statements, thirty_two_bit_defaults()).expect("compiles");
    let main = find_function(&statics, "main_main");
    // index * 4, then base + offset, then a 4-byte load.
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerArithmetic {
            operation: IntegerArithmeticOperation::Multiply,
            size: RegisterSize::Size64,
            ..
        }
    )));
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerConstant { value: 4, size: RegisterSize::Size64, .. }
    )));
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerLoad {
            size: RegisterSize::Size32,
            ..
        }
    )));
}

#[test]
fn test_constant_aggregate_materialises_as_static() {
    // Passing a constant array by slice materialises it into static data.
    let statements = vec![main_function(vec![var(
        "a",
        Some(array_type(int(2), name("i64"))),
        Some(array_literal(vec![int(5), int(6)])),
    )])];
    let statics = compile_single(statements).expect("compiles");
    let constant_entry = statics
        .iter()
        .find_map(|entry| match entry {
            RuntimeStatic::Constant(constant) => Some(constant),
            _ => None,
        })
        .expect("a static constant is emitted");
    assert_eq!(constant_entry.name, "constant_0");
    assert_eq!(constant_entry.alignment, 8);
    let mut expected = Vec::new();
    expected.extend_from_slice(&5u64.to_le_bytes());
    expected.extend_from_slice(&6u64.to_le_bytes());
    assert_eq!(constant_entry.data, expected);

    let main = find_function(&statics, "main_main");
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::ReferenceStatic { name, .. } if name == "constant_0"
    )));
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::CopyMemory { length: 16, .. }
    )));
}

#[test]
fn test_float_compare_and_not_equal_synthesis() {
    // main :: () { x: f64 = 1.0; b: bool = x != 2.0; }
    let statements = vec![main_function(vec![
        var("x", Some(name("f64")), Some(float(1.0))),
        var(
            "b",
            Some(name("bool")),
            Some(binary(BinaryOperator::NotEqual, name("x"), float(2.0))),
        ),
    ])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    let compare_position = main
        .instructions
        .iter()
        .position(|instruction| {
            matches!(
                instruction,
                Instruction::FloatComparison {
                    comparison: FloatComparisonOperation::Equal,
                    size: FloatSize::Size64,
                    ..
                }
            )
        })
        .expect("float compare emitted");
    // Inversion follows: compare-equal against zero.
    assert!(main.instructions[compare_position + 1..]
        .iter()
        .any(|instruction| matches!(
            instruction,
            Instruction::IntegerComparison {
                comparison: IntegerComparisonOperation::Equal,
                ..
            }
        )));
}

#[test]
fn test_missing_return_diagnoses() {
    let statements = vec![function(
        "f",
        Vec::new(),
        Some(name("i32")),
        vec![var("x", Some(name("i32")), Some(int(1)))],
    ), main_function(vec![expr_stmt(call(name("f"), Vec::new()))])];
    let error = compile_single(statements).expect_err("missing return");
    assert_eq!(error.kind, ErrorKind::Structural);
    assert!(error.message.contains("does not return a value"));
}

#[test]
fn test_duplicate_variable_in_same_block_diagnoses() {
    let statements = vec![main_function(vec![
        var("x", Some(name("i32")), Some(int(1))),
        var("x", Some(name("i32")), Some(int(2))),
    ])];
    let error = compile_single(statements).expect_err("duplicate variable");
    assert_eq!(error.kind, ErrorKind::Evaluation);
    assert!(error.message.contains("duplicate name 'x'"));
}

#[test]
fn test_shadowing_in_nested_block_is_allowed() {
    let statements = vec![main_function(vec![
        var("x", Some(name("i32")), Some(int(1))),
        if_stmt(boolean(true), vec![var("x", Some(name("i64")), Some(int(2)))]),
    ])];
    compile_single(statements).expect("shadowing across blocks is fine");
}

#[test]
fn test_condition_must_be_boolean() {
    let statements = vec![main_function(vec![if_stmt(int(1), Vec::new())])];
    let error = compile_single(statements).expect_err("non-boolean condition");
    assert!(error.message.contains("'bool'"));
}

#[test]
fn test_assignment_needs_an_lvalue() {
    let statements = vec![main_function(vec![assign(int(1), int(2))])];
    let error = compile_single(statements).expect_err("not assignable");
    assert!(error.message.contains("cannot assign"));
}

#[test]
fn test_bare_return_requires_void() {
    let statements = vec![
        function("f", Vec::new(), Some(name("i32")), vec![ret(None)]),
        main_function(vec![expr_stmt(call(name("f"), Vec::new()))]),
    ];
    let error = compile_single(statements).expect_err("bare return from i32 function");
    assert!(error.message.contains("expected a return value"));
}

#[test]
fn test_external_function_emits_signature_only() {
    let statements = vec![
        external_function("putchar", vec![parameter("c", name("i32"))], Some(name("i32"))),
        main_function(vec![expr_stmt(call(name("putchar"), vec![int(65)]))]),
    ];
    let statics = compile_single(statements).expect("compiles");
    let putchar = find_function(&statics, "putchar");
    assert!(putchar.is_external);
    assert!(putchar.instructions.is_empty());
    assert_eq!(putchar.parameters.len(), 1);

    let main = find_function(&statics, "main_main");
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::FunctionCall { name, .. } if name == "putchar"
    )));
}

#[test]
fn test_address_of_variable_has_pointer_type() {
    // main :: () { x: i64 = 1; p: *i64 = *x; }
    let statements = vec![main_function(vec![
        var("x", Some(name("i64")), Some(int(1))),
        var(
            "p",
            Some(unary(UnaryOperator::Pointer, name("i64"))),
            Some(unary(UnaryOperator::Pointer, name("x"))),
        ),
    ])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    // The pointer store writes the address register of x (register 0).
    assert!(main.instructions.iter().any(|instruction| matches!(
        instruction,
        Instruction::IntegerStore {
            size: RegisterSize::Size64,
            source: 0,
            ..
        }
    )));
}

#[test]
fn test_registers_are_not_reused_across_statements() {
    let statements = vec![main_function(vec![
        var("x", Some(name("i64")), Some(int(1))),
        var("y", Some(name("i64")), Some(int(2))),
    ])];
    let statics = compile_single(statements).expect("compiles");
    let main = find_function(&statics, "main_main");
    let mut destinations = Vec::new();
    for instruction in &main.instructions {
        match instruction {
            Instruction::AllocateLocal { destination, .. }
            | Instruction::IntegerConstant { destination, .. } => {
                destinations.push(*destination)
            }
            _ => {}
        }
    }
    let mut deduplicated = destinations.clone();
    deduplicated.dedup();
    assert_eq!(destinations, deduplicated);
    assert_eq!(destinations, vec![0, 1, 2, 3]);
}
