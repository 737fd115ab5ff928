#![allow(clippy::uninlined_format_args)]

//! Evaluation that re-enters the evaluator: DWARF procedure calls, entry
//! values resolved in the caller and variable values

mod common;

use common::{block, expr, init, sleb, test_cu, MockTarget};
use locus_dwarf::constants::*;
use locus_dwarf::core::{
    CallSiteParameter, CallSiteParameterKind, EvalConfig, ExprError, FrameRef, ModuleId,
};
use locus_dwarf::{DieType, ExprContext, LocationEvaluator, RunTimeEndian, Type, UnitOffset, Value};
use std::sync::Arc;

fn context(target: &MockTarget, config: EvalConfig) -> ExprContext<'_> {
    let mut ctx = ExprContext::new(target, ModuleId(0), 8, Arc::new(config));
    ctx.set_compilation_unit(Some(test_cu()));
    ctx
}

fn top(ctx: &ExprContext<'_>) -> i64 {
    ctx.fetch(0).unwrap().as_long().unwrap()
}

#[test]
fn test_dwarf_procedure_call() {
    init();
    let mut target = MockTarget::x86_64();
    target
        .procedures
        .insert(0x40, vec![DW_OP_lit4.0, DW_OP_plus.0]);
    target
        .procedures
        .insert(0x1234, vec![DW_OP_lit2.0, DW_OP_mul.0]);

    let mut ctx = context(&target, EvalConfig::default());
    ctx.eval(&[DW_OP_lit1.0, DW_OP_call2.0, 0x40, 0x00]).unwrap();
    assert_eq!(top(&ctx), 5);
    assert_eq!(ctx.recursion_depth(), 0);

    let mut ctx = context(&target, EvalConfig::default());
    ctx.eval(&[DW_OP_lit3.0, DW_OP_call4.0, 0x34, 0x12, 0x00, 0x00])
        .unwrap();
    assert_eq!(top(&ctx), 6);
}

#[test]
fn test_call_without_unit_fails() {
    init();
    let target = MockTarget::x86_64();
    let mut ctx = ExprContext::new(&target, ModuleId(0), 8, Arc::new(EvalConfig::default()));
    assert!(matches!(
        ctx.eval(&[DW_OP_call2.0, 0x40, 0x00]).unwrap_err(),
        ExprError::MissingCompilationUnit { .. }
    ));
}

#[test]
fn test_recursive_calls_hit_depth_limit() {
    init();
    let mut target = MockTarget::x86_64();
    target
        .procedures
        .insert(0x40, vec![DW_OP_call2.0, 0x40, 0x00]);
    target
        .procedures
        .insert(0x50, vec![DW_OP_call2.0, 0x60, 0x00]);
    target
        .procedures
        .insert(0x60, vec![DW_OP_call2.0, 0x50, 0x00]);

    for max in [1u32, 2, 16, 64] {
        let config = EvalConfig {
            max_recursion_depth: max,
            ..EvalConfig::default()
        };
        for start in [0x40u8, 0x50] {
            let mut ctx = context(&target, config.clone());
            let err = ctx.eval(&[DW_OP_call2.0, start, 0x00]).unwrap_err();
            assert_eq!(
                err,
                ExprError::LocationLoopDetected { depth: max + 1 },
                "max {} start 0x{:x}",
                max,
                start
            );
            assert_eq!(ctx.recursion_depth(), 0);
        }
    }
}

#[test]
fn test_loop_through_evaluator_is_an_error() {
    init();
    let mut target = MockTarget::x86_64();
    let frame = target.add_frame(1);
    target
        .procedures
        .insert(0x40, vec![DW_OP_call2.0, 0x40, 0x00]);

    let evaluator = LocationEvaluator::new(EvalConfig {
        max_recursion_depth: 32,
        ..EvalConfig::default()
    });
    let err = evaluator
        .evaluate_loc_desc(
            &target,
            &Type::int(8, true),
            Some(frame),
            &block(&[DW_OP_call2.0, 0x40, 0x00]),
            true,
        )
        .unwrap_err();
    assert_eq!(err, ExprError::LocationLoopDetected { depth: 33 });
}

/// Callee frame 1 called from frame 2; parameter in DWARF register 5
fn entry_value_target(value: &[u8]) -> (MockTarget, FrameRef, FrameRef) {
    let mut target = MockTarget::x86_64();
    let callee = target.add_frame(1);
    let caller = target.add_frame(2);
    target.set_caller(callee, caller);
    target.set_register(caller, 3, 0x100);
    target.set_register(callee, 3, 0x10);
    target.call_site_params.push((
        CallSiteParameterKind::DwarfReg(5),
        CallSiteParameter {
            value: Some(Arc::from(value)),
            data_value: Some(Arc::from(&[DW_OP_lit7.0][..])),
            cu: test_cu(),
        },
    ));
    (target, callee, caller)
}

fn read_long(target: &MockTarget, frame: FrameRef, code: &[u8]) -> i64 {
    LocationEvaluator::default()
        .evaluate_loc_desc(target, &Type::int(8, true), Some(frame), &block(code), true)
        .unwrap()
        .fetched(target)
        .unwrap()
        .as_long()
        .unwrap()
}

#[test]
fn test_entry_value_evaluates_in_caller() {
    init();
    let call_value = expr(&[&[DW_OP_breg3.0], &sleb(8)]);
    let (target, callee, _caller) = entry_value_target(&call_value);

    let code = [DW_OP_entry_value.0, 1, DW_OP_reg5.0, DW_OP_stack_value.0];
    assert_eq!(read_long(&target, callee, &code), 0x108);

    // Registers after the entry value come from the callee again
    let code = expr(&[
        &[DW_OP_entry_value.0, 1, DW_OP_reg5.0, DW_OP_breg3.0],
        &sleb(0),
        &[DW_OP_plus.0, DW_OP_stack_value.0],
    ]);
    assert_eq!(read_long(&target, callee, &code), 0x118);

    let code = [DW_OP_GNU_entry_value.0, 1, DW_OP_reg5.0, DW_OP_stack_value.0];
    assert_eq!(read_long(&target, callee, &code), 0x108);
}

#[test]
fn test_entry_value_of_dereferenced_register() {
    init();
    let (target, callee, _caller) = entry_value_target(&[DW_OP_lit0.0]);
    let code = [
        DW_OP_entry_value.0,
        3,
        DW_OP_breg5.0,
        0,
        DW_OP_deref.0,
        DW_OP_stack_value.0,
    ];
    assert_eq!(read_long(&target, callee, &code), 7);
}

#[test]
fn test_entry_value_block_must_name_register() {
    init();
    let (target, callee, _caller) = entry_value_target(&[DW_OP_lit0.0]);
    let mut ctx = context(&target, EvalConfig::default());
    ctx.set_frame(Some(callee));

    let err = ctx
        .eval(&[DW_OP_entry_value.0, 2, DW_OP_lit1.0, DW_OP_lit2.0])
        .unwrap_err();
    assert!(matches!(err, ExprError::MalformedOperand(_)));

    let err = ctx
        .eval(&[DW_OP_entry_value.0, 5, DW_OP_reg5.0])
        .unwrap_err();
    assert!(matches!(err, ExprError::MalformedOperand(_)));
}

#[test]
fn test_entry_value_without_caller() {
    init();
    let mut target = MockTarget::x86_64();
    let frame = target.add_frame(1);
    let code = [DW_OP_entry_value.0, 1, DW_OP_reg5.0, DW_OP_stack_value.0];

    let mut ctx = context(&target, EvalConfig::default());
    ctx.set_frame(Some(frame));
    assert!(matches!(
        ctx.eval(&code).unwrap_err(),
        ExprError::NoEntryValue(_)
    ));

    // The evaluator reports the variable as optimized out instead
    let value = LocationEvaluator::default()
        .evaluate_loc_desc(&target, &Type::int(8, true), Some(frame), &block(&code), true)
        .unwrap();
    assert!(value.entirely_optimized_out());

    let debug = LocationEvaluator::new(EvalConfig {
        entry_values_debug: true,
        ..EvalConfig::default()
    });
    let value = debug
        .evaluate_loc_desc(&target, &Type::int(8, true), Some(frame), &block(&code), true)
        .unwrap();
    assert!(value.entirely_optimized_out());
}

#[test]
fn test_entry_value_without_matching_call_site() {
    init();
    let (target, callee, _caller) = entry_value_target(&[DW_OP_lit0.0]);
    let mut ctx = context(&target, EvalConfig::default());
    ctx.set_frame(Some(callee));
    assert!(matches!(
        ctx.eval(&[DW_OP_entry_value.0, 1, DW_OP_reg6.0]).unwrap_err(),
        ExprError::NoEntryValue(_)
    ));
}

#[test]
fn test_failed_entry_value_restores_context() {
    init();
    let (target, callee, _caller) = entry_value_target(&[DW_OP_div.0]);
    let mut ctx = context(&target, EvalConfig::default());
    ctx.set_frame(Some(callee));

    let err = ctx
        .eval(&[DW_OP_entry_value.0, 1, DW_OP_reg5.0])
        .unwrap_err();
    assert!(matches!(err, ExprError::StackUnderflow { .. }));
    assert_eq!(ctx.frame(), Some(callee));
    assert_eq!(ctx.compilation_unit(), Some(&test_cu()));
    assert_eq!(ctx.recursion_depth(), 0);
}

#[test]
fn test_read_variable_at_entry() {
    init();
    let call_value = expr(&[&[DW_OP_breg3.0], &sleb(8)]);
    let (mut target, callee, _caller) = entry_value_target(&call_value);
    target.call_site_params.push((
        CallSiteParameterKind::FbOffset(-16),
        CallSiteParameter {
            value: Some(Arc::from(&[DW_OP_lit11.0][..])),
            data_value: None,
            cu: test_cu(),
        },
    ));
    let evaluator = LocationEvaluator::default();
    let ty = Type::int(8, true);

    // The caller's register 3 is 0x100; the callee's is 0x10
    let value = evaluator
        .read_variable_at_entry(&target, &ty, callee, &block(&[DW_OP_reg5.0]))
        .unwrap();
    assert_eq!(value.as_long().unwrap(), 0x108);

    let value = evaluator
        .read_variable_at_entry(&target, &ty, callee, &block(&[DW_OP_fbreg.0, 0x70]))
        .unwrap();
    assert_eq!(value.as_long().unwrap(), 11);

    let value = evaluator
        .value_of_reg_entry(&target, &ty, callee, CallSiteParameterKind::DwarfReg(5))
        .unwrap();
    assert_eq!(value.as_long().unwrap(), 0x108);

    let value = evaluator
        .read_variable_at_entry(&target, &ty, callee, &block(&[]))
        .unwrap();
    assert!(value.entirely_optimized_out());
}

#[test]
fn test_read_variable_at_entry_needs_simple_location() {
    init();
    let (target, callee, caller) = entry_value_target(&[DW_OP_lit0.0]);
    let evaluator = LocationEvaluator::default();
    let ty = Type::int(8, true);

    let code = expr(&[&[DW_OP_breg5.0], &sleb(8)]);
    assert!(matches!(
        evaluator
            .read_variable_at_entry(&target, &ty, callee, &block(&code))
            .unwrap_err(),
        ExprError::NoEntryValue(_)
    ));

    // No call site recorded for register 6
    assert!(matches!(
        evaluator
            .read_variable_at_entry(&target, &ty, callee, &block(&[DW_OP_reg6.0]))
            .unwrap_err(),
        ExprError::NoEntryValue(_)
    ));

    // The outermost frame has no caller to ask
    assert!(matches!(
        evaluator
            .read_variable_at_entry(&target, &ty, caller, &block(&[DW_OP_reg5.0]))
            .unwrap_err(),
        ExprError::NoEntryValue(_)
    ));
}

#[test]
fn test_parameter_ref() {
    init();
    let mut target = MockTarget::x86_64();
    let callee = target.add_frame(1);
    let caller = target.add_frame(2);
    target.set_caller(callee, caller);
    target.call_site_params.push((
        CallSiteParameterKind::ParamOffset(UnitOffset(0x60)),
        CallSiteParameter {
            value: Some(Arc::from(&[DW_OP_lit9.0][..])),
            data_value: None,
            cu: test_cu(),
        },
    ));

    let code = [
        DW_OP_GNU_parameter_ref.0,
        0x60,
        0,
        0,
        0,
        DW_OP_stack_value.0,
    ];
    assert_eq!(read_long(&target, callee, &code), 9);
}

fn variable_value_op(die: u32) -> Vec<u8> {
    expr(&[&[0xfd], &die.to_le_bytes(), &[DW_OP_stack_value.0]])
}

#[test]
fn test_variable_value_by_name() {
    init();
    let mut target = MockTarget::x86_64();
    let frame = target.add_frame(1);
    target.die_types.insert(
        0x80,
        DieType {
            ty: Type::int(4, true),
            name: Some("counter".to_string()),
        },
    );
    target.variables.insert(
        "counter".to_string(),
        Value::from_longest(Type::int(4, true), 77, RunTimeEndian::Little),
    );
    assert_eq!(read_long(&target, frame, &variable_value_op(0x80)), 77);
}

#[test]
fn test_variable_value_from_die_location() {
    init();
    let mut target = MockTarget::x86_64();
    let frame = target.add_frame(1);
    target.die_types.insert(
        0x90,
        DieType {
            ty: Type::int(4, true),
            name: Some("hidden".to_string()),
        },
    );
    target
        .die_locations
        .insert(0x90, vec![DW_OP_const1u.0, 33, DW_OP_stack_value.0]);
    assert_eq!(read_long(&target, frame, &variable_value_op(0x90)), 33);
}

#[test]
fn test_self_referential_variable_value_hits_depth_limit() {
    init();
    let mut target = MockTarget::x86_64();
    let frame = target.add_frame(1);
    target.die_types.insert(
        0x90,
        DieType {
            ty: Type::int(4, true),
            name: None,
        },
    );
    target.die_locations.insert(0x90, variable_value_op(0x90));

    let evaluator = LocationEvaluator::new(EvalConfig {
        max_recursion_depth: 16,
        ..EvalConfig::default()
    });
    let err = evaluator
        .evaluate_loc_desc(
            &target,
            &Type::int(8, true),
            Some(frame),
            &block(&variable_value_op(0x90)),
            true,
        )
        .unwrap_err();
    assert_eq!(err, ExprError::LocationLoopDetected { depth: 17 });
}

#[test]
fn test_variable_value_rejects_bad_dies() {
    init();
    let mut target = MockTarget::x86_64();
    let frame = target.add_frame(1);
    target.die_types.insert(
        0xa0,
        DieType {
            ty: Type::structure("s", 8),
            name: Some("s".to_string()),
        },
    );
    let mut ctx = context(&target, EvalConfig::default());
    ctx.set_frame(Some(frame));

    assert!(matches!(
        ctx.eval(&variable_value_op(0xa0)).unwrap_err(),
        ExprError::TypeError(_)
    ));
    assert!(matches!(
        ctx.eval(&variable_value_op(0xb0)).unwrap_err(),
        ExprError::MalformedOperand(_)
    ));
}
