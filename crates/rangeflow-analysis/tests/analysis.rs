//! End-to-end tests: whole programs through the driver, ranges read back
//! from the published value metadata.

use rangeflow_analysis::{
    AnalysisConfig, AnalysisError, ExecutionMode, RangeAnalysis, SolverStrategy,
};
use rangeflow_core::ir::{
    BinaryOp, FunctionBuilder, FunctionId, Predicate, Program, UnaryOp, ValueId,
};
use rangeflow_core::range::Range;

fn run(program: &mut Program) -> rangeflow_analysis::AnalysisReport {
    RangeAnalysis::new(AnalysisConfig::default())
        .run(program)
        .expect("analysis should succeed")
}

fn published(program: &Program, fid: FunctionId, vid: ValueId) -> Range {
    program
        .function(fid)
        .unwrap()
        .value(vid)
        .unwrap()
        .range
        .expect("range should be published")
}

/// `for (i = 0; i < 100; i++)` as eSSA.
fn guarded_loop() -> (Program, FunctionId, [ValueId; 3]) {
    let mut b = FunctionBuilder::new("counted_loop");
    let zero = b.literal(8, true, 0);
    let hundred = b.literal(8, true, 100);
    let one = b.literal(8, true, 1);
    let i = b.value(8, true);
    let c = b.value(1, false);
    let i1 = b.value(8, true);
    let i2 = b.value(8, true);
    b.phi(i, [zero, i2]);
    b.cmp(Predicate::Slt, c, i, hundred);
    b.sigma(i1, i, c, true);
    b.binary(BinaryOp::Add, i2, i1, one);
    b.ret(Some(i1));

    let mut program = Program::new();
    let fid = program.add_function(b.finish());
    (program, fid, [i, i1, i2])
}

#[test]
fn guarded_loop_infers_exact_trip_range() {
    let (mut program, fid, [i, i1, i2]) = guarded_loop();
    let report = run(&mut program);

    assert_eq!(published(&program, fid, i), Range::new(8, 0, 100));
    assert_eq!(published(&program, fid, i1), Range::new(8, 0, 99));
    assert_eq!(published(&program, fid, i2), Range::new(8, 1, 100));
    assert_eq!(report.stats.collapsed, 0);
}

#[test]
fn unbounded_loop_terminates_with_sound_full_range() {
    let mut b = FunctionBuilder::new("spin");
    let zero = b.literal(8, true, 0);
    let one = b.literal(8, true, 1);
    let i = b.value(8, true);
    let i2 = b.value(8, true);
    b.phi(i, [zero, i2]);
    b.binary(BinaryOp::Add, i2, i, one);

    let mut program = Program::new();
    let fid = program.add_function(b.finish());
    let report = run(&mut program);

    // The counter wraps, so every 8-bit value is reachable; the solver must
    // discover that in a handful of widening steps, not 256 iterations.
    assert!(published(&program, fid, i).is_full_set());
    assert!(report.stats.widening_steps < 64);
}

#[test]
fn interprocedural_constant_flow() {
    let mut program = Program::new();

    let mut inc = FunctionBuilder::new("inc");
    let p = inc.param(8, true);
    let one = inc.literal(8, true, 1);
    let r = inc.value(8, true);
    inc.binary(BinaryOp::Add, r, p, one).ret(Some(r));
    let inc_id = program.add_function(inc.finish());

    let mut main = FunctionBuilder::new("main");
    let five = main.literal(8, true, 5);
    let nine = main.literal(8, true, 9);
    let r1 = main.value(8, true);
    let r2 = main.value(8, true);
    main.call(Some(r1), inc_id, [five]);
    main.call(Some(r2), inc_id, [nine]);
    let main_id = program.add_function(main.finish());

    run(&mut program);

    // The parameter merges every call site; results see the merged return.
    assert_eq!(published(&program, inc_id, p), Range::new(8, 5, 9));
    assert_eq!(published(&program, inc_id, r), Range::new(8, 6, 10));
    assert_eq!(published(&program, main_id, r1), Range::new(8, 6, 10));
    assert_eq!(published(&program, main_id, r2), Range::new(8, 6, 10));
}

#[test]
fn local_mode_treats_parameters_as_unconstrained() {
    let mut program = Program::new();

    let mut inc = FunctionBuilder::new("inc");
    let p = inc.param(8, true);
    let one = inc.literal(8, true, 1);
    let r = inc.value(8, true);
    inc.binary(BinaryOp::Add, r, p, one).ret(Some(r));
    let inc_id = program.add_function(inc.finish());

    let mut main = FunctionBuilder::new("main");
    let five = main.literal(8, true, 5);
    let r1 = main.value(8, true);
    main.call(Some(r1), inc_id, [five]);
    let main_id = program.add_function(main.finish());

    let mut analysis = RangeAnalysis::new(AnalysisConfig {
        strategy: SolverStrategy::Cousot,
        mode: ExecutionMode::Local,
    });
    analysis.run(&mut program).unwrap();

    assert!(published(&program, inc_id, p).is_full_set());
    assert!(published(&program, main_id, r1).is_full_set());
}

#[test]
fn recursive_countdown_reaches_interprocedural_fixed_point() {
    // f(n) = n > 0 ? f(n - 1) : 0, called from main as f(100).
    let mut program = Program::new();
    let f_id = program.next_function_id();

    let mut f = FunctionBuilder::new("countdown");
    let n = f.param(8, true);
    let zero = f.literal(8, true, 0);
    let one = f.literal(8, true, 1);
    let c = f.value(1, false);
    let n1 = f.value(8, true);
    let n2 = f.value(8, true);
    let r = f.value(8, true);
    f.cmp(Predicate::Sgt, c, n, zero);
    f.sigma(n1, n, c, true);
    f.binary(BinaryOp::Sub, n2, n1, one);
    f.call(Some(r), f_id, [n2]);
    f.ret(Some(r));
    f.ret(Some(zero));
    assert_eq!(program.add_function(f.finish()), f_id);

    let mut main = FunctionBuilder::new("main");
    let hundred = main.literal(8, true, 100);
    let res = main.value(8, true);
    main.call(Some(res), f_id, [hundred]);
    let main_id = program.add_function(main.finish());

    let report = run(&mut program);

    // The recursive cycle runs through the call graph; the argument range
    // still converges to everything the countdown actually visits.
    assert_eq!(report.recursion_groups, vec![vec![f_id]]);
    assert_eq!(published(&program, f_id, n), Range::new(8, 0, 100));
    assert_eq!(published(&program, f_id, n1), Range::new(8, 1, 100));
    assert_eq!(published(&program, f_id, n2), Range::new(8, 0, 99));
    // Every returned value is either the base case or another return.
    assert!(published(&program, main_id, res).contains_signed(0));
}

#[test]
fn width_casts_flow_through() {
    let mut b = FunctionBuilder::new("casts");
    let x = b.param(16, true);
    let k = b.literal(16, true, 1000);
    let c = b.value(1, false);
    let x1 = b.value(16, true);
    let narrow = b.value(8, true);
    let wide = b.value(32, true);
    b.cmp(Predicate::Slt, c, x, k);
    b.sigma(x1, x, c, true);
    b.unary(UnaryOp::Trunc, narrow, x1);
    b.unary(UnaryOp::SignExtend, wide, x1);

    let mut program = Program::new();
    let fid = program.add_function(b.finish());
    run(&mut program);

    assert_eq!(published(&program, fid, x1), Range::new(16, -32768, 999));
    // 999 does not fit 8 bits; truncation must give up.
    assert!(published(&program, fid, narrow).is_full_set());
    assert_eq!(published(&program, fid, wide), Range::new(32, -32768, 999));
}

#[test]
fn strategies_agree_on_soundness() {
    for strategy in [SolverStrategy::Cousot, SolverStrategy::Crop] {
        let (mut program, fid, [i, i1, _]) = guarded_loop();
        RangeAnalysis::new(AnalysisConfig {
            strategy,
            mode: ExecutionMode::Interprocedural,
        })
        .run(&mut program)
        .unwrap();

        let i_range = published(&program, fid, i);
        let i1_range = published(&program, fid, i1);
        for v in 0..=100 {
            assert!(i_range.contains_signed(v), "{strategy:?} lost {v}");
        }
        // The guard itself holds under both strategies.
        assert!(i1_range.signed_max() <= 99);
    }
}

#[test]
fn rerun_on_unchanged_ir_is_idempotent() {
    let (mut program, fid, [i, i1, i2]) = guarded_loop();
    let mut analysis = RangeAnalysis::new(AnalysisConfig::default());

    let first = analysis.run(&mut program).unwrap();
    assert!(first.changed.contains(&fid));
    let snapshot = program.clone();

    let second = analysis.run(&mut program).unwrap();
    assert!(second.changed.is_empty());
    assert_eq!(program, snapshot);
    assert_eq!(second.versions, first.versions);
    for v in [i, i1, i2] {
        assert_eq!(published(&program, fid, v), published(&snapshot, fid, v));
    }
}

#[test]
fn changed_ir_bumps_version_and_changed_set() {
    let (mut program, fid, [i, ..]) = guarded_loop();
    let mut analysis = RangeAnalysis::new(AnalysisConfig::default());
    let first = analysis.run(&mut program).unwrap();
    assert_eq!(first.versions.get(&fid), Some(&1));

    // Tighten the loop guard from 100 to 50 and re-run.
    let func = program.functions.get_mut(&fid).unwrap();
    let guard = func
        .values
        .values_mut()
        .find(|info| info.literal == Some(100))
        .unwrap();
    guard.literal = Some(50);

    let second = analysis.run(&mut program).unwrap();
    assert!(second.changed.contains(&fid));
    assert_eq!(second.versions.get(&fid), Some(&2));
    assert_eq!(published(&program, fid, i), Range::new(8, 0, 50));
}

#[test]
fn malformed_ir_fails_without_publishing() {
    let mut b = FunctionBuilder::new("bad");
    let a = b.value(8, true);
    let wide = b.literal(16, true, 1);
    let d = b.value(8, true);
    b.binary(BinaryOp::Add, d, a, wide);

    let mut program = Program::new();
    let fid = program.add_function(b.finish());
    let err = RangeAnalysis::new(AnalysisConfig::default())
        .run(&mut program)
        .unwrap_err();

    assert!(matches!(err, AnalysisError::WidthMismatch { .. }));
    let func = program.function(fid).unwrap();
    assert!(func.values.values().all(|info| info.range.is_none()));
}

#[test]
fn report_serializes_for_downstream_consumers() {
    let (mut program, _, _) = guarded_loop();
    let report = run(&mut program);
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"changed\""));
    assert!(json.contains("\"widening_steps\""));
}
