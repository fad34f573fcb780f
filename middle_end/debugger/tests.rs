// end-to-end scenarios through the debugger façade.

use pretty_assertions::assert_eq;

use super::*;

fn debugger(code: &str, samples: usize) -> Debugger {
    let validated = crate::front_end::ast::validate::validate(crate::front_end::parse(code).unwrap())
        .unwrap();
    let (program, debug_info) = crate::front_end::lower(&validated);
    let program = program.validate().unwrap();
    Debugger::with_seed(program, debug_info, samples, 11)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

fn value_probability(values: &Map<String, Map<Value, f64>>, var: &str, value: Value) -> f64 {
    *values
        .get(var)
        .unwrap_or_else(|| panic!("no values reported for `{var}`"))
        .get(&value)
        .unwrap_or_else(|| panic!("no probability reported for `{var}` = {value}"))
}

#[test]
fn constant_program_runs_to_certainty() {
    let mut dbg = debugger("int x = 42;", 100);
    dbg.run_until_end().unwrap();
    assert!(dbg.is_terminated());

    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "x", Value::Int(42)), 1.0);
    assert_close(dbg.approximation_error(), 0.0);
    assert_close(dbg.reaching_probability(), 1.0);
}

#[test]
fn fair_coin_is_exact() {
    let mut dbg = debugger("int x = discrete({1: 0.5, 2: 0.5});", 10000);
    dbg.run_until_end().unwrap();
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "x", Value::Int(1)), 0.5);
    assert_close(value_probability(&values, "x", Value::Int(2)), 0.5);
}

#[test]
fn conditional_assignment_is_exact() {
    let mut dbg = debugger(
        "int x = discrete({1: 0.5, 2: 0.5});
         int y = 10;
         if x == 2 { y = 20; }",
        10000,
    );
    dbg.run_until_end().unwrap();
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "y", Value::Int(10)), 0.5);
    assert_close(value_probability(&values, "y", Value::Int(20)), 0.5);
}

#[test]
fn wp_matches_sampling() {
    let mut dbg = debugger(
        "int x = discrete({1: 0.5, 2: 0.5});
         int y = 10;
         if x == 2 { y = 20; }",
        10000,
    );
    dbg.run_until_end().unwrap();
    let frequency = dbg
        .samples()
        .iter()
        .filter(|s| s["y"] == Value::Int(20))
        .count() as f64
        / 10000.0;
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    let exact = value_probability(&values, "y", Value::Int(20));
    // 3 sigma for a fair coin over 10⁴ samples
    assert!((frequency - exact).abs() < 0.015);
}

#[test]
fn failing_observe_leaves_no_samples() {
    let mut dbg = debugger(
        "int x = 1;
         observe(x == 2);",
        10000,
    );
    dbg.run_until_end().unwrap();
    assert!(dbg.is_terminated());
    assert!(dbg.samples().is_empty());
    assert!(dbg.variable_values(ApproximationErrorHandling::Drop).is_empty());
    assert_close(dbg.reaching_probability(), 0.0);
}

#[test]
fn deterministic_loop_is_exact() {
    let mut dbg = debugger(
        "int x = 3;
         while 1 < x { x = x - 1; }",
        10000,
    );
    dbg.run_until_end().unwrap();
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "x", Value::Int(1)), 1.0);
    assert_close(dbg.approximation_error(), 0.0);
}

#[test]
fn cowboy_duel_is_symmetric() {
    // the duel ends with either cowboy equally likely, independent of the
    // starting distribution
    let mut dbg = debugger(
        "int turn = discrete({1: 0.5, 2: 0.5});
         bool alive = true;
         while alive {
           if discrete({0: 0.5, 1: 0.5}) == 0 {
             if turn == 1 { turn = 2; } else { turn = 1; }
           } else {
             alive = false;
           }
         }",
        10,
    );
    dbg.run_until_end().unwrap();
    let values = dbg.variable_values(ApproximationErrorHandling::Distribute);
    let p1 = value_probability(&values, "turn", Value::Int(1));
    let p2 = value_probability(&values, "turn", Value::Int(2));
    assert_close(p1, p2);
    assert_close(p1 + p2, 1.0);
    assert_close(value_probability(&values, "alive", Value::Bool(false)), 1.0);
}

#[test]
fn stepping_stops_at_every_statement() {
    let mut dbg = debugger(
        "int x = 1;
         int y = 2;
         int z = 3;",
        10,
    );
    let first = dbg.source_location().unwrap();
    dbg.step_over().unwrap();
    let second = dbg.source_location().unwrap();
    assert!(first.start < second.start);
    dbg.step_over().unwrap();
    dbg.step_over().unwrap();
    assert!(dbg.is_terminated());
    assert_eq!(dbg.step_over(), Err(DebuggerError::AlreadyTerminated));
}

#[test]
fn step_into_focuses_on_one_arm() {
    let mut dbg = debugger(
        "int x = discrete({1: 0.5, 2: 0.5});
         int y = 10;
         if x == 2 { y = 20; }
         int z = 1;",
        10000,
    );
    // step onto the if
    dbg.step_over().unwrap();
    dbg.step_over().unwrap();
    dbg.save_state();

    dbg.step_into(true).unwrap();
    for sample in dbg.samples() {
        assert_eq!(sample["x"], Value::Int(2));
    }
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    // conditional on the taken branch, x is certainly 2
    assert_close(value_probability(&values, "x", Value::Int(2)), 1.0);
    // half of the runs were deliberately dropped
    assert_close(dbg.reaching_probability(), 0.5);

    // back at the branch, the other side works the same way
    dbg.restore_state().unwrap();
    dbg.step_into(false).unwrap();
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "x", Value::Int(1)), 1.0);
}

#[test]
fn step_into_an_impossible_branch_fails_recoverably() {
    let mut dbg = debugger(
        "int x = 1;
         if x == 2 { x = 3; }",
        100,
    );
    dbg.step_over().unwrap();
    let before = dbg.state().clone();
    assert_eq!(dbg.step_into(true), Err(DebuggerError::InfeasibleBranch));
    // the pre-step state is kept
    assert_eq!(dbg.state(), &before);
    dbg.step_into(false).unwrap();
}

#[test]
fn step_over_a_branch_keeps_both_arms() {
    let mut dbg = debugger(
        "int x = discrete({1: 0.5, 2: 0.5});
         int y = 10;
         if x == 2 { y = 20; }
         int z = 1;",
        10000,
    );
    dbg.step_over().unwrap();
    dbg.step_over().unwrap();
    dbg.step_over().unwrap(); // over the whole if/else
    assert!(!dbg.is_terminated());

    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "y", Value::Int(10)), 0.5);
    assert_close(value_probability(&values, "y", Value::Int(20)), 0.5);
    assert_close(dbg.reaching_probability(), 1.0);
}

#[test]
fn run_until_end_after_focusing_stays_conditioned() {
    let mut dbg = debugger(
        "int x = discrete({1: 0.5, 2: 0.5});
         int y = 10;
         if x == 2 { y = 20; }
         int z = 1;",
        10000,
    );
    dbg.step_over().unwrap();
    dbg.step_over().unwrap();
    dbg.step_into(true).unwrap();
    dbg.run_until_end().unwrap();

    // the samples stay filtered to the taken arm, and WP agrees with them
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "y", Value::Int(20)), 1.0);
    assert_close(value_probability(&values, "x", Value::Int(2)), 1.0);
}

#[test]
fn save_restore_discipline() {
    let mut dbg = debugger("int x = 1; int y = 2;", 10);
    // nothing was saved yet: only the initial snapshot is on the stack
    assert_eq!(dbg.restore_state(), Err(DebuggerError::NoSavedState));

    dbg.save_state();
    let saved_position = dbg.state().position.clone();
    dbg.step_over().unwrap();
    assert_ne!(dbg.state().position, saved_position);

    dbg.restore_state().unwrap();
    assert_eq!(dbg.state().position, saved_position);
    // restore pops: the save is consumed
    assert_eq!(dbg.restore_state(), Err(DebuggerError::NoSavedState));
}

#[test]
fn jump_to_state_clears_the_save_stack() {
    let mut dbg = debugger("int x = 1; int y = 2;", 10);
    dbg.save_state();
    let target = dbg.state().clone();
    dbg.step_over().unwrap();
    dbg.jump_to_state(target.clone());
    assert_eq!(dbg.state(), &target);
    assert_eq!(dbg.restore_state(), Err(DebuggerError::NoSavedState));
}

#[test]
fn slicing_reports_the_hideable_complement() {
    let mut dbg = debugger(
        "int x = discrete({1: 0.5, 2: 0.5});
         int y = 5;
         int z = x + 1;",
        100,
    );
    dbg.run_until_end().unwrap();

    let hideable = dbg.slice("z").unwrap();
    // the y declaration can be hidden without losing information about z
    let y_range = SourceRange::new(
        "int x = discrete({1: 0.5, 2: 0.5});\n         ".len(),
        "int x = discrete({1: 0.5, 2: 0.5});\n         int y = 5;".len(),
    );
    assert!(hideable.contains(&y_range), "hideable: {hideable:?}");

    let unknown = dbg.slice("nope");
    assert_eq!(
        unknown,
        Err(DebuggerError::UnknownVariable("nope".to_string()))
    );
}

#[test]
fn shadowed_variables_are_disambiguated() {
    let mut dbg = debugger(
        "int x = 1;
         {
           int x = 2;
           int probe = 0;
         }
         int tail = 3;",
        10,
    );
    // step onto `int probe = 0;`, where both xs are in scope
    dbg.step_over().unwrap();
    dbg.step_over().unwrap();
    let values = dbg.variable_values(ApproximationErrorHandling::Drop);
    assert_close(value_probability(&values, "x", Value::Int(1)), 1.0);
    assert_close(value_probability(&values, "x#2", Value::Int(2)), 1.0);
}

#[test]
fn clones_snapshot_the_debugger() {
    let mut dbg = debugger("int x = discrete({1: 0.5, 2: 0.5});", 1000);
    let mut snapshot = dbg.clone();
    dbg.run_until_end().unwrap();
    // the snapshot still sits at the first statement and can proceed on its
    // own, with its own cache
    assert!(!snapshot.is_terminated());
    snapshot.run_until_end().unwrap();
    assert_eq!(dbg.samples(), snapshot.samples());
}
