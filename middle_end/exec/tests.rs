// forward executor behavior over small textual IR programs.

use pretty_assertions::assert_eq;

use rand::SeedableRng;

use super::*;
use crate::commons::Valid;
use crate::middle_end::ir::{bb_id, var_id, Program, Type};

fn context(text: &str) -> ProgramContext {
    let program: Valid<Program> = text.parse::<Program>().unwrap().validate().unwrap();
    ProgramContext::new(program, DebugInfo::default())
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

const LOOP: &str = r"
entry:
  i:int = $copy 0
  $jump head

head:
  i2:int = $phi(entry: i:int, body: i3:int)
  c:bool = $cmp lt i2:int, 3
  $branch c:bool body exit

body:
  i3:int = $arith add i2:int, 1
  $jump head

exit:
  $ret
";

#[test]
fn straight_line_execution_updates_every_sample() {
    let ctx = context(
        r"
entry:
  x:int = $copy 41
  y:int = $arith add x:int, 1
  c:bool = $cmp eq y:int, 42
  $ret
",
    );
    let mut rng = rng();
    let state = ExecutionState::initial(&ctx, 3);
    let done = run_until_end(&ctx, state, &mut rng).unwrap();

    assert_eq!(done.position, ctx.program.return_position());
    assert_eq!(done.samples.len(), 3);
    for sample in &done.samples {
        assert_eq!(sample.get(&var_id("y", Type::Int)), Value::Int(42));
        assert_eq!(sample.get(&var_id("c", Type::Bool)), Value::Bool(true));
    }
    // no branches were taken, so the history stays empty
    assert_eq!(done.branching_histories, vec![vec![]]);
}

#[test]
fn discrete_draws_are_deterministic_per_seed() {
    let ctx = context(
        r"
entry:
  x:int = $discrete {1: 0.5, 2: 0.5}
  $ret
",
    );
    let run = |seed: u64| {
        let mut rng = StdRng::seed_from_u64(seed);
        let state = ExecutionState::initial(&ctx, 1000);
        run_until_end(&ctx, state, &mut rng).unwrap()
    };
    let a = run(3);
    let b = run(3);
    assert_eq!(a, b);

    // both sides of a fair coin appear in a population of this size
    let ones = a
        .samples
        .iter()
        .filter(|s| s.get(&var_id("x", Type::Int)) == Value::Int(1))
        .count();
    assert!(ones > 400 && ones < 600, "got {ones} ones");
}

#[test]
fn observe_filters_and_empties() {
    let ctx = context(
        r"
entry:
  x:int = $discrete {1: 0.5, 2: 0.5}
  c:bool = $cmp eq x:int, 1
  $observe c:bool
  $ret
",
    );
    let mut rng1 = rng();
    let state = ExecutionState::initial(&ctx, 100);
    let done = run_until_end(&ctx, state, &mut rng1).unwrap();
    assert!(!done.samples.is_empty());
    assert!(done.samples.len() < 100);
    for sample in &done.samples {
        assert_eq!(sample.get(&var_id("x", Type::Int)), Value::Int(1));
    }

    // a condition no sample satisfies drops the whole execution branch
    let ctx = context(
        r"
entry:
  x:int = $copy 1
  c:bool = $cmp eq x:int, 2
  $observe c:bool
  $ret
",
    );
    let mut rng2 = rng();
    let state = ExecutionState::initial(&ctx, 100);
    assert_eq!(run_until_end(&ctx, state, &mut rng2), None);
}

#[test]
fn branch_splits_record_choices_and_merge_concatenates() {
    let ctx = context(
        r"
entry:
  x:int = $discrete {1: 0.5, 2: 0.5}
  c:bool = $cmp eq x:int, 1
  $branch c:bool bb1 bb2

bb1:
  y:int = $copy 10
  $jump bb3

bb2:
  y2:int = $copy 20
  $jump bb3

bb3:
  y3:int = $phi(bb1: y:int, bb2: y2:int)
  $ret
",
    );
    let mut rng = rng();
    let state = ExecutionState::initial(&ctx, 100);
    let done = run_until_end(&ctx, state, &mut rng).unwrap();

    assert_eq!(done.samples.len(), 100);
    // one history per executed path, with the taken edge recorded
    let histories: Set<BranchingHistory> = done.branching_histories.iter().cloned().collect();
    assert_eq!(
        histories,
        Set::from([
            vec![BranchingChoice::Choice {
                from: bb_id("entry"),
                to: bb_id("bb1"),
            }],
            vec![BranchingChoice::Choice {
                from: bb_id("entry"),
                to: bb_id("bb2"),
            }],
        ])
    );
    // the phi selected the arm value per sample
    for sample in &done.samples {
        let x = sample.get(&var_id("x", Type::Int)).as_int();
        let y = sample.get(&var_id("y3", Type::Int)).as_int();
        assert_eq!(y, if x == 1 { 10 } else { 20 });
    }
}

#[test]
fn loop_unrolls_count_body_entries() {
    let ctx = context(LOOP);
    let mut rng = rng();
    let state = ExecutionState::initial(&ctx, 5);
    assert_eq!(
        state.loop_unrolls,
        Map::from([((bb_id("head"), bb_id("body")), Set::from([0]))])
    );

    let done = run_until_end(&ctx, state, &mut rng).unwrap();
    // every sample iterates exactly three times
    assert_eq!(
        done.loop_unrolls,
        Map::from([((bb_id("head"), bb_id("body")), Set::from([3]))])
    );
    for sample in &done.samples {
        assert_eq!(sample.get(&var_id("i2", Type::Int)), Value::Int(3));
    }
}

#[test]
fn run_until_position_stops_at_the_requested_position() {
    let ctx = context(LOOP);
    let mut rng = rng();
    let state = ExecutionState::initial(&ctx, 5);
    // stop at the header's first non-phi instruction: the first visit has
    // seen no body entry yet
    let stop = ctx.first_non_phi_position(&bb_id("head"));
    let at_head = run_until_position(&ctx, state, &Set::from([stop.clone()]), &mut rng).unwrap();
    assert_eq!(at_head.position, stop);
    assert_eq!(
        at_head.loop_unrolls[&(bb_id("head"), bb_id("body"))],
        Set::from([0])
    );

    // stepping once from the stop makes progress instead of standing still
    let again =
        run_until_position(&ctx, at_head, &Set::from([stop.clone()]), &mut rng).unwrap();
    assert_eq!(again.position, stop);
    assert_eq!(
        again.loop_unrolls[&(bb_id("head"), bb_id("body"))],
        Set::from([1])
    );
}

#[test]
fn merge_unions_unrolls_and_requires_equal_positions() {
    let ctx = context(LOOP);
    let state = ExecutionState::initial(&ctx, 2);
    let mut a = state.clone();
    let mut b = state;
    a.loop_unrolls
        .insert((bb_id("head"), bb_id("body")), Set::from([1]));
    b.loop_unrolls
        .insert((bb_id("head"), bb_id("body")), Set::from([2]));
    b.samples = vec![];

    let merged = merge(vec![a, b]);
    assert_eq!(merged.samples.len(), 2);
    assert_eq!(
        merged.loop_unrolls[&(bb_id("head"), bb_id("body"))],
        Set::from([1, 2])
    );
    assert_eq!(merged.branching_histories.len(), 2);
}

#[test]
#[should_panic(expected = "positions differ")]
fn merge_rejects_position_mismatches() {
    let ctx = context(LOOP);
    let a = ExecutionState::initial(&ctx, 1);
    let mut b = ExecutionState::initial(&ctx, 1);
    b.position = (bb_id("head"), 1);
    merge(vec![a, b]);
}

#[test]
#[should_panic(expected = "already terminated")]
fn stepping_from_the_return_terminal_panics() {
    let ctx = context(LOOP);
    let mut rng = rng();
    let state = ExecutionState::initial(&ctx, 1);
    let done = run_until_end(&ctx, state, &mut rng).unwrap();
    execute_next_instruction(&ctx, &done, &mut rng);
}
