// the outline mirrors the structure of the executed program.

use pretty_assertions::assert_eq;

use rand::SeedableRng;

use super::*;
use crate::front_end::{ast::validate::validate, lower, parse};
use rand::rngs::StdRng;

fn outline_of(code: &str, samples: usize) -> (Outline, Option<ExecutionState>) {
    let validated = validate(parse(code).unwrap()).unwrap();
    let (program, debug_info) = lower(&validated);
    let program = program.validate().unwrap();
    let ctx = ProgramContext::new(program, debug_info);
    let state = ExecutionState::initial(&ctx, samples);
    let mut rng = StdRng::seed_from_u64(5);
    generate_outline(&ctx, state, &mut rng)
}

#[test]
fn straight_line_outline_lists_every_statement() {
    let (outline, fin) = outline_of("int x = 1; int y = 2;", 4);
    assert!(fin.is_some());
    assert_eq!(outline.entries.len(), 3);
    assert!(matches!(outline.entries[0], OutlineEntry::Instruction(_)));
    assert!(matches!(outline.entries[1], OutlineEntry::Instruction(_)));
    assert!(matches!(outline.entries[2], OutlineEntry::End(_)));
}

#[test]
fn branches_and_loops_nest() {
    let (outline, _) = outline_of(
        "int x = discrete({1: 0.5, 2: 0.5});
         if x == 1 { x = 3; }
         while 0 < x { x = x - 1; }",
        64,
    );
    assert_eq!(outline.entries.len(), 4);

    match &outline.entries[1] {
        OutlineEntry::Branch {
            true_branch,
            false_branch,
            ..
        } => {
            // both sides received samples; the then-arm holds one statement,
            // the empty else-arm is present but holds none
            let tt = true_branch.as_ref().expect("the then arm has samples");
            assert_eq!(tt.entries.len(), 1);
            let ff = false_branch.as_ref().expect("the else arm has samples");
            assert!(ff.entries.is_empty());
        }
        other => panic!("expected a branch entry, got {other:?}"),
    }

    match &outline.entries[2] {
        OutlineEntry::Loop {
            iterations,
            exit_states,
            ..
        } => {
            // x is 2 or 3 entering the loop, so it runs three iterations
            assert_eq!(iterations.len(), 3);
            assert_eq!(exit_states.len(), 4);
            // nobody exits before the loop ran twice
            assert!(exit_states[0].is_none());
            assert!(exit_states[1].is_none());
            assert!(exit_states[2].is_some());
            // the cumulative exit state unions the unroll counts
            let last = exit_states[3].as_ref().unwrap();
            let counts = last
                .loop_unrolls
                .values()
                .next()
                .expect("the loop is tracked");
            assert_eq!(counts.len(), 2);
        }
        other => panic!("expected a loop entry, got {other:?}"),
    }

    match &outline.entries[3] {
        OutlineEntry::End(state) => {
            // the history was collapsed at the joins instead of growing per
            // path
            for history in &state.branching_histories {
                assert!(history
                    .iter()
                    .all(|c| matches!(c, BranchingChoice::Any { .. })));
            }
        }
        other => panic!("expected the end entry, got {other:?}"),
    }
}

#[test]
fn observing_away_a_branch_drops_its_outline() {
    let (outline, _) = outline_of(
        "int x = 1;
         if x == 2 { x = 3; }
         int y = x;",
        8,
    );
    match &outline.entries[1] {
        OutlineEntry::Branch {
            true_branch,
            false_branch,
            ..
        } => {
            assert!(true_branch.is_none());
            assert!(false_branch.is_some());
        }
        other => panic!("expected a branch entry, got {other:?}"),
    }
}

#[test]
fn summaries_serialize() {
    let (outline, _) = outline_of(
        "int x = discrete({1: 0.5, 2: 0.5});
         if x == 1 { x = 3; }",
        16,
    );
    let summary = outline.summarize();
    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"if-else\""));
}
