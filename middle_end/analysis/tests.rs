// structural analyses over small textual IR programs.

use pretty_assertions::assert_eq;

use super::*;
use crate::middle_end::ir::bb_id;

fn parse_ir(text: &str) -> Valid<Program> {
    text.parse::<Program>().unwrap().validate().unwrap()
}

const DIAMOND: &str = r"
entry:
  x:int = $copy 1
  c:bool = $cmp eq x:int, 1
  $branch c:bool bb1 bb2

bb1:
  y:int = $copy 10
  $jump bb3

bb2:
  z:int = $copy 20
  $jump bb3

bb3:
  $ret
";

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
fn diamond_round_trips_through_the_textual_format() {
    let program = parse_ir(DIAMOND);
    let printed = format!("{}", program.0);
    let reparsed = printed.parse::<Program>().unwrap();
    assert_eq!(program.0, reparsed);
}

#[test]
fn diamond_edges_and_dominators() {
    let program = parse_ir(DIAMOND);
    let cfg = Cfg::new(&program);

    assert_eq!(cfg.entry, bb_id("entry"));
    assert_eq!(cfg.exit, bb_id("bb3"));

    let succs: Set<BbId> = cfg.succ(&bb_id("entry")).cloned().collect();
    assert_eq!(succs, Set::from([bb_id("bb1"), bb_id("bb2")]));
    let preds: Set<BbId> = cfg.pred(&bb_id("bb3")).cloned().collect();
    assert_eq!(preds, Set::from([bb_id("bb1"), bb_id("bb2")]));

    // every block predominates itself
    assert!(cfg.predominates(&bb_id("bb1"), &bb_id("bb1")));
    // the entry predominates everything, the arms do not predominate the join
    assert!(cfg.predominates(&bb_id("entry"), &bb_id("bb3")));
    assert!(!cfg.predominates(&bb_id("bb1"), &bb_id("bb3")));
    // the join postdominates the arms and the entry
    assert!(cfg.postdominates(&bb_id("bb3"), &bb_id("bb1")));
    assert!(cfg.postdominates(&bb_id("bb3"), &bb_id("entry")));

    assert_eq!(cfg.immediate_predominator[&bb_id("bb3")], Some(bb_id("entry")));
    assert_eq!(cfg.immediate_predominator[&bb_id("entry")], None);
    assert_eq!(
        cfg.immediate_postdominator[&bb_id("entry")],
        Some(bb_id("bb3"))
    );

    assert_eq!(
        cfg.proper_predominators(&bb_id("bb1")),
        Set::from([bb_id("entry")])
    );

    // a diamond has no cycles
    assert!(cfg.loops.is_empty());
    assert!(cfg.loop_edges.is_empty());
}

#[test]
fn loop_detection_and_loop_edges() {
    let program = parse_ir(LOOP);
    let cfg = Cfg::new(&program);

    // the single cycle, rotated so its minimum block name comes first
    assert_eq!(cfg.loops, Set::from([vec![bb_id("body"), bb_id("head")]]));
    assert_eq!(cfg.loop_edges, Set::from([(bb_id("head"), bb_id("body"))]));
    assert_eq!(cfg.loop_inducing_blocks, Set::from([bb_id("head")]));

    // the header dominates the body and the exit; the body does not
    // postdominate the header (the zero-iteration path skips it)
    assert!(cfg.predominates(&bb_id("head"), &bb_id("body")));
    assert!(cfg.predominates(&bb_id("head"), &bb_id("exit")));
    assert!(!cfg.postdominates(&bb_id("body"), &bb_id("head")));
    assert!(cfg.postdominates(&bb_id("head"), &bb_id("body")));
}

#[test]
fn branch_inside_a_loop_body_is_not_loop_inducing() {
    let program = parse_ir(
        r"
entry:
  i:int = $copy 0
  $jump head

head:
  i2:int = $phi(entry: i:int, join: i5:int)
  c:bool = $cmp lt i2:int, 3
  $branch c:bool bodyif exit

bodyif:
  d:bool = $cmp eq i2:int, 1
  $branch d:bool left right

left:
  i3:int = $arith add i2:int, 2
  $jump join

right:
  i4:int = $arith add i2:int, 1
  $jump join

join:
  i5:int = $phi(left: i3:int, right: i4:int)
  $jump head

exit:
  $ret
",
    );
    let cfg = Cfg::new(&program);

    // two simple cycles (one per arm), but only the header induces a loop:
    // the inner branch's arms rejoin inside the body
    assert_eq!(cfg.loops.len(), 2);
    assert_eq!(cfg.loop_edges, Set::from([(bb_id("head"), bb_id("bodyif"))]));
    assert_eq!(cfg.loop_inducing_blocks, Set::from([bb_id("head")]));
}

#[test]
fn cfg_dump_marks_loops_and_branch_sides() {
    let program = parse_ir(LOOP);
    let ctx = ProgramContext::new(program, DebugInfo::default());
    let dot = crate::middle_end::ir::cfg_dump_impl::dump_cfg(&ctx);

    assert!(dot.starts_with("digraph cfg {"));
    // the loop condition block gets a double border, its body-entry edge is
    // bold, and both branch sides are labeled
    assert!(dot.contains("head [label="));
    assert!(dot.contains("peripheries=2"));
    assert!(dot.contains("head -> body [label=\"true\" style=bold]"));
    assert!(dot.contains("head -> exit [label=\"false\"]"));
}

#[test]
#[should_panic(expected = "unknown basic block")]
fn unknown_block_lookup_panics() {
    let program = parse_ir(DIAMOND);
    program.0.block(&bb_id("nope"));
}

#[test]
fn validation_rejects_broken_programs() {
    // double assignment violates SSA
    let double_assign = r"
entry:
  x:int = $copy 1
  x:int = $copy 2
  $ret
";
    assert!(double_assign.parse::<Program>().unwrap().validate().is_err());

    // a phi whose keys do not match the predecessors
    let bad_phi = r"
entry:
  x:int = $copy 1
  $jump bb1

bb1:
  y:int = $phi(nope: x:int)
  $ret
";
    assert!(bad_phi.parse::<Program>().unwrap().validate().is_err());

    // probabilities must sum to one
    let bad_dist = r"
entry:
  x:int = $discrete {1: 0.5, 2: 0.6}
  $ret
";
    assert!(bad_dist.parse::<Program>().unwrap().validate().is_err());

    // jump to a missing block
    let bad_target = r"
entry:
  x:int = $copy 1
  $jump nowhere
";
    assert!(bad_target.parse::<Program>().unwrap().validate().is_err());
}
