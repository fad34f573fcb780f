//! Structural analyses of IR programs.
//!
//! Everything here is computed once per program and shared by reference
//! across the executor, the outline builder, and the WP inference engine.

use std::collections::VecDeque;
use std::collections::{BTreeMap as Map, BTreeSet as Set};

use crate::commons::Valid;

use super::ir::*;

/// A loop is identified by its `(condition_block, body_start_block)` edge.
pub type LoopId = (BbId, BbId);

/// The control-flow graph of a program, together with its dominator
/// structure and loop information.
#[derive(Clone, Debug)]
pub struct Cfg {
    pub entry: BbId,
    pub exit: BbId,
    succ_edges: Map<BbId, Set<BbId>>,
    pred_edges: Map<BbId, Set<BbId>>,
    /// For each block, the blocks that predominate it (including itself).
    pub predominators: Map<BbId, Set<BbId>>,
    /// For each block, the blocks that postdominate it (including itself).
    pub postdominators: Map<BbId, Set<BbId>>,
    pub immediate_predominator: Map<BbId, Option<BbId>>,
    pub immediate_postdominator: Map<BbId, Option<BbId>>,
    /// All simple cycles, rotated so the minimum block name is first.
    pub loops: Set<Vec<BbId>>,
    /// The `(condition_block, body_start)` edges identifying each loop.
    pub loop_edges: Set<LoopId>,
    /// Blocks that appear as the condition block of at least one loop.
    pub loop_inducing_blocks: Set<BbId>,
}

impl Cfg {
    pub fn new(program: &Valid<Program>) -> Self {
        let program = &program.0;
        fn insert_edge(map: &mut Map<BbId, Set<BbId>>, key_bbid: &BbId, value_bbid: &BbId) {
            map.entry(key_bbid.clone())
                .and_modify(|s| {
                    s.insert(value_bbid.clone());
                })
                .or_insert([value_bbid.clone()].into());
        }

        let entry = program.entry.clone();
        let exit = program.exit_block();
        let mut succ_edges: Map<BbId, Set<BbId>> = Map::new();
        let mut pred_edges: Map<BbId, Set<BbId>> = Map::new();

        for bbid in program.body.keys() {
            succ_edges.insert(bbid.clone(), Set::new());
            pred_edges.insert(bbid.clone(), Set::new());
        }

        for (bbid, bb) in &program.body {
            match &bb.term {
                Terminal::Branch { cond: _, tt, ff } => {
                    insert_edge(&mut succ_edges, bbid, tt);
                    insert_edge(&mut succ_edges, bbid, ff);

                    insert_edge(&mut pred_edges, tt, bbid);
                    insert_edge(&mut pred_edges, ff, bbid);
                }
                Terminal::Jump(next_bb) => {
                    insert_edge(&mut succ_edges, bbid, next_bb);
                    insert_edge(&mut pred_edges, next_bb, bbid);
                }
                Terminal::Ret => {}
            }
        }

        let predominators = dominator_sets(&entry, &succ_edges, &pred_edges);
        let postdominators = dominator_sets(&exit, &pred_edges, &succ_edges);
        let immediate_predominator = immediate_dominators(&predominators);
        let immediate_postdominator = immediate_dominators(&postdominators);

        let mut cfg = Cfg {
            entry,
            exit,
            succ_edges,
            pred_edges,
            predominators,
            postdominators,
            immediate_predominator,
            immediate_postdominator,
            loops: Set::new(),
            loop_edges: Set::new(),
            loop_inducing_blocks: Set::new(),
        };

        cfg.loops = cfg.find_loops();
        cfg.loop_edges = cfg.find_loop_edges(program);
        cfg.loop_inducing_blocks = cfg.loop_edges.iter().map(|(c, _)| c.clone()).collect();

        cfg
    }

    // an iterator over the successor edges of bb.
    pub fn succ(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.succ_edges[bb].iter()
    }

    // an iterator over the predecessor edges of bb.
    pub fn pred(&self, bb: &BbId) -> impl Iterator<Item = &BbId> {
        self.pred_edges[bb].iter()
    }

    /// Does `a` predominate `b`?  (Every block predominates itself.)
    pub fn predominates(&self, a: &BbId, b: &BbId) -> bool {
        self.predominators[b].contains(a)
    }

    /// Does `a` postdominate `b`?
    pub fn postdominates(&self, a: &BbId, b: &BbId) -> bool {
        self.postdominators[b].contains(a)
    }

    pub fn proper_predominators(&self, b: &BbId) -> Set<BbId> {
        let mut set = self.predominators[b].clone();
        set.remove(b);
        set
    }

    pub fn proper_postdominators(&self, b: &BbId) -> Set<BbId> {
        let mut set = self.postdominators[b].clone();
        set.remove(b);
        set
    }

    // enumerate all simple cycles.  for each start block we search paths back
    // to it that only pass through larger block names, so every cycle is
    // found exactly once, already rotated to its minimum name.
    fn find_loops(&self) -> Set<Vec<BbId>> {
        let mut loops = Set::new();
        for start in self.succ_edges.keys() {
            let mut path = vec![start.clone()];
            let mut visited = Set::from([start.clone()]);
            self.cycle_search(start, start, &mut path, &mut visited, &mut loops);
        }
        loops
    }

    fn cycle_search(
        &self,
        start: &BbId,
        curr: &BbId,
        path: &mut Vec<BbId>,
        visited: &mut Set<BbId>,
        loops: &mut Set<Vec<BbId>>,
    ) {
        for succ in self.succ(curr) {
            if succ == start {
                loops.insert(path.clone());
            } else if succ > start && !visited.contains(succ) {
                visited.insert(succ.clone());
                path.push(succ.clone());
                self.cycle_search(start, succ, path, visited, loops);
                path.pop();
                visited.remove(succ);
            }
        }
    }

    // the condition block of a cycle is a branching block that predominates
    // the whole cycle.  branches inside the loop body (whose arms rejoin
    // within an iteration) and an inner loop's header as seen by an outer
    // cycle both fail that test.
    fn find_loop_edges(&self, program: &Program) -> Set<LoopId> {
        let mut edges = Set::new();
        for cycle in &self.loops {
            for (i, c) in cycle.iter().enumerate() {
                let next = &cycle[(i + 1) % cycle.len()];
                match &program.block(c).term {
                    Terminal::Branch { tt, ff, .. } if tt != ff => {}
                    _ => continue,
                }
                if cycle.iter().all(|b| self.predominates(c, b)) {
                    edges.insert((c.clone(), next.clone()));
                }
            }
        }
        edges
    }
}

// iterative dataflow: initialize every node except the root to the full
// set, then intersect over incoming edges until fixpoint.
fn dominator_sets(
    root: &BbId,
    succs: &Map<BbId, Set<BbId>>,
    preds: &Map<BbId, Set<BbId>>,
) -> Map<BbId, Set<BbId>> {
    let all: Set<BbId> = succs.keys().cloned().collect();
    let mut dom: Map<BbId, Set<BbId>> = all
        .iter()
        .map(|b| {
            if b == root {
                (b.clone(), Set::from([root.clone()]))
            } else {
                (b.clone(), all.clone())
            }
        })
        .collect();

    let mut worklist: VecDeque<BbId> = succs[root].iter().cloned().collect();
    while let Some(b) = worklist.pop_front() {
        if b == *root {
            continue;
        }
        let mut new: Option<Set<BbId>> = None;
        for p in &preds[&b] {
            let pdom = &dom[p];
            new = Some(match new {
                None => pdom.clone(),
                Some(acc) => acc.intersection(pdom).cloned().collect(),
            });
        }
        let mut new = new.unwrap_or_default();
        new.insert(b.clone());
        if new != dom[&b] {
            dom.insert(b.clone(), new);
            worklist.extend(succs[&b].iter().cloned());
        }
    }
    dom
}

// the immediate dominator of b is the unique proper dominator of b that
// does not dominate any other proper dominator of b.
fn immediate_dominators(dom: &Map<BbId, Set<BbId>>) -> Map<BbId, Option<BbId>> {
    let mut out = Map::new();
    for (b, doms) in dom {
        let proper: Vec<&BbId> = doms.iter().filter(|d| *d != b).collect();
        let mut idom = None;
        for candidate in &proper {
            let dominates_none = proper
                .iter()
                .all(|other| *other == *candidate || !dom[*other].contains(*candidate));
            if dominates_none {
                idom = Some((*candidate).clone());
                break;
            }
        }
        out.insert(b.clone(), idom);
    }
    out
}

/// Everything the dynamic components need to know about a program: the
/// validated program itself, its structural analyses, and the debug info
/// linking IR positions back to the source text.
#[derive(Clone, Debug)]
pub struct ProgramContext {
    pub program: Program,
    pub cfg: Cfg,
    pub debug_info: DebugInfo,
}

impl ProgramContext {
    pub fn new(program: Valid<Program>, debug_info: DebugInfo) -> Self {
        let cfg = Cfg::new(&program);
        ProgramContext {
            program: program.0,
            cfg,
            debug_info,
        }
    }

    /// The position of the first non-phi instruction of a block.
    pub fn first_non_phi_position(&self, bb: &BbId) -> InstId {
        (bb.clone(), self.program.first_non_phi(bb))
    }
}

#[cfg(test)]
mod tests;
