//! The slicing engine.
//!
//! For a query variable, slicing finds the minimal set of instruction
//! positions whose removal would not change the variable's distribution at
//! the stop position.  It piggybacks on a WP pass: while the payload term is
//! propagated backwards, every inferred instruction is tagged relevant (the
//! term changed) or irrelevant (it did not), branches and observes are
//! recorded as potential dependencies, and at the end the per-path slices
//! are merged.  Slicing passes bypass the result cache, which carries no
//! slicing information.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use super::{WpInference, WpState};
use crate::middle_end::analysis::{LoopId, ProgramContext};
use crate::middle_end::exec::BranchingHistory;
use crate::middle_end::ir::*;
use crate::middle_end::term::{self, Term};

/// Per-state slicing bookkeeping, carried alongside the rate terms.
#[derive(Clone, Debug, Default)]
pub struct SlicingState {
    pub visited: Set<InstId>,
    pub relevant: Set<InstId>,
    pub irrelevant: Set<InstId>,
}

impl SlicingState {
    pub(crate) fn record_step(&mut self, pos: InstId, before: &Term, after: &Term) {
        self.visited.insert(pos.clone());
        if before == after {
            self.irrelevant.insert(pos);
        } else {
            self.relevant.insert(pos);
        }
    }
}

#[derive(Debug, Default)]
struct ControlRecord {
    /// Taken arm -> the result terms observed when crossing the branch.
    arms: Map<BbId, Set<Term>>,
    cond: Option<VarId>,
}

/// Pass-wide slicing collection: potential control-flow and observe
/// dependencies plus the slice families of terminating states.
#[derive(Debug, Default)]
pub(crate) struct SlicingCollector {
    control: Map<InstId, ControlRecord>,
    observes: Map<InstId, (Set<Term>, Option<VarId>)>,
    families: Vec<SlicingState>,
}

impl SlicingCollector {
    pub(crate) fn record_branch(
        &mut self,
        pos: &InstId,
        arm: &BbId,
        result_term: &Term,
        cond: &Operand,
    ) {
        let record = self.control.entry(pos.clone()).or_default();
        record.cond = cond.as_var().cloned();
        record
            .arms
            .entry(arm.clone())
            .or_default()
            .insert(result_term.clone());
    }

    pub(crate) fn record_observe(&mut self, pos: &InstId, rate: &Term, cond: &Operand) {
        let entry = self
            .observes
            .entry(pos.clone())
            .or_insert_with(|| (Set::new(), cond.as_var().cloned()));
        entry.0.insert(rate.clone());
    }

    pub(crate) fn record_terminating(&mut self, state: &WpState) {
        if state.lost {
            return;
        }
        if let Some(slicing) = &state.slicing {
            self.families.push(slicing.clone());
        }
    }
}

impl WpInference {
    /// The slice of `variable` at `stop_position`: the minimum set of
    /// instruction positions its distribution depends on, closed over the
    /// slices of every actual control-flow and observe condition variable.
    pub fn slice(
        &mut self,
        ctx: &ProgramContext,
        variable: &VarId,
        loop_unrolls: &Map<LoopId, Set<u64>>,
        stop_position: &InstId,
        branching_histories: &[BranchingHistory],
    ) -> Set<InstId> {
        let mut done: Set<(VarId, InstId)> = Set::new();
        let mut result: Set<InstId> = Set::new();
        let mut queue = vec![(variable.clone(), stop_position.clone())];
        while let Some((v, pos)) = queue.pop() {
            if !done.insert((v.clone(), pos.clone())) {
                continue;
            }
            let (slice, dependencies) =
                self.slice_single(ctx, &v, loop_unrolls, &pos, branching_histories);
            result.extend(slice);
            for (dep_pos, dep_var) in dependencies {
                result.insert(dep_pos.clone());
                if let Some(dv) = dep_var {
                    queue.push((dv, dep_pos));
                }
            }
        }
        result
    }

    // one slicing WP pass for one variable.
    fn slice_single(
        &mut self,
        ctx: &ProgramContext,
        variable: &VarId,
        loop_unrolls: &Map<LoopId, Set<u64>>,
        stop_position: &InstId,
        branching_histories: &[BranchingHistory],
    ) -> (Set<InstId>, Vec<(InstId, Option<VarId>)>) {
        let query = match variable.typ() {
            Type::Int => term::var(variable.clone()),
            Type::Bool => term::bool_to_int(term::var(variable.clone())),
        };
        self.slicing = Some(SlicingCollector::default());
        let _ = self.infer_contribution(
            ctx,
            query,
            loop_unrolls.clone(),
            stop_position.clone(),
            branching_histories.to_vec(),
        );
        let collector = self.slicing.take().expect("slicing collector in place");

        let merged = merge_families(collector.families);
        let slice = merged
            .into_iter()
            .min_by_key(|s| s.len())
            .unwrap_or_default();

        let mut dependencies = vec![];
        for (pos, record) in collector.control {
            let mut sets = record.arms.values();
            let first = sets.next();
            let actual = match first {
                Some(first) => sets.any(|s| s != first),
                None => false,
            };
            if actual {
                dependencies.push((pos, record.cond));
            }
        }
        for (pos, (rates, cond)) in collector.observes {
            if rates.len() > 1 {
                dependencies.push((pos, cond));
            }
        }
        (slice, dependencies)
    }
}

// pairwise merge of per-path slices.  a union of a left and a right slice is
// a candidate only if no instruction tagged irrelevant on one side is
// relevant on the other; if every pair conflicts we fall back to plain
// unions, which are always sound.
fn merge_families(families: Vec<SlicingState>) -> Vec<Set<InstId>> {
    let mut iter = families.into_iter();
    let first = match iter.next() {
        Some(first) => first,
        None => return vec![],
    };
    let mut candidates: Vec<(Set<InstId>, Set<InstId>)> = vec![(first.relevant, first.irrelevant)];
    for right in iter {
        let mut next = vec![];
        for (slice, irrelevant) in &candidates {
            let conflict = slice.intersection(&right.irrelevant).next().is_some()
                || right.relevant.intersection(irrelevant).next().is_some();
            if !conflict {
                next.push(merge_pair(slice, irrelevant, &right));
            }
        }
        if next.is_empty() {
            for (slice, irrelevant) in &candidates {
                next.push(merge_pair(slice, irrelevant, &right));
            }
        }
        next.sort_by_key(|(s, _)| s.len());
        next.dedup();
        next.truncate(8);
        candidates = next;
    }
    candidates.into_iter().map(|(s, _)| s).collect()
}

fn merge_pair(
    slice: &Set<InstId>,
    irrelevant: &Set<InstId>,
    right: &SlicingState,
) -> (Set<InstId>, Set<InstId>) {
    let merged_slice: Set<InstId> = slice.union(&right.relevant).cloned().collect();
    let merged_irrelevant: Set<InstId> = irrelevant
        .union(&right.irrelevant)
        .filter(|p| !merged_slice.contains(*p))
        .cloned()
        .collect();
    (merged_slice, merged_irrelevant)
}
