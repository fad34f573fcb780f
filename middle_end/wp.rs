//! The symbolic weakest-preexpectation inference engine.
//!
//! Given a term, a stop position, the loop-unroll counts observed by forward
//! execution, and the branching histories describing how the user got there,
//! the engine propagates the term backwards from the stop position to the
//! program entry.  Four rate terms ride along:
//!
//! - `term` — the query payload, weighted by observes and branch conditions;
//! - `observe_satisfaction_rate` — branch conditions and observes, no query;
//! - `focus_rate` — branch conditions only; this survives even on paths the
//!   user deliberately stepped away from, so that the lost mass can be
//!   reported;
//! - `intentional_loss_rate` — the focus rate snapshotted at the moment a
//!   path turned out to be inconsistent with the branching history.
//!
//! Backwards traversal of a loop body consumes one unroll count per pass;
//! a path contributes at the program entry only if every loop's remaining
//! count set has reached zero, so only iteration counts the forward pass
//! actually observed are representable.  Mass dropped because no count
//! works out is exactly the approximation error reported to the caller.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::analysis::{LoopId, ProgramContext};
use super::exec::{BranchingChoice, BranchingHistory};
use super::ir::*;
use super::oracle::EquivalenceOracle;
use super::term::{self, Entry, Term};

mod cache;
pub mod slicing;

use cache::WpCache;
use slicing::{SlicingCollector, SlicingState};

/// Zero-preserving division: `0 ./. x = 0` for every `x`, including 0.
pub fn zdiv(a: f64, b: f64) -> f64 {
    if a == 0.0 {
        0.0
    } else {
        a / b
    }
}

/// The answer to one inference query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InferenceResult {
    /// The expected value of the query term, weighted by loop truncation,
    /// branching-history consistency, and observe satisfaction.
    pub value: f64,
    /// Probability mass not lost to loop-unroll truncation.
    pub runs_not_cut_off: f64,
    /// Conditional on not-truncated and intentional paths, the proportion
    /// satisfying all observes.
    pub observe_satisfaction: f64,
    /// The proportion of paths consistent with the branching histories,
    /// ignoring observes.
    pub intentional_focus: f64,
}

impl InferenceResult {
    /// The probability of the queried event at the stop position:
    /// `value / intentional_focus ./. observe_satisfaction`.
    pub fn probability(&self) -> f64 {
        zdiv(zdiv(self.value, self.intentional_focus), self.observe_satisfaction)
    }

    pub fn approximation_error(&self) -> f64 {
        1.0 - self.runs_not_cut_off
    }
}

/// One backwards inference state.  The instruction at `position` has already
/// been inferred; the rate terms describe expectations at the program point
/// immediately before it.
#[derive(Clone, Debug)]
pub struct WpState {
    pub position: InstId,
    pub term: Term,
    pub observe_satisfaction_rate: Term,
    pub focus_rate: Term,
    pub intentional_loss_rate: Term,
    pub remaining_loop_unrolls: Map<LoopId, Set<u64>>,
    pub branching_history: BranchingHistory,
    /// Branch blocks whose untaken arm never reaches the stop position; at
    /// those branches the engine spawns the lost arm explicitly.
    pub generate_lost_states_for_blocks: Set<BbId>,
    /// This state's path is inconsistent with the branching history; only
    /// its focus and loss rates still matter.
    pub lost: bool,
    /// Derived slicing bookkeeping.  Not part of the cache key.
    pub slicing: Option<SlicingState>,
}

impl WpState {
    #[allow(clippy::type_complexity)]
    fn key_fields(
        &self,
    ) -> (
        &InstId,
        &Term,
        &Term,
        &Term,
        &Term,
        &Map<LoopId, Set<u64>>,
        &BranchingHistory,
        &Set<BbId>,
        bool,
    ) {
        (
            &self.position,
            &self.term,
            &self.observe_satisfaction_rate,
            &self.focus_rate,
            &self.intentional_loss_rate,
            &self.remaining_loop_unrolls,
            &self.branching_history,
            &self.generate_lost_states_for_blocks,
            self.lost,
        )
    }

    fn contribution(&self) -> Contribution {
        Contribution {
            term: self.term.clone(),
            observe_satisfaction_rate: self.observe_satisfaction_rate.clone(),
            focus_rate: self.focus_rate.clone(),
            intentional_loss_rate: self.intentional_loss_rate.clone(),
        }
    }

    fn is_dead(&self) -> bool {
        let zero = |t: &Term| term::as_constant(t) == Some(0.0);
        zero(&self.term)
            && zero(&self.observe_satisfaction_rate)
            && zero(&self.focus_rate)
            && zero(&self.intentional_loss_rate)
    }

    // substitute a value for a variable in every rate term.
    fn subst(&mut self, v: &VarId, value: &Term) {
        self.term = term::replace(&self.term, v, value);
        self.observe_satisfaction_rate = term::replace(&self.observe_satisfaction_rate, v, value);
        self.focus_rate = term::replace(&self.focus_rate, v, value);
        self.intentional_loss_rate = term::replace(&self.intentional_loss_rate, v, value);
    }

    // every rate term becomes the expectation over the distribution.
    fn apply_distribution(&mut self, lhs: &VarId, dist: &[(i64, f64)]) {
        for rate in [
            &mut self.term,
            &mut self.observe_satisfaction_rate,
            &mut self.focus_rate,
            &mut self.intentional_loss_rate,
        ] {
            let entries = dist
                .iter()
                .map(|(k, p)| Entry::new(*p, Set::new(), term::replace(rate, lhs, &term::int(*k))))
                .collect();
            *rate = term::additions(entries);
        }
    }

    fn multiply_rates(&mut self, factor: &Term) {
        for rate in [
            &mut self.term,
            &mut self.observe_satisfaction_rate,
            &mut self.focus_rate,
            &mut self.intentional_loss_rate,
        ] {
            *rate = term::mul(vec![factor.clone(), rate.clone()]);
        }
    }

    fn turn_lost(&mut self) {
        self.lost = true;
        self.branching_history.clear();
        self.term = term::int(0);
        self.observe_satisfaction_rate = term::int(0);
        self.intentional_loss_rate = self.focus_rate.clone();
        self.slicing = None;
    }

    // a block is satisfied once the inference position properly postdominates
    // it: from here on, both of its arms are explored naturally.
    fn retire_lost_blocks(&mut self, ctx: &ProgramContext, new_block: &BbId) {
        self.generate_lost_states_for_blocks
            .retain(|b| b == new_block || !ctx.cfg.postdominates(new_block, b));
    }
}

impl PartialEq for WpState {
    fn eq(&self, other: &Self) -> bool {
        self.key_fields() == other.key_fields()
    }
}

impl Eq for WpState {}

impl std::hash::Hash for WpState {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key_fields().hash(state);
    }
}

/// The four summed rate terms of a (partial) inference.
#[derive(Clone, Debug)]
pub struct Contribution {
    pub term: Term,
    pub observe_satisfaction_rate: Term,
    pub focus_rate: Term,
    pub intentional_loss_rate: Term,
}

impl Contribution {
    fn zero() -> Self {
        Contribution {
            term: term::int(0),
            observe_satisfaction_rate: term::int(0),
            focus_rate: term::int(0),
            intentional_loss_rate: term::int(0),
        }
    }

    fn add(&mut self, other: &Contribution) {
        self.term = term::add(vec![self.term.clone(), other.term.clone()]);
        self.observe_satisfaction_rate = term::add(vec![
            self.observe_satisfaction_rate.clone(),
            other.observe_satisfaction_rate.clone(),
        ]);
        self.focus_rate = term::add(vec![self.focus_rate.clone(), other.focus_rate.clone()]);
        self.intentional_loss_rate = term::add(vec![
            self.intentional_loss_rate.clone(),
            other.intentional_loss_rate.clone(),
        ]);
    }

    fn scale(&self, c: f64) -> Contribution {
        let scale = |t: &Term| term::mul(vec![term::double(c), t.clone()]);
        Contribution {
            term: scale(&self.term),
            observe_satisfaction_rate: scale(&self.observe_satisfaction_rate),
            focus_rate: scale(&self.focus_rate),
            intentional_loss_rate: scale(&self.intentional_loss_rate),
        }
    }
}

/// The inference engine.  Owns a private result cache; never shared across
/// threads (clone the owning debugger instead).
pub struct WpInference {
    cache: WpCache,
    pub(crate) slicing: Option<SlicingCollector>,
    cancel: Arc<AtomicBool>,
}

impl Default for WpInference {
    fn default() -> Self {
        Self::new()
    }
}

impl WpInference {
    pub fn new() -> Self {
        WpInference {
            cache: WpCache::new(None),
            slicing: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an algebraic-equivalence oracle to enlarge cache hits.  The
    /// oracle can only turn misses into hits; correctness never depends on
    /// it.
    pub fn with_oracle(oracle: Box<dyn EquivalenceOracle>) -> Self {
        WpInference {
            cache: WpCache::new(Some(oracle)),
            slicing: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation: when the flag is raised the engine stops at
    /// the next state boundary.  The caller discards the result.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// The number of memoized sub-inferences.
    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    /// Infer the expected value of `term` at `stop_position`, conditioned on
    /// the given loop unrolls and branching histories.
    pub fn infer(
        &mut self,
        ctx: &ProgramContext,
        term: Term,
        loop_unrolls: Map<LoopId, Set<u64>>,
        stop_position: InstId,
        branching_histories: Vec<BranchingHistory>,
    ) -> InferenceResult {
        let history_count = branching_histories.len().max(1);
        let total =
            self.infer_contribution(ctx, term, loop_unrolls, stop_position, branching_histories);
        assemble(total, history_count)
    }

    pub(crate) fn infer_contribution(
        &mut self,
        ctx: &ProgramContext,
        term: Term,
        loop_unrolls: Map<LoopId, Set<u64>>,
        stop_position: InstId,
        branching_histories: Vec<BranchingHistory>,
    ) -> Contribution {
        let lost_blocks = initial_lost_blocks(ctx, &stop_position);
        debug!(
            position = %format!("{}.{}", stop_position.0, stop_position.1),
            histories = branching_histories.len(),
            query = %term,
            "wp inference"
        );
        let mut total = Contribution::zero();
        for history in branching_histories {
            let state = WpState {
                position: stop_position.clone(),
                term: term.clone(),
                observe_satisfaction_rate: term::int(1),
                focus_rate: term::int(1),
                intentional_loss_rate: term::int(0),
                remaining_loop_unrolls: loop_unrolls.clone(),
                branching_history: history,
                generate_lost_states_for_blocks: lost_blocks.clone(),
                lost: false,
                slicing: self.slicing.as_ref().map(|_| SlicingState::default()),
            };
            let contribution = self.run(ctx, state, true);
            total.add(&contribution);
        }
        total
    }

    // process states until each one terminates at the entry, dies, or hands
    // off to the cache at a loop boundary.
    fn run(&mut self, ctx: &ProgramContext, init: WpState, from_boundary: bool) -> Contribution {
        let mut total = Contribution::zero();
        let mut worklist: Vec<(WpState, bool)> = vec![(init, from_boundary)];
        while let Some((state, skip_cache)) = worklist.pop() {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            if state.is_dead() {
                continue;
            }
            if !skip_cache && state.slicing.is_none() && self.is_cache_boundary(ctx, &state.position)
            {
                let contribution = self.lookup_or_recurse(ctx, state);
                total.add(&contribution);
                continue;
            }
            if state.position.0 == ctx.program.entry && state.position.1 == 0 {
                // top of the program: only states with no unconsumed
                // deliberate choice and fully consumed unroll counts
                // contribute.  leftover counts mean this path's iteration
                // counts were not the observed ones: truncated mass.
                let deliberate_left = state
                    .branching_history
                    .iter()
                    .any(|c| matches!(c, BranchingChoice::Choice { .. }));
                let counts_consumed = state
                    .remaining_loop_unrolls
                    .values()
                    .all(|counts| counts.contains(&0));
                if !deliberate_left && counts_consumed {
                    trace!(focus = %state.focus_rate, "state terminated at entry");
                    if let Some(collector) = self.slicing.as_mut() {
                        collector.record_terminating(&state);
                    }
                    total.add(&state.contribution());
                }
                continue;
            }
            let (bb, idx) = state.position.clone();
            if idx > ctx.program.first_non_phi(&bb) {
                let stepped = self.step_instruction(ctx, state);
                worklist.push((stepped, false));
            } else {
                for succ in self.cross_block(ctx, state) {
                    worklist.push((succ, false));
                }
            }
        }
        total
    }

    fn is_cache_boundary(&self, ctx: &ProgramContext, pos: &InstId) -> bool {
        ctx.cfg.loop_inducing_blocks.contains(&pos.0) && pos.1 == ctx.program.first_non_phi(&pos.0)
    }

    fn lookup_or_recurse(&mut self, ctx: &ProgramContext, state: WpState) -> Contribution {
        let (scale, key) = normalize_query(state);
        if let Some(hit) = self.cache.lookup(&key) {
            debug!(block = %key.position.0, scale, "wp cache hit");
            return hit.scale(scale);
        }
        let result = self.run(ctx, key.clone(), true);
        self.cache.insert(key, result.clone());
        result.scale(scale)
    }

    // move one instruction backwards within the current block.
    fn step_instruction(&mut self, ctx: &ProgramContext, mut state: WpState) -> WpState {
        let (bb, idx) = state.position.clone();
        let pos = (bb, idx - 1);
        let inst = ctx
            .program
            .inst_at(&pos)
            .unwrap_or_else(|| panic!("no instruction at {}.{}", pos.0, pos.1))
            .clone();
        let term_before = state.term.clone();
        match &inst {
            Instruction::Copy { lhs, op } => state.subst(lhs, &term::operand_term(op)),
            Instruction::Arith { lhs, aop, op1, op2 } => {
                let t1 = term::operand_term(op1);
                let t2 = term::operand_term(op2);
                let value = match aop {
                    ArithOp::Add => term::add(vec![t1, t2]),
                    ArithOp::Sub => term::sub(t1, t2),
                };
                state.subst(lhs, &value);
            }
            Instruction::Cmp { lhs, rop, op1, op2 } => {
                let t1 = term::operand_term(op1);
                let t2 = term::operand_term(op2);
                let value = match rop {
                    RelaOp::Eq => term::equal(t1, t2),
                    RelaOp::Lt => term::less_than(t1, t2),
                };
                state.subst(lhs, &value);
            }
            Instruction::Discrete { lhs, dist } => state.apply_distribution(lhs, dist),
            Instruction::Observe { cond } => {
                if !state.lost {
                    if let Some(collector) = self.slicing.as_mut() {
                        collector.record_observe(&pos, &state.observe_satisfaction_rate, cond);
                    }
                }
                let indicator = term::bool_to_int(term::operand_term(cond));
                state.term = term::mul(vec![indicator.clone(), state.term.clone()]);
                state.observe_satisfaction_rate =
                    term::mul(vec![indicator, state.observe_satisfaction_rate.clone()]);
            }
            Instruction::Phi { .. } => {
                unreachable!("phi at {}.{} inferred outside a block boundary", pos.0, pos.1)
            }
        }
        if !matches!(inst, Instruction::Observe { .. }) {
            if let Some(slicing) = state.slicing.as_mut() {
                slicing.record_step(pos.clone(), &term_before, &state.term);
            }
        }
        state.position = pos;
        state
    }

    // the inference position sits at the first non-phi index of its block:
    // fan out to every predecessor, consuming the phi prefix per arm.
    fn cross_block(&mut self, ctx: &ProgramContext, state: WpState) -> Vec<WpState> {
        let bb = state.position.0.clone();
        let first_non_phi = ctx.program.first_non_phi(&bb);
        let preds: Vec<BbId> = ctx.cfg.pred(&bb).cloned().collect();
        let mut out = vec![];

        'preds: for p in preds {
            let mut ns = state.clone();

            // the phis of this block, instantiated for this predecessor
            for i in 0..first_non_phi {
                if let Some(Instruction::Phi { lhs, choices }) =
                    ctx.program.inst_at(&(bb.clone(), i))
                {
                    let source = choices
                        .get(&p)
                        .unwrap_or_else(|| panic!("phi `{lhs}` in `{bb}` has no arm for `{p}`"));
                    ns.subst(lhs, &term::var(source.clone()));
                }
            }

            // re-entering a loop body backwards: consume one unroll.  a
            // loop is left upwards simply by taking the predominating
            // predecessor; whether stopping was legitimate is settled by
            // the zero-count check at the program entry, which also makes
            // nested loops work (an inner loop's counts accumulate across
            // outer iterations and only drain to zero once every backward
            // pass over it is done).
            let loop_edge = (p.clone(), bb.clone());
            if ctx.cfg.loop_edges.contains(&loop_edge) {
                let counts = &ns.remaining_loop_unrolls[&loop_edge];
                if !counts.iter().any(|n| *n > 0) {
                    continue 'preds;
                }
                let decremented: Set<u64> =
                    counts.iter().filter(|n| **n > 0).map(|n| n - 1).collect();
                ns.remaining_loop_unrolls.insert(loop_edge, decremented);
            }

            let p_term = ctx.program.block(&p).term.clone();
            let is_choice_point =
                matches!(&p_term, Terminal::Branch { tt, ff, .. } if tt != ff);

            // leaving a collapsed region backwards pops its Any entry.
            if let Some(BranchingChoice::Any { predominated_by }) = ns.branching_history.last() {
                if !ctx.cfg.predominates(predominated_by, &p) {
                    ns.branching_history.pop();
                }
            }

            // a deliberate branch must be justified by the history.
            let mut became_lost = false;
            if is_choice_point && !ns.lost {
                match ns.branching_history.last() {
                    Some(BranchingChoice::Choice { from, to }) if *from == p && *to == bb => {
                        ns.branching_history.pop();
                    }
                    Some(BranchingChoice::Any { predominated_by })
                        if ctx.cfg.predominates(predominated_by, &p) => {}
                    _ => became_lost = true,
                }
            }

            if let Terminal::Branch { cond, tt, ff } = &p_term {
                let cond_term = term::operand_term(cond);
                let (indicator, other_indicator) = if tt == ff {
                    (term::int(1), term::int(0))
                } else if *tt == bb {
                    (
                        term::bool_to_int(cond_term.clone()),
                        term::bool_to_int(term::not(cond_term)),
                    )
                } else {
                    (
                        term::bool_to_int(term::not(cond_term.clone())),
                        term::bool_to_int(cond_term),
                    )
                };

                let branch_position = (p.clone(), ctx.program.block(&p).insts.len());
                if is_choice_point && !ns.lost {
                    if let Some(collector) = self.slicing.as_mut() {
                        collector.record_branch(&branch_position, &bb, &ns.term, cond);
                    }
                }

                // the untaken arm never reaches the stop position: its mass
                // leaves here, and we track it so the reported intentional
                // focus stays exact.
                if is_choice_point
                    && !state.lost
                    && ns.generate_lost_states_for_blocks.contains(&p)
                {
                    let mut sibling = ns.clone();
                    sibling.position = branch_position;
                    sibling.focus_rate =
                        term::mul(vec![other_indicator, sibling.focus_rate.clone()]);
                    sibling.turn_lost();
                    sibling.retire_lost_blocks(ctx, &p);
                    out.push(sibling);
                }

                ns.multiply_rates(&indicator);
            }

            if became_lost {
                ns.turn_lost();
            }

            ns.position = (p.clone(), ctx.program.block(&p).insts.len());
            ns.retire_lost_blocks(ctx, &p);
            out.push(ns);
        }
        out
    }
}

// queries that differ only by a scalar on the rates share a cache entry:
// divide the evident constant out of the focus rate, look up, re-scale.
fn normalize_query(mut state: WpState) -> (f64, WpState) {
    let (c, normalized_focus) = term::split_constant(&state.focus_rate);
    if c == 0.0 || c == 1.0 {
        return (1.0, state);
    }
    let inv = term::double(1.0 / c);
    state.focus_rate = normalized_focus;
    state.term = term::mul(vec![inv.clone(), state.term.clone()]);
    state.observe_satisfaction_rate =
        term::mul(vec![inv.clone(), state.observe_satisfaction_rate.clone()]);
    state.intentional_loss_rate = term::mul(vec![inv, state.intentional_loss_rate.clone()]);
    (c, state)
}

// branch blocks whose untaken arm may miss the stop position entirely.  a
// block properly postdominated by the stop block rejoins before the stop; a
// block properly predominated by it lies beyond the stop.  both never need
// explicit lost arms.
fn initial_lost_blocks(ctx: &ProgramContext, stop: &InstId) -> Set<BbId> {
    let stop_block = &stop.0;
    let mut out = Set::new();
    for (bbid, bb) in &ctx.program.body {
        if !matches!(&bb.term, Terminal::Branch { tt, ff, .. } if tt != ff) {
            continue;
        }
        let properly_post = bbid != stop_block && ctx.cfg.postdominates(stop_block, bbid);
        let properly_pre = bbid != stop_block && ctx.cfg.predominates(stop_block, bbid);
        if !properly_post && !properly_pre {
            out.insert(bbid.clone());
        }
    }
    out
}

fn assemble(total: Contribution, history_count: usize) -> InferenceResult {
    let constant = |t: &Term| {
        term::as_constant(t)
            .unwrap_or_else(|| panic!("inference result did not reduce to a constant: {t}"))
    };
    let k = history_count as f64;
    let value = constant(&total.term);
    let observe = constant(&total.observe_satisfaction_rate);
    let focus = constant(&total.focus_rate);
    let loss = constant(&total.intentional_loss_rate);

    // with several histories the per-history focus rates each cover the
    // whole non-truncated mass, so the average is the truncation-free mass
    // while the consistent mass is a plain (disjoint) sum.
    let runs_not_cut_off = focus / k;
    let consistent = (focus - loss).max(0.0);
    let intentional_focus = zdiv(consistent, runs_not_cut_off);
    let observe_satisfaction = zdiv(observe, consistent);

    InferenceResult {
        value,
        runs_not_cut_off,
        observe_satisfaction,
        intentional_focus,
    }
}
