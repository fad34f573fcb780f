//! The debugger façade.
//!
//! Holds the current execution state, a stack of saved states, the seeded
//! sample PRNG, and a privately-owned WP inference engine.  Stepping runs
//! the forward executor; inspection queries refine the sample histograms
//! into exact symbolic probabilities via the WP engine.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::debug;

use crate::commons::{SourceRange, Valid};

use super::analysis::ProgramContext;
use super::exec::{self, BranchingChoice, BranchingHistory, ExecutionState, Sample, Value};
use super::ir::*;
use super::oracle::EquivalenceOracle;
use super::term::{self, Term};
use super::wp::{InferenceResult, WpInference};

#[cfg(test)]
mod tests;

pub const DEFAULT_SEED: u64 = 0x5eed;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DebuggerError {
    #[error("infeasible branch: no samples take that side")]
    InfeasibleBranch,
    #[error("already terminated")]
    AlreadyTerminated,
    #[error("no saved state to restore")]
    NoSavedState,
    #[error("unknown variable `{0}` at the current position")]
    UnknownVariable(String),
}

/// How `variable_values` treats probability mass lost to loop-unroll
/// truncation: ignore it, or spread it uniformly over the reported values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApproximationErrorHandling {
    Drop,
    Distribute,
}

pub struct Debugger {
    ctx: Arc<ProgramContext>,
    state: ExecutionState,
    saved: Vec<ExecutionState>,
    rng: StdRng,
    engine: WpInference,
}

impl Clone for Debugger {
    // snapshots share the immutable analyses; the WP cache is never shared
    // across owners, so each clone starts with a fresh engine.
    fn clone(&self) -> Self {
        Debugger {
            ctx: self.ctx.clone(),
            state: self.state.clone(),
            saved: self.saved.clone(),
            rng: self.rng.clone(),
            engine: WpInference::new(),
        }
    }
}

impl Debugger {
    pub fn new(program: Valid<Program>, debug_info: DebugInfo, sample_count: usize) -> Self {
        Self::with_seed(program, debug_info, sample_count, DEFAULT_SEED)
    }

    /// The PRNG seed is part of the external interface: equal seeds yield
    /// equal sample populations.
    pub fn with_seed(
        program: Valid<Program>,
        debug_info: DebugInfo,
        sample_count: usize,
        seed: u64,
    ) -> Self {
        let ctx = Arc::new(ProgramContext::new(program, debug_info));
        let state = ExecutionState::initial(&ctx, sample_count);
        let mut debugger = Debugger {
            ctx,
            state,
            saved: vec![],
            rng: StdRng::seed_from_u64(seed),
            engine: WpInference::new(),
        };
        if debugger.ctx.debug_info.entry(&debugger.state.position).is_none() {
            debugger.advance_to_debug_position();
        }
        let initial = debugger.state.clone();
        debugger.saved.push(initial);
        debugger
    }

    /// Let the WP cache consult an algebraic-equivalence oracle.
    pub fn use_oracle(&mut self, oracle: Box<dyn EquivalenceOracle>) {
        self.engine = WpInference::with_oracle(oracle);
    }

    pub fn context(&self) -> &Arc<ProgramContext> {
        &self.ctx
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_at_return(&self.ctx)
    }

    fn current_kind(&self) -> Option<StatementKind> {
        self.ctx
            .debug_info
            .entry(&self.state.position)
            .map(|e| e.kind)
    }

    // run to one of the stop positions.  when observes filter every sample
    // away the execution is over: park an empty population at the return
    // position.
    fn advance_to(&mut self, stop: &Set<InstId>) {
        let state = self.state.clone();
        match exec::run_until_position(&self.ctx, state, stop, &mut self.rng) {
            Some(next) => self.state = next,
            None => {
                debug!("all samples filtered away; parking at the return position");
                self.state.samples.clear();
                self.state.position = self.ctx.program.return_position();
            }
        }
    }

    fn advance_to_debug_position(&mut self) {
        let stop = self.ctx.debug_info.positions();
        self.advance_to(&stop);
    }

    /// Step over the statement at the current position.  At a branch or a
    /// loop this runs to the join point (the first non-phi instruction of
    /// the immediate postdominator) and collapses the branching history with
    /// an `Any` entry for the branch block.
    pub fn step_over(&mut self) -> Result<(), DebuggerError> {
        if self.is_terminated() {
            return Err(DebuggerError::AlreadyTerminated);
        }
        match self.current_kind() {
            Some(StatementKind::IfElseBranch) | Some(StatementKind::Loop) => {
                let block = self.state.position.0.clone();
                let ipd = self.ctx.cfg.immediate_postdominator[&block]
                    .clone()
                    .unwrap_or_else(|| panic!("branch block `{block}` has no postdominator"));
                let join = self.ctx.first_non_phi_position(&ipd);
                let histories =
                    exec::collapse_histories(&self.state.branching_histories, &block);
                self.advance_to(&Set::from([join]));
                self.state.branching_histories = histories;
                if self.ctx.debug_info.entry(&self.state.position).is_none() && !self.is_terminated()
                {
                    self.advance_to_debug_position();
                }
            }
            _ => self.advance_to_debug_position(),
        }
        Ok(())
    }

    /// Step into one side of the branch at the current position, filtering
    /// the samples by the branch condition.
    pub fn step_into(&mut self, branch: bool) -> Result<(), DebuggerError> {
        if self.is_terminated() {
            return Err(DebuggerError::AlreadyTerminated);
        }
        let block = self.state.position.0.clone();
        let insts = self.ctx.program.block(&block).insts.len();
        let cond = match &self.ctx.program.block(&block).term {
            Terminal::Branch { cond, .. } if self.state.position.1 == insts => cond.clone(),
            _ => panic!(
                "step_into at {}.{}, which is not a branch",
                block, self.state.position.1
            ),
        };
        let filtered: Vec<Sample> = self
            .state
            .samples
            .iter()
            .filter(|s| s.eval(&cond).as_bool() == branch)
            .cloned()
            .collect();
        if filtered.is_empty() {
            return Err(DebuggerError::InfeasibleBranch);
        }
        let mut state = self.state.clone();
        state.samples = filtered;
        let child = exec::execute_next_instruction(&self.ctx, &state, &mut self.rng)
            .into_iter()
            .next()
            .expect("the filtered branch side is non-empty");
        self.state = child;
        if self.ctx.debug_info.entry(&self.state.position).is_none() && !self.is_terminated() {
            self.advance_to_debug_position();
        }
        Ok(())
    }

    /// Run every sample to the return terminal.  The branching history is
    /// collapsed around a block that predominates the return position and
    /// postdominates everything visited so far, so WP queries at the end
    /// stay conditioned on the deliberate choices taken outside that block's
    /// region.
    pub fn run_until_end(&mut self) -> Result<(), DebuggerError> {
        if self.is_terminated() {
            return Err(DebuggerError::AlreadyTerminated);
        }
        let collapse_block = self.run_to_end_collapse_block();
        let histories = self.collapse_for_run_to_end(&collapse_block);
        self.advance_to(&Set::new());
        self.state.branching_histories = histories;
        Ok(())
    }

    // a block that predominates the return position and postdominates the
    // current block and every block the histories mention; among those, the
    // one predominating all the others.
    fn run_to_end_collapse_block(&self) -> BbId {
        let cfg = &self.ctx.cfg;
        let mut visited: Set<BbId> = Set::from([self.state.position.0.clone()]);
        for history in &self.state.branching_histories {
            for choice in history {
                match choice {
                    BranchingChoice::Choice { from, to } => {
                        visited.insert(from.clone());
                        visited.insert(to.clone());
                    }
                    BranchingChoice::Any { predominated_by } => {
                        visited.insert(predominated_by.clone());
                    }
                }
            }
        }
        let candidates: Vec<BbId> = self
            .ctx
            .program
            .body
            .keys()
            .filter(|b| {
                cfg.predominates(b, &cfg.exit) && visited.iter().all(|v| cfg.postdominates(b, v))
            })
            .cloned()
            .collect();
        candidates
            .iter()
            .find(|c| candidates.iter().all(|o| cfg.predominates(c, o)))
            .cloned()
            .unwrap_or_else(|| cfg.exit.clone())
    }

    // drop the history entries covered by the collapse block's region and
    // append the Any entry that stands in for them.
    fn collapse_for_run_to_end(&self, block: &BbId) -> Vec<BranchingHistory> {
        let cfg = &self.ctx.cfg;
        let mut out: Vec<BranchingHistory> = self
            .state
            .branching_histories
            .iter()
            .map(|history| {
                let mut kept: BranchingHistory = history
                    .iter()
                    .filter(|choice| {
                        let covered = match choice {
                            BranchingChoice::Choice { from, .. } => from,
                            BranchingChoice::Any { predominated_by } => predominated_by,
                        };
                        !cfg.predominates(block, covered)
                    })
                    .cloned()
                    .collect();
                kept.push(BranchingChoice::Any {
                    predominated_by: block.clone(),
                });
                kept
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Replace the current state, clearing the user's save stack.
    pub fn jump_to_state(&mut self, state: ExecutionState) {
        self.saved.truncate(1);
        self.state = state;
    }

    pub fn save_state(&mut self) {
        self.saved.push(self.state.clone());
    }

    /// Restore the most recent save.  This pops (it does not peek): two
    /// restores in a row land on two different saves.
    pub fn restore_state(&mut self) -> Result<(), DebuggerError> {
        if self.saved.len() <= 1 {
            return Err(DebuggerError::NoSavedState);
        }
        self.state = self.saved.pop().expect("non-empty save stack");
        Ok(())
    }

    fn infer_here(&mut self, query: Term) -> InferenceResult {
        self.engine.infer(
            &self.ctx,
            query,
            self.state.loop_unrolls.clone(),
            self.state.position.clone(),
            self.state.branching_histories.clone(),
        )
    }

    /// For every source variable visible at the current position, the exact
    /// probability of each value observed in the samples.
    pub fn variable_values(
        &mut self,
        handling: ApproximationErrorHandling,
    ) -> Map<String, Map<Value, f64>> {
        let entry = match self.ctx.debug_info.entry(&self.state.position) {
            Some(entry) => entry.clone(),
            None => return Map::new(),
        };
        let mut out = Map::new();
        for (name, var) in &entry.vars {
            let observed: Set<Value> = self.state.samples.iter().map(|s| s.get(var)).collect();
            if observed.is_empty() {
                continue;
            }
            let mut values: Map<Value, f64> = Map::new();
            let mut runs_not_cut_off = 1.0;
            for value in observed {
                let value_term = match value {
                    Value::Int(n) => term::int(n),
                    Value::Bool(b) => term::boolean(b),
                };
                let query = term::bool_to_int(term::equal(term::var(var.clone()), value_term));
                let result = self.infer_here(query);
                runs_not_cut_off = result.runs_not_cut_off;
                values.insert(value, result.probability());
            }
            if handling == ApproximationErrorHandling::Distribute && runs_not_cut_off < 1.0 {
                let missing = 1.0 - runs_not_cut_off;
                let count = values.len() as f64;
                for p in values.values_mut() {
                    *p += missing / count;
                }
            }
            out.insert(name.clone(), values);
        }
        out
    }

    /// The source ranges the user can hide without losing any information
    /// about the given variable: the complement of its slice.
    pub fn slice(&mut self, source_variable: &str) -> Result<Set<SourceRange>, DebuggerError> {
        let entry = self
            .ctx
            .debug_info
            .entry(&self.state.position)
            .cloned()
            .ok_or_else(|| DebuggerError::UnknownVariable(source_variable.to_string()))?;
        let var = entry
            .vars
            .get(source_variable)
            .cloned()
            .ok_or_else(|| DebuggerError::UnknownVariable(source_variable.to_string()))?;
        let ctx = self.ctx.clone();
        let slice = self.engine.slice(
            &ctx,
            &var,
            &self.state.loop_unrolls,
            &self.state.position,
            &self.state.branching_histories,
        );
        let in_slice: Set<SourceRange> = slice
            .iter()
            .filter_map(|pos| ctx.debug_info.instruction_ranges.get(pos).copied())
            .collect();
        Ok(ctx
            .debug_info
            .statement_ranges()
            .difference(&in_slice)
            .copied()
            .collect())
    }

    // SECTION: read-only projections

    pub fn source_location(&self) -> Option<SourceRange> {
        self.ctx
            .debug_info
            .entry(&self.state.position)
            .map(|e| e.range)
    }

    /// The source-variable values of every sample at the current position.
    pub fn samples(&self) -> Vec<Map<String, Value>> {
        let entry = match self.ctx.debug_info.entry(&self.state.position) {
            Some(entry) => entry,
            None => return vec![],
        };
        self.state
            .samples
            .iter()
            .map(|sample| {
                entry
                    .vars
                    .iter()
                    .map(|(name, var)| (name.clone(), sample.get(var)))
                    .collect()
            })
            .collect()
    }

    /// The sample histograms refined into exact probabilities.
    pub fn variable_values_refined_using_wp(&mut self) -> Map<String, Map<Value, f64>> {
        self.variable_values(ApproximationErrorHandling::Drop)
    }

    /// The probability that a fresh run reaches the current position along
    /// the followed path and satisfies every observe on the way.
    pub fn reaching_probability(&mut self) -> f64 {
        self.infer_here(term::int(1)).value
    }

    pub fn approximation_error(&mut self) -> f64 {
        self.infer_here(term::int(1)).approximation_error()
    }
}
