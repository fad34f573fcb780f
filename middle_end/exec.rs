//! The sampling forward executor.
//!
//! A population of samples is pushed through the program one instruction at
//! a time.  Executing a branch splits the population and records the taken
//! edge in every branching history; executing an observe drops the failing
//! samples.  The executor itself is stateless: all progress lives in
//! [`ExecutionState`] values.

use std::collections::VecDeque;
use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt::{self, Display};

use rand::rngs::StdRng;
use rand::Rng;

use super::analysis::{LoopId, ProgramContext};
use super::ir::*;

#[cfg(test)]
mod tests;

/// A concrete runtime value.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum Value {
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn as_int(self) -> i64 {
        match self {
            Value::Int(n) => n,
            Value::Bool(_) => unreachable!("expected an int value"),
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Int(_) => unreachable!("expected a bool value"),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// One sample: a stable id plus the values of the variables assigned so far.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sample {
    pub id: u64,
    pub values: Map<VarId, Value>,
}

impl Sample {
    pub fn get(&self, v: &VarId) -> Value {
        *self
            .values
            .get(v)
            .unwrap_or_else(|| panic!("sample {} has no value for `{v}`", self.id))
    }

    pub fn eval(&self, op: &Operand) -> Value {
        match op {
            Operand::Var(v) => self.get(v),
            Operand::CInt(n) => Value::Int(*n),
            Operand::CBool(b) => Value::Bool(*b),
        }
    }
}

/// One element of a branching history.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum BranchingChoice {
    /// A deliberate branch that backwards inference must reproduce exactly.
    Choice { from: BbId, to: BbId },
    /// An arbitrary number of non-deliberate branches through blocks
    /// predominated by the given block.  Collapses the steps taken by
    /// "step over".
    Any { predominated_by: BbId },
}

/// A sequence of branching choices describing how execution got to where it
/// is.  A state carries a non-empty list of histories; the list is an OR
/// over paths.
pub type BranchingHistory = Vec<BranchingChoice>;

/// The full state of a (possibly split) forward execution.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionState {
    pub position: InstId,
    /// Order is preserved across steps so that sample ids track
    /// deterministically.
    pub samples: Vec<Sample>,
    /// For each loop, how many times it has been traversed along the merged
    /// execution branches reaching this state.
    pub loop_unrolls: Map<LoopId, Set<u64>>,
    pub branching_histories: Vec<BranchingHistory>,
}

impl ExecutionState {
    /// The state at program entry: empty-valued samples, one empty history,
    /// and a zero unroll count for every loop of the program.
    pub fn initial(ctx: &ProgramContext, sample_count: usize) -> Self {
        let samples = (0..sample_count as u64)
            .map(|id| Sample {
                id,
                values: Map::new(),
            })
            .collect();
        let loop_unrolls = ctx
            .cfg
            .loop_edges
            .iter()
            .map(|l| (l.clone(), Set::from([0])))
            .collect();
        ExecutionState {
            position: (ctx.program.entry.clone(), 0),
            samples,
            loop_unrolls,
            branching_histories: vec![vec![]],
        }
    }

    pub fn is_at_return(&self, ctx: &ProgramContext) -> bool {
        self.position == ctx.program.return_position()
    }
}

// SECTION: single-instruction execution

/// Execute the instruction at the state's position, producing the child
/// states.  An observe that filters out every sample produces zero
/// children; a branch produces one child per non-empty side.  Executing the
/// return terminal is a programmer error.
pub fn execute_next_instruction(
    ctx: &ProgramContext,
    state: &ExecutionState,
    rng: &mut StdRng,
) -> Vec<ExecutionState> {
    let (bb, idx) = &state.position;
    let block = ctx.program.block(bb);

    if *idx < block.insts.len() {
        return execute_instruction(state, &block.insts[*idx], rng);
    }

    match &block.term {
        Terminal::Jump(target) => {
            let mut child = state.clone();
            child.position = enter_block(ctx, &mut child.samples, bb, target);
            vec![child]
        }
        Terminal::Branch { cond, tt, ff } => {
            let mut children = vec![];
            let sides: Vec<(&BbId, Option<bool>)> = if tt == ff {
                vec![(tt, None)]
            } else {
                vec![(tt, Some(true)), (ff, Some(false))]
            };
            for (target, wanted) in sides {
                let samples: Vec<Sample> = match wanted {
                    Some(wanted) => state
                        .samples
                        .iter()
                        .filter(|s| s.eval(cond).as_bool() == wanted)
                        .cloned()
                        .collect(),
                    None => state.samples.clone(),
                };
                if samples.is_empty() {
                    continue;
                }
                let mut child = state.clone();
                child.samples = samples;
                for history in &mut child.branching_histories {
                    history.push(BranchingChoice::Choice {
                        from: bb.clone(),
                        to: target.clone(),
                    });
                }
                let loop_id = (bb.clone(), target.clone());
                if ctx.cfg.loop_edges.contains(&loop_id) {
                    let unrolls = child
                        .loop_unrolls
                        .get_mut(&loop_id)
                        .unwrap_or_else(|| panic!("loop {loop_id:?} has no unroll entry"));
                    *unrolls = unrolls.iter().map(|n| n + 1).collect();
                }
                child.position = enter_block(ctx, &mut child.samples, bb, target);
                children.push(child);
            }
            children
        }
        Terminal::Ret => unreachable!("already terminated: cannot step from the return terminal"),
    }
}

// move the samples into `to`, executing the phi prefix of the target keyed
// by the source block.  returns the position just past the phis.
fn enter_block(ctx: &ProgramContext, samples: &mut Vec<Sample>, from: &BbId, to: &BbId) -> InstId {
    let block = ctx.program.block(to);
    let first_non_phi = ctx.program.first_non_phi(to);
    for inst in &block.insts[..first_non_phi] {
        if let Instruction::Phi { lhs, choices } = inst {
            let source = choices
                .get(from)
                .unwrap_or_else(|| panic!("phi `{lhs}` in `{to}` has no arm for `{from}`"));
            for sample in samples.iter_mut() {
                let value = sample.get(source);
                sample.values.insert(lhs.clone(), value);
            }
        }
    }
    (to.clone(), first_non_phi)
}

fn execute_instruction(
    state: &ExecutionState,
    inst: &Instruction,
    rng: &mut StdRng,
) -> Vec<ExecutionState> {
    let mut child = state.clone();
    child.position.1 += 1;

    match inst {
        Instruction::Copy { lhs, op } => {
            for sample in &mut child.samples {
                let value = sample.eval(op);
                sample.values.insert(lhs.clone(), value);
            }
        }
        Instruction::Arith { lhs, aop, op1, op2 } => {
            for sample in &mut child.samples {
                let a = sample.eval(op1).as_int();
                let b = sample.eval(op2).as_int();
                let value = match aop {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                };
                sample.values.insert(lhs.clone(), Value::Int(value));
            }
        }
        Instruction::Cmp { lhs, rop, op1, op2 } => {
            for sample in &mut child.samples {
                let a = sample.eval(op1).as_int();
                let b = sample.eval(op2).as_int();
                let value = match rop {
                    RelaOp::Eq => a == b,
                    RelaOp::Lt => a < b,
                };
                sample.values.insert(lhs.clone(), Value::Bool(value));
            }
        }
        Instruction::Discrete { lhs, dist } => {
            // one draw per sample; the distribution is not branched.
            for sample in &mut child.samples {
                let value = draw(dist, rng);
                sample.values.insert(lhs.clone(), Value::Int(value));
            }
        }
        Instruction::Observe { cond } => {
            child.samples.retain(|s| s.eval(cond).as_bool());
            if child.samples.is_empty() {
                return vec![];
            }
        }
        Instruction::Phi { .. } => {
            unreachable!(
                "phi at {:?} executed directly; phis run when their block is entered",
                state.position
            )
        }
    }
    vec![child]
}

fn draw(dist: &[(i64, f64)], rng: &mut StdRng) -> i64 {
    let roll: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (value, prob) in dist {
        cumulative += prob;
        if roll < cumulative {
            return *value;
        }
    }
    // numeric slack: probabilities sum to 1 up to rounding
    dist.last().expect("empty distribution").0
}

// SECTION: drivers

/// Advance the state until every execution branch has entered `stop` or
/// reached the return terminal, then merge the collected branches.  Returns
/// `None` if observes filtered every branch away.
pub fn run_until_position(
    ctx: &ProgramContext,
    state: ExecutionState,
    stop: &Set<InstId>,
    rng: &mut StdRng,
) -> Option<ExecutionState> {
    let ret = ctx.program.return_position();
    let mut collected = vec![];
    let mut worklist = VecDeque::from([state]);
    while let Some(s) = worklist.pop_front() {
        if s.position == ret {
            collected.push(s);
            continue;
        }
        for child in execute_next_instruction(ctx, &s, rng) {
            if stop.contains(&child.position) || child.position == ret {
                collected.push(child);
            } else {
                worklist.push_back(child);
            }
        }
    }
    if collected.is_empty() {
        None
    } else {
        Some(merge(collected))
    }
}

/// Execute exactly one instruction.  The caller guarantees there is at most
/// one viable child (i.e. the position does not hold a splitting branch).
pub fn run_until_next_instruction(
    ctx: &ProgramContext,
    state: ExecutionState,
    rng: &mut StdRng,
) -> Option<ExecutionState> {
    let mut children = execute_next_instruction(ctx, &state, rng);
    assert!(
        children.len() <= 1,
        "run_until_next_instruction: execution split at {:?}",
        state.position
    );
    children.pop()
}

/// Run every execution branch to the return terminal.
pub fn run_until_end(
    ctx: &ProgramContext,
    state: ExecutionState,
    rng: &mut StdRng,
) -> Option<ExecutionState> {
    run_until_position(ctx, state, &Set::new(), rng)
}

/// The histories of a pre-branch state, each collapsed with an `Any` entry
/// covering the region the branch block predominates.  Used by "step over"
/// and the outline builder to keep history lists from growing per path.
pub fn collapse_histories(histories: &[BranchingHistory], block: &BbId) -> Vec<BranchingHistory> {
    let mut out: Vec<BranchingHistory> = histories
        .iter()
        .cloned()
        .map(|mut h| {
            h.push(BranchingChoice::Any {
                predominated_by: block.clone(),
            });
            h
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Merge execution branches that stopped at the same position: samples and
/// histories concatenate, unroll-count sets union per loop.  Positions must
/// agree.
pub fn merge(states: Vec<ExecutionState>) -> ExecutionState {
    let mut iter = states.into_iter();
    let mut merged = iter.next().expect("merge of zero execution states");
    for s in iter {
        assert!(
            s.position == merged.position,
            "merge: positions differ ({:?} vs {:?})",
            merged.position,
            s.position
        );
        merged.samples.extend(s.samples);
        for (loop_id, counts) in s.loop_unrolls {
            merged
                .loop_unrolls
                .entry(loop_id)
                .or_default()
                .extend(counts);
        }
        merged.branching_histories.extend(s.branching_histories);
    }
    merged
}
