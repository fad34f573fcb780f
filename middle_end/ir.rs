//! The SSA intermediate representation of a probabilistic program.
//!
//! A program is a map from basic block names to basic blocks; every block
//! ends in a terminal.  Every variable is assigned by exactly one
//! instruction, and phi instructions (which may only appear as a prefix of a
//! block) select their source variable based on the immediately preceding
//! block of the current execution.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt::{self, Display};
use std::sync::Arc;

use crate::commons::{SourceRange, Valid};

pub mod cfg_dump_impl;
mod fromstr_impl;

// SECTION: identifiers

/// A basic block name.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct BbId(Arc<str>);

pub fn bb_id(name: &str) -> BbId {
    BbId(name.into())
}

impl BbId {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Display for BbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of an IR variable.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum Type {
    Int,
    Bool,
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
        }
    }
}

#[derive(Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
struct VarInfo {
    name: String,
    typ: Type,
}

/// An IR variable: a name plus its type.  Cheap to clone.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct VarId(Arc<VarInfo>);

pub fn var_id(name: &str, typ: Type) -> VarId {
    VarId(Arc::new(VarInfo {
        name: name.to_string(),
        typ,
    }))
}

impl VarId {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn typ(&self) -> Type {
        self.0.typ
    }
}

impl Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

/// Instruction IDs: the basic block plus the index of the instruction in the
/// block.  The block's terminal sits at index `insts.len()`.
pub type InstId = (BbId, usize);

// SECTION: instructions

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum Operand {
    Var(VarId),
    CInt(i64),
    CBool(bool),
}

impl Operand {
    pub fn typ(&self) -> Type {
        match self {
            Operand::Var(v) => v.typ(),
            Operand::CInt(_) => Type::Int,
            Operand::CBool(_) => Type::Bool,
        }
    }

    pub fn as_var(&self) -> Option<&VarId> {
        match self {
            Operand::Var(v) => Some(v),
            _ => None,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(v) => write!(f, "{}:{}", v.name(), v.typ()),
            Operand::CInt(n) => write!(f, "{n}"),
            Operand::CBool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum ArithOp {
    Add,
    Sub,
}

impl Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "add"),
            ArithOp::Sub => write!(f, "sub"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum RelaOp {
    Eq,
    Lt,
}

impl Display for RelaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelaOp::Eq => write!(f, "eq"),
            RelaOp::Lt => write!(f, "lt"),
        }
    }
}

/// A non-terminal instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// `lhs = $copy op`
    Copy { lhs: VarId, op: Operand },
    /// `lhs = $arith aop op1, op2` (integer arithmetic)
    Arith {
        lhs: VarId,
        aop: ArithOp,
        op1: Operand,
        op2: Operand,
    },
    /// `lhs = $cmp rop op1, op2` (integer comparison, yields bool)
    Cmp {
        lhs: VarId,
        rop: RelaOp,
        op1: Operand,
        op2: Operand,
    },
    /// `lhs = $discrete {k: p, ...}`: one draw per sample from the given
    /// distribution.  Probabilities are non-negative and sum to 1.
    Discrete { lhs: VarId, dist: Vec<(i64, f64)> },
    /// `$observe cond`: drops samples whose condition is false.
    Observe { cond: Operand },
    /// `lhs = $phi(pred: var, ...)`: selects by the immediately preceding
    /// block.  Choice keys are exactly the direct predecessors.
    Phi {
        lhs: VarId,
        choices: Map<BbId, VarId>,
    },
}

impl Instruction {
    /// The variable this instruction assigns, if any.
    pub fn def(&self) -> Option<&VarId> {
        use Instruction::*;
        match self {
            Copy { lhs, .. } => Some(lhs),
            Arith { lhs, .. } => Some(lhs),
            Cmp { lhs, .. } => Some(lhs),
            Discrete { lhs, .. } => Some(lhs),
            Observe { .. } => None,
            Phi { lhs, .. } => Some(lhs),
        }
    }

    /// The variables this instruction reads.
    pub fn uses(&self) -> Vec<VarId> {
        use Instruction::*;
        let of_ops = |ops: &[&Operand]| {
            ops.iter()
                .filter_map(|op| op.as_var().cloned())
                .collect::<Vec<_>>()
        };
        match self {
            Copy { op, .. } => of_ops(&[op]),
            Arith { op1, op2, .. } => of_ops(&[op1, op2]),
            Cmp { op1, op2, .. } => of_ops(&[op1, op2]),
            Discrete { .. } => vec![],
            Observe { cond } => of_ops(&[cond]),
            Phi { choices, .. } => choices.values().cloned().collect(),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        let tv = |v: &VarId| format!("{}:{}", v.name(), v.typ());
        match self {
            Copy { lhs, op } => write!(f, "{} = $copy {op}", tv(lhs)),
            Arith { lhs, aop, op1, op2 } => {
                write!(f, "{} = $arith {aop} {op1}, {op2}", tv(lhs))
            }
            Cmp { lhs, rop, op1, op2 } => {
                write!(f, "{} = $cmp {rop} {op1}, {op2}", tv(lhs))
            }
            Discrete { lhs, dist } => {
                let entries = dist
                    .iter()
                    .map(|(k, p)| format!("{k}: {p}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} = $discrete {{{entries}}}", tv(lhs))
            }
            Observe { cond } => write!(f, "$observe {cond}"),
            Phi { lhs, choices } => {
                let args = choices
                    .iter()
                    .map(|(bb, v)| format!("{bb}: {}", tv(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} = $phi({args})", tv(lhs))
            }
        }
    }
}

/// The terminal of a basic block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Terminal {
    Jump(BbId),
    Branch { cond: Operand, tt: BbId, ff: BbId },
    Ret,
}

impl Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Jump(bb) => write!(f, "$jump {bb}"),
            Terminal::Branch { cond, tt, ff } => write!(f, "$branch {cond} {tt} {ff}"),
            Terminal::Ret => write!(f, "$ret"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    pub id: BbId,
    pub insts: Vec<Instruction>,
    pub term: Terminal,
}

// SECTION: programs

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub entry: BbId,
    pub body: Map<BbId, BasicBlock>,
}

impl Program {
    pub fn block(&self, bb: &BbId) -> &BasicBlock {
        self.body
            .get(bb)
            .unwrap_or_else(|| panic!("unknown basic block `{bb}`"))
    }

    /// The instruction at the given position, or `None` for the terminal
    /// position of a block.
    pub fn inst_at(&self, pos: &InstId) -> Option<&Instruction> {
        self.block(&pos.0).insts.get(pos.1)
    }

    /// The block containing the `$ret` terminal.
    pub fn exit_block(&self) -> BbId {
        for (id, bb) in &self.body {
            if matches!(bb.term, Terminal::Ret) {
                return id.clone();
            }
        }
        unreachable!("program has no $ret block")
    }

    /// The position of the `$ret` terminal.
    pub fn return_position(&self) -> InstId {
        let exit = self.exit_block();
        let len = self.block(&exit).insts.len();
        (exit, len)
    }

    /// The index of the first non-phi instruction of a block (which may be
    /// the terminal index if the block holds only phis).
    pub fn first_non_phi(&self, bb: &BbId) -> usize {
        self.block(bb)
            .insts
            .iter()
            .position(|i| !matches!(i, Instruction::Phi { .. }))
            .unwrap_or_else(|| self.block(bb).insts.len())
    }

    pub fn validate(self) -> Result<Valid<Program>, ValidationError> {
        validate(self)
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the entry block is printed first so that parsing the output yields
        // the same program back.
        let mut order = vec![self.entry.clone()];
        order.extend(self.body.keys().filter(|b| **b != self.entry).cloned());
        for bb in order {
            let block = self.block(&bb);
            writeln!(f, "{bb}:")?;
            for inst in &block.insts {
                writeln!(f, "  {inst}")?;
            }
            writeln!(f, "  {}", block.term)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

// SECTION: debug info

/// How a debug-info position renders in the source program.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum StatementKind {
    Simple,
    IfElseBranch,
    Loop,
    Return,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DebugInfoEntry {
    pub range: SourceRange,
    pub kind: StatementKind,
    /// Visible source variables at this position, mapped to the IR variable
    /// holding their current value.  Shadowing variables appear as `name#n`
    /// (n >= 2).
    pub vars: Map<String, VarId>,
}

/// Maps the IR positions that correspond to source statements to their
/// source information.  Only a subset of IR positions carries debug info.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebugInfo {
    pub entries: Map<InstId, DebugInfoEntry>,
    /// The statement range covering each IR instruction (all of them, not
    /// just the stop positions).  Used to map slices back to source ranges.
    pub instruction_ranges: Map<InstId, SourceRange>,
}

impl DebugInfo {
    pub fn entry(&self, pos: &InstId) -> Option<&DebugInfoEntry> {
        self.entries.get(pos)
    }

    pub fn positions(&self) -> Set<InstId> {
        self.entries.keys().cloned().collect()
    }

    /// All statement ranges known to the debug info.
    pub fn statement_ranges(&self) -> Set<SourceRange> {
        self.entries.values().map(|e| e.range).collect()
    }
}

// SECTION: validation

/// An accumulated list of validation failures.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationError(pub Vec<String>);

impl ValidationError {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, msg: String) {
        self.0.push(msg);
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for msg in &self.0 {
            writeln!(f, "{msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Check the structural invariants of a program: SSA single assignment, phi
/// placement and keys, terminal targets, discrete distributions, a unique
/// `$ret`, and reachability.
pub fn validate(program: Program) -> Result<Valid<Program>, ValidationError> {
    let mut errors = ValidationError::default();

    if !program.body.contains_key(&program.entry) {
        errors.push(format!("entry block `{}` does not exist", program.entry));
        return Err(errors);
    }

    // terminal targets exist; count rets; collect predecessors.
    let mut preds: Map<BbId, Set<BbId>> = program.body.keys().map(|b| (b.clone(), Set::new())).collect();
    let mut rets = 0;
    for (bbid, bb) in &program.body {
        let mut targets = vec![];
        match &bb.term {
            Terminal::Jump(t) => targets.push(t),
            Terminal::Branch { tt, ff, cond } => {
                if cond.typ() != Type::Bool {
                    errors.push(format!("{bbid}: branch condition `{cond}` is not bool"));
                }
                targets.push(tt);
                targets.push(ff);
            }
            Terminal::Ret => rets += 1,
        }
        for t in targets {
            match preds.get_mut(t) {
                Some(set) => {
                    set.insert(bbid.clone());
                }
                None => errors.push(format!("{bbid}: terminal targets unknown block `{t}`")),
            }
        }
    }
    if rets != 1 {
        errors.push(format!("program has {rets} `$ret` blocks, expected exactly 1"));
    }
    if !preds[&program.entry].is_empty() {
        errors.push(format!("entry block `{}` has predecessors", program.entry));
    }

    // SSA: each variable assigned exactly once; collect definitions.
    let mut defs: Map<VarId, InstId> = Map::new();
    for (bbid, bb) in &program.body {
        for (i, inst) in bb.insts.iter().enumerate() {
            if let Some(lhs) = inst.def() {
                if let Some(prev) = defs.insert(lhs.clone(), (bbid.clone(), i)) {
                    errors.push(format!(
                        "variable `{lhs}` assigned at {}.{} and {bbid}.{i}",
                        prev.0, prev.1
                    ));
                }
            }
        }
    }

    // phi placement, keys, and sources; uses are defined somewhere.
    for (bbid, bb) in &program.body {
        let first_non_phi = bb
            .insts
            .iter()
            .position(|i| !matches!(i, Instruction::Phi { .. }))
            .unwrap_or(bb.insts.len());
        let phi_defs: Set<VarId> = bb.insts[..first_non_phi]
            .iter()
            .filter_map(|i| i.def().cloned())
            .collect();
        for (i, inst) in bb.insts.iter().enumerate() {
            if let Instruction::Phi { lhs, choices } = inst {
                if i >= first_non_phi {
                    errors.push(format!("{bbid}.{i}: phi `{lhs}` after a non-phi instruction"));
                }
                let keys: Set<BbId> = choices.keys().cloned().collect();
                if keys != preds.get(bbid).cloned().unwrap_or_default() {
                    errors.push(format!(
                        "{bbid}.{i}: phi `{lhs}` keys differ from direct predecessors"
                    ));
                }
                for src in choices.values() {
                    if phi_defs.contains(src) {
                        errors.push(format!(
                            "{bbid}.{i}: phi `{lhs}` reads `{src}` defined by a phi of the same block"
                        ));
                    }
                }
            }
            if let Instruction::Discrete { lhs, dist } = inst {
                let sum: f64 = dist.iter().map(|(_, p)| *p).sum();
                if dist.iter().any(|(_, p)| *p < 0.0) || (sum - 1.0).abs() > 1e-9 {
                    errors.push(format!(
                        "{bbid}.{i}: distribution of `{lhs}` is not a probability distribution"
                    ));
                }
            }
            for used in inst.uses() {
                if !defs.contains_key(&used) {
                    errors.push(format!("{bbid}.{i}: use of undefined variable `{used}`"));
                }
            }
        }
    }

    // all blocks reachable from the entry.
    let mut reachable = Set::new();
    let mut worklist = vec![program.entry.clone()];
    while let Some(bb) = worklist.pop() {
        if !reachable.insert(bb.clone()) {
            continue;
        }
        if let Some(block) = program.body.get(&bb) {
            match &block.term {
                Terminal::Jump(t) => worklist.push(t.clone()),
                Terminal::Branch { tt, ff, .. } => {
                    worklist.push(tt.clone());
                    worklist.push(ff.clone());
                }
                Terminal::Ret => {}
            }
        }
    }
    for bb in program.body.keys() {
        if !reachable.contains(bb) {
            errors.push(format!("block `{bb}` is unreachable from the entry"));
        }
    }

    if errors.is_empty() {
        Ok(Valid(program))
    } else {
        Err(errors)
    }
}
