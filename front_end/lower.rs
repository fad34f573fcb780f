// lower the AST to the SSA IR.  assumes the AST is valid; may panic if it
// is not.
//
// every assignment creates a fresh version of its variable (`x`, `x$1`,
// `x$2`, ...).  if/else arms merge through phis in a join block; while
// loops get a header block with one phi per variable assigned in the body,
// whose back-edge arm is patched in once the body is lowered.  shadowing
// declarations are exposed under a `name#n` display name (n >= 2).
//
// alongside the program we emit the debug info: one entry per source
// statement (simple statements at the first instruction of their lowering,
// if/while at their branch terminal, the implicit end of the program at the
// return terminal), each carrying the visible source-variable bindings at
// that point.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use super::ast::{BinOp, Exp, ExpKind, Program, Stmt};
use crate::commons::{SourceRange, Valid};
use crate::middle_end::ir::{
    self, bb_id, var_id, ArithOp, BasicBlock, BbId, DebugInfo, DebugInfoEntry, Instruction,
    Operand, RelaOp, StatementKind, Terminal, Type, VarId,
};

// SECTION: public interface

pub fn lower(ast: &Valid<Program>) -> (ir::Program, DebugInfo) {
    let mut info = Lowering::new();
    let entry = bb_id("entry");
    info.new_block(entry.clone());
    info.curr_bb = entry.clone();

    lower_stmts(&ast.0.stmts, &mut info);

    // the implicit end of the program is a Return debug stop.
    let end = ast.0.stmts.last().map(|s| s.range().end).unwrap_or(0);
    let ret_pos = (info.curr_bb.clone(), info.insts_len());
    info.debug.entries.insert(
        ret_pos,
        DebugInfoEntry {
            range: SourceRange::new(end, end),
            kind: StatementKind::Return,
            vars: info.visible_vars(),
        },
    );
    info.set_terminal(Terminal::Ret);

    (
        ir::Program {
            entry,
            body: info.body,
        },
        info.debug,
    )
}

// SECTION: utilities

#[derive(Clone, Debug)]
struct Binding {
    display: String, // the name shown to the user (`x`, or `x#2` when shadowing)
    typ: Type,
    current: VarId, // the SSA version currently holding the value
}

#[derive(Clone, Debug)]
struct Lowering {
    body: Map<BbId, BasicBlock>,
    debug: DebugInfo,
    curr_bb: BbId,
    // scope stack of raw source name -> binding
    scopes: Vec<Map<String, Binding>>,
    // next SSA version per display name
    versions: Map<String, u32>,
    // how many declarations of each raw name have been seen
    shadow_counts: Map<String, u32>,
    // the source range of the statement currently being lowered
    current_range: SourceRange,
    tmp_ctr: u32,
    bb_ctr: u32,
}

impl Lowering {
    fn new() -> Self {
        Lowering {
            body: Map::new(),
            debug: DebugInfo::default(),
            curr_bb: bb_id("entry"),
            scopes: vec![Map::new()],
            versions: Map::new(),
            shadow_counts: Map::new(),
            current_range: SourceRange::default(),
            tmp_ctr: 0,
            bb_ctr: 0,
        }
    }

    // creates a fresh basic block label.
    fn create_bb(&mut self) -> BbId {
        self.bb_ctr += 1;
        bb_id(&("bb".to_string() + &self.bb_ctr.to_string()))
    }

    // creates a fresh temporary for intermediate expression results.  `$` is
    // not lexable in source identifiers, so temporaries cannot collide.
    fn create_tmp(&mut self, typ: Type) -> VarId {
        self.tmp_ctr += 1;
        var_id(&format!("$t{}", self.tmp_ctr), typ)
    }

    // the next SSA version of a display name.
    fn fresh_version(&mut self, display: &str, typ: Type) -> VarId {
        let n = self.versions.entry(display.to_string()).or_insert(0);
        let name = if *n == 0 {
            display.to_string()
        } else {
            format!("{display}${n}")
        };
        *n += 1;
        var_id(&name, typ)
    }

    // declare a (possibly shadowing) variable in the innermost scope.
    fn declare(&mut self, name: &str, typ: Type) -> VarId {
        let count = self.shadow_counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        let display = if *count == 1 {
            name.to_string()
        } else {
            format!("{name}#{count}")
        };
        let lhs = self.fresh_version(&display, typ);
        let binding = Binding {
            display,
            typ,
            current: lhs.clone(),
        };
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), binding);
        lhs
    }

    fn lookup(&self, name: &str) -> &Binding {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .unwrap_or_else(|| unreachable!("lookup of undeclared variable `{name}`"))
    }

    // the innermost scope index holding a binding for `name`.
    fn scope_index_of(&self, name: &str) -> Option<usize> {
        self.scopes.iter().rposition(|scope| scope.contains_key(name))
    }

    // all visible bindings, keyed by display name (shadowed variables stay
    // visible under their `name#n` spelling).
    fn visible_vars(&self) -> Map<String, VarId> {
        let mut out = Map::new();
        for scope in &self.scopes {
            for binding in scope.values() {
                out.insert(binding.display.clone(), binding.current.clone());
            }
        }
        out
    }

    fn push_scope(&mut self) {
        self.scopes.push(Map::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn insts_len(&self) -> usize {
        self.body[&self.curr_bb].insts.len()
    }

    // create a block whose terminal is a sentinel, to be set later.
    fn new_block(&mut self, id: BbId) {
        assert!(!self.body.contains_key(&id));
        self.body.insert(
            id.clone(),
            BasicBlock {
                id,
                insts: vec![],
                term: Terminal::Jump(bb_id("_SENTINEL")),
            },
        );
    }

    // add an instruction to the end of the current block, tagging it with
    // the range of the statement being lowered.
    fn add_inst(&mut self, inst: Instruction) {
        let pos = (self.curr_bb.clone(), self.insts_len());
        self.debug.instruction_ranges.insert(pos, self.current_range);
        self.body
            .get_mut(&self.curr_bb)
            .expect("current block exists")
            .insts
            .push(inst);
    }

    // set the terminal of the current block, which must still be a sentinel.
    fn set_terminal(&mut self, term: Terminal) {
        let block = self.body.get_mut(&self.curr_bb).expect("current block exists");
        assert!(
            matches!(&block.term, Terminal::Jump(bb) if bb.name() == "_SENTINEL"),
            "terminal of `{}` set twice",
            self.curr_bb
        );
        let pos = (self.curr_bb.clone(), block.insts.len());
        self.debug.instruction_ranges.insert(pos, self.current_range);
        block.term = term;
    }

    // a debug stop at the current position, before the statement's
    // instructions are emitted.
    fn record_stop(&mut self, range: SourceRange, kind: StatementKind) {
        let pos = (self.curr_bb.clone(), self.insts_len());
        self.debug.entries.insert(
            pos,
            DebugInfoEntry {
                range,
                kind,
                vars: self.visible_vars(),
            },
        );
    }
}

// SECTION: lowering implementation

fn lower_stmts(stmts: &[Stmt], info: &mut Lowering) {
    for stmt in stmts {
        lower_stmt(stmt, info);
    }
}

fn lower_stmt(stmt: &Stmt, info: &mut Lowering) {
    match stmt {
        Stmt::Decl {
            name,
            typ,
            init,
            range,
        } => {
            info.current_range = *range;
            info.record_stop(*range, StatementKind::Simple);
            let op = lower_exp(init, info);
            let lhs = info.declare(name, *typ);
            info.add_inst(Instruction::Copy { lhs, op });
        }
        Stmt::Assign { name, rhs, range } => {
            info.current_range = *range;
            info.record_stop(*range, StatementKind::Simple);
            let op = lower_exp(rhs, info);
            let (display, typ) = {
                let binding = info.lookup(name);
                (binding.display.clone(), binding.typ)
            };
            let lhs = info.fresh_version(&display, typ);
            info.add_inst(Instruction::Copy {
                lhs: lhs.clone(),
                op,
            });
            let idx = info.scope_index_of(name).expect("assigned variable is declared");
            info.scopes[idx].get_mut(name).expect("binding exists").current = lhs;
        }
        Stmt::Observe { cond, range } => {
            info.current_range = *range;
            info.record_stop(*range, StatementKind::Simple);
            let op = lower_exp(cond, info);
            info.add_inst(Instruction::Observe { cond: op });
        }
        Stmt::Block { body, .. } => {
            info.push_scope();
            lower_stmts(body, info);
            info.pop_scope();
        }
        Stmt::If {
            guard,
            tt,
            ff,
            range,
        } => lower_if(guard, tt, ff, *range, info),
        Stmt::While { guard, body, range } => lower_while(guard, body, *range, info),
    }
}

fn lower_if(guard: &Exp, tt: &[Stmt], ff: &[Stmt], range: SourceRange, info: &mut Lowering) {
    info.current_range = range;
    let cond = lower_exp(guard, info);

    // the debug stop sits at the branch terminal: the condition has been
    // evaluated when the debugger stops here.
    info.record_stop(range, StatementKind::IfElseBranch);

    let tt_bb = info.create_bb();
    let ff_bb = info.create_bb();
    let join_bb = info.create_bb();
    info.set_terminal(Terminal::Branch {
        cond,
        tt: tt_bb.clone(),
        ff: ff_bb.clone(),
    });

    let saved_scopes = info.scopes.clone();

    info.new_block(tt_bb.clone());
    info.curr_bb = tt_bb;
    info.push_scope();
    lower_stmts(tt, info);
    info.pop_scope();
    let tt_end = info.curr_bb.clone();
    let tt_scopes = info.scopes.clone();
    info.current_range = range;
    info.set_terminal(Terminal::Jump(join_bb.clone()));

    info.scopes = saved_scopes.clone();
    info.new_block(ff_bb.clone());
    info.curr_bb = ff_bb;
    info.push_scope();
    lower_stmts(ff, info);
    info.pop_scope();
    let ff_end = info.curr_bb.clone();
    let ff_scopes = info.scopes.clone();
    info.current_range = range;
    info.set_terminal(Terminal::Jump(join_bb.clone()));

    // merge the arms: a phi for every outer binding whose version differs.
    info.scopes = saved_scopes;
    info.new_block(join_bb.clone());
    info.curr_bb = join_bb;
    info.current_range = range;
    let mut merges = vec![];
    for (idx, scope) in info.scopes.iter().enumerate() {
        for (name, binding) in scope {
            let vt = tt_scopes[idx][name].current.clone();
            let vf = ff_scopes[idx][name].current.clone();
            if vt != vf {
                merges.push((idx, name.clone(), binding.display.clone(), binding.typ, vt, vf));
            }
        }
    }
    for (idx, name, display, typ, vt, vf) in merges {
        let merged = info.fresh_version(&display, typ);
        info.add_inst(Instruction::Phi {
            lhs: merged.clone(),
            choices: Map::from([(tt_end.clone(), vt), (ff_end.clone(), vf)]),
        });
        info.scopes[idx].get_mut(&name).expect("binding exists").current = merged;
    }
}

fn lower_while(guard: &Exp, body: &[Stmt], range: SourceRange, info: &mut Lowering) {
    info.current_range = range;
    let header = info.create_bb();
    let body_bb = info.create_bb();
    let exit_bb = info.create_bb();

    let pre_bb = info.curr_bb.clone();
    info.set_terminal(Terminal::Jump(header.clone()));

    info.new_block(header.clone());
    info.curr_bb = header.clone();

    // one phi per outer variable the body assigns; the back-edge arm is
    // patched in below, once the body-end versions are known.
    let assigned = assigned_outer_vars(body, info);
    let mut phis = vec![];
    for (idx, name) in assigned {
        let (display, typ, pre_version) = {
            let binding = &info.scopes[idx][&name];
            (binding.display.clone(), binding.typ, binding.current.clone())
        };
        let lhs = info.fresh_version(&display, typ);
        info.add_inst(Instruction::Phi {
            lhs: lhs.clone(),
            choices: Map::from([(pre_bb.clone(), pre_version)]),
        });
        info.scopes[idx].get_mut(&name).expect("binding exists").current = lhs.clone();
        phis.push((idx, name, lhs));
    }

    let cond = lower_exp(guard, info);
    info.record_stop(range, StatementKind::Loop);
    info.set_terminal(Terminal::Branch {
        cond,
        tt: body_bb.clone(),
        ff: exit_bb.clone(),
    });

    info.new_block(body_bb.clone());
    info.curr_bb = body_bb;
    info.push_scope();
    lower_stmts(body, info);
    info.pop_scope();
    let body_end = info.curr_bb.clone();
    info.current_range = range;
    info.set_terminal(Terminal::Jump(header.clone()));

    // patch the phis with the versions live at the end of the body, and make
    // the phi versions current for the code after the loop.
    for (idx, name, lhs) in phis {
        let body_version = info.scopes[idx][&name].current.clone();
        let header_block = info.body.get_mut(&header).expect("header exists");
        for inst in &mut header_block.insts {
            if let Instruction::Phi { lhs: phi_lhs, choices } = inst {
                if *phi_lhs == lhs {
                    choices.insert(body_end.clone(), body_version.clone());
                }
            }
        }
        info.scopes[idx].get_mut(&name).expect("binding exists").current = lhs;
    }

    info.new_block(exit_bb.clone());
    info.curr_bb = exit_bb;
}

// the outer variables a loop body assigns, resolved to their scope index.
// declarations inside the body (and its nested scopes) shadow assignments,
// which then do not count as outer.
fn assigned_outer_vars(stmts: &[Stmt], info: &Lowering) -> Vec<(usize, String)> {
    fn walk(stmts: &[Stmt], local: &mut Vec<Set<String>>, out: &mut Set<String>) {
        for stmt in stmts {
            match stmt {
                Stmt::Decl { name, .. } => {
                    local.last_mut().expect("local scope stack").insert(name.clone());
                }
                Stmt::Assign { name, .. } => {
                    if !local.iter().any(|scope| scope.contains(name)) {
                        out.insert(name.clone());
                    }
                }
                Stmt::Observe { .. } => {}
                Stmt::If { tt, ff, .. } => {
                    local.push(Set::new());
                    walk(tt, local, out);
                    local.pop();
                    local.push(Set::new());
                    walk(ff, local, out);
                    local.pop();
                }
                Stmt::While { body, .. } | Stmt::Block { body, .. } => {
                    local.push(Set::new());
                    walk(body, local, out);
                    local.pop();
                }
            }
        }
    }

    let mut out = Set::new();
    let mut local = vec![Set::new()];
    walk(stmts, &mut local, &mut out);
    out.into_iter()
        .filter_map(|name| info.scope_index_of(&name).map(|idx| (idx, name)))
        .collect()
}

// lower an expression, returning the operand holding its value.
fn lower_exp(exp: &Exp, info: &mut Lowering) -> Operand {
    match &exp.kind {
        ExpKind::IntLit(n) => Operand::CInt(*n),
        ExpKind::BoolLit(b) => Operand::CBool(*b),
        ExpKind::Var(name) => Operand::Var(info.lookup(name).current.clone()),
        ExpKind::Bin { op, lhs, rhs } => {
            let op1 = lower_exp(lhs, info);
            let op2 = lower_exp(rhs, info);
            match op {
                BinOp::Add | BinOp::Sub => {
                    let lhs = info.create_tmp(Type::Int);
                    let aop = if *op == BinOp::Add {
                        ArithOp::Add
                    } else {
                        ArithOp::Sub
                    };
                    info.add_inst(Instruction::Arith {
                        lhs: lhs.clone(),
                        aop,
                        op1,
                        op2,
                    });
                    Operand::Var(lhs)
                }
                BinOp::Eq | BinOp::Lt => {
                    let lhs = info.create_tmp(Type::Bool);
                    let rop = if *op == BinOp::Eq { RelaOp::Eq } else { RelaOp::Lt };
                    info.add_inst(Instruction::Cmp {
                        lhs: lhs.clone(),
                        rop,
                        op1,
                        op2,
                    });
                    Operand::Var(lhs)
                }
            }
        }
        ExpKind::Discrete(dist) => {
            let lhs = info.create_tmp(Type::Int);
            info.add_inst(Instruction::Discrete {
                lhs: lhs.clone(),
                dist: dist.clone(),
            });
            Operand::Var(lhs)
        }
    }
}
