//! The source-language AST.  Every node carries its byte range in the
//! source text; the ranges flow into the debug info during lowering.

use crate::commons::SourceRange;
use crate::middle_end::ir::Type;

pub mod validate;

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// `int x = e;` / `bool b = e;` — declarations always initialize.
    Decl {
        name: String,
        typ: Type,
        init: Exp,
        range: SourceRange,
    },
    /// `x = e;`
    Assign {
        name: String,
        rhs: Exp,
        range: SourceRange,
    },
    /// `observe(e);`
    Observe { cond: Exp, range: SourceRange },
    /// `if e { … } else { … }`.  The range covers the keyword and the
    /// guard, not the arms.
    If {
        guard: Exp,
        tt: Vec<Stmt>,
        ff: Vec<Stmt>,
        range: SourceRange,
    },
    /// `while e { … }`.  The range covers the keyword and the guard.
    While {
        guard: Exp,
        body: Vec<Stmt>,
        range: SourceRange,
    },
    /// A bare `{ … }` scope.
    Block { body: Vec<Stmt>, range: SourceRange },
}

impl Stmt {
    pub fn range(&self) -> SourceRange {
        match self {
            Stmt::Decl { range, .. }
            | Stmt::Assign { range, .. }
            | Stmt::Observe { range, .. }
            | Stmt::If { range, .. }
            | Stmt::While { range, .. }
            | Stmt::Block { range, .. } => *range,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Exp {
    pub kind: ExpKind,
    pub range: SourceRange,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExpKind {
    IntLit(i64),
    BoolLit(bool),
    Var(String),
    Bin {
        op: BinOp,
        lhs: Box<Exp>,
        rhs: Box<Exp>,
    },
    /// `discrete({k: p, …})`
    Discrete(Vec<(i64, f64)>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Eq,
    Lt,
}
