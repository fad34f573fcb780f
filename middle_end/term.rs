//! Symbolic terms over program variables.
//!
//! Terms are immutable, hash-consed trees: building the same term twice
//! yields the same allocation, so equality collapses to pointer (uid)
//! equality and terms can be used directly as cache keys.  All terms are
//! kept in normal form by the smart constructors in [`simplify`]; code never
//! builds `TermData` values directly.

use std::collections::BTreeSet as Set;
use std::fmt::{self, Display};

use hashconsing::HConsed;

use super::ir::{Operand, VarId};

mod python_repr;
mod simplify;
#[cfg(test)]
mod tests;

pub use python_repr::comparison_script;
pub use simplify::{
    add, additions, as_constant, bool_to_int, boolean, div, double, equal, int, less_than, mul,
    not, replace, split_constant, sub, var, vars, zero_div,
};

/// An interned term.
pub type Term = HConsed<TermData>;

/// An `f64` with bitwise equality and a total order, usable in interned
/// data.  `-0.0` is normalized to `0.0` on construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Float64(u64);

impl Float64 {
    pub fn new(value: f64) -> Self {
        let value = if value == 0.0 { 0.0 } else { value };
        Float64(value.to_bits())
    }

    pub fn get(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<f64> for Float64 {
    fn from(value: f64) -> Self {
        Float64::new(value)
    }
}

impl fmt::Debug for Float64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl Display for Float64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// One addend of an [`TermData::Additions`] list: `factor * Π conditions *
/// term`, where every condition contributes its indicator value.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Entry {
    pub factor: Float64,
    pub conditions: Set<Term>,
    pub term: Term,
}

impl Entry {
    pub fn new(factor: f64, conditions: Set<Term>, term: Term) -> Self {
        Entry {
            factor: Float64::new(factor),
            conditions,
            term,
        }
    }

    /// An unconditional entry with factor 1.
    pub fn plain(term: Term) -> Self {
        Entry::new(1.0, Set::new(), term)
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![];
        if self.factor.get() != 1.0 {
            parts.push(format!("{}", self.factor));
        }
        for c in &self.conditions {
            parts.push(format!("[{c}]"));
        }
        if !matches!(self.term.get(), TermData::Int(1)) || parts.is_empty() {
            parts.push(format!("{}", self.term));
        }
        write!(f, "{}", parts.join(" * "))
    }
}

/// The term grammar.  Multiplication and addition are n-ary; addition is
/// always normalized to an `Additions` list.  `ZeroDiv` is zero-preserving
/// division: `0 ./. 0 = 0`, otherwise ordinary division.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum TermData {
    Var(VarId),
    Int(i64),
    Double(Float64),
    Bool(bool),
    BoolToInt(Term),
    Not(Term),
    Equal(Term, Term),
    LessThan(Term, Term),
    Sub(Term, Term),
    Mul(Vec<Term>),
    Div(Term, Vec<Term>),
    ZeroDiv(Term, Vec<Term>),
    Additions(Vec<Entry>),
}

impl Display for TermData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TermData::*;
        match self {
            Var(v) => write!(f, "{v}"),
            Int(n) => write!(f, "{n}"),
            Double(d) => write!(f, "{d}"),
            Bool(b) => write!(f, "{b}"),
            BoolToInt(t) => write!(f, "[{t}]"),
            Not(t) => write!(f, "!{t}"),
            Equal(a, b) => write!(f, "({a} == {b})"),
            LessThan(a, b) => write!(f, "({a} < {b})"),
            Sub(a, b) => write!(f, "({a} - {b})"),
            Mul(fs) => {
                let parts = fs.iter().map(|t| t.to_string()).collect::<Vec<_>>();
                write!(f, "({})", parts.join(" * "))
            }
            Div(n, ds) => {
                write!(f, "({n}")?;
                for d in ds {
                    write!(f, " / {d}")?;
                }
                write!(f, ")")
            }
            ZeroDiv(n, ds) => {
                write!(f, "({n}")?;
                for d in ds {
                    write!(f, " ./. {d}")?;
                }
                write!(f, ")")
            }
            Additions(es) => {
                let parts = es.iter().map(|e| e.to_string()).collect::<Vec<_>>();
                write!(f, "({})", parts.join(" + "))
            }
        }
    }
}

/// The term for an IR operand.
pub fn operand_term(op: &Operand) -> Term {
    match op {
        Operand::Var(v) => var(v.clone()),
        Operand::CInt(n) => int(*n),
        Operand::CBool(b) => boolean(*b),
    }
}
