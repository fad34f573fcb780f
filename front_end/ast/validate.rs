// check whether a source program is valid:
//
// - every used variable is declared, declarations initialize with an
//   expression of the declared type.
// - no duplicate declarations within one scope; shadowing across scopes is
//   permitted.
// - `+` and `-` take ints, `==` and `<` take ints and yield bool.
// - the conditions of `if`, `while`, and `observe` are bool.
// - discrete literals have pairwise-distinct integer support and
//   non-negative probabilities summing to 1.

use std::collections::BTreeMap as Map;
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::*;
use crate::commons::Valid;

// SECTION: interface

/// An accumulated list of validation failures.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationError(pub Vec<String>);

impl ValidationError {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, range: SourceRange, msg: String) {
        self.0.push(format!("{range}: {msg}"));
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for msg in &self.0 {
            writeln!(f, "{msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

pub fn validate(program: Program) -> Result<Valid<Program>, ValidationError> {
    let mut errors = ValidationError::default();
    let mut scopes = Scopes::new();
    check_stmts(&program.stmts, &mut scopes, &mut errors);
    if errors.is_empty() {
        Ok(Valid(program))
    } else {
        Err(errors)
    }
}

// SECTION: scope tracking

struct Scopes(Vec<Map<String, Type>>);

impl Scopes {
    fn new() -> Self {
        Scopes(vec![Map::new()])
    }

    fn push(&mut self) {
        self.0.push(Map::new());
    }

    fn pop(&mut self) {
        self.0.pop();
    }

    fn declare(&mut self, name: &str, typ: Type) -> bool {
        let scope = self.0.last_mut().expect("scope stack is never empty");
        scope.insert(name.to_string(), typ).is_none()
    }

    fn lookup(&self, name: &str) -> Option<Type> {
        self.0.iter().rev().find_map(|scope| scope.get(name)).copied()
    }
}

// SECTION: checks

fn check_stmts(stmts: &[Stmt], scopes: &mut Scopes, errors: &mut ValidationError) {
    for stmt in stmts {
        check_stmt(stmt, scopes, errors);
    }
}

fn check_stmt(stmt: &Stmt, scopes: &mut Scopes, errors: &mut ValidationError) {
    match stmt {
        Stmt::Decl {
            name,
            typ,
            init,
            range,
        } => {
            if let Some(init_typ) = check_exp(init, scopes, errors) {
                if init_typ != *typ {
                    errors.push(
                        *range,
                        format!("`{name}` is declared {typ} but initialized with {init_typ}"),
                    );
                }
            }
            // declare after checking the initializer: `int x = x;` is an
            // error unless an outer `x` exists.
            if !scopes.declare(name, *typ) {
                errors.push(*range, format!("`{name}` is already declared in this scope"));
            }
        }
        Stmt::Assign { name, rhs, range } => {
            let rhs_typ = check_exp(rhs, scopes, errors);
            match scopes.lookup(name) {
                None => errors.push(*range, format!("assignment to undeclared variable `{name}`")),
                Some(typ) => {
                    if let Some(rhs_typ) = rhs_typ {
                        if rhs_typ != typ {
                            errors.push(
                                *range,
                                format!("`{name}` has type {typ} but is assigned {rhs_typ}"),
                            );
                        }
                    }
                }
            }
        }
        Stmt::Observe { cond, range } => {
            if let Some(typ) = check_exp(cond, scopes, errors) {
                if typ != Type::Bool {
                    errors.push(*range, format!("observe condition has type {typ}, not bool"));
                }
            }
        }
        Stmt::If {
            guard,
            tt,
            ff,
            range,
        } => {
            if let Some(typ) = check_exp(guard, scopes, errors) {
                if typ != Type::Bool {
                    errors.push(*range, format!("if condition has type {typ}, not bool"));
                }
            }
            scopes.push();
            check_stmts(tt, scopes, errors);
            scopes.pop();
            scopes.push();
            check_stmts(ff, scopes, errors);
            scopes.pop();
        }
        Stmt::While { guard, body, range } => {
            if let Some(typ) = check_exp(guard, scopes, errors) {
                if typ != Type::Bool {
                    errors.push(*range, format!("while condition has type {typ}, not bool"));
                }
            }
            scopes.push();
            check_stmts(body, scopes, errors);
            scopes.pop();
        }
        Stmt::Block { body, .. } => {
            scopes.push();
            check_stmts(body, scopes, errors);
            scopes.pop();
        }
    }
}

// the type of an expression, or None if a sub-expression already failed.
fn check_exp(exp: &Exp, scopes: &Scopes, errors: &mut ValidationError) -> Option<Type> {
    match &exp.kind {
        ExpKind::IntLit(_) => Some(Type::Int),
        ExpKind::BoolLit(_) => Some(Type::Bool),
        ExpKind::Var(name) => match scopes.lookup(name) {
            Some(typ) => Some(typ),
            None => {
                errors.push(exp.range, format!("use of undeclared variable `{name}`"));
                None
            }
        },
        ExpKind::Bin { op, lhs, rhs } => {
            let lt = check_exp(lhs, scopes, errors)?;
            let rt = check_exp(rhs, scopes, errors)?;
            if lt != Type::Int || rt != Type::Int {
                errors.push(
                    exp.range,
                    format!("operator takes int operands, got {lt} and {rt}"),
                );
                return None;
            }
            match op {
                BinOp::Add | BinOp::Sub => Some(Type::Int),
                BinOp::Eq | BinOp::Lt => Some(Type::Bool),
            }
        }
        ExpKind::Discrete(dist) => {
            if dist.is_empty() {
                errors.push(exp.range, "empty discrete distribution".to_string());
                return Some(Type::Int);
            }
            let mut seen = Map::new();
            for (k, p) in dist {
                if seen.insert(*k, ()).is_some() {
                    errors.push(exp.range, format!("duplicate discrete value {k}"));
                }
                if *p < 0.0 {
                    errors.push(exp.range, format!("negative probability for value {k}"));
                }
            }
            let sum: f64 = dist.iter().map(|(_, p)| *p).sum();
            if (sum - 1.0).abs() > 1e-9 {
                errors.push(
                    exp.range,
                    format!("discrete probabilities sum to {sum}, not 1"),
                );
            }
            Some(Type::Int)
        }
    }
}
