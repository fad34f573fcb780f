//! Smart constructors.  Every constructor applies the rewrite rules for its
//! node bottom-up, so constructed terms are always in normal form and
//! simplification is idempotent by construction.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use hashconsing::{consign, HashConsign};

use super::{Entry, Float64, Term, TermData};
use crate::middle_end::ir::VarId;

consign! {
    /// Factory for interned terms.
    let FACTORY = consign(512) for TermData;
}

fn mk(data: TermData) -> Term {
    FACTORY.mk(data)
}

pub fn var(v: VarId) -> Term {
    mk(TermData::Var(v))
}

pub fn int(n: i64) -> Term {
    mk(TermData::Int(n))
}

pub fn boolean(b: bool) -> Term {
    mk(TermData::Bool(b))
}

/// The canonical numeric literal: integral values intern as `Int`, so
/// constant folding cannot produce two spellings of the same number.
pub fn double(value: f64) -> Term {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        int(value as i64)
    } else {
        mk(TermData::Double(Float64::new(value)))
    }
}

/// The numeric value of a literal term, if it is one.
pub fn as_constant(t: &Term) -> Option<f64> {
    match t.get() {
        TermData::Int(n) => Some(*n as f64),
        TermData::Double(d) => Some(d.get()),
        _ => None,
    }
}

fn is_zero(t: &Term) -> bool {
    as_constant(t) == Some(0.0)
}

pub fn bool_to_int(t: Term) -> Term {
    match t.get() {
        TermData::Bool(b) => int(*b as i64),
        _ => mk(TermData::BoolToInt(t)),
    }
}

pub fn not(t: Term) -> Term {
    match t.get() {
        TermData::Bool(b) => boolean(!b),
        TermData::Not(inner) => inner.clone(),
        _ => mk(TermData::Not(t)),
    }
}

pub fn equal(a: Term, b: Term) -> Term {
    if a == b {
        return boolean(true);
    }
    match (as_constant(&a), as_constant(&b)) {
        (Some(x), Some(y)) => return boolean(x == y),
        _ => {}
    }
    if let (TermData::Bool(x), TermData::Bool(y)) = (a.get(), b.get()) {
        return boolean(x == y);
    }
    // equality is symmetric, so order the children canonically.
    let (a, b) = if a.uid() <= b.uid() { (a, b) } else { (b, a) };
    mk(TermData::Equal(a, b))
}

pub fn less_than(a: Term, b: Term) -> Term {
    match (as_constant(&a), as_constant(&b)) {
        (Some(x), Some(y)) => boolean(x < y),
        _ => mk(TermData::LessThan(a, b)),
    }
}

pub fn sub(a: Term, b: Term) -> Term {
    if is_zero(&b) {
        return a;
    }
    match (as_constant(&a), as_constant(&b)) {
        (Some(x), Some(y)) => double(x - y),
        _ => mk(TermData::Sub(a, b)),
    }
}

pub fn mul(factors: Vec<Term>) -> Term {
    // flatten nested products
    let mut flat: Vec<Term> = vec![];
    for f in factors {
        if let TermData::Mul(inner) = f.get() {
            flat.extend(inner.iter().cloned());
        } else {
            flat.push(f);
        }
    }

    // fold the numeric factors into one coefficient
    let mut coeff = 1.0;
    let mut rest: Vec<Term> = vec![];
    for f in flat {
        match as_constant(&f) {
            Some(v) => coeff *= v,
            None => rest.push(f),
        }
    }
    if coeff == 0.0 {
        return int(0);
    }

    // canonical factor order; an indicator squared is the indicator itself
    rest.sort_by_key(|t| t.uid());
    rest.dedup_by(|a, b| a == b && matches!(a.get(), TermData::BoolToInt(_)));

    // distribute over an addition list so sums never nest under products
    if let Some(idx) = rest
        .iter()
        .position(|t| matches!(t.get(), TermData::Additions(_)))
    {
        let list = rest.remove(idx);
        let entries = match list.get() {
            TermData::Additions(entries) => entries.clone(),
            _ => unreachable!(),
        };
        let entries = entries
            .into_iter()
            .map(|e| {
                let mut fs = vec![e.term];
                fs.extend(rest.iter().cloned());
                Entry {
                    factor: Float64::new(e.factor.get() * coeff),
                    conditions: e.conditions,
                    term: mul(fs),
                }
            })
            .collect();
        return additions(entries);
    }

    if rest.is_empty() {
        return double(coeff);
    }
    if coeff == 1.0 && rest.len() == 1 {
        return rest.pop().unwrap();
    }
    let mut fs = vec![];
    if coeff != 1.0 {
        fs.push(double(coeff));
    }
    fs.extend(rest);
    mk(TermData::Mul(fs))
}

pub fn div(num: Term, dens: Vec<Term>) -> Term {
    if is_zero(&num) {
        return int(0);
    }
    if dens.is_empty() {
        return num;
    }
    if let Some(n) = as_constant(&num) {
        let ds: Option<Vec<f64>> = dens.iter().map(as_constant).collect();
        if let Some(ds) = ds {
            return double(n / ds.iter().product::<f64>());
        }
    }
    mk(TermData::Div(num, dens))
}

pub fn zero_div(num: Term, dens: Vec<Term>) -> Term {
    if is_zero(&num) {
        return int(0);
    }
    if dens.is_empty() {
        return num;
    }
    if let Some(n) = as_constant(&num) {
        let ds: Option<Vec<f64>> = dens.iter().map(as_constant).collect();
        if let Some(ds) = ds {
            let d: f64 = ds.iter().product();
            return if d == 0.0 { int(0) } else { double(n / d) };
        }
    }
    mk(TermData::ZeroDiv(num, dens))
}

/// The n-ary sum of the given terms.
pub fn add(terms: Vec<Term>) -> Term {
    additions(terms.into_iter().map(Entry::plain).collect())
}

/// Build a normalized addition list.  This is the workhorse of the algebra;
/// the rewrite passes run to fixpoint:
///
/// - numeric factors of each entry's term are hoisted into `factor`,
///   indicator factors into `conditions`, nested lists are flattened;
/// - entries with factor 0, term 0, a `false` condition, or contradictory
///   conditions are dropped, `true` conditions are pruned;
/// - entries with equal term and conditions merge by summing factors
///   (ascending, for numeric stability);
/// - two entries equal up to one condition `c` vs `!c` merge, dropping `c`.
pub fn additions(entries: Vec<Entry>) -> Term {
    let mut entries = entries;
    loop {
        let mut changed = false;

        // hoist and flatten
        let mut expanded: Vec<Entry> = vec![];
        for e in entries {
            changed |= expand_entry(e, &mut expanded);
        }

        // prune dead entries and true conditions
        let mut pruned: Vec<Entry> = vec![];
        for mut e in expanded {
            if e.conditions.remove(&boolean(true)) {
                changed = true;
            }
            if e.factor.get() == 0.0 || is_zero(&e.term) {
                changed = true;
                continue;
            }
            if e.conditions.contains(&boolean(false)) {
                changed = true;
                continue;
            }
            if e.conditions
                .iter()
                .any(|c| e.conditions.contains(&not(c.clone())))
            {
                changed = true;
                continue;
            }
            pruned.push(e);
        }

        // merge entries with equal term and conditions
        let mut groups: Map<(Term, Set<Term>), Vec<f64>> = Map::new();
        for e in pruned {
            groups
                .entry((e.term, e.conditions))
                .or_default()
                .push(e.factor.get());
        }
        let mut merged: Vec<Entry> = vec![];
        for ((term, conditions), mut factors) in groups {
            if factors.len() > 1 {
                changed = true;
            }
            factors.sort_by(f64::total_cmp);
            let sum: f64 = factors.iter().sum();
            if sum == 0.0 {
                changed = true;
                continue;
            }
            merged.push(Entry {
                factor: Float64::new(sum),
                conditions,
                term,
            });
        }

        changed |= cancel_conditions(&mut merged);

        entries = merged;
        if !changed {
            break;
        }
    }

    entries.sort_by(|a, b| {
        a.term
            .uid()
            .cmp(&b.term.uid())
            .then_with(|| a.conditions.cmp(&b.conditions))
            .then_with(|| a.factor.cmp(&b.factor))
    });

    if entries.is_empty() {
        return int(0);
    }
    if entries.len() == 1 && entries[0].conditions.is_empty() {
        let e = &entries[0];
        if matches!(e.term.get(), TermData::Int(1)) {
            return double(e.factor.get());
        }
        if e.factor.get() == 1.0 {
            return e.term.clone();
        }
    }
    mk(TermData::Additions(entries))
}

// push one entry into `out`, hoisting numeric and indicator factors out of
// its term and flattening nested lists.  returns whether anything changed.
fn expand_entry(e: Entry, out: &mut Vec<Entry>) -> bool {
    match e.term.get() {
        TermData::Int(1) => {
            out.push(e);
            false
        }
        TermData::Int(n) => {
            let factor = e.factor.get() * *n as f64;
            out.push(Entry::new(factor, e.conditions, int(1)));
            true
        }
        TermData::Double(d) => {
            let factor = e.factor.get() * d.get();
            out.push(Entry::new(factor, e.conditions, int(1)));
            true
        }
        TermData::BoolToInt(c) => {
            let mut conditions = e.conditions;
            conditions.insert(c.clone());
            out.push(Entry::new(e.factor.get(), conditions, int(1)));
            true
        }
        TermData::Mul(fs) => {
            let mut factor = e.factor.get();
            let mut conditions = e.conditions;
            let mut rest = vec![];
            let mut hoisted = false;
            for f in fs {
                match f.get() {
                    TermData::Int(n) => {
                        factor *= *n as f64;
                        hoisted = true;
                    }
                    TermData::Double(d) => {
                        factor *= d.get();
                        hoisted = true;
                    }
                    TermData::BoolToInt(c) => {
                        conditions.insert(c.clone());
                        hoisted = true;
                    }
                    _ => rest.push(f.clone()),
                }
            }
            if hoisted {
                out.push(Entry::new(factor, conditions, mul(rest)));
                true
            } else {
                out.push(Entry {
                    factor: e.factor,
                    conditions,
                    term: e.term.clone(),
                });
                false
            }
        }
        TermData::Additions(inner) => {
            for ie in inner {
                let mut conditions = e.conditions.clone();
                conditions.extend(ie.conditions.iter().cloned());
                out.push(Entry::new(
                    e.factor.get() * ie.factor.get(),
                    conditions,
                    ie.term.clone(),
                ));
            }
            true
        }
        _ => {
            out.push(e);
            false
        }
    }
}

// merge pairs of entries that agree on factor and term and whose conditions
// differ in exactly one element `c` vs `!c`.  iterates to fixpoint.
fn cancel_conditions(entries: &mut Vec<Entry>) -> bool {
    let mut changed = false;
    'outer: loop {
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                if entries[i].factor != entries[j].factor || entries[i].term != entries[j].term {
                    continue;
                }
                let di: Vec<Term> = entries[i]
                    .conditions
                    .difference(&entries[j].conditions)
                    .cloned()
                    .collect();
                let dj: Vec<Term> = entries[j]
                    .conditions
                    .difference(&entries[i].conditions)
                    .cloned()
                    .collect();
                if di.len() == 1 && dj.len() == 1 && dj[0] == not(di[0].clone()) {
                    let mut merged = entries[i].clone();
                    merged.conditions.remove(&di[0]);
                    entries.remove(j);
                    entries.remove(i);
                    entries.push(merged);
                    changed = true;
                    continue 'outer;
                }
            }
        }
        break;
    }
    changed
}

/// Substitute `r` for `Var(v)` throughout `t` and re-normalize.
pub fn replace(t: &Term, v: &VarId, r: &Term) -> Term {
    use TermData::*;
    match t.get() {
        Var(x) => {
            if x == v {
                r.clone()
            } else {
                t.clone()
            }
        }
        Int(_) | Double(_) | Bool(_) => t.clone(),
        BoolToInt(x) => bool_to_int(replace(x, v, r)),
        Not(x) => not(replace(x, v, r)),
        Equal(a, b) => equal(replace(a, v, r), replace(b, v, r)),
        LessThan(a, b) => less_than(replace(a, v, r), replace(b, v, r)),
        Sub(a, b) => sub(replace(a, v, r), replace(b, v, r)),
        Mul(fs) => mul(fs.iter().map(|f| replace(f, v, r)).collect()),
        Div(n, ds) => div(
            replace(n, v, r),
            ds.iter().map(|d| replace(d, v, r)).collect(),
        ),
        ZeroDiv(n, ds) => zero_div(
            replace(n, v, r),
            ds.iter().map(|d| replace(d, v, r)).collect(),
        ),
        Additions(es) => additions(
            es.iter()
                .map(|e| Entry {
                    factor: e.factor,
                    conditions: e.conditions.iter().map(|c| replace(c, v, r)).collect(),
                    term: replace(&e.term, v, r),
                })
                .collect(),
        ),
    }
}

/// The set of variables mentioned anywhere in `t`.
pub fn vars(t: &Term) -> Set<VarId> {
    let mut out = Set::new();
    collect_vars(t, &mut out);
    out
}

fn collect_vars(t: &Term, out: &mut Set<VarId>) {
    use TermData::*;
    match t.get() {
        Var(v) => {
            out.insert(v.clone());
        }
        Int(_) | Double(_) | Bool(_) => {}
        BoolToInt(x) | Not(x) => collect_vars(x, out),
        Equal(a, b) | LessThan(a, b) | Sub(a, b) => {
            collect_vars(a, out);
            collect_vars(b, out);
        }
        Mul(fs) => {
            for f in fs {
                collect_vars(f, out);
            }
        }
        Div(n, ds) | ZeroDiv(n, ds) => {
            collect_vars(n, out);
            for d in ds {
                collect_vars(d, out);
            }
        }
        Additions(es) => {
            for e in es {
                for c in &e.conditions {
                    collect_vars(c, out);
                }
                collect_vars(&e.term, out);
            }
        }
    }
}

/// Split a term into `(c, rest)` with `t == c * rest`, where `c` is the
/// evident constant coefficient.  Used for cache query normalization:
/// queries differing only by a scalar share an entry after dividing it out.
pub fn split_constant(t: &Term) -> (f64, Term) {
    match t.get() {
        TermData::Int(n) if *n != 0 && *n != 1 => (*n as f64, int(1)),
        TermData::Double(d) => (d.get(), int(1)),
        TermData::Mul(fs) => match as_constant(&fs[0]) {
            Some(c) => (c, mul(fs[1..].to_vec())),
            None => (1.0, t.clone()),
        },
        TermData::Additions(es) => {
            let c = es[0].factor.get();
            if c == 0.0 || c == 1.0 {
                (1.0, t.clone())
            } else {
                (
                    c,
                    additions(
                        es.iter()
                            .map(|e| {
                                Entry::new(e.factor.get() / c, e.conditions.clone(), e.term.clone())
                            })
                            .collect(),
                    ),
                )
            }
        }
        _ => (1.0, t.clone()),
    }
}
