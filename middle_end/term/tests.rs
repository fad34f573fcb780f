// normalization laws of the term algebra.  terms are built through the
// smart constructors, so constructing a term twice must yield the same
// interned value whenever the rewrites make the spellings meet.

use std::collections::BTreeSet as Set;

use pretty_assertions::assert_eq;

use super::*;
use crate::middle_end::ir::{var_id, Type};

fn x() -> Term {
    var(var_id("x", Type::Int))
}

fn b() -> Term {
    var(var_id("b", Type::Bool))
}

#[test]
fn numeric_literals_are_canonical() {
    assert_eq!(double(2.0), int(2));
    assert_eq!(double(0.0), int(0));
    assert_eq!(double(-0.0), int(0));
    assert_ne!(double(0.5), int(0));
    assert_eq!(as_constant(&double(0.5)), Some(0.5));
}

#[test]
fn bool_to_int_folds_literals() {
    assert_eq!(bool_to_int(boolean(true)), int(1));
    assert_eq!(bool_to_int(boolean(false)), int(0));
}

#[test]
fn not_folds_and_cancels() {
    assert_eq!(not(boolean(true)), boolean(false));
    let c = equal(x(), int(2));
    assert_eq!(not(not(c.clone())), c);
}

#[test]
fn comparisons_fold_on_literals() {
    assert_eq!(equal(int(2), int(2)), boolean(true));
    assert_eq!(equal(int(1), int(2)), boolean(false));
    assert_eq!(less_than(int(1), int(2)), boolean(true));
    assert_eq!(less_than(int(2), int(2)), boolean(false));
    // identical terms are equal regardless of their value
    assert_eq!(equal(x(), x()), boolean(true));
}

#[test]
fn equal_is_symmetric_after_normalization() {
    assert_eq!(equal(x(), int(2)), equal(int(2), x()));
}

#[test]
fn sub_folds() {
    assert_eq!(sub(x(), int(0)), x());
    assert_eq!(sub(int(5), int(3)), int(2));
}

#[test]
fn mul_drops_units_and_annihilates_on_zero() {
    assert_eq!(mul(vec![int(1), x(), int(1)]), x());
    assert_eq!(mul(vec![x(), int(0), x()]), int(0));
    assert_eq!(mul(vec![int(3), int(4)]), int(12));
    // nested products flatten and constants fold together
    let nested = mul(vec![int(2), mul(vec![int(3), x()])]);
    assert_eq!(nested, mul(vec![int(6), x()]));
}

#[test]
fn mul_deduplicates_indicators() {
    let ind = bool_to_int(b());
    assert_eq!(mul(vec![ind.clone(), ind.clone()]), ind);
}

#[test]
fn div_by_nothing_and_of_zero() {
    assert_eq!(div(int(0), vec![x()]), int(0));
    assert_eq!(div(x(), vec![]), x());
    assert_eq!(div(int(1), vec![int(4)]), double(0.25));
}

#[test]
fn zero_div_preserves_zero() {
    assert_eq!(zero_div(int(0), vec![int(0)]), int(0));
    assert_eq!(zero_div(int(1), vec![int(0)]), int(0));
    assert_eq!(zero_div(int(1), vec![int(2)]), double(0.5));
    // symbolic denominators stay symbolic
    let d = zero_div(x(), vec![b()]);
    assert!(matches!(d.get(), TermData::ZeroDiv(_, _)));
}

#[test]
fn additions_merge_and_unwrap() {
    // 1 + 2 = 3, via the addition list
    assert_eq!(add(vec![int(1), int(2)]), int(3));
    // x + x = 2x, represented as a single entry
    let two_x = add(vec![x(), x()]);
    match two_x.get() {
        TermData::Additions(es) => {
            assert_eq!(es.len(), 1);
            assert_eq!(es[0].factor.get(), 2.0);
            assert_eq!(es[0].term, x());
        }
        other => panic!("expected an addition list, got {other:?}"),
    }
    // a single unconditional unit entry unwraps to its term
    assert_eq!(additions(vec![Entry::plain(x())]), x());
}

#[test]
fn additions_hoist_indicators_into_conditions() {
    let c = equal(x(), int(2));
    let t = add(vec![mul(vec![bool_to_int(c.clone()), x()])]);
    match t.get() {
        TermData::Additions(es) => {
            assert_eq!(es.len(), 1);
            assert_eq!(es[0].conditions, Set::from([c]));
            assert_eq!(es[0].term, x());
        }
        other => panic!("expected an addition list, got {other:?}"),
    }
}

#[test]
fn additions_drop_dead_entries() {
    let c = equal(x(), int(2));
    // false conditions and zero factors disappear
    let t = additions(vec![
        Entry::new(0.0, Set::new(), x()),
        Entry::new(1.0, Set::from([boolean(false)]), x()),
        Entry::new(1.0, Set::from([c.clone(), not(c.clone())]), x()),
    ]);
    assert_eq!(t, int(0));
    // true conditions are pruned
    let t = additions(vec![Entry::new(1.0, Set::from([boolean(true)]), x())]);
    assert_eq!(t, x());
}

#[test]
fn condition_cancellation() {
    let c = equal(x(), int(2));
    // 0.5·[c]·x + 0.5·[!c]·x = 0.5·x
    let t = additions(vec![
        Entry::new(0.5, Set::from([c.clone()]), x()),
        Entry::new(0.5, Set::from([not(c)]), x()),
    ]);
    match t.get() {
        TermData::Additions(es) => {
            assert_eq!(es.len(), 1);
            assert_eq!(es[0].factor.get(), 0.5);
            assert!(es[0].conditions.is_empty());
            assert_eq!(es[0].term, x());
        }
        other => panic!("expected an addition list, got {other:?}"),
    }
}

#[test]
fn condition_cancellation_keeps_extra_conditions() {
    let c = equal(x(), int(2));
    let d = less_than(x(), int(10));
    let t = additions(vec![
        Entry::new(0.25, Set::from([c.clone(), d.clone()]), int(1)),
        Entry::new(0.25, Set::from([not(c), d.clone()]), int(1)),
    ]);
    // the cancelled pair keeps the shared condition d
    match t.get() {
        TermData::Additions(es) => {
            assert_eq!(es.len(), 1);
            assert_eq!(es[0].conditions, Set::from([d]));
            assert_eq!(es[0].factor.get(), 0.25);
        }
        other => panic!("expected an addition list, got {other:?}"),
    }
}

#[test]
fn replace_substitutes_and_renormalizes() {
    let v = var_id("x", Type::Int);
    let t = bool_to_int(equal(var(v.clone()), int(2)));
    assert_eq!(replace(&t, &v, &int(2)), int(1));
    assert_eq!(replace(&t, &v, &int(3)), int(0));
    // substitution reaches inside conditions
    let cond = equal(var(v.clone()), int(1));
    let list = additions(vec![Entry::new(0.5, Set::from([cond]), int(1))]);
    assert_eq!(replace(&list, &v, &int(1)), double(0.5));
    assert_eq!(replace(&list, &v, &int(2)), int(0));
}

#[test]
fn vars_collects_every_occurrence() {
    let v = var_id("x", Type::Int);
    let w = var_id("y", Type::Int);
    let t = additions(vec![Entry::new(
        0.5,
        Set::from([equal(var(v.clone()), int(1))]),
        var(w.clone()),
    )]);
    assert_eq!(vars(&t), Set::from([v, w]));
}

#[test]
fn split_constant_factors_out_the_evident_scalar() {
    assert_eq!(split_constant(&double(0.25)), (0.25, int(1)));
    assert_eq!(split_constant(&x()), (1.0, x()));

    let (c, rest) = split_constant(&mul(vec![double(0.5), x()]));
    assert_eq!(c, 0.5);
    assert_eq!(rest, x());

    // a scaled addition list normalizes to a leading factor of 1
    let c1 = equal(x(), int(1));
    let scaled = additions(vec![Entry::new(0.5, Set::from([c1.clone()]), x())]);
    let (c, rest) = split_constant(&scaled);
    assert_eq!(c, 0.5);
    assert_eq!(rest, additions(vec![Entry::new(1.0, Set::from([c1]), x())]));
}

#[test]
fn simplification_is_idempotent() {
    // re-normalizing the parts of a normalized list changes nothing
    let c = equal(x(), int(2));
    let t = additions(vec![
        Entry::new(0.5, Set::from([c.clone()]), x()),
        Entry::new(0.25, Set::new(), b()),
    ]);
    match t.get() {
        TermData::Additions(es) => assert_eq!(additions(es.clone()), t),
        _ => panic!("expected an addition list"),
    }
}

#[test]
fn comparison_script_shares_symbols() {
    let lhs = mul(vec![bool_to_int(b()), x()]);
    let rhs = mul(vec![bool_to_int(b()), x()]);
    // syntactically equal terms never reach the oracle, so perturb one side
    let rhs = add(vec![rhs, int(0)]);
    let script = comparison_script(&lhs, &rhs);
    assert!(script.contains("= symbols("));
    assert!(script.contains("lhsEq = "));
    assert!(script.contains("rhsEq = "));
    assert!(script.ends_with("print(1 if simplify(Eq(lhsEq, rhsEq)) == True else 0)\n"));
    // the indicator and the variable appear as the same symbol on both sides
    let lhs_line = script.lines().find(|l| l.starts_with("lhsEq")).unwrap();
    let rhs_line = script.lines().find(|l| l.starts_with("rhsEq")).unwrap();
    assert!(lhs_line.contains("s0"));
    assert!(rhs_line.contains("s0"));
}
