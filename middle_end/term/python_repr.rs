//! Lowering of term pairs to the line protocol of the algebraic-equivalence
//! oracle.  Variables and boolean sub-terms become fresh opaque symbols;
//! the same sub-term maps to the same symbol within one comparison, which
//! hash-consing makes a simple uid lookup.

use std::collections::BTreeMap as Map;

use super::{bool_to_int, Term, TermData};

#[derive(Default)]
struct SymbolTable {
    by_uid: Map<u64, String>,
    names: Vec<String>,
}

impl SymbolTable {
    fn symbol_for(&mut self, t: &Term) -> String {
        if let Some(name) = self.by_uid.get(&t.uid()) {
            return name.clone();
        }
        let name = format!("s{}", self.names.len());
        self.by_uid.insert(t.uid(), name.clone());
        self.names.push(name.clone());
        name
    }
}

/// The full line protocol for one equivalence query: symbol declarations,
/// both expressions, and the verdict print.  The oracle answers `1` or `0`.
pub fn comparison_script(lhs: &Term, rhs: &Term) -> String {
    let mut symbols = SymbolTable::default();
    let l = py_expr(lhs, &mut symbols);
    let r = py_expr(rhs, &mut symbols);

    let mut script = String::new();
    if !symbols.names.is_empty() {
        script.push_str(&format!(
            "{} = symbols('{}')\n",
            symbols.names.join(", "),
            symbols.names.join(" ")
        ));
    }
    script.push_str(&format!("lhsEq = {l}\n"));
    script.push_str(&format!("rhsEq = {r}\n"));
    script.push_str("print(1 if simplify(Eq(lhsEq, rhsEq)) == True else 0)\n");
    script
}

fn py_expr(t: &Term, symbols: &mut SymbolTable) -> String {
    use TermData::*;
    match t.get() {
        // opaque leaves: anything boolean-valued or a variable
        Var(_) | BoolToInt(_) | Not(_) | Equal(_, _) | LessThan(_, _) => symbols.symbol_for(t),
        Int(n) => format!("{n}"),
        Double(d) => format!("{:?}", d.get()),
        Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Sub(a, b) => format!("({} - {})", py_expr(a, symbols), py_expr(b, symbols)),
        Mul(fs) => {
            let parts = fs
                .iter()
                .map(|f| py_expr(f, symbols))
                .collect::<Vec<_>>()
                .join(" * ");
            format!("({parts})")
        }
        Div(n, ds) | ZeroDiv(n, ds) => {
            let mut out = format!("({}", py_expr(n, symbols));
            for d in ds {
                out.push_str(&format!(" / {}", py_expr(d, symbols)));
            }
            out.push(')');
            out
        }
        Additions(es) => {
            let parts = es
                .iter()
                .map(|e| {
                    let mut factors = vec![format!("{:?}", e.factor.get())];
                    for c in &e.conditions {
                        let indicator = bool_to_int(c.clone());
                        factors.push(py_expr(&indicator, symbols));
                    }
                    factors.push(py_expr(&e.term, symbols));
                    factors.join(" * ")
                })
                .collect::<Vec<_>>()
                .join(" + ");
            format!("({parts})")
        }
    }
}
