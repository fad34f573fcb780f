//! Textual IR format.  Mirrors `Display for Program`, so printing a program
//! and parsing it back round-trips.

use super::*;

use pest::error::Error;
use pest::iterators::Pair;
use pest::Parser;

#[derive(pest_derive::Parser)]
#[grammar_inline = r##"
WHITESPACE = _{ " " | "\t" | "\r" | "\n" }
COMMENT = _{ "//" ~ (!"\n" ~ ANY)* }

program = { SOI ~ block+ ~ EOI }

block = { name ~ ":" ~ inst* ~ term }

inst = { observe | assign }
assign = { var ~ "=" ~ rhs }
rhs = { copy | arith | cmp | discrete | phi }
copy = { "$copy" ~ operand }
arith = { "$arith" ~ aop ~ operand ~ "," ~ operand }
aop = { "add" | "sub" }
cmp = { "$cmp" ~ rop ~ operand ~ "," ~ operand }
rop = { "eq" | "lt" }
discrete = { "$discrete" ~ "{" ~ dentry ~ ("," ~ dentry)* ~ "}" }
dentry = { int ~ ":" ~ num }
phi = { "$phi" ~ "(" ~ parg ~ ("," ~ parg)* ~ ")" }
parg = { name ~ ":" ~ var }
observe = { "$observe" ~ operand }

operand = { var | boolean | int }
var = ${ name ~ ":" ~ typ }
typ = { "int" | "bool" }
boolean = { "true" | "false" }
int = @{ "-"? ~ ASCII_DIGIT+ }
num = @{ "-"? ~ ASCII_DIGIT+ ~ ("." ~ ASCII_DIGIT+)? }
name = @{ (ASCII_ALPHANUMERIC | "_" | "$" | "#")+ }

term = { jump | branch | ret }
jump = { "$jump" ~ name }
branch = { "$branch" ~ operand ~ name ~ name }
ret = { "$ret" }
"##]
struct IrParser;

use derive_more::Display;

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ParseErrors {
    Parse(Box<Error<Rule>>),
    Malformed(String),
}

impl std::error::Error for ParseErrors {}

impl std::str::FromStr for Program {
    type Err = ParseErrors;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match IrParser::parse(Rule::program, text) {
            Ok(mut parse_tree) => create_program(parse_tree.next().unwrap()),
            Err(err) => Err(ParseErrors::Parse(Box::new(err))),
        }
    }
}

fn create_program(parse_tree: Pair<Rule>) -> Result<Program, ParseErrors> {
    let mut body = Map::new();
    let mut entry = None;

    for block in parse_tree.into_inner() {
        if block.as_rule() != Rule::block {
            continue; // EOI
        }
        let mut inner = block.into_inner();
        let id = bb_id(inner.next().unwrap().as_str());
        if entry.is_none() {
            entry = Some(id.clone());
        }

        let mut insts = vec![];
        let mut term = None;
        for item in inner {
            match item.as_rule() {
                Rule::inst => insts.push(parse_inst(item)?),
                Rule::term => term = Some(parse_term(item)),
                _ => unreachable!("unexpected rule in block: {:#?}", item),
            }
        }

        let term = term.ok_or_else(|| ParseErrors::Malformed(format!("block `{id}` has no terminal")))?;
        body.insert(
            id.clone(),
            BasicBlock {
                id,
                insts,
                term,
            },
        );
    }

    let entry = entry.ok_or_else(|| ParseErrors::Malformed("empty program".to_string()))?;
    Ok(Program { entry, body })
}

fn parse_inst(inst: Pair<Rule>) -> Result<Instruction, ParseErrors> {
    let inst = inst.into_inner().next().unwrap();
    match inst.as_rule() {
        Rule::observe => {
            let cond = parse_operand(inst.into_inner().next().unwrap());
            Ok(Instruction::Observe { cond })
        }
        Rule::assign => {
            let mut inner = inst.into_inner();
            let lhs = parse_var(inner.next().unwrap());
            let rhs = inner.next().unwrap().into_inner().next().unwrap();
            parse_rhs(lhs, rhs)
        }
        _ => unreachable!("not an instruction: {:#?}", inst),
    }
}

fn parse_rhs(lhs: VarId, rhs: Pair<Rule>) -> Result<Instruction, ParseErrors> {
    match rhs.as_rule() {
        Rule::copy => {
            let op = parse_operand(rhs.into_inner().next().unwrap());
            Ok(Instruction::Copy { lhs, op })
        }
        Rule::arith => {
            let mut inner = rhs.into_inner();
            let aop = match inner.next().unwrap().as_str() {
                "add" => ArithOp::Add,
                _ => ArithOp::Sub,
            };
            let op1 = parse_operand(inner.next().unwrap());
            let op2 = parse_operand(inner.next().unwrap());
            Ok(Instruction::Arith { lhs, aop, op1, op2 })
        }
        Rule::cmp => {
            let mut inner = rhs.into_inner();
            let rop = match inner.next().unwrap().as_str() {
                "eq" => RelaOp::Eq,
                _ => RelaOp::Lt,
            };
            let op1 = parse_operand(inner.next().unwrap());
            let op2 = parse_operand(inner.next().unwrap());
            Ok(Instruction::Cmp { lhs, rop, op1, op2 })
        }
        Rule::discrete => {
            let mut dist = vec![];
            for dentry in rhs.into_inner() {
                let mut inner = dentry.into_inner();
                let k = inner.next().unwrap().as_str().parse::<i64>().unwrap();
                let p = inner.next().unwrap().as_str().parse::<f64>().unwrap();
                dist.push((k, p));
            }
            Ok(Instruction::Discrete { lhs, dist })
        }
        Rule::phi => {
            let mut choices = Map::new();
            for parg in rhs.into_inner() {
                let mut inner = parg.into_inner();
                let pred = bb_id(inner.next().unwrap().as_str());
                let src = parse_var(inner.next().unwrap());
                choices.insert(pred, src);
            }
            Ok(Instruction::Phi { lhs, choices })
        }
        _ => unreachable!("not a right-hand side: {:#?}", rhs),
    }
}

fn parse_term(term: Pair<Rule>) -> Terminal {
    let term = term.into_inner().next().unwrap();
    match term.as_rule() {
        Rule::jump => Terminal::Jump(bb_id(term.into_inner().next().unwrap().as_str())),
        Rule::branch => {
            let mut inner = term.into_inner();
            let cond = parse_operand(inner.next().unwrap());
            let tt = bb_id(inner.next().unwrap().as_str());
            let ff = bb_id(inner.next().unwrap().as_str());
            Terminal::Branch { cond, tt, ff }
        }
        Rule::ret => Terminal::Ret,
        _ => unreachable!("not a terminal: {:#?}", term),
    }
}

fn parse_operand(op: Pair<Rule>) -> Operand {
    let op = op.into_inner().next().unwrap();
    match op.as_rule() {
        Rule::var => Operand::Var(parse_var(op)),
        Rule::boolean => Operand::CBool(op.as_str() == "true"),
        Rule::int => Operand::CInt(op.as_str().parse::<i64>().unwrap()),
        _ => unreachable!("not an operand: {:#?}", op),
    }
}

fn parse_var(var: Pair<Rule>) -> VarId {
    let mut inner = var.into_inner();
    let name = inner.next().unwrap().as_str();
    let typ = match inner.next().unwrap().as_str() {
        "int" => Type::Int,
        _ => Type::Bool,
    };
    var_id(name, typ)
}
