// ll(1) recursive-descent parser for the probabilistic source language.
//
// grammar, one production function per rule:
//
//   program  ::= stmt*
//   stmt     ::= decl | assign | observe | if | while | block
//   decl     ::= ('int' | 'bool') id '=' exp ';'
//   assign   ::= id '=' exp ';'
//   observe  ::= 'observe' '(' exp ')' ';'
//   if       ::= 'if' exp block ('else' (block | if))?
//   while    ::= 'while' exp block
//   block    ::= '{' stmt* '}'
//   exp      ::= additive (('==' | '<') additive)?
//   additive ::= atom (('+' | '-') atom)*
//   atom     ::= int | 'true' | 'false' | id | '(' exp ')' | discrete
//   discrete ::= 'discrete' '(' '{' int ':' prob (',' int ':' prob)* '}' ')'

use derive_more::Display;

use super::*;
use crate::commons::SourceRange;
use crate::middle_end::ir::Type;
use TokenKind::*;

// SECTION: interface

pub fn parse(code: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(code)?;
    program_r(&mut parser)
}

// A parse error with explanatory message.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub struct ParseError(pub String);
impl std::error::Error for ParseError {}

// SECTION: parser functionality

#[derive(Clone, Debug)]
struct Parser<'a> {
    code: &'a str,      // the source code being parsed
    tokens: Vec<Token>, // the token stream
    pos: usize,         // the position in the token stream
}

// utility functions for traversing the token stream and creating error
// messages.
impl<'a> Parser<'a> {
    fn new(code: &'a str) -> Result<Self, ParseError> {
        let tokens = lex(code);
        if tokens.is_empty() {
            Err(ParseError("empty token stream".to_string()))
        } else {
            Ok(Parser {
                code,
                tokens,
                pos: 0,
            })
        }
    }

    // if the next token has the given kind advances the iterator and returns
    // true, otherwise returns false.
    fn eat(&mut self, kind: TokenKind) -> bool {
        match self.peek() {
            Some(k) if k == kind => {
                self.next();
                true
            }
            _ => false,
        }
    }

    // returns an Ok or Err result depending on whether the next token has the
    // given kind, advancing the iterator on an Ok result.
    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            self.error_next(&format!("expected `{kind}`"))
        }
    }

    // advances the iterator and returns the next token in the stream, or None
    // if there are no more tokens.
    fn next(&mut self) -> Option<TokenKind> {
        if !self.end() {
            self.pos += 1;
            Some(self.tokens[self.pos - 1].kind)
        } else {
            None
        }
    }

    // returns the next token (if it exists) without advancing the iterator.
    fn peek(&self) -> Option<TokenKind> {
        if !self.end() {
            Some(self.tokens[self.pos].kind)
        } else {
            None
        }
    }

    // returns whether the next token has the given kind, without advancing
    // the iterator.
    fn next_is(&self, kind: TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    // returns whether we're at the end of the token stream.
    fn end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // returns the lexeme of the token immediately prior to the current token.
    fn slice_prev(&self) -> &str {
        &self.code[self.tokens[self.pos - 1].span.clone()]
    }

    // the start offset of the next token (or the end of input).
    fn start_next(&self) -> usize {
        if self.end() {
            self.code.len()
        } else {
            self.tokens[self.pos].span.start
        }
    }

    // the end offset of the previously consumed token.
    fn end_prev(&self) -> usize {
        self.tokens[self.pos - 1].span.end
    }

    // returns a parse error knowing that the next token to be inspected
    // causes an error (based on a call to peek(), next_is(), etc).
    fn error_next<T>(&self, msg: &str) -> Result<T, ParseError> {
        if self.pos >= self.tokens.len() {
            Err(ParseError(format!(
                "parse error: unexpected end of input ({msg})\n"
            )))
        } else {
            self.error(self.pos, msg)
        }
    }

    // constructs a parse error given the position of the error-causing token
    // in the token stream.
    fn error<T>(&self, pos: usize, msg: &str) -> Result<T, ParseError> {
        let span = &self.tokens[pos].span;

        // the row number and the index of the start of the row containing the
        // error-causing token.
        let (row, row_start) = {
            let mut row = 0;
            let mut row_start = 0;
            for (idx, _) in self.code.match_indices('\n') {
                if idx > span.start {
                    break;
                }
                row += 1;
                row_start = idx + 1;
            }
            (row, row_start)
        };

        // the column where the error-causing lexeme starts.
        let col = span.start - row_start;

        // the line containing the error-causing lexeme.
        let line = self.code.lines().nth(row).unwrap_or("");

        Err(ParseError(format!(
            "parse error in line {row}, column {col}\n{line}\n{:width$}^\n{msg}\n",
            " ",
            width = col
        )))
    }
}

// SECTION: parsing functions

fn program_r(parser: &mut Parser) -> Result<Program, ParseError> {
    let mut stmts = vec![];
    while parser.peek().is_some() {
        stmts.push(stmt_r(parser)?);
    }
    Ok(Program { stmts })
}

fn stmt_r(parser: &mut Parser) -> Result<Stmt, ParseError> {
    match parser.peek() {
        Some(Int) | Some(Bool) => decl_r(parser),
        Some(Id) => assign_r(parser),
        Some(Observe) => observe_r(parser),
        Some(If) => if_r(parser),
        Some(While) => while_r(parser),
        Some(OpenBrace) => {
            let start = parser.start_next();
            let body = block_r(parser)?;
            Ok(Stmt::Block {
                body,
                range: SourceRange::new(start, parser.end_prev()),
            })
        }
        _ => parser.error_next("expected a statement"),
    }
}

fn decl_r(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.start_next();
    let typ = if parser.eat(Int) {
        Type::Int
    } else {
        parser.expect(Bool)?;
        Type::Bool
    };
    parser.expect(Id)?;
    let name = parser.slice_prev().to_string();
    parser.expect(Gets)?;
    let init = exp_r(parser)?;
    parser.expect(Semicolon)?;
    Ok(Stmt::Decl {
        name,
        typ,
        init,
        range: SourceRange::new(start, parser.end_prev()),
    })
}

fn assign_r(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.start_next();
    parser.expect(Id)?;
    let name = parser.slice_prev().to_string();
    parser.expect(Gets)?;
    let rhs = exp_r(parser)?;
    parser.expect(Semicolon)?;
    Ok(Stmt::Assign {
        name,
        rhs,
        range: SourceRange::new(start, parser.end_prev()),
    })
}

fn observe_r(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.start_next();
    parser.expect(Observe)?;
    parser.expect(OpenParen)?;
    let cond = exp_r(parser)?;
    parser.expect(CloseParen)?;
    parser.expect(Semicolon)?;
    Ok(Stmt::Observe {
        cond,
        range: SourceRange::new(start, parser.end_prev()),
    })
}

fn if_r(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.start_next();
    parser.expect(If)?;
    let guard = exp_r(parser)?;
    // the statement range covers the keyword and the guard only
    let range = SourceRange::new(start, parser.end_prev());
    let tt = block_r(parser)?;
    let ff = if parser.eat(Else) {
        if parser.next_is(If) {
            vec![if_r(parser)?]
        } else {
            block_r(parser)?
        }
    } else {
        vec![]
    };
    Ok(Stmt::If {
        guard,
        tt,
        ff,
        range,
    })
}

fn while_r(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.start_next();
    parser.expect(While)?;
    let guard = exp_r(parser)?;
    let range = SourceRange::new(start, parser.end_prev());
    let body = block_r(parser)?;
    Ok(Stmt::While { guard, body, range })
}

fn block_r(parser: &mut Parser) -> Result<Vec<Stmt>, ParseError> {
    parser.expect(OpenBrace)?;
    let mut stmts = vec![];
    while !parser.next_is(CloseBrace) {
        if parser.end() {
            return parser.error_next("unclosed block");
        }
        stmts.push(stmt_r(parser)?);
    }
    parser.expect(CloseBrace)?;
    Ok(stmts)
}

fn exp_r(parser: &mut Parser) -> Result<Exp, ParseError> {
    let start = parser.start_next();
    let lhs = additive_r(parser)?;
    let op = if parser.eat(EqEq) {
        Some(BinOp::Eq)
    } else if parser.eat(Lt) {
        Some(BinOp::Lt)
    } else {
        None
    };
    match op {
        None => Ok(lhs),
        Some(op) => {
            let rhs = additive_r(parser)?;
            Ok(Exp {
                kind: ExpKind::Bin {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range: SourceRange::new(start, parser.end_prev()),
            })
        }
    }
}

fn additive_r(parser: &mut Parser) -> Result<Exp, ParseError> {
    let start = parser.start_next();
    let mut lhs = atom_r(parser)?;
    loop {
        let op = if parser.eat(Plus) {
            BinOp::Add
        } else if parser.eat(Minus) {
            BinOp::Sub
        } else {
            break;
        };
        let rhs = atom_r(parser)?;
        lhs = Exp {
            kind: ExpKind::Bin {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            range: SourceRange::new(start, parser.end_prev()),
        };
    }
    Ok(lhs)
}

fn atom_r(parser: &mut Parser) -> Result<Exp, ParseError> {
    let start = parser.start_next();
    if parser.eat(IntLit) {
        let n = parser
            .slice_prev()
            .parse::<i64>()
            .map_err(|_| ParseError("integer literal out of range".to_string()))?;
        Ok(Exp {
            kind: ExpKind::IntLit(n),
            range: SourceRange::new(start, parser.end_prev()),
        })
    } else if parser.eat(True) {
        Ok(Exp {
            kind: ExpKind::BoolLit(true),
            range: SourceRange::new(start, parser.end_prev()),
        })
    } else if parser.eat(False) {
        Ok(Exp {
            kind: ExpKind::BoolLit(false),
            range: SourceRange::new(start, parser.end_prev()),
        })
    } else if parser.eat(Id) {
        Ok(Exp {
            kind: ExpKind::Var(parser.slice_prev().to_string()),
            range: SourceRange::new(start, parser.end_prev()),
        })
    } else if parser.eat(OpenParen) {
        let exp = exp_r(parser)?;
        parser.expect(CloseParen)?;
        Ok(exp)
    } else if parser.next_is(Discrete) {
        discrete_r(parser)
    } else {
        parser.error_next("expected an expression")
    }
}

fn discrete_r(parser: &mut Parser) -> Result<Exp, ParseError> {
    let start = parser.start_next();
    parser.expect(Discrete)?;
    parser.expect(OpenParen)?;
    parser.expect(OpenBrace)?;
    let mut dist = vec![];
    loop {
        parser.expect(IntLit)?;
        let value = parser
            .slice_prev()
            .parse::<i64>()
            .map_err(|_| ParseError("integer literal out of range".to_string()))?;
        parser.expect(Colon)?;
        let prob = prob_r(parser)?;
        dist.push((value, prob));
        if !parser.eat(Comma) {
            break;
        }
    }
    parser.expect(CloseBrace)?;
    parser.expect(CloseParen)?;
    Ok(Exp {
        kind: ExpKind::Discrete(dist),
        range: SourceRange::new(start, parser.end_prev()),
    })
}

// a probability literal: `0.5`, but also `1` or `0`.
fn prob_r(parser: &mut Parser) -> Result<f64, ParseError> {
    if parser.eat(FloatLit) || parser.eat(IntLit) {
        parser
            .slice_prev()
            .parse::<f64>()
            .map_err(|_| ParseError("probability literal out of range".to_string()))
    } else {
        parser.error_next("expected a probability")
    }
}
