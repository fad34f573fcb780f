//! The lexer for the probabilistic source language.

use std::fmt::{self, Display};
use std::ops::Range;

use logos::Logos;

#[derive(Logos, Clone, Copy, Debug, Eq, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum TokenKind {
    #[token("int")]
    Int,
    #[token("bool")]
    Bool,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("observe")]
    Observe,
    #[token("discrete")]
    Discrete,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[regex("[a-zA-Z][a-zA-Z0-9_]*")]
    Id,
    #[regex(r"[0-9]+\.[0-9]+")]
    FloatLit,
    #[regex("[0-9]+")]
    IntLit,
    #[token("==")]
    EqEq,
    #[token("=")]
    Gets,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("<")]
    Lt,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    /// Stands in for unrecognized input; the null byte never lexes from
    /// real programs.
    #[token("\0")]
    Error,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TokenKind::*;
        let text = match self {
            Int => "int",
            Bool => "bool",
            If => "if",
            Else => "else",
            While => "while",
            Observe => "observe",
            Discrete => "discrete",
            True => "true",
            False => "false",
            Id => "identifier",
            FloatLit => "float literal",
            IntLit => "integer literal",
            EqEq => "==",
            Gets => "=",
            Plus => "+",
            Minus => "-",
            Lt => "<",
            OpenBrace => "{",
            CloseBrace => "}",
            OpenParen => "(",
            CloseParen => ")",
            Colon => ":",
            Comma => ",",
            Semicolon => ";",
            Error => "invalid token",
        };
        write!(f, "{text}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

/// Tokenize the whole input.  Unrecognized input becomes `Error` tokens,
/// which the parser reports with their source location.
pub fn lex(code: &str) -> Vec<Token> {
    TokenKind::lexer(code)
        .spanned()
        .map(|(kind, span)| Token {
            kind: kind.unwrap_or(TokenKind::Error),
            span,
        })
        .collect()
}
