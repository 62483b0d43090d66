//! Parser for prompty templates

pub mod ast;
mod grammar;
pub mod lexer;

pub use ast::*;
pub use grammar::{parse, parse_header, parse_tokens, TagHeader, MAX_NESTING};
pub use lexer::{tokenize, Delimiters, Token, TokenKind};
