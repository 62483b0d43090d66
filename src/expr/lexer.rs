//! Expression tokens, lexed with logos

use logos::Logos;

use crate::parser::lexer::unescape;
use crate::parser::ast::Span;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Operators (longer patterns first)
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessOrEqual,
    #[token(">=")]
    GreaterOrEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("!")]
    Bang,

    // Delimiters
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token(",")]
    Comma,

    // Keywords
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    #[token("null")]
    Nil,

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z0-9_]+)*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),

    #[regex(r"-?[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
}

/// Lex an expression; `Err(())` marks an unrecognised character
pub fn lex(input: &str) -> impl Iterator<Item = (Result<Token, ()>, Span)> + '_ {
    Token::lexer(input).spanned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        lex(input).map(|(t, _)| t.expect("Should lex")).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("&& || == != <= >= < > !"),
            vec![
                Token::And,
                Token::Or,
                Token::Eq,
                Token::NotEq,
                Token::LessOrEqual,
                Token::GreaterOrEqual,
                Token::Less,
                Token::Greater,
                Token::Bang
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            tokens("true false nil null trueish user.name items.0"),
            vec![
                Token::True,
                Token::False,
                Token::Nil,
                Token::Nil,
                Token::Ident("trueish".to_string()),
                Token::Ident("user.name".to_string()),
                Token::Ident("items.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            tokens(r#"'gold' "say \"hi\"" 42 -1.5"#),
            vec![
                Token::String("gold".to_string()),
                Token::String("say \"hi\"".to_string()),
                Token::Number(42.0),
                Token::Number(-1.5),
            ]
        );
    }

    #[test]
    fn test_unknown_character() {
        assert!(lex("a + b").any(|(t, _)| t.is_err()));
    }
}
