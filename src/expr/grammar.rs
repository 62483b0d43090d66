//! Expression parser using chumsky
//!
//! Precedence, lowest first: `||`, `&&`, comparisons, unary `!`, atoms.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use serde_json::Value;

use super::lexer::{lex, Token};
use super::{BinaryOp, Expr, ExprError};
use crate::value::number_value;

/// Parse expression source into an AST
pub fn parse_expression(input: &str) -> Result<Expr, ExprError> {
    let len = input.len();

    let mut tokens = Vec::new();
    for (tok, span) in lex(input) {
        match tok {
            Ok(tok) => tokens.push((tok, SimpleSpan::from(span))),
            Err(()) => {
                return Err(ExprError::Syntax {
                    message: format!("unexpected character '{}'", &input[span.clone()]),
                    span,
                })
            }
        }
    }

    // Turn the token list into a stream that chumsky can use
    let token_stream = Stream::from_iter(tokens)
        // Split (Token, SimpleSpan) into token and span parts
        .map((len..len).into(), |(t, s): (_, _)| (t, s));

    expression_parser()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| {
            let first = errs.into_iter().next();
            match first {
                Some(err) => ExprError::Syntax {
                    message: match err.found() {
                        Some(tok) => format!("unexpected {}", describe(tok)),
                        None => "unexpected end of expression".to_string(),
                    },
                    span: err.span().into_range(),
                },
                None => ExprError::Syntax {
                    message: "invalid expression".to_string(),
                    span: 0..len,
                },
            }
        })
}

fn expression_parser<'a, I>() -> impl Parser<'a, I, Expr, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let literal = select! {
            Token::String(s) => Expr::Literal(Value::String(s)),
            Token::Number(n) => Expr::Literal(number_value(n)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Nil => Expr::Literal(Value::Null),
        };

        let ident = select! {
            Token::Ident(name) => name,
        };

        // Function call: name(arg, ...)
        let call = ident
            .clone()
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
            )
            .map(|(name, args)| Expr::Call { name, args });

        // Call must come before the bare variable since both start with an identifier
        let atom = choice((
            literal,
            call,
            ident.map(Expr::Var),
            expr.delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
        ));

        let unary = just(Token::Bang)
            .repeated()
            .foldr(atom, |_bang, operand| Expr::Not(Box::new(operand)));

        let comparison_op = select! {
            Token::Eq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Less => BinaryOp::Less,
            Token::Greater => BinaryOp::Greater,
            Token::LessOrEqual => BinaryOp::LessOrEqual,
            Token::GreaterOrEqual => BinaryOp::GreaterOrEqual,
        };

        let comparison = unary
            .clone()
            .foldl(comparison_op.then(unary).repeated(), |lhs, (op, rhs)| {
                Expr::binary(op, lhs, rhs)
            });

        let and = comparison.clone().foldl(
            just(Token::And).to(BinaryOp::And).then(comparison).repeated(),
            |lhs, (op, rhs)| Expr::binary(op, lhs, rhs),
        );

        and.clone()
            .foldl(
                just(Token::Or).to(BinaryOp::Or).then(and).repeated(),
                |lhs, (op, rhs)| Expr::binary(op, lhs, rhs),
            )
            .boxed()
    })
}

/// Format a token for human-readable error messages
fn describe(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => format!("identifier '{}'", s),
        Token::String(s) => format!("string \"{}\"", s),
        Token::Number(n) => format!("number {}", n),
        Token::And => "'&&'".to_string(),
        Token::Or => "'||'".to_string(),
        Token::Eq => "'=='".to_string(),
        Token::NotEq => "'!='".to_string(),
        Token::Less => "'<'".to_string(),
        Token::Greater => "'>'".to_string(),
        Token::LessOrEqual => "'<='".to_string(),
        Token::GreaterOrEqual => "'>='".to_string(),
        Token::Bang => "'!'".to_string(),
        Token::ParenOpen => "'('".to_string(),
        Token::ParenClose => "')'".to_string(),
        Token::Comma => "','".to_string(),
        Token::True => "keyword 'true'".to_string(),
        Token::False => "keyword 'false'".to_string(),
        Token::Nil => "keyword 'nil'".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    #[test]
    fn test_parse_variable() {
        assert_eq!(parse_expression("user.isAdmin"), Ok(var("user.isAdmin")));
    }

    #[test]
    fn test_parse_precedence() {
        // a || b && c  ==  a || (b && c)
        let expr = parse_expression("a || b && c").expect("Should parse");
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Or,
                var("a"),
                Expr::binary(BinaryOp::And, var("b"), var("c"))
            )
        );
    }

    #[test]
    fn test_parse_comparison_binds_tighter_than_and() {
        let expr = parse_expression("x > 1 && y == 'a'").expect("Should parse");
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::And,
                Expr::binary(BinaryOp::Greater, var("x"), Expr::Literal(json!(1))),
                Expr::binary(BinaryOp::Eq, var("y"), Expr::Literal(json!("a")))
            )
        );
    }

    #[test]
    fn test_parse_unary_and_parens() {
        let expr = parse_expression("!(a || !b)").expect("Should parse");
        assert_eq!(
            expr,
            Expr::Not(Box::new(Expr::binary(
                BinaryOp::Or,
                var("a"),
                Expr::Not(Box::new(var("b")))
            )))
        );
    }

    #[test]
    fn test_parse_call() {
        let expr = parse_expression("contains(tags, \"x\")").expect("Should parse");
        assert_eq!(
            expr,
            Expr::Call {
                name: "contains".to_string(),
                args: vec![var("tags"), Expr::Literal(json!("x"))],
            }
        );
        let empty = parse_expression("now()").expect("Should parse");
        assert_eq!(
            empty,
            Expr::Call {
                name: "now".to_string(),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_expression("a &&"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse_expression("(a"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse_expression("a b"), Err(ExprError::Syntax { .. })));
        assert!(matches!(parse_expression(""), Err(ExprError::Syntax { .. })));
        match parse_expression("a # b") {
            Err(ExprError::Syntax { message, span }) => {
                assert!(message.contains('#'));
                assert_eq!(span, 2..3);
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }
}
