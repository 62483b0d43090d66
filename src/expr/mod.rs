//! Expression language for `eval` attributes
//!
//! ```text
//! isAdmin && !user.banned
//! len(items) > 0 || hasPrefix(model, "gpt")
//! tier == 'gold'
//! ```

mod eval;
mod functions;
mod grammar;
mod lexer;

use serde_json::Value;
use thiserror::Error;

pub use eval::{evaluate, evaluate_bool, Evaluator};
pub use functions::{Func, FuncImpl, FuncRegistry};
pub use grammar::parse_expression;

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dot-path variable reference
    Var(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Visit every function call in the expression
    pub fn for_each_call(&self, f: &mut impl FnMut(&str, usize)) {
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Call { name, args } => {
                f(name, args.len());
                for arg in args {
                    arg.for_each_call(f);
                }
            }
            Expr::Not(inner) => inner.for_each_call(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_call(f);
                rhs.for_each_call(f);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::GreaterOrEqual => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("syntax error at {span:?}: {message}")]
    Syntax {
        message: String,
        span: std::ops::Range<usize>,
    },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' takes {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("function '{name}' failed: {message}")]
    Function { name: String, message: String },

    #[error("'{operand}' is undefined in '{op}' comparison")]
    MissingOperand { operand: String, op: BinaryOp },

    #[error("cannot compare {left} with {right} using '{op}'")]
    TypeMismatch {
        left: &'static str,
        right: &'static str,
        op: BinaryOp,
    },
}
