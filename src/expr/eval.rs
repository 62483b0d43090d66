//! Expression evaluation against a Context

use std::cmp::Ordering;

use serde_json::Value;

use super::{parse_expression, BinaryOp, Expr, ExprError, FuncRegistry};
use crate::context::Context;
use crate::value::{as_number, is_truthy, loose_eq, type_name};

/// Parse and evaluate `source`
pub fn evaluate(source: &str, ctx: &Context, funcs: &FuncRegistry) -> Result<Value, ExprError> {
    let expr = parse_expression(source)?;
    Evaluator::new(ctx, funcs).eval(&expr)
}

/// Parse and evaluate `source`, reducing the result to its truthiness
pub fn evaluate_bool(source: &str, ctx: &Context, funcs: &FuncRegistry) -> Result<bool, ExprError> {
    let expr = parse_expression(source)?;
    Evaluator::new(ctx, funcs).eval_bool(&expr)
}

/// Walks an [`Expr`] tree
pub struct Evaluator<'a> {
    ctx: &'a Context,
    funcs: &'a FuncRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a Context, funcs: &'a FuncRegistry) -> Self {
        Self { ctx, funcs }
    }

    /// Evaluate to a value; absent variables become null
    pub fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        Ok(self.eval_inner(expr)?.unwrap_or(Value::Null))
    }

    pub fn eval_bool(&self, expr: &Expr) -> Result<bool, ExprError> {
        Ok(self.eval_inner(expr)?.map_or(false, |v| is_truthy(&v)))
    }

    /// `None` means the expression names a variable that does not exist
    fn eval_inner(&self, expr: &Expr) -> Result<Option<Value>, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Var(path) => Ok(self.ctx.get(path)),
            Expr::Not(inner) => Ok(Some(Value::Bool(!self.eval_bool(inner)?))),
            Expr::Call { name, args } => self.call(name, args).map(Some),
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs).map(Some),
        }
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value, ExprError> {
        let func = self.funcs.get(name).ok_or_else(|| ExprError::UnknownFunction {
            name: name.to_string(),
        })?;
        if !func.accepts(args.len()) {
            return Err(ExprError::Arity {
                name: name.to_string(),
                expected: func.arity(),
                got: args.len(),
            });
        }
        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;
        func.call(&values).map_err(|message| ExprError::Function {
            name: name.to_string(),
            message,
        })
    }

    fn binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, ExprError> {
        match op {
            BinaryOp::And => Ok(Value::Bool(self.eval_bool(lhs)? && self.eval_bool(rhs)?)),
            BinaryOp::Or => Ok(Value::Bool(self.eval_bool(lhs)? || self.eval_bool(rhs)?)),
            BinaryOp::Eq => Ok(Value::Bool(loose_eq(&self.eval(lhs)?, &self.eval(rhs)?))),
            BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(&self.eval(lhs)?, &self.eval(rhs)?))),
            BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessOrEqual | BinaryOp::GreaterOrEqual => {
                let left = self.operand(op, lhs)?;
                let right = self.operand(op, rhs)?;
                let ordering = compare(op, &left, &right)?;
                let result = match op {
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    BinaryOp::LessOrEqual => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(Value::Bool(result))
            }
        }
    }

    /// Operand of an ordering comparison, which must exist
    fn operand(&self, op: BinaryOp, expr: &Expr) -> Result<Value, ExprError> {
        self.eval_inner(expr)?.ok_or_else(|| ExprError::MissingOperand {
            operand: match expr {
                Expr::Var(path) => path.clone(),
                other => format!("{:?}", other),
            },
            op,
        })
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a.partial_cmp(&b).ok_or(ExprError::TypeMismatch {
            left: "number",
            right: "number",
            op,
        });
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExprError::TypeMismatch {
            left: type_name(left),
            right: type_name(right),
            op,
        }),
    }
}
