//! Functions callable from expressions

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::resolver::RegistryError;
use crate::value::{as_number, is_empty, number_value, to_output_string};

/// Signature of a function body; `Err` carries a message for the caller
pub type FuncImpl = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A named function with its arity bounds
#[derive(Clone)]
pub struct Func {
    pub name: String,
    pub min_args: usize,
    /// `None` for variadic functions
    pub max_args: Option<usize>,
    pub f: Arc<FuncImpl>,
}

impl Func {
    pub fn new<F>(name: impl Into<String>, min_args: usize, max_args: Option<usize>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            min_args,
            max_args,
            f: Arc::new(f),
        }
    }

    /// Whether `n` arguments are acceptable
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min_args && self.max_args.map_or(true, |max| n <= max)
    }

    /// Human-readable arity, e.g. `2`, `1-2` or `at least 1`
    pub fn arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}-{}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        if !self.accepts(args.len()) {
            return Err(format!("expected {} arguments, got {}", self.arity(), args.len()));
        }
        (self.f)(args)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish_non_exhaustive()
    }
}

/// Function lookup table
#[derive(Debug, Clone, Default)]
pub struct FuncRegistry {
    funcs: HashMap<String, Func>,
}

impl FuncRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the builtin functions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for func in builtins() {
            registry.funcs.insert(func.name.clone(), func);
        }
        registry
    }

    pub fn register(&mut self, func: Func) -> Result<(), RegistryError> {
        if func.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.funcs.contains_key(&func.name) {
            return Err(RegistryError::Duplicate {
                kind: "function",
                name: func.name,
            });
        }
        self.funcs.insert(func.name.clone(), func);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Func> {
        self.funcs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn string_arg(args: &[Value], i: usize) -> String {
    args.get(i).map(to_output_string).unwrap_or_default()
}

fn builtins() -> Vec<Func> {
    vec![
        Func::new("len", 1, Some(1), |args| {
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(format!("len of {} is undefined", crate::value::type_name(other))),
            };
            Ok(Value::from(n))
        }),
        Func::new("upper", 1, Some(1), |args| {
            Ok(Value::String(string_arg(args, 0).to_uppercase()))
        }),
        Func::new("lower", 1, Some(1), |args| {
            Ok(Value::String(string_arg(args, 0).to_lowercase()))
        }),
        Func::new("trim", 1, Some(1), |args| {
            Ok(Value::String(string_arg(args, 0).trim().to_string()))
        }),
        Func::new("contains", 2, Some(2), |args| {
            let found = match &args[0] {
                Value::Array(items) => items.iter().any(|v| crate::value::loose_eq(v, &args[1])),
                Value::Object(map) => map.contains_key(&string_arg(args, 1)),
                Value::Null => false,
                other => to_output_string(other).contains(&string_arg(args, 1)),
            };
            Ok(Value::Bool(found))
        }),
        Func::new("hasPrefix", 2, Some(2), |args| {
            Ok(Value::Bool(string_arg(args, 0).starts_with(&string_arg(args, 1))))
        }),
        Func::new("hasSuffix", 2, Some(2), |args| {
            Ok(Value::Bool(string_arg(args, 0).ends_with(&string_arg(args, 1))))
        }),
        Func::new("isEmpty", 1, Some(1), |args| Ok(Value::Bool(is_empty(&args[0])))),
        Func::new("notEmpty", 1, Some(1), |args| Ok(Value::Bool(!is_empty(&args[0])))),
        Func::new("default", 2, Some(2), |args| {
            if is_empty(&args[0]) {
                Ok(args[1].clone())
            } else {
                Ok(args[0].clone())
            }
        }),
        Func::new("toString", 1, Some(1), |args| Ok(Value::String(string_arg(args, 0)))),
        Func::new("toInt", 1, Some(1), |args| match &args[0] {
            Value::Bool(b) => Ok(Value::from(*b as i64)),
            other => as_number(other)
                .map(|n| number_value(n.trunc()))
                .ok_or_else(|| format!("cannot convert '{}' to int", to_output_string(other))),
        }),
        Func::new("join", 1, Some(2), |args| {
            let sep = if args.len() > 1 { string_arg(args, 1) } else { ",".to_string() };
            match &args[0] {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(to_output_string).collect::<Vec<_>>().join(&sep),
                )),
                Value::Null => Ok(Value::String(String::new())),
                other => Ok(Value::String(to_output_string(other))),
            }
        }),
    ]
}
