//! Hierarchical variable scopes
//!
//! A [`Context`] owns its data and optionally points at a read-only parent.
//! Lookups try the local data first and then walk up the parent chain.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::{ExecutionError, TemplateExecutor};
use crate::value::{lookup_path, Data};

/// What to do when a tag fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStrategy {
    /// Propagate the error and abort the execution
    #[default]
    Throw,
    /// Emit the tag's `default` attribute, or nothing
    Default,
    /// Emit nothing
    Remove,
    /// Emit the tag's source text unchanged
    KeepRaw,
    /// Record the error and emit nothing
    Log,
}

impl ErrorStrategy {
    pub const ALL: [ErrorStrategy; 5] = [
        ErrorStrategy::Throw,
        ErrorStrategy::Default,
        ErrorStrategy::Remove,
        ErrorStrategy::KeepRaw,
        ErrorStrategy::Log,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStrategy::Throw => "throw",
            ErrorStrategy::Default => "default",
            ErrorStrategy::Remove => "remove",
            ErrorStrategy::KeepRaw => "keepraw",
            ErrorStrategy::Log => "log",
        }
    }
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ErrorStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown error strategy '{}' (expected one of: throw, default, remove, keepraw, log)",
                    s
                )
            })
    }
}

/// Variable scope for one execution
pub struct Context {
    data: RwLock<Data>,
    parent: Option<Arc<Context>>,
    error_strategy: ErrorStrategy,
    depth: usize,
    engine: Option<Arc<dyn TemplateExecutor>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("data", &*self.data.read())
            .field("parent", &self.parent)
            .field("error_strategy", &self.error_strategy)
            .field("depth", &self.depth)
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

impl Context {
    /// An empty root scope
    pub fn new() -> Self {
        Self::from_data(Data::new())
    }

    pub fn from_data(data: Data) -> Self {
        Self {
            data: RwLock::new(data),
            parent: None,
            error_strategy: ErrorStrategy::default(),
            depth: 0,
            engine: None,
        }
    }

    /// Build a root scope from a JSON object; `null` gives an empty scope
    pub fn from_value(value: Value) -> Result<Self, ExecutionError> {
        match value {
            Value::Object(map) => Ok(Self::from_data(map)),
            Value::Null => Ok(Self::new()),
            other => Err(ExecutionError::InvalidData {
                message: format!(
                    "template data must be an object, got {}",
                    crate::value::type_name(&other)
                ),
            }),
        }
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    /// Copy of this scope bound to a template executor. The copy has no
    /// parent; the whole chain is flattened into it.
    pub fn with_engine(&self, engine: Arc<dyn TemplateExecutor>) -> Self {
        let mut copy = self.deep_copy();
        copy.engine = Some(engine);
        copy
    }

    /// Copy of this scope at another include/extends depth
    pub fn with_depth(&self, depth: usize) -> Self {
        let mut copy = self.deep_copy();
        copy.depth = depth;
        copy
    }

    /// A parentless scope holding only `data`, keeping this scope's
    /// strategy, depth and engine. Used at template boundaries.
    pub fn isolated(&self, data: Data) -> Self {
        Self {
            data: RwLock::new(data),
            parent: None,
            error_strategy: self.error_strategy,
            depth: self.depth,
            engine: self.engine.clone(),
        }
    }

    /// Parentless copy of every variable visible from here
    fn deep_copy(&self) -> Self {
        Self {
            data: RwLock::new(self.flatten()),
            parent: None,
            error_strategy: self.error_strategy,
            depth: self.depth,
            engine: self.engine.clone(),
        }
    }

    /// A child scope; the parent is never modified through it
    pub fn child(self: &Arc<Self>, data: Data) -> Arc<Context> {
        Arc::new(Self {
            data: RwLock::new(data),
            parent: Some(Arc::clone(self)),
            error_strategy: self.error_strategy,
            depth: self.depth,
            engine: self.engine.clone(),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Context>> {
        self.parent.as_ref()
    }

    pub fn error_strategy(&self) -> ErrorStrategy {
        self.error_strategy
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn engine(&self) -> Option<&Arc<dyn TemplateExecutor>> {
        self.engine.as_ref()
    }

    /// Resolve a dot-path, local scope first
    pub fn get(&self, path: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = lookup_path(&scope.data.read(), path) {
                return Some(value.clone());
            }
            scope = scope.parent.as_deref()?;
        }
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_string_or(&self, path: &str, default: &str) -> String {
        self.get_string(path).unwrap_or_else(|| default.to_string())
    }

    /// Integers, and floats without a fractional part
    pub fn get_int(&self, path: &str) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn get_int_or(&self, path: &str, default: i64) -> i64 {
        self.get_int(path).unwrap_or(default)
    }

    pub fn get_float(&self, path: &str) -> Option<f64> {
        match self.get(path)? {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn get_float_or(&self, path: &str, default: f64) -> f64 {
        self.get_float(path).unwrap_or(default)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn get_bool_or(&self, path: &str, default: bool) -> bool {
        self.get_bool(path).unwrap_or(default)
    }

    pub fn get_slice(&self, path: &str) -> Option<Vec<Value>> {
        match self.get(path)? {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn get_slice_or(&self, path: &str, default: Vec<Value>) -> Vec<Value> {
        self.get_slice(path).unwrap_or(default)
    }

    pub fn get_map(&self, path: &str) -> Option<Data> {
        match self.get(path)? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn get_map_or(&self, path: &str, default: Data) -> Data {
        self.get_map(path).unwrap_or(default)
    }

    /// Set a top-level key in this scope
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Keys of this scope only, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys visible from this scope, deduplicated and sorted
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = BTreeSet::new();
        let mut scope = Some(self);
        while let Some(current) = scope {
            keys.extend(current.data.read().keys().cloned());
            scope = current.parent.as_deref();
        }
        keys.into_iter().collect()
    }

    /// Merged view of the whole chain; nearer scopes shadow outer ones
    pub fn flatten(&self) -> Data {
        let mut chain = Vec::new();
        let mut scope = Some(self);
        while let Some(current) = scope {
            chain.push(current);
            scope = current.parent.as_deref();
        }
        let mut merged = Data::new();
        for current in chain.into_iter().rev() {
            for (key, value) in current.data.read().iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(value: Value) -> Data {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected object"),
        }
    }

    fn root() -> Arc<Context> {
        Arc::new(Context::from_data(data(json!({
            "user": {"name": "Alice", "age": 30, "admin": false},
            "items": [1, 2, 3],
            "ratio": 0.5,
            "shadowed": "outer"
        }))))
    }

    #[test]
    fn test_typed_getters() {
        let ctx = root();
        assert_eq!(ctx.get_string("user.name"), Some("Alice".to_string()));
        assert_eq!(ctx.get_int("user.age"), Some(30));
        assert_eq!(ctx.get_float("ratio"), Some(0.5));
        assert_eq!(ctx.get_bool("user.admin"), Some(false));
        assert_eq!(ctx.get_slice("items").map(|s| s.len()), Some(3));
        assert!(ctx.get_map("user").is_some());
        assert_eq!(ctx.get_int("user.name"), None);
        assert_eq!(ctx.get_string_or("user.missing", "x"), "x");
        assert_eq!(ctx.get_int_or("ratio", 7), 7);
        assert!(ctx.get_bool_or("nope", true));
    }

    #[test]
    fn test_child_lookup_falls_back_to_parent() {
        let parent = root();
        let child = parent.child(data(json!({"shadowed": "inner", "local": 1})));
        assert_eq!(child.get("shadowed"), Some(json!("inner")));
        assert_eq!(child.get("user.name"), Some(json!("Alice")));
        assert_eq!(child.get("local"), Some(json!(1)));
        assert_eq!(parent.get("local"), None);
    }

    #[test]
    fn test_set_does_not_touch_parent() {
        let parent = root();
        let child = parent.child(Data::new());
        child.set("shadowed", json!("changed"));
        assert_eq!(child.get_string("shadowed"), Some("changed".to_string()));
        assert_eq!(parent.get_string("shadowed"), Some("outer".to_string()));
    }

    #[test]
    fn test_keys() {
        let parent = root();
        let child = parent.child(data(json!({"b": 1, "a": 2, "shadowed": 3})));
        assert_eq!(child.keys(), vec!["a", "b", "shadowed"]);
        assert_eq!(
            child.all_keys(),
            vec!["a", "b", "items", "ratio", "shadowed", "user"]
        );
    }

    #[test]
    fn test_flatten_prefers_child() {
        let parent = root();
        let child = parent.child(data(json!({"shadowed": "inner"})));
        let flat = child.flatten();
        assert_eq!(flat.get("shadowed"), Some(&json!("inner")));
        assert_eq!(flat.get("ratio"), Some(&json!(0.5)));
    }

    #[test]
    fn test_with_depth_copies_data() {
        let ctx = root();
        let deeper = ctx.with_depth(3);
        deeper.set("ratio", json!(1));
        assert_eq!(deeper.depth(), 3);
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.get("ratio"), Some(json!(0.5)));
    }

    #[test]
    fn test_boundary_copies_detach_from_chain() {
        let parent = root();
        let child = parent.child(data(json!({"shadowed": "inner"})));
        let copy = child.with_depth(1);
        assert!(copy.parent().is_none());
        assert_eq!(copy.get("shadowed"), Some(json!("inner")));
        assert_eq!(copy.get("user.name"), Some(json!("Alice")));

        copy.set("ratio", json!(2));
        copy.set("shadowed", json!("changed"));
        assert_eq!(parent.get("ratio"), Some(json!(0.5)));
        assert_eq!(child.get("shadowed"), Some(json!("inner")));
    }

    #[test]
    fn test_from_value() {
        assert!(Context::from_value(json!(null)).is_ok());
        assert!(matches!(
            Context::from_value(json!([1])),
            Err(ExecutionError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_error_strategy_parsing() {
        assert_eq!("KeepRaw".parse::<ErrorStrategy>(), Ok(ErrorStrategy::KeepRaw));
        assert_eq!("log".parse::<ErrorStrategy>(), Ok(ErrorStrategy::Log));
        assert!("explode".parse::<ErrorStrategy>().is_err());
        assert_eq!(ErrorStrategy::KeepRaw.to_string(), "keepraw");
    }
}
