//! Builtin resolvers: `var`, `env`, `include` and `ref`

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::Resolver;
use crate::context::Context;
use crate::executor::{ExecutionError, Scope, TemplateExecutor};
use crate::parser::ast::{names, Attributes};
use crate::value::{to_output_string, type_name, Data};

/// Attributes of `include` that are not passed through as variables
const INCLUDE_RESERVED: [&str; 5] = [
    names::ATTR_TEMPLATE,
    names::ATTR_WITH,
    names::ATTR_ISOLATE,
    names::ATTR_ON_ERROR,
    names::ATTR_DEFAULT,
];

fn require<'a>(tag: &str, attrs: &'a Attributes, attribute: &str) -> Result<&'a str, ExecutionError> {
    attrs
        .get(attribute)
        .ok_or_else(|| ExecutionError::missing_attribute(tag, attribute))
}

/// `{~prompty.var name="user.name" default="guest" /~}`
#[derive(Debug, Clone, Copy, Default)]
pub struct VarResolver;

impl Resolver for VarResolver {
    fn tag_name(&self) -> &str {
        names::VAR
    }

    fn resolve(&self, _scope: &Scope, ctx: &Arc<Context>, attrs: &Attributes) -> Result<String, ExecutionError> {
        let path = require(names::VAR, attrs, names::ATTR_NAME)?;
        match ctx.get(path) {
            Some(value) => Ok(to_output_string(&value)),
            None => attrs
                .get(names::ATTR_DEFAULT)
                .map(str::to_string)
                .ok_or_else(|| ExecutionError::VariableNotFound {
                    path: path.to_string(),
                }),
        }
    }

    fn validate(&self, attrs: &Attributes) -> Result<(), ExecutionError> {
        require(names::VAR, attrs, names::ATTR_NAME).map(|_| ())
    }
}

/// `{~prompty.env name="HOME" default="/" required="true" /~}`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvResolver;

impl Resolver for EnvResolver {
    fn tag_name(&self) -> &str {
        names::ENV
    }

    fn resolve(&self, _scope: &Scope, _ctx: &Arc<Context>, attrs: &Attributes) -> Result<String, ExecutionError> {
        let name = require(names::ENV, attrs, names::ATTR_NAME)?;
        match std::env::var(name) {
            Ok(value) => Ok(value),
            Err(_) => match attrs.get(names::ATTR_DEFAULT) {
                Some(default) => Ok(default.to_string()),
                None if attrs.get_bool(names::ATTR_REQUIRED).unwrap_or(false) => {
                    Err(ExecutionError::EnvNotSet { name: name.to_string() })
                }
                None => Ok(String::new()),
            },
        }
    }

    fn validate(&self, attrs: &Attributes) -> Result<(), ExecutionError> {
        require(names::ENV, attrs, names::ATTR_NAME)?;
        match attrs.get(names::ATTR_REQUIRED) {
            Some(value) if attrs.get_bool(names::ATTR_REQUIRED).is_none() => {
                Err(ExecutionError::InvalidAttribute {
                    tag: names::ENV.to_string(),
                    attribute: names::ATTR_REQUIRED.to_string(),
                    message: format!("expected a boolean, got '{}'", value),
                })
            }
            _ => Ok(()),
        }
    }
}

/// The engine attached to `ctx`, after checking that one more level of
/// nesting stays within its depth limit
fn enter_template(
    tag: &str,
    ctx: &Context,
    name: &str,
) -> Result<(Arc<dyn TemplateExecutor>, usize), ExecutionError> {
    let engine = ctx
        .engine()
        .cloned()
        .ok_or_else(|| ExecutionError::NoTemplateExecutor { tag: tag.to_string() })?;
    let depth = ctx.depth() + 1;
    let max = engine.max_depth();
    if depth > max {
        return Err(ExecutionError::DepthExceeded { depth, max });
    }
    if !engine.has_template(name) {
        return Err(ExecutionError::TemplateNotFound { name: name.to_string() });
    }
    Ok((engine, depth))
}

/// `{~prompty.include template="footer" with="user" isolate="true" extra="x" /~}`
///
/// Without `isolate`, the included template sees a copy of every variable
/// visible here. The object named by `with` and any extra attributes are
/// layered on top.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeResolver;

impl Resolver for IncludeResolver {
    fn tag_name(&self) -> &str {
        names::INCLUDE
    }

    fn resolve(&self, scope: &Scope, ctx: &Arc<Context>, attrs: &Attributes) -> Result<String, ExecutionError> {
        let name = require(names::INCLUDE, attrs, names::ATTR_TEMPLATE)?;
        let (engine, depth) = enter_template(names::INCLUDE, ctx, name)?;
        let isolate = attrs.get_bool(names::ATTR_ISOLATE).unwrap_or(false);

        let mut data = if isolate { Data::new() } else { ctx.flatten() };
        if let Some(path) = attrs.get(names::ATTR_WITH) {
            match ctx.get(path) {
                Some(Value::Object(map)) => data.extend(map),
                Some(other) => {
                    return Err(ExecutionError::InvalidAttribute {
                        tag: names::INCLUDE.to_string(),
                        attribute: names::ATTR_WITH.to_string(),
                        message: format!("'{}' is {}, expected an object", path, type_name(&other)),
                    })
                }
                None => return Err(ExecutionError::VariableNotFound { path: path.to_string() }),
            }
        }
        for (key, value) in attrs.iter() {
            if !INCLUDE_RESERVED.contains(&key) {
                data.insert(key.to_string(), Value::String(value.to_string()));
            }
        }

        debug!(template = name, depth, isolate, "including template");
        let child = Arc::new(ctx.isolated(data).with_depth(depth));
        let rendered = engine.execute_template(scope, name, child)?;
        Ok(scope.forward(rendered))
    }

    fn validate(&self, attrs: &Attributes) -> Result<(), ExecutionError> {
        require(names::INCLUDE, attrs, names::ATTR_TEMPLATE)?;
        match attrs.get(names::ATTR_ISOLATE) {
            Some(value) if attrs.get_bool(names::ATTR_ISOLATE).is_none() => {
                Err(ExecutionError::InvalidAttribute {
                    tag: names::INCLUDE.to_string(),
                    attribute: names::ATTR_ISOLATE.to_string(),
                    message: format!("expected a boolean, got '{}'", value),
                })
            }
            _ => Ok(()),
        }
    }
}

/// `{~prompty.ref template="name" /~}`: render another template against the current variables
#[derive(Debug, Clone, Copy, Default)]
pub struct RefResolver;

impl Resolver for RefResolver {
    fn tag_name(&self) -> &str {
        names::REF
    }

    fn resolve(&self, scope: &Scope, ctx: &Arc<Context>, attrs: &Attributes) -> Result<String, ExecutionError> {
        let name = require(names::REF, attrs, names::ATTR_TEMPLATE)?;
        let (engine, depth) = enter_template(names::REF, ctx, name)?;
        debug!(template = name, depth, "rendering referenced template");
        let child = Arc::new(ctx.isolated(ctx.flatten()).with_depth(depth));
        let rendered = engine.execute_template(scope, name, child)?;
        Ok(scope.forward(rendered))
    }

    fn validate(&self, attrs: &Attributes) -> Result<(), ExecutionError> {
        require(names::REF, attrs, names::ATTR_TEMPLATE).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx(value: Value) -> Arc<Context> {
        Arc::new(Context::from_value(value).expect("object data"))
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_var_lookup_and_default() {
        let scope = Scope::new();
        let ctx = ctx(json!({"user": {"name": "Alice", "age": 7}}));
        let var = VarResolver;
        assert_eq!(var.resolve(&scope, &ctx, &attrs(&[("name", "user.name")])), Ok("Alice".to_string()));
        assert_eq!(var.resolve(&scope, &ctx, &attrs(&[("name", "user.age")])), Ok("7".to_string()));
        assert_eq!(
            var.resolve(&scope, &ctx, &attrs(&[("name", "user.x"), ("default", "guest")])),
            Ok("guest".to_string())
        );
        assert_eq!(
            var.resolve(&scope, &ctx, &attrs(&[("name", "user.x")])),
            Err(ExecutionError::VariableNotFound {
                path: "user.x".to_string()
            })
        );
        assert!(var.validate(&attrs(&[])).is_err());
    }

    #[test]
    fn test_env_resolution() {
        let scope = Scope::new();
        let ctx = ctx(json!({}));
        let env = EnvResolver;
        let missing = "PROMPTY_TEST_SURELY_UNSET_VARIABLE";
        assert_eq!(env.resolve(&scope, &ctx, &attrs(&[("name", missing)])), Ok(String::new()));
        assert_eq!(
            env.resolve(&scope, &ctx, &attrs(&[("name", missing), ("default", "d")])),
            Ok("d".to_string())
        );
        assert!(matches!(
            env.resolve(&scope, &ctx, &attrs(&[("name", missing), ("required", "true")])),
            Err(ExecutionError::EnvNotSet { .. })
        ));
        assert!(env.validate(&attrs(&[("name", "X"), ("required", "maybe")])).is_err());
    }

    #[test]
    fn test_include_without_engine() {
        let result = IncludeResolver.resolve(&Scope::new(), &ctx(json!({})), &attrs(&[("template", "t")]));
        assert!(matches!(result, Err(ExecutionError::NoTemplateExecutor { .. })));
    }

    #[test]
    fn test_include_validation() {
        assert!(IncludeResolver.validate(&attrs(&[])).is_err());
        assert!(IncludeResolver.validate(&attrs(&[("template", "t"), ("isolate", "sure")])).is_err());
        assert!(IncludeResolver.validate(&attrs(&[("template", "t"), ("isolate", "yes")])).is_ok());
        assert!(RefResolver.validate(&attrs(&[("template", "t")])).is_ok());
    }
}
