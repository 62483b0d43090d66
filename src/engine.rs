//! The engine: registries, configuration and named templates
//!
//! ```
//! use prompty::Engine;
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! engine
//!     .register_template("greeting", "Hello, {~prompty.var name=\"user\" /~}!")
//!     .unwrap();
//! let out = engine.execute_template("greeting", json!({"user": "Alice"})).unwrap();
//! assert_eq!(out, "Hello, Alice!");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::ParseError;
use crate::executor::{ExecutionError, Rendered, Scope, TemplateExecutor};
use crate::expr::{Func, FuncRegistry};
use crate::parser::parse;
use crate::resolver::{RegistryError, Resolver, ResolverRegistry};
use crate::template::{RenderOptions, Template};
use crate::validate::{check, ValidationIssue};
use crate::Error;

/// Name given to templates parsed without one
pub const INLINE_NAME: &str = "<inline>";

/// Read-only state shared by every template of an engine
#[derive(Debug)]
pub struct Runtime {
    pub resolvers: ResolverRegistry,
    pub funcs: FuncRegistry,
    pub config: EngineConfig,
}

/// Builds an [`Engine`] with custom configuration, resolvers and functions
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    resolvers: ResolverRegistry,
    funcs: FuncRegistry,
    /// First registration failure, reported by `build`
    error: Option<RegistryError>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            resolvers: ResolverRegistry::with_builtins(),
            funcs: FuncRegistry::with_builtins(),
            error: None,
        }
    }
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        if let Err(err) = self.resolvers.register(Arc::new(resolver)) {
            self.error.get_or_insert(err);
        }
        self
    }

    pub fn func(mut self, func: Func) -> Self {
        if let Err(err) = self.funcs.register(func) {
            self.error.get_or_insert(err);
        }
        self
    }

    pub fn build(self) -> Result<Engine, Error> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        self.config.validate()?;
        Ok(Engine::from_runtime(Runtime {
            resolvers: self.resolvers,
            funcs: self.funcs,
            config: self.config,
        }))
    }
}

struct EngineShared {
    runtime: Arc<Runtime>,
    templates: RwLock<HashMap<String, Arc<Template>>>,
}

impl TemplateExecutor for EngineShared {
    fn execute_template(&self, scope: &Scope, name: &str, ctx: Arc<Context>) -> Result<Rendered, ExecutionError> {
        let template = self
            .get_template(name)
            .ok_or_else(|| ExecutionError::TemplateNotFound { name: name.to_string() })?;
        template.render_in(scope, &ctx)
    }

    fn has_template(&self, name: &str) -> bool {
        self.templates.read().contains_key(name)
    }

    fn get_template(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.read().get(name).cloned()
    }

    fn max_depth(&self) -> usize {
        self.runtime.config.max_depth
    }
}

/// Parses and runs templates. Cheap to clone; clones share registered templates.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("runtime", &self.shared.runtime)
            .field("templates", &self.template_names())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with default configuration and the builtin resolvers and functions
    pub fn new() -> Self {
        Self::from_runtime(Runtime {
            resolvers: ResolverRegistry::with_builtins(),
            funcs: FuncRegistry::with_builtins(),
            config: EngineConfig::default(),
        })
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    fn from_runtime(runtime: Runtime) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                runtime: Arc::new(runtime),
                templates: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.runtime.config
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.shared.runtime.resolvers
    }

    pub fn funcs(&self) -> &FuncRegistry {
        &self.shared.runtime.funcs
    }

    /// Parse an unnamed template. It can include templates registered with this engine.
    pub fn parse(&self, source: &str) -> Result<Template, ParseError> {
        self.parse_named(INLINE_NAME, source)
    }

    pub fn parse_named(&self, name: &str, source: &str) -> Result<Template, ParseError> {
        let root = parse(source, &self.config().delimiters)?;
        let shared: Arc<dyn TemplateExecutor> = self.shared.clone();
        let engine: Weak<dyn TemplateExecutor> = Arc::downgrade(&shared);
        Ok(Template::new(
            name.to_string(),
            source.to_string(),
            root,
            Arc::clone(&self.shared.runtime),
            Some(engine),
        ))
    }

    /// Parse `source` and make it available to `include`, `ref` and `extends` as `name`
    pub fn register_template(&self, name: &str, source: &str) -> Result<Arc<Template>, Error> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName.into());
        }
        let template = Arc::new(self.parse_named(name, source)?);
        let mut templates = self.shared.templates.write();
        if templates.contains_key(name) {
            return Err(RegistryError::Duplicate {
                kind: "template",
                name: name.to_string(),
            }
            .into());
        }
        templates.insert(name.to_string(), Arc::clone(&template));
        debug!(template = name, "registered template");
        Ok(template)
    }

    pub fn template(&self, name: &str) -> Option<Arc<Template>> {
        self.shared.get_template(name)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.shared.has_template(name)
    }

    /// Registered template names, sorted
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.templates.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Parse and execute `source` in one step
    pub fn execute(&self, source: &str, data: Value) -> Result<String, Error> {
        Ok(self.parse(source)?.execute(data)?)
    }

    /// Execute a registered template
    pub fn execute_template(&self, name: &str, data: Value) -> Result<String, Error> {
        Ok(self.render_template(name, data, &RenderOptions::default())?.output)
    }

    pub fn render_template(&self, name: &str, data: Value, options: &RenderOptions) -> Result<Rendered, Error> {
        let template = self
            .template(name)
            .ok_or_else(|| ExecutionError::TemplateNotFound { name: name.to_string() })?;
        Ok(template.render(data, options)?)
    }

    /// Parse `source` and run the static checks over it
    pub fn validate(&self, source: &str) -> Result<Vec<ValidationIssue>, ParseError> {
        let root = parse(source, &self.config().delimiters)?;
        Ok(check(&root, self.resolvers(), self.funcs()))
    }
}
