//! Parsed, executable templates

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::{Context, ErrorStrategy};
use crate::engine::Runtime;
use crate::executor::{ExecutionError, Executor, Rendered, Scope, TemplateExecutor};
use crate::parser::ast::{names, Node, Root};

/// Per-call overrides for [`Template::render`]
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub cancel: Option<CancellationToken>,
    /// Overrides the engine's default strategy
    pub error_strategy: Option<ErrorStrategy>,
    /// Overrides the engine's render timeout
    pub timeout: Option<Duration>,
}

impl RenderOptions {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = Some(strategy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A template ready for execution. Immutable and shareable across threads.
pub struct Template {
    name: String,
    source: String,
    root: Arc<Root>,
    config: Option<Value>,
    runtime: Arc<Runtime>,
    engine: Option<Weak<dyn TemplateExecutor>>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("nodes", &self.root.children.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Template {
    pub(crate) fn new(
        name: String,
        source: String,
        root: Root,
        runtime: Arc<Runtime>,
        engine: Option<Weak<dyn TemplateExecutor>>,
    ) -> Self {
        let config = config_block(&root);
        Self {
            name,
            source,
            root: Arc::new(root),
            config,
            runtime,
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Arc<Root> {
        &self.root
    }

    /// JSON from the template's top-level `config` block, if any
    pub fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    /// Render with default options, returning only the text
    pub fn execute(&self, data: Value) -> Result<String, ExecutionError> {
        self.render(data, &RenderOptions::default())
            .map(|rendered| rendered.output)
    }

    /// Render against `data`, which must be a JSON object or null
    pub fn render(&self, data: Value, options: &RenderOptions) -> Result<Rendered, ExecutionError> {
        let config = &self.runtime.config;
        let strategy = options.error_strategy.unwrap_or(config.error_strategy);
        let mut ctx = Context::from_value(data)?.with_error_strategy(strategy);
        if let Some(engine) = self.engine.as_ref().and_then(Weak::upgrade) {
            ctx = ctx.with_engine(engine);
        }

        let mut scope = Scope::new();
        if let Some(token) = &options.cancel {
            scope = scope.with_cancel(token.clone());
        }
        if let Some(timeout) = options.timeout.or_else(|| config.timeout()) {
            scope = scope.with_timeout(timeout);
        }
        if let Some(timeout) = config.resolver_timeout() {
            scope = scope.with_resolver_timeout(timeout);
        }

        self.render_in(&scope, &Arc::new(ctx))
    }

    /// Render inside an execution that is already running
    pub fn render_in(&self, scope: &Scope, ctx: &Arc<Context>) -> Result<Rendered, ExecutionError> {
        scope.check()?;
        Executor::new(&self.runtime, scope).run(&self.name, &self.root, ctx)
    }
}

fn config_block(root: &Root) -> Option<Value> {
    let tag = root.children.iter().find_map(|node| match node {
        Node::Tag(tag) if tag.name == names::CONFIG => Some(tag),
        _ => None,
    })?;
    let body: String = tag
        .children
        .iter()
        .filter_map(|node| match node {
            Node::Text(text) => Some(text.content.as_str()),
            _ => None,
        })
        .collect();
    serde_json::from_str(&body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let engine = Engine::new();
        let source = "{~prompty.config~}{\"model\": \"gpt-4\", \"temperature\": 0.2}{~/prompty.config~}Hi";
        let template = engine.parse(source).expect("Should parse");
        assert_eq!(template.source(), source);
        assert_eq!(template.root().children.len(), 2);
        assert_eq!(template.config(), Some(&json!({"model": "gpt-4", "temperature": 0.2})));
        assert_eq!(template.execute(json!({})), Ok("Hi".to_string()));
    }

    #[test]
    fn test_execute_rejects_non_object_data() {
        let template = Engine::new().parse("x").expect("Should parse");
        assert!(matches!(
            template.execute(json!([1, 2])),
            Err(ExecutionError::InvalidData { .. })
        ));
        assert_eq!(template.execute(Value::Null), Ok("x".to_string()));
    }

    #[test]
    fn test_template_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Template>();
    }

    #[test]
    fn test_concurrent_execution() {
        let template = Arc::new(
            Engine::new()
                .parse("{~prompty.var name=\"n\" /~}")
                .expect("Should parse"),
        );
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let template = Arc::clone(&template);
                std::thread::spawn(move || template.execute(json!({ "n": i })))
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let output = handle.join().expect("thread finished");
            assert_eq!(output, Ok(i.to_string()));
        }
    }
}
