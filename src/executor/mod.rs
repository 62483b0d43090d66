//! Template execution
//!
//! Walks a parsed [`Root`] against a [`Context`], dispatching tags to
//! resolvers, evaluating control flow and applying error strategies.

mod error;
mod inheritance;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use error::{CancelReason, ExecutionError};

use crate::context::{Context, ErrorStrategy};
use crate::engine::Runtime;
use crate::expr::Evaluator;
use crate::parser::ast::{names, ConditionalNode, Eval, ForNode, Node, Recovery, Root, SwitchNode, TagNode};
use crate::template::Template;
use crate::value::{to_output_string, type_name, Data};

use inheritance::BlockTable;

/// Something that can look up and run named templates
///
/// `include`, `ref` and `extends` reach other templates through this.
pub trait TemplateExecutor: Send + Sync {
    /// Render the template called `name` against `ctx`
    ///
    /// Callers inside a resolver should hand the result to [`Scope::forward`]
    /// so its messages and logged errors reach the outer render.
    fn execute_template(&self, scope: &Scope, name: &str, ctx: Arc<Context>) -> Result<Rendered, ExecutionError>;

    fn has_template(&self, name: &str) -> bool;

    fn get_template(&self, name: &str) -> Option<Arc<Template>>;

    /// Maximum include/extends depth
    fn max_depth(&self) -> usize;
}

/// Cancellation and deadlines shared by one execution
#[derive(Debug, Clone, Default)]
pub struct Scope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    resolver_timeout: Option<Duration>,
    forwarded: Arc<Mutex<Forwarded>>,
}

/// Messages and logged errors of nested renders, waiting for the tag that started them
#[derive(Debug, Default)]
struct Forwarded {
    messages: Vec<Message>,
    logged: Vec<LoggedError>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Abort once `timeout` has passed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout = Some(timeout);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail if the execution has been cancelled or ran out of time
    pub fn check(&self) -> Result<(), ExecutionError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                reason: CancelReason::Cancelled,
            });
        }
        if self.deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            return Err(ExecutionError::Cancelled {
                reason: CancelReason::DeadlineExceeded,
            });
        }
        Ok(())
    }

    /// Pass the messages and logged errors of a nested render on to the
    /// enclosing execution, returning its text
    pub fn forward(&self, rendered: Rendered) -> String {
        let mut forwarded = self.forwarded.lock();
        forwarded.messages.extend(rendered.messages);
        forwarded.logged.extend(rendered.logged);
        rendered.output
    }

    fn take_forwarded(&self) -> (Vec<Message>, Vec<LoggedError>) {
        let mut forwarded = self.forwarded.lock();
        (
            std::mem::take(&mut forwarded.messages),
            std::mem::take(&mut forwarded.logged),
        )
    }

    /// Fail if a resolver call took longer than allowed
    pub fn check_resolver(&self, tag: &str, elapsed: Duration) -> Result<(), ExecutionError> {
        match self.resolver_timeout {
            Some(limit) if elapsed > limit => Err(ExecutionError::Cancelled {
                reason: CancelReason::ResolverTimeout {
                    tag: tag.to_string(),
                    elapsed_ms: elapsed.as_millis(),
                },
            }),
            _ => self.check(),
        }
    }
}

/// A chat message captured from a `message` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// An error swallowed by the `log` strategy
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedError {
    pub tag: String,
    pub error: ExecutionError,
}

/// Output of a successful execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub output: String,
    pub messages: Vec<Message>,
    pub logged: Vec<LoggedError>,
}

pub const MESSAGE_ROLES: [&str; 4] = ["system", "user", "assistant", "tool"];

/// Single-use tree walker for one template execution
pub(crate) struct Executor<'r> {
    runtime: &'r Runtime,
    scope: &'r Scope,
    blocks: BlockTable,
    messages: Vec<Message>,
    logged: Vec<LoggedError>,
}

impl<'r> Executor<'r> {
    pub fn new(runtime: &'r Runtime, scope: &'r Scope) -> Self {
        Self {
            runtime,
            scope,
            blocks: BlockTable::default(),
            messages: Vec::new(),
            logged: Vec::new(),
        }
    }

    /// Execute `root`, the body of the template called `name`
    pub fn run(mut self, name: &str, root: &Root, ctx: &Arc<Context>) -> Result<Rendered, ExecutionError> {
        let mut output = String::new();
        match root.extends() {
            Some(extends) => self.render_extending(name, root, extends, ctx, &mut output)?,
            None => self.render_nodes(&root.children, ctx, &mut output)?,
        }
        Ok(Rendered {
            output,
            messages: self.messages,
            logged: self.logged,
        })
    }

    fn render_nodes(&mut self, nodes: &[Node], ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        for node in nodes {
            self.scope.check()?;
            match node {
                Node::Text(text) => out.push_str(&text.content),
                Node::Tag(tag) => self.render_tag(tag, ctx, out)?,
                Node::Conditional(cond) => self.render_conditional(cond, ctx, out)?,
                Node::For(each) => self.render_for(each, ctx, out)?,
                Node::Switch(switch) => self.render_switch(switch, ctx, out)?,
            }
        }
        Ok(())
    }

    fn render_tag(&mut self, tag: &TagNode, ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        match tag.name.as_str() {
            names::RAW => {
                for child in &tag.children {
                    if let Node::Text(text) = child {
                        out.push_str(&text.content);
                    }
                }
                Ok(())
            }
            names::COMMENT | names::CONFIG => Ok(()),
            names::BLOCK => self.render_block(tag, ctx, out),
            names::PARENT => self.render_parent(ctx, out),
            names::EXTENDS => self.with_strategy(tag, ctx, out, |_| {
                Err(ExecutionError::Misplaced {
                    tag: tag.name.clone(),
                    message: "extends must be a top-level tag".to_string(),
                })
            }),
            names::MESSAGE => self.with_strategy(tag, ctx, out, |exec| exec.render_message(tag, ctx)),
            _ => self.with_strategy(tag, ctx, out, |exec| exec.resolve(tag, ctx)),
        }
    }

    /// Run `produce` and apply the tag's error strategy to a failure
    fn with_strategy(
        &mut self,
        tag: &TagNode,
        ctx: &Arc<Context>,
        out: &mut String,
        produce: impl FnOnce(&mut Self) -> Result<String, ExecutionError>,
    ) -> Result<(), ExecutionError> {
        let strategy = match tag.attrs.get(names::ATTR_ON_ERROR) {
            Some(value) => value
                .parse::<ErrorStrategy>()
                .map_err(|message| ExecutionError::InvalidAttribute {
                    tag: tag.name.clone(),
                    attribute: names::ATTR_ON_ERROR.to_string(),
                    message,
                })?,
            None => ctx.error_strategy(),
        };

        let mark = self.messages.len();
        match produce(self) {
            Ok(text) => {
                out.push_str(&text);
                Ok(())
            }
            Err(err) => {
                self.messages.truncate(mark);
                let fallback = tag.attrs.get_or(names::ATTR_DEFAULT, "");
                self.recover(&tag.name, strategy, fallback, &tag.raw_source, err, out)
            }
        }
    }

    /// Render an `if`, `for` or `switch` into a buffer, applying its
    /// error strategy if any part of it fails
    fn with_recovery(
        &mut self,
        kind: &str,
        recovery: &Recovery,
        ctx: &Arc<Context>,
        out: &mut String,
        produce: impl FnOnce(&mut Self, &mut String) -> Result<(), ExecutionError>,
    ) -> Result<(), ExecutionError> {
        let mark = self.messages.len();
        let mut buffer = String::new();
        match produce(self, &mut buffer) {
            Ok(()) => {
                out.push_str(&buffer);
                Ok(())
            }
            Err(err) => {
                self.messages.truncate(mark);
                let strategy = recovery.on_error.unwrap_or_else(|| ctx.error_strategy());
                let fallback = recovery.default.as_deref().unwrap_or("");
                self.recover(kind, strategy, fallback, &recovery.raw_source, err, out)
            }
        }
    }

    fn recover(
        &mut self,
        tag: &str,
        strategy: ErrorStrategy,
        fallback: &str,
        raw_source: &str,
        err: ExecutionError,
        out: &mut String,
    ) -> Result<(), ExecutionError> {
        if err.is_fatal() {
            return Err(err);
        }
        match strategy {
            ErrorStrategy::Throw => Err(err),
            ErrorStrategy::Default => {
                out.push_str(fallback);
                Ok(())
            }
            ErrorStrategy::Remove => Ok(()),
            ErrorStrategy::KeepRaw => {
                out.push_str(raw_source);
                Ok(())
            }
            ErrorStrategy::Log => {
                self.log(tag, err);
                Ok(())
            }
        }
    }

    fn log(&mut self, tag: &str, error: ExecutionError) {
        warn!(tag, %error, "template error suppressed");
        self.logged.push(LoggedError {
            tag: tag.to_string(),
            error,
        });
    }

    fn resolve(&mut self, tag: &TagNode, ctx: &Arc<Context>) -> Result<String, ExecutionError> {
        let resolver = self
            .runtime
            .resolvers
            .get(&tag.name)
            .ok_or_else(|| ExecutionError::UnknownTag { name: tag.name.clone() })?;
        resolver.validate(&tag.attrs)?;

        let started = Instant::now();
        let result = resolver.resolve(self.scope, ctx, &tag.attrs);
        let (messages, logged) = self.scope.take_forwarded();
        self.messages.extend(messages);
        self.logged.extend(logged);
        self.scope.check_resolver(&tag.name, started.elapsed())?;
        result
    }

    fn render_message(&mut self, tag: &TagNode, ctx: &Arc<Context>) -> Result<String, ExecutionError> {
        let role = tag
            .attrs
            .get(names::ATTR_ROLE)
            .ok_or_else(|| ExecutionError::missing_attribute(&tag.name, names::ATTR_ROLE))?;
        if !MESSAGE_ROLES.contains(&role) {
            return Err(ExecutionError::InvalidAttribute {
                tag: tag.name.clone(),
                attribute: names::ATTR_ROLE.to_string(),
                message: format!("unknown role '{}' (expected one of: {})", role, MESSAGE_ROLES.join(", ")),
            });
        }

        let mut content = String::new();
        self.render_nodes(&tag.children, ctx, &mut content)?;
        self.messages.push(Message {
            role: role.to_string(),
            content: content.trim().to_string(),
        });
        Ok(content)
    }

    fn eval_bool(&self, eval: &Eval, ctx: &Context) -> Result<bool, ExecutionError> {
        Evaluator::new(ctx, &self.runtime.funcs)
            .eval_bool(&eval.expr)
            .map_err(|err| ExecutionError::expression(&eval.source, err))
    }

    fn render_conditional(&mut self, cond: &ConditionalNode, ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        self.with_recovery(names::IF, &cond.recovery, ctx, out, |exec, out| {
            for branch in &cond.branches {
                let taken = match &branch.condition {
                    Some(condition) => exec.eval_bool(condition, ctx)?,
                    None => true,
                };
                if taken {
                    return exec.render_nodes(&branch.children, ctx, out);
                }
            }
            Ok(())
        })
    }

    fn render_for(&mut self, each: &ForNode, ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        self.with_recovery(names::FOR, &each.recovery, ctx, out, |exec, out| exec.render_items(each, ctx, out))
    }

    fn render_items(&mut self, each: &ForNode, ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        let items = match ctx.get(&each.source) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ExecutionError::NotIterable {
                    path: each.source.clone(),
                    found: type_name(&other),
                })
            }
            None => {
                return Err(ExecutionError::VariableNotFound {
                    path: each.source.clone(),
                })
            }
        };

        let count = each.limit.map_or(items.len(), |limit| items.len().min(limit));
        let max = self.runtime.config.max_loop_iterations;
        if count > max {
            return Err(ExecutionError::LoopLimitExceeded {
                collection: each.source.clone(),
                count,
                max,
            });
        }

        for (index, item) in items.into_iter().take(count).enumerate() {
            self.scope.check()?;
            let mut bindings = Data::new();
            bindings.insert(each.item_var.clone(), item);
            if let Some(index_var) = &each.index_var {
                bindings.insert(index_var.clone(), Value::from(index));
            }
            let iteration = ctx.child(bindings);
            self.render_nodes(&each.children, &iteration, out)?;
        }
        Ok(())
    }

    fn render_switch(&mut self, switch: &SwitchNode, ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        self.with_recovery(names::SWITCH, &switch.recovery, ctx, out, |exec, out| {
            let subject = Evaluator::new(ctx, &exec.runtime.funcs)
                .eval(&switch.expression.expr)
                .map(|value| to_output_string(&value))
                .map_err(|err| ExecutionError::expression(&switch.expression.source, err))?;

            for case in &switch.cases {
                let matched = match (&case.value, &case.eval) {
                    (Some(value), _) => *value == subject,
                    (None, Some(eval)) => exec.eval_bool(eval, ctx)?,
                    (None, None) => false,
                };
                if matched {
                    return exec.render_nodes(&case.children, ctx, out);
                }
            }

            match &switch.default {
                Some(children) => exec.render_nodes(children, ctx, out),
                None => Ok(()),
            }
        })
    }

    fn render_block(&mut self, tag: &TagNode, ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        let name = tag
            .attrs
            .get(names::ATTR_NAME)
            .ok_or_else(|| ExecutionError::missing_attribute(&tag.name, names::ATTR_NAME))?;

        let result = match self.blocks.enter(name) {
            Some(layer) => {
                debug!(block = name, "rendering block definition");
                self.render_nodes(&layer, ctx, out)
            }
            None => self.render_nodes(&tag.children, ctx, out),
        };
        self.blocks.leave();
        result
    }

    fn render_parent(&mut self, ctx: &Arc<Context>, out: &mut String) -> Result<(), ExecutionError> {
        match self.blocks.enter_parent() {
            Some(layer) => {
                let result = self.render_nodes(&layer, ctx, out);
                self.blocks.leave();
                result
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(source: &str, data: Value) -> Result<Rendered, ExecutionError> {
        let engine = Engine::new();
        let template = engine.parse(source).expect("Should parse");
        template.render(data, &Default::default())
    }

    fn output(source: &str, data: Value) -> String {
        render(source, data).expect("Should render").output
    }

    #[test]
    fn test_text_and_var() {
        assert_eq!(
            output("Hello, {~prompty.var name=\"user\" /~}!", json!({"user": "Alice"})),
            "Hello, Alice!"
        );
    }

    #[test]
    fn test_raw_and_comment() {
        let source = "{~prompty.raw~}{~x~}{~/prompty.raw~}{~prompty.comment~}hidden{~/prompty.comment~}.";
        assert_eq!(output(source, json!({})), "{~x~}.");
    }

    #[test]
    fn test_conditional_branches() {
        let source = "{~prompty.if eval=\"n > 5\"~}big{~prompty.elseif eval=\"n > 1\"~}mid{~prompty.else~}small{~/prompty.if~}";
        assert_eq!(output(source, json!({"n": 9})), "big");
        assert_eq!(output(source, json!({"n": 3})), "mid");
        assert_eq!(output(source, json!({"n": 0})), "small");
    }

    #[test]
    fn test_for_with_index_and_limit() {
        let source = "{~prompty.for item=\"x\" index=\"i\" in=\"xs\" limit=\"2\"~}{~prompty.var name=\"i\" /~}={~prompty.var name=\"x\" /~};{~/prompty.for~}";
        assert_eq!(output(source, json!({"xs": ["a", "b", "c"]})), "0=a;1=b;");
    }

    #[test]
    fn test_for_errors() {
        let source = "{~prompty.for item=\"x\" in=\"xs\"~}.{~/prompty.for~}";
        assert!(matches!(
            render(source, json!({"xs": 3})),
            Err(ExecutionError::NotIterable { found: "number", .. })
        ));
        assert!(matches!(
            render(source, json!({})),
            Err(ExecutionError::VariableNotFound { .. })
        ));
    }

    #[test]
    fn test_switch_by_value_and_eval() {
        let source = "{~prompty.switch eval=\"tier\"~}\
            {~prompty.case value=\"gold\"~}G{~/prompty.case~}\
            {~prompty.case eval=\"score > 10\"~}S{~/prompty.case~}\
            {~prompty.casedefault~}D{~/prompty.casedefault~}\
            {~/prompty.switch~}";
        assert_eq!(output(source, json!({"tier": "gold", "score": 0})), "G");
        assert_eq!(output(source, json!({"tier": "x", "score": 20})), "S");
        assert_eq!(output(source, json!({"tier": "x", "score": 1})), "D");
    }

    #[test]
    fn test_unknown_tag_strategies() {
        let tag = |onerror: &str| format!("[{{~custom.tag default=\"d\" onerror=\"{}\" /~}}]", onerror);
        assert_eq!(output(&tag("default"), json!({})), "[d]");
        assert_eq!(output(&tag("remove"), json!({})), "[]");
        assert_eq!(
            output(&tag("keepraw"), json!({})),
            "[{~custom.tag default=\"d\" onerror=\"keepraw\" /~}]"
        );
        assert!(matches!(
            render(&tag("throw"), json!({})),
            Err(ExecutionError::UnknownTag { .. })
        ));

        let logged = render(&tag("log"), json!({})).expect("Should render");
        assert_eq!(logged.output, "[]");
        assert_eq!(logged.logged.len(), 1);
        assert_eq!(logged.logged[0].tag, "custom.tag");
    }

    #[test]
    fn test_invalid_onerror_is_reported() {
        let result = render("{~custom.tag onerror=\"explode\" /~}", json!({}));
        assert!(matches!(
            result,
            Err(ExecutionError::InvalidAttribute { ref attribute, .. }) if attribute == "onerror"
        ));
    }

    #[test]
    fn test_messages_are_collected() {
        let source = "{~prompty.message role=\"system\"~}Be brief.{~/prompty.message~}\n\
            {~prompty.message role=\"user\"~}Hi {~prompty.var name=\"n\" /~}{~/prompty.message~}";
        let rendered = render(source, json!({"n": "Bob"})).expect("Should render");
        assert_eq!(rendered.output, "Be brief.\nHi Bob");
        assert_eq!(
            rendered.messages,
            vec![
                Message {
                    role: "system".to_string(),
                    content: "Be brief.".to_string()
                },
                Message {
                    role: "user".to_string(),
                    content: "Hi Bob".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_message_with_bad_role() {
        let result = render("{~prompty.message role=\"robot\"~}x{~/prompty.message~}", json!({}));
        assert!(matches!(result, Err(ExecutionError::InvalidAttribute { .. })));
    }

    #[test]
    fn test_control_flow_errors_follow_context_strategy() {
        let engine = Engine::new();
        let template = engine
            .parse("a{~prompty.if eval=\"missing > 1\"~}b{~/prompty.if~}c")
            .expect("Should parse");
        let options = crate::template::RenderOptions::default().with_error_strategy(ErrorStrategy::Remove);
        assert_eq!(template.render(json!({}), &options).expect("Should render").output, "ac");

        let result = template.render(json!({}), &Default::default());
        assert!(matches!(result, Err(ExecutionError::Expression { .. })));
    }

    #[test]
    fn test_control_flow_onerror_overrides_context() {
        let source = "a{~prompty.if eval=\"missing > 1\" onerror=\"remove\"~}b{~/prompty.if~}c";
        assert_eq!(output(source, json!({})), "ac");

        let source = "a{~prompty.for item=\"x\" in=\"xs\" onerror=\"throw\"~}.{~/prompty.for~}c";
        let engine = Engine::new();
        let template = engine.parse(source).expect("Should parse");
        let options = crate::template::RenderOptions::default().with_error_strategy(ErrorStrategy::Remove);
        assert!(matches!(
            template.render(json!({}), &options),
            Err(ExecutionError::VariableNotFound { .. })
        ));
    }

    #[test]
    fn test_control_flow_keepraw_and_default() {
        let source = "[{~prompty.switch eval=\"len(1, 2)\" onerror=\"keepraw\"~}{~prompty.casedefault~}d{~/prompty.casedefault~}{~/prompty.switch~}]";
        assert_eq!(output(source, json!({})), source);

        let source = "[{~prompty.for item=\"x\" in=\"xs\" onerror=\"default\" default=\"none\"~}.{~/prompty.for~}]";
        assert_eq!(output(source, json!({"xs": "str"})), "[none]");
    }

    #[test]
    fn test_failed_construct_discards_partial_output() {
        let source = "{~prompty.for item=\"x\" in=\"xs\" onerror=\"log\"~}\
            {~prompty.var name=\"x.name\" /~},{~/prompty.for~}!";
        let rendered = render(source, json!({"xs": [{"name": "a"}, {}]})).expect("Should render");
        assert_eq!(rendered.output, "!");
        assert_eq!(rendered.logged.len(), 1);
        assert_eq!(rendered.logged[0].tag, names::FOR);
    }

    #[test]
    fn test_messages_dropped_with_failed_parent() {
        let source = "{~prompty.message role=\"system\" onerror=\"remove\"~}\
            {~prompty.message role=\"user\"~}lost{~/prompty.message~}{~prompty.var name=\"nope\" /~}\
            {~/prompty.message~}\
            {~prompty.if eval=\"n > 1\" onerror=\"remove\"~}\
            {~prompty.message role=\"user\"~}also lost{~/prompty.message~}{~prompty.var name=\"nope\" /~}\
            {~/prompty.if~}\
            {~prompty.message role=\"user\"~}kept{~/prompty.message~}";
        let rendered = render(source, json!({"n": 2})).expect("Should render");
        assert_eq!(rendered.output, "kept");
        assert_eq!(
            rendered.messages,
            vec![Message {
                role: "user".to_string(),
                content: "kept".to_string()
            }]
        );
    }

    #[test]
    fn test_cancelled_before_start() {
        let engine = Engine::new();
        let template = engine.parse("hello").expect("Should parse");
        let token = CancellationToken::new();
        token.cancel();
        let options = crate::template::RenderOptions::default().with_cancel(token);
        assert_eq!(
            template.render(json!({}), &options),
            Err(ExecutionError::Cancelled {
                reason: CancelReason::Cancelled
            })
        );
    }

    #[test]
    fn test_scope_resolver_timeout() {
        let scope = Scope::new().with_resolver_timeout(Duration::from_millis(5));
        assert!(scope.check_resolver("t", Duration::from_millis(1)).is_ok());
        assert!(matches!(
            scope.check_resolver("t", Duration::from_millis(50)),
            Err(ExecutionError::Cancelled {
                reason: CancelReason::ResolverTimeout { .. }
            })
        ));
    }
}
