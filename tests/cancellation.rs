//! Integration tests for cancellation, deadlines and resolver timeouts

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use prompty::parser::Attributes;
use prompty::{
    CancelReason, CancellationToken, Context, Engine, EngineConfig, ErrorStrategy, ExecutionError,
    RenderOptions, Resolver, Scope,
};

/// Sleeps, then cancels the token it was given (if any)
struct Slow {
    delay: Duration,
    cancel: Option<CancellationToken>,
}

impl Resolver for Slow {
    fn tag_name(&self) -> &str {
        "test.slow"
    }

    fn resolve(&self, _: &Scope, _: &Arc<Context>, _: &Attributes) -> Result<String, ExecutionError> {
        thread::sleep(self.delay);
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        Ok("slow".to_string())
    }
}

#[test]
fn test_cancellation_between_nodes() {
    let token = CancellationToken::new();
    let engine = Engine::builder()
        .resolver(Slow {
            delay: Duration::ZERO,
            cancel: Some(token.clone()),
        })
        .build()
        .expect("Should build");
    let template = engine.parse("a{~test.slow /~}b").expect("Should parse");

    let options = RenderOptions::default()
        .with_cancel(token)
        .with_error_strategy(ErrorStrategy::Remove);
    assert_eq!(
        template.render(json!({}), &options),
        Err(ExecutionError::Cancelled {
            reason: CancelReason::Cancelled
        })
    );
}

#[test]
fn test_render_deadline() {
    let engine = Engine::builder()
        .resolver(Slow {
            delay: Duration::from_millis(30),
            cancel: None,
        })
        .build()
        .expect("Should build");
    let template = engine
        .parse("{~prompty.for item=\"x\" in=\"xs\"~}{~test.slow /~}{~/prompty.for~}")
        .expect("Should parse");

    let options = RenderOptions::default().with_timeout(Duration::from_millis(40));
    assert_eq!(
        template.render(json!({"xs": [1, 2, 3, 4, 5]}), &options),
        Err(ExecutionError::Cancelled {
            reason: CancelReason::DeadlineExceeded
        })
    );
}

#[test]
fn test_resolver_timeout() {
    let engine = Engine::builder()
        .config(EngineConfig::default().with_resolver_timeout(Duration::from_millis(5)))
        .resolver(Slow {
            delay: Duration::from_millis(30),
            cancel: None,
        })
        .build()
        .expect("Should build");
    let template = engine
        .parse("{~test.slow onerror=\"remove\" /~}")
        .expect("Should parse");

    match template.execute(json!({})) {
        Err(ExecutionError::Cancelled {
            reason: CancelReason::ResolverTimeout { tag, elapsed_ms },
        }) => {
            assert_eq!(tag, "test.slow");
            assert!(elapsed_ms >= 5);
        }
        other => panic!("Expected resolver timeout, got {:?}", other),
    }
}

#[test]
fn test_fast_resolver_within_timeouts() {
    let engine = Engine::builder()
        .config(
            EngineConfig::default()
                .with_resolver_timeout(Duration::from_secs(5))
                .with_timeout(Duration::from_secs(5)),
        )
        .resolver(Slow {
            delay: Duration::ZERO,
            cancel: None,
        })
        .build()
        .expect("Should build");
    assert_eq!(
        engine.execute("<{~test.slow /~}>", json!({})).expect("Should render"),
        "<slow>"
    );
}
