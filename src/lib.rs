//! prompty - a tag-based templating engine for building LLM prompts
//!
//! Templates are text with `{~ ~}` tags. The reserved `prompty.` namespace
//! provides variables, conditionals, loops, switches, includes and
//! template inheritance.
//!
//! # Example
//!
//! ```rust
//! use prompty::render;
//! use serde_json::json;
//!
//! let out = render(
//!     "Hello, {~prompty.var name=\"user\" default=\"guest\" /~}!",
//!     json!({}),
//! ).unwrap();
//! assert_eq!(out, "Hello, guest!");
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expr;
pub mod parser;
pub mod resolver;
pub mod template;
pub mod validate;
pub mod value;

pub use config::{ConfigError, EngineConfig};
pub use context::{Context, ErrorStrategy};
pub use engine::{Engine, EngineBuilder, Runtime};
pub use error::{LexError, ParseError};
pub use executor::{
    CancelReason, ExecutionError, LoggedError, Message, Rendered, Scope, TemplateExecutor,
};
pub use expr::{evaluate, evaluate_bool, ExprError, Func, FuncRegistry};
pub use parser::{parse, Attributes, Delimiters, Node, Root};
pub use resolver::{RegistryError, Resolver, ResolverRegistry};
pub use template::{RenderOptions, Template};
pub use validate::{Severity, ValidationIssue};

pub use serde_json::Value;
pub use tokio_util::sync::CancellationToken;

use thiserror::Error;

/// Errors from the convenience entry points
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<LexError> for Error {
    fn from(err: LexError) -> Self {
        Error::Parse(err.into())
    }
}

/// Parse and execute `source` against `data` with a default engine
pub fn render(source: &str, data: Value) -> Result<String, Error> {
    Engine::new().execute(source, data)
}
