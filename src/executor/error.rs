//! Errors raised while executing a template

use std::fmt;

use thiserror::Error;

use crate::expr::ExprError;

/// Why an execution was aborted early
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired
    Cancelled,
    /// The overall render timeout elapsed
    DeadlineExceeded,
    /// A single resolver ran longer than the per-resolver timeout
    ResolverTimeout { tag: String, elapsed_ms: u128 },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "cancelled by caller"),
            CancelReason::DeadlineExceeded => write!(f, "render deadline exceeded"),
            CancelReason::ResolverTimeout { tag, elapsed_ms } => {
                write!(f, "resolver '{}' took {}ms", tag, elapsed_ms)
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("variable '{path}' not found")]
    VariableNotFound { path: String },

    #[error("unknown tag '{name}'")]
    UnknownTag { name: String },

    #[error("tag '{tag}' requires attribute '{attribute}'")]
    MissingAttribute { tag: String, attribute: String },

    #[error("invalid value for '{attribute}' on '{tag}': {message}")]
    InvalidAttribute {
        tag: String,
        attribute: String,
        message: String,
    },

    #[error("'{tag}' is not allowed here: {message}")]
    Misplaced { tag: String, message: String },

    #[error("expression '{expr}' failed: {source}")]
    Expression {
        expr: String,
        #[source]
        source: ExprError,
    },

    #[error("template '{name}' not found")]
    TemplateNotFound { name: String },

    #[error("'{tag}' needs a template executor but none is attached")]
    NoTemplateExecutor { tag: String },

    #[error("'{path}' is not iterable (found {found})")]
    NotIterable { path: String, found: &'static str },

    #[error("environment variable '{name}' is not set")]
    EnvNotSet { name: String },

    #[error("resolver '{tag}' failed: {message}")]
    Resolver { tag: String, message: String },

    #[error("invalid data: {message}")]
    InvalidData { message: String },

    #[error("template depth {depth} exceeds the maximum of {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("loop over '{collection}' would run {count} iterations, the maximum is {max}")]
    LoopLimitExceeded {
        collection: String,
        count: usize,
        max: usize,
    },

    #[error("circular template inheritance: {}", .chain.join(" -> "))]
    CircularReference { chain: Vec<String> },

    #[error("execution aborted: {reason}")]
    Cancelled { reason: CancelReason },
}

impl ExecutionError {
    /// Fatal errors abort the whole execution regardless of error strategy
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DepthExceeded { .. }
                | Self::LoopLimitExceeded { .. }
                | Self::CircularReference { .. }
                | Self::Cancelled { .. }
        )
    }

    pub(crate) fn expression(expr: &str, source: ExprError) -> Self {
        Self::Expression {
            expr: expr.to_string(),
            source,
        }
    }

    pub(crate) fn missing_attribute(tag: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            tag: tag.to_string(),
            attribute: attribute.to_string(),
        }
    }
}
