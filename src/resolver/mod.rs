//! Tag resolvers: handlers that turn a tag into text

mod builtins;
mod registry;

use std::sync::Arc;

use crate::context::Context;
use crate::executor::{ExecutionError, Scope};
use crate::parser::ast::Attributes;

pub use builtins::{EnvResolver, IncludeResolver, RefResolver, VarResolver};
pub use registry::{RegistryError, ResolverRegistry};

/// Handler for one tag name
pub trait Resolver: Send + Sync {
    /// The full tag name this resolver handles
    fn tag_name(&self) -> &str;

    /// Produce the text for a tag instance
    fn resolve(&self, scope: &Scope, ctx: &Arc<Context>, attrs: &Attributes) -> Result<String, ExecutionError>;

    /// Check attributes without executing anything
    fn validate(&self, _attrs: &Attributes) -> Result<(), ExecutionError> {
        Ok(())
    }
}
