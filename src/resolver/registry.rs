//! Registry mapping tag names to resolvers

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::builtins::{EnvResolver, IncludeResolver, RefResolver, VarResolver};
use super::Resolver;
use crate::parser::ast::names;

/// Errors raised while registering resolvers or functions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("'{name}' uses the reserved '{}' prefix", names::PREFIX)]
    ReservedName { name: String },

    #[error("name must not be empty")]
    EmptyName,
}

/// Name to resolver table. Built once, read-only afterwards.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("tags", &self.names())
            .finish()
    }
}

impl ResolverRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the builtin `var`, `env`, `include` and `ref` resolvers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn Resolver>; 4] = [
            Arc::new(VarResolver),
            Arc::new(EnvResolver),
            Arc::new(IncludeResolver),
            Arc::new(RefResolver),
        ];
        for resolver in builtins {
            registry
                .resolvers
                .insert(resolver.tag_name().to_string(), resolver);
        }
        registry
    }

    /// Register a user resolver. Names under the reserved prefix are refused.
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) -> Result<(), RegistryError> {
        let name = resolver.tag_name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if name.starts_with(names::PREFIX) {
            return Err(RegistryError::ReservedName { name });
        }
        if self.resolvers.contains_key(&name) {
            return Err(RegistryError::Duplicate { kind: "resolver", name });
        }
        self.resolvers.insert(name, resolver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.get(name)
    }

    /// Whether a tag name is handled, either by a resolver or by the executor itself
    pub fn is_known(&self, name: &str) -> bool {
        self.resolvers.contains_key(name) || names::STRUCTURAL.contains(&name)
    }

    /// Registered resolver names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
