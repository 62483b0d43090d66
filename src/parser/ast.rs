//! Abstract Syntax Tree types for prompty templates

use std::collections::BTreeMap;
use std::fmt;

use crate::context::ErrorStrategy;
use crate::expr::Expr;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Line/column location of a token (1-based line and column, 0-based byte offset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Tag attributes, keyed by name.
///
/// Lookup does not depend on the order attributes were written in; keys are kept
/// sorted so iteration and `Display` are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute, returning the previous value if the key was already set
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// `true`/`yes`/`1` and `false`/`no`/`0`, case-insensitive. `None` if the
    /// attribute is missing or holds anything else.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\""))?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Root of a parsed template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Root {
    pub children: Vec<Node>,
}

impl Root {
    /// The top-level `extends` tag, if this template inherits from another
    pub fn extends(&self) -> Option<&TagNode> {
        self.children.iter().find_map(|node| match node {
            Node::Tag(tag) if tag.name == names::EXTENDS => Some(tag),
            _ => None,
        })
    }

    /// Top-level `block` tags in document order
    pub fn blocks(&self) -> impl Iterator<Item = &TagNode> {
        self.children.iter().filter_map(|node| match node {
            Node::Tag(tag) if tag.name == names::BLOCK => Some(tag),
            _ => None,
        })
    }
}

/// A node in the template tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text, emitted verbatim
    Text(TextNode),
    /// Any tag that is not a control-flow construct
    Tag(TagNode),
    /// `if` / `elseif` / `else` chain
    Conditional(ConditionalNode),
    /// `for` loop
    For(ForNode),
    /// `switch` with `case` / `casedefault` arms
    Switch(SwitchNode),
}

impl Node {
    /// Short name of the node kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Text(_) => "text",
            Node::Tag(_) => "tag",
            Node::Conditional(_) => "conditional",
            Node::For(_) => "for",
            Node::Switch(_) => "switch",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagNode {
    pub name: String,
    pub attrs: Attributes,
    /// Empty for self-closing tags
    pub children: Vec<Node>,
    /// Exact source text of the tag; for blocks this runs through the end tag
    pub raw_source: String,
    pub position: Position,
    pub span: Span,
}

impl TagNode {
    pub fn is_builtin(&self) -> bool {
        self.name.starts_with(names::PREFIX)
    }
}

/// An `eval` attribute, parsed together with the template
#[derive(Debug, Clone, PartialEq)]
pub struct Eval {
    pub source: String,
    pub expr: Expr,
}

/// How an `if`, `for` or `switch` handles a non-fatal error
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recovery {
    /// From `onerror`; the context's strategy applies when unset
    pub on_error: Option<ErrorStrategy>,
    /// Emitted by the `default` strategy
    pub default: Option<String>,
    /// Source of the whole construct, through its end tag
    pub raw_source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalNode {
    pub branches: Vec<ConditionalBranch>,
    pub recovery: Recovery,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalBranch {
    /// `None` for the `else` branch
    pub condition: Option<Eval>,
    pub children: Vec<Node>,
}

impl ConditionalBranch {
    pub fn is_else(&self) -> bool {
        self.condition.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub item_var: String,
    pub index_var: Option<String>,
    /// Dot-path of the collection to iterate
    pub source: String,
    pub limit: Option<usize>,
    pub children: Vec<Node>,
    pub recovery: Recovery,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchNode {
    pub expression: Eval,
    pub cases: Vec<SwitchCase>,
    pub default: Option<Vec<Node>>,
    pub recovery: Recovery,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Compared against the stringified switch value
    pub value: Option<String>,
    /// Boolean expression evaluated instead of `value`
    pub eval: Option<Eval>,
    pub children: Vec<Node>,
}

/// Names of the built-in tags and their attributes
pub mod names {
    pub const PREFIX: &str = "prompty.";

    pub const VAR: &str = "prompty.var";
    pub const RAW: &str = "prompty.raw";
    pub const COMMENT: &str = "prompty.comment";
    pub const DEFAULT: &str = "prompty.default";
    pub const INCLUDE: &str = "prompty.include";
    pub const REF: &str = "prompty.ref";
    pub const IF: &str = "prompty.if";
    pub const ELSEIF: &str = "prompty.elseif";
    pub const ELSE: &str = "prompty.else";
    pub const FOR: &str = "prompty.for";
    pub const SWITCH: &str = "prompty.switch";
    pub const CASE: &str = "prompty.case";
    pub const CASE_DEFAULT: &str = "prompty.casedefault";
    pub const ENV: &str = "prompty.env";
    pub const CONFIG: &str = "prompty.config";
    pub const EXTENDS: &str = "prompty.extends";
    pub const BLOCK: &str = "prompty.block";
    pub const PARENT: &str = "prompty.parent";
    pub const MESSAGE: &str = "prompty.message";

    /// Tags whose body is kept as verbatim text by the lexer
    pub const VERBATIM: [&str; 3] = [RAW, COMMENT, CONFIG];

    /// Tags handled directly by the executor rather than through a resolver
    pub const STRUCTURAL: [&str; 15] = [
        RAW,
        COMMENT,
        DEFAULT,
        IF,
        ELSEIF,
        ELSE,
        FOR,
        SWITCH,
        CASE,
        CASE_DEFAULT,
        CONFIG,
        EXTENDS,
        BLOCK,
        PARENT,
        MESSAGE,
    ];

    pub const ATTR_NAME: &str = "name";
    pub const ATTR_DEFAULT: &str = "default";
    pub const ATTR_ON_ERROR: &str = "onerror";
    pub const ATTR_EVAL: &str = "eval";
    pub const ATTR_ITEM: &str = "item";
    pub const ATTR_INDEX: &str = "index";
    pub const ATTR_IN: &str = "in";
    pub const ATTR_LIMIT: &str = "limit";
    pub const ATTR_VALUE: &str = "value";
    pub const ATTR_TEMPLATE: &str = "template";
    pub const ATTR_WITH: &str = "with";
    pub const ATTR_ISOLATE: &str = "isolate";
    pub const ATTR_REQUIRED: &str = "required";
    pub const ATTR_ROLE: &str = "role";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_sorted_keys() {
        let attrs: Attributes = [("name", "user"), ("default", "guest")].into_iter().collect();
        assert_eq!(attrs.keys().collect::<Vec<_>>(), vec!["default", "name"]);
        assert_eq!(attrs.to_string(), r#"default="guest" name="user""#);
    }

    #[test]
    fn test_attributes_typed_accessors() {
        let attrs: Attributes = [("limit", " 5 "), ("isolate", "TRUE"), ("required", "no"), ("x", "abc")]
            .into_iter()
            .collect();
        assert_eq!(attrs.get_int("limit"), Some(5));
        assert_eq!(attrs.get_int("x"), None);
        assert_eq!(attrs.get_bool("isolate"), Some(true));
        assert_eq!(attrs.get_bool("required"), Some(false));
        assert_eq!(attrs.get_bool("x"), None);
        assert_eq!(attrs.get_bool("missing"), None);
        assert_eq!(attrs.get_or("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_attributes_display_escapes_quotes() {
        let attrs: Attributes = [("default", r#"say "hi""#)].into_iter().collect();
        assert_eq!(attrs.to_string(), r#"default="say \"hi\"""#);
    }
}
