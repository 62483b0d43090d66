//! Static checks over a parsed template
//!
//! Runs without data. Finds unknown tags and functions, bad attribute
//! values, wrong function arities and misused inheritance tags. Expression
//! syntax is already checked by the parser.

use std::fmt;

use crate::context::ErrorStrategy;
use crate::executor::MESSAGE_ROLES;
use crate::expr::{ExprError, FuncRegistry};
use crate::parser::ast::{names, Eval, Node, Position, Root, TagNode};
use crate::resolver::ResolverRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A problem found by [`check`]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    pub position: Position,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.severity, self.position, self.message)
    }
}

/// Run all checks on a parsed template
pub fn check(root: &Root, resolvers: &ResolverRegistry, funcs: &FuncRegistry) -> Vec<ValidationIssue> {
    let mut checker = Checker {
        resolvers,
        funcs,
        issues: Vec::new(),
        block_depth: 0,
    };
    checker.check_inheritance(root);
    checker.check_nodes(&root.children, true);
    checker.issues
}

/// Whether any issue is an error
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|issue| issue.severity == Severity::Error)
}

struct Checker<'a> {
    resolvers: &'a ResolverRegistry,
    funcs: &'a FuncRegistry,
    issues: Vec<ValidationIssue>,
    block_depth: usize,
}

impl Checker<'_> {
    fn push(&mut self, severity: Severity, position: Position, message: String) {
        self.issues.push(ValidationIssue {
            severity,
            message,
            position,
        });
    }

    fn check_inheritance(&mut self, root: &Root) {
        let Some(extends) = root.extends() else {
            return;
        };
        if !extends.attrs.has(names::ATTR_TEMPLATE) {
            self.push(
                Severity::Error,
                extends.position,
                format!("'{}' requires attribute '{}'", names::EXTENDS, names::ATTR_TEMPLATE),
            );
        }

        let mut seen_extends = false;
        for node in &root.children {
            match node {
                Node::Tag(tag) if tag.name == names::EXTENDS => {
                    if seen_extends {
                        self.push(
                            Severity::Error,
                            tag.position,
                            "a template can extend only one parent".to_string(),
                        );
                    }
                    seen_extends = true;
                }
                Node::Tag(tag) if tag.name == names::BLOCK || tag.name == names::COMMENT => {}
                Node::Text(text) if text.content.trim().is_empty() => {}
                Node::Text(_) => self.push(
                    Severity::Info,
                    extends.position,
                    "text outside a block is ignored in an extending template".to_string(),
                ),
                other => {
                    if let Some(position) = position_of(other) {
                        self.push(
                            Severity::Info,
                            position,
                            format!("{} outside a block is ignored in an extending template", other.kind()),
                        );
                    }
                }
            }
        }
    }

    fn check_nodes(&mut self, nodes: &[Node], top_level: bool) {
        for node in nodes {
            match node {
                Node::Text(_) => {}
                Node::Tag(tag) => self.check_tag(tag, top_level),
                Node::Conditional(cond) => {
                    for branch in &cond.branches {
                        if let Some(condition) = &branch.condition {
                            self.check_expression(condition, cond.position);
                        }
                        self.check_nodes(&branch.children, false);
                    }
                }
                Node::For(each) => self.check_nodes(&each.children, false),
                Node::Switch(switch) => {
                    self.check_expression(&switch.expression, switch.position);
                    for case in &switch.cases {
                        if let Some(eval) = &case.eval {
                            self.check_expression(eval, switch.position);
                        }
                        self.check_nodes(&case.children, false);
                    }
                    if let Some(default) = &switch.default {
                        self.check_nodes(default, false);
                    }
                }
            }
        }
    }

    fn check_tag(&mut self, tag: &TagNode, top_level: bool) {
        if let Some(value) = tag.attrs.get(names::ATTR_ON_ERROR) {
            if let Err(message) = value.parse::<ErrorStrategy>() {
                self.push(Severity::Error, tag.position, message);
            }
        }

        match tag.name.as_str() {
            names::RAW | names::COMMENT | names::CONFIG => {}
            names::EXTENDS => {
                if !top_level {
                    self.push(
                        Severity::Error,
                        tag.position,
                        format!("'{}' must be a top-level tag", names::EXTENDS),
                    );
                }
            }
            names::BLOCK => {
                if !tag.attrs.has(names::ATTR_NAME) {
                    self.push(
                        Severity::Error,
                        tag.position,
                        format!("'{}' requires attribute '{}'", names::BLOCK, names::ATTR_NAME),
                    );
                }
                self.block_depth += 1;
                self.check_nodes(&tag.children, false);
                self.block_depth -= 1;
            }
            names::PARENT => {
                if self.block_depth == 0 {
                    self.push(
                        Severity::Warning,
                        tag.position,
                        format!("'{}' outside a block renders nothing", names::PARENT),
                    );
                }
            }
            names::MESSAGE => {
                match tag.attrs.get(names::ATTR_ROLE) {
                    Some(role) if MESSAGE_ROLES.contains(&role) => {}
                    Some(role) => self.push(
                        Severity::Error,
                        tag.position,
                        format!("unknown message role '{}' (expected one of: {})", role, MESSAGE_ROLES.join(", ")),
                    ),
                    None => self.push(
                        Severity::Error,
                        tag.position,
                        format!("'{}' requires attribute '{}'", names::MESSAGE, names::ATTR_ROLE),
                    ),
                }
                self.check_nodes(&tag.children, false);
            }
            name => match self.resolvers.get(name) {
                Some(resolver) => {
                    if let Err(err) = resolver.validate(&tag.attrs) {
                        self.push(Severity::Error, tag.position, err.to_string());
                    }
                    self.check_nodes(&tag.children, false);
                }
                None => {
                    self.push(Severity::Warning, tag.position, format!("unknown tag '{}'", name));
                    self.check_nodes(&tag.children, false);
                }
            },
        }
    }

    fn check_expression(&mut self, eval: &Eval, position: Position) {
        let mut problems = Vec::new();
        eval.expr.for_each_call(&mut |name, argc| match self.funcs.get(name) {
            None => problems.push((Severity::Warning, ExprError::UnknownFunction { name: name.to_string() })),
            Some(func) if !func.accepts(argc) => problems.push((
                Severity::Error,
                ExprError::Arity {
                    name: name.to_string(),
                    expected: func.arity(),
                    got: argc,
                },
            )),
            Some(_) => {}
        });
        for (severity, err) in problems {
            self.push(severity, position, format!("in '{}': {}", eval.source, err));
        }
    }
}

fn position_of(node: &Node) -> Option<Position> {
    match node {
        Node::Text(_) => None,
        Node::Tag(tag) => Some(tag.position),
        Node::Conditional(cond) => Some(cond.position),
        Node::For(each) => Some(each.position),
        Node::Switch(switch) => Some(switch.position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, Delimiters};
    use pretty_assertions::assert_eq;

    fn issues(source: &str) -> Vec<ValidationIssue> {
        let root = parse(source, &Delimiters::default()).expect("Should parse");
        check(&root, &ResolverRegistry::with_builtins(), &FuncRegistry::with_builtins())
    }

    fn severities(source: &str) -> Vec<Severity> {
        issues(source).into_iter().map(|i| i.severity).collect()
    }

    #[test]
    fn test_clean_template() {
        let source = "Hi {~prompty.var name=\"n\" /~}{~prompty.if eval=\"len(xs) > 0\"~}!{~/prompty.if~}";
        assert_eq!(issues(source), vec![]);
    }

    #[test]
    fn test_unknown_tag_is_warning() {
        let found = issues("{~custom.thing /~}");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warning);
        assert!(found[0].message.contains("custom.thing"));
    }

    #[test]
    fn test_resolver_validation_errors() {
        assert_eq!(severities("{~prompty.var /~}"), vec![Severity::Error]);
        assert_eq!(severities("{~prompty.include /~}"), vec![Severity::Error]);
    }

    #[test]
    fn test_bad_onerror() {
        assert_eq!(
            severities("{~prompty.var name=\"x\" onerror=\"explode\" /~}"),
            vec![Severity::Error]
        );
    }

    #[test]
    fn test_expression_problems() {
        assert_eq!(
            severities("{~prompty.if eval=\"nope(a)\"~}x{~/prompty.if~}"),
            vec![Severity::Warning]
        );
        assert_eq!(
            severities("{~prompty.if eval=\"len(a, b)\"~}x{~/prompty.if~}"),
            vec![Severity::Error]
        );
    }

    #[test]
    fn test_message_roles() {
        assert_eq!(
            severities("{~prompty.message role=\"robot\"~}x{~/prompty.message~}"),
            vec![Severity::Error]
        );
        assert_eq!(severities("{~prompty.message role=\"user\"~}x{~/prompty.message~}"), vec![]);
    }

    #[test]
    fn test_inheritance_checks() {
        let source = "{~prompty.extends template=\"base\" /~}\
            {~prompty.block name=\"a\"~}x{~prompty.parent /~}{~/prompty.block~}\
            {~prompty.var name=\"ignored\" /~}";
        assert_eq!(severities(source), vec![Severity::Info]);

        assert_eq!(severities("{~prompty.parent /~}"), vec![Severity::Warning]);
        assert_eq!(
            severities("{~prompty.block~}x{~/prompty.block~}"),
            vec![Severity::Error]
        );
        assert_eq!(
            severities("{~prompty.extends /~}"),
            vec![Severity::Error]
        );
    }

    #[test]
    fn test_nested_extends() {
        let found = issues("{~prompty.if eval=\"x\"~}{~prompty.extends template=\"b\" /~}{~/prompty.if~}");
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("top-level"));
    }
}
