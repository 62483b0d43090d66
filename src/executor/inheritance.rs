//! Template inheritance: `extends`, `block` and `parent`
//!
//! The chain is walked iteratively from the most derived template to the
//! base. Every block definition along the way is stacked by name, most
//! derived first; the base is then rendered and each block it reaches is
//! replaced by the top of its stack. `parent` steps one layer down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::{ExecutionError, Executor};
use crate::context::Context;
use crate::parser::ast::{names, Node, Root, TagNode};

/// Block definitions along an inheritance chain
#[derive(Debug, Default)]
pub(crate) struct BlockTable {
    /// Most derived definition first
    layers: HashMap<String, Vec<Arc<Vec<Node>>>>,
    stack: Vec<Frame>,
}

#[derive(Debug)]
struct Frame {
    name: String,
    /// `None` when the block renders its own body
    layer: Option<usize>,
}

impl BlockTable {
    /// Add the block definitions of one template, which is less derived than
    /// every template collected before it
    pub fn collect(&mut self, root: &Root) {
        let mut seen = HashSet::new();
        self.collect_nodes(&root.children, &mut seen);
    }

    fn collect_nodes(&mut self, nodes: &[Node], seen: &mut HashSet<String>) {
        for node in nodes {
            match node {
                Node::Text(_) => {}
                Node::Tag(tag) => {
                    if tag.name == names::BLOCK {
                        if let Some(name) = tag.attrs.get(names::ATTR_NAME) {
                            // The first definition in a template wins
                            if seen.insert(name.to_string()) {
                                self.layers
                                    .entry(name.to_string())
                                    .or_default()
                                    .push(Arc::new(tag.children.clone()));
                            }
                        }
                    }
                    self.collect_nodes(&tag.children, seen);
                }
                Node::Conditional(cond) => {
                    for branch in &cond.branches {
                        self.collect_nodes(&branch.children, seen);
                    }
                }
                Node::For(each) => self.collect_nodes(&each.children, seen),
                Node::Switch(switch) => {
                    for case in &switch.cases {
                        self.collect_nodes(&case.children, seen);
                    }
                    if let Some(default) = &switch.default {
                        self.collect_nodes(default, seen);
                    }
                }
            }
        }
    }

    /// Start rendering block `name`. Returns the body to render, or `None`
    /// if the block should render its own children. Always pair with [`leave`](Self::leave).
    pub fn enter(&mut self, name: &str) -> Option<Arc<Vec<Node>>> {
        let recursive = self.stack.iter().any(|frame| frame.name == name);
        let layer = match self.layers.get(name) {
            Some(layers) if !recursive => layers.first().cloned(),
            _ => None,
        };
        self.stack.push(Frame {
            name: name.to_string(),
            layer: layer.as_ref().map(|_| 0),
        });
        layer
    }

    /// Step to the next less derived definition of the innermost block.
    /// Pushes a frame only when it returns `Some`.
    pub fn enter_parent(&mut self) -> Option<Arc<Vec<Node>>> {
        let frame = self.stack.last()?;
        let next = frame.layer? + 1;
        let body = self.layers.get(&frame.name)?.get(next).cloned()?;
        let name = frame.name.clone();
        self.stack.push(Frame {
            name,
            layer: Some(next),
        });
        Some(body)
    }

    pub fn leave(&mut self) {
        self.stack.pop();
    }
}

fn template_attr(tag: &TagNode) -> Result<String, ExecutionError> {
    tag.attrs
        .get(names::ATTR_TEMPLATE)
        .map(str::to_string)
        .ok_or_else(|| ExecutionError::missing_attribute(&tag.name, names::ATTR_TEMPLATE))
}

impl Executor<'_> {
    /// Render a template whose root starts with `extends`
    pub(super) fn render_extending(
        &mut self,
        name: &str,
        root: &Root,
        extends: &TagNode,
        ctx: &Arc<Context>,
        out: &mut String,
    ) -> Result<(), ExecutionError> {
        let engine = ctx
            .engine()
            .cloned()
            .ok_or_else(|| ExecutionError::NoTemplateExecutor {
                tag: names::EXTENDS.to_string(),
            })?;
        let max = engine.max_depth();

        let mut chain = vec![name.to_string()];
        let mut depth = ctx.depth();
        let mut table = BlockTable::default();
        table.collect(root);

        let mut next = template_attr(extends)?;
        let base = loop {
            self.scope.check()?;
            if chain.contains(&next) {
                chain.push(next);
                return Err(ExecutionError::CircularReference { chain });
            }
            chain.push(next.clone());

            depth += 1;
            if depth > max {
                return Err(ExecutionError::DepthExceeded { depth, max });
            }

            let parent = engine
                .get_template(&next)
                .ok_or_else(|| ExecutionError::TemplateNotFound { name: next.clone() })?;
            debug!(template = %next, depth, "resolved parent template");

            let parent_root = Arc::clone(parent.root());
            table.collect(&parent_root);
            let grandparent = parent_root.extends().map(template_attr).transpose()?;
            match grandparent {
                Some(template) => next = template,
                None => break parent_root,
            }
        };

        debug!(chain = %chain.join(" -> "), "rendering inheritance chain");
        self.blocks = table;
        let base_ctx = Arc::new(ctx.with_depth(depth));
        self.render_nodes(&base.children, &base_ctx, out)
    }
}
