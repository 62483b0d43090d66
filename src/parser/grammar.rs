//! Recursive-descent parser: token stream to AST
//!
//! Every block tag opens a frame that must be closed by its own end tag.
//! Nesting depth is counted explicitly rather than left to the call stack.

use crate::context::ErrorStrategy;
use crate::error::ParseError;
use crate::expr::parse_expression;
use crate::parser::ast::*;
use crate::parser::lexer::{lex_tag, tokenize, Delimiters, TagToken, Token, TokenKind};

/// Maximum depth of nested block tags
pub const MAX_NESTING: usize = 256;

/// Parse template source into an AST
pub fn parse(source: &str, delimiters: &Delimiters) -> Result<Root, ParseError> {
    let tokens = tokenize(source, delimiters)?;
    parse_tokens(&tokens, source)
}

/// Parse an already tokenized template. `source` must be the text the tokens came from.
pub fn parse_tokens(tokens: &[Token], source: &str) -> Result<Root, ParseError> {
    let mut parser = Parser {
        tokens,
        source,
        pos: 0,
    };
    let (children, _) = parser.parse_sequence(0, None)?;
    Ok(Root { children })
}

/// Name and attributes of a tag
#[derive(Debug, Clone, PartialEq)]
pub struct TagHeader {
    pub name: String,
    pub attrs: Attributes,
}

/// Parse the interior of a tag token into its name and attributes
pub fn parse_header(token: &Token) -> Result<TagHeader, ParseError> {
    let invalid = |message: String| ParseError::InvalidTag {
        message,
        position: token.position,
        span: token.span.clone(),
    };

    let mut tokens = lex_tag(&token.content);
    let name = match tokens.next() {
        Some((Ok(TagToken::Ident(name)), _)) => name,
        _ => return Err(invalid("expected a tag name".to_string())),
    };

    let mut attrs = Attributes::new();
    while let Some((tok, span)) = tokens.next() {
        let key = match tok {
            Ok(TagToken::Ident(key)) => key,
            Ok(other) => {
                return Err(invalid(format!("expected attribute name, found {:?}", other)))
            }
            Err(()) => {
                return Err(invalid(format!(
                    "unexpected character '{}'",
                    &token.content[span]
                )))
            }
        };
        if !matches!(tokens.next(), Some((Ok(TagToken::Equals), _))) {
            return Err(invalid(format!("expected '=' after attribute '{}'", key)));
        }
        let value = match tokens.next() {
            Some((Ok(TagToken::String(value)), _)) => value,
            _ => return Err(invalid(format!("attribute '{}' needs a quoted value", key))),
        };
        if attrs.insert(key.clone(), value).is_some() {
            return Err(invalid(format!("duplicate attribute '{}'", key)));
        }
    }

    if token.kind == TokenKind::Close && !attrs.is_empty() {
        return Err(invalid("end tags cannot have attributes".to_string()));
    }

    Ok(TagHeader { name, attrs })
}

/// An open block waiting for its end tag
struct Frame<'a> {
    name: &'a str,
    opener: &'a Token,
    /// Tags that end the current branch without closing the block (`elseif`, `else`)
    branches: &'static [&'static str],
}

enum Terminator<'t> {
    Eof,
    Close(&'t Token),
    Branch(&'t Token, TagHeader),
}

struct Parser<'t> {
    tokens: &'t [Token],
    source: &'t str,
    pos: usize,
}

impl<'t> Parser<'t> {
    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn parse_sequence(
        &mut self,
        depth: usize,
        frame: Option<&Frame<'_>>,
    ) -> Result<(Vec<Node>, Terminator<'t>), ParseError> {
        let mut nodes = Vec::new();

        while let Some(token) = self.next() {
            match token.kind {
                TokenKind::Text => nodes.push(Node::Text(TextNode {
                    content: token.content.clone(),
                })),
                TokenKind::Close => {
                    let header = parse_header(token)?;
                    return match frame {
                        Some(f) if f.name == header.name => Ok((nodes, Terminator::Close(token))),
                        _ => Err(ParseError::UnexpectedCloseTag {
                            found: header.name,
                            expected: frame.map(|f| f.name.to_string()),
                            position: token.position,
                            span: token.span.clone(),
                        }),
                    };
                }
                TokenKind::Open | TokenKind::SelfClose => {
                    let header = parse_header(token)?;
                    if let Some(f) = frame {
                        if f.branches.contains(&header.name.as_str()) {
                            return Ok((nodes, Terminator::Branch(token, header)));
                        }
                    }
                    nodes.push(self.parse_tag(token, header, depth)?);
                }
            }
        }

        match frame {
            Some(f) => Err(unclosed(f.name, f.opener)),
            None => Ok((nodes, Terminator::Eof)),
        }
    }

    fn parse_tag(&mut self, token: &'t Token, header: TagHeader, depth: usize) -> Result<Node, ParseError> {
        let is_block = token.kind == TokenKind::Open;
        if is_block && depth >= MAX_NESTING {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING,
                position: token.position,
                span: token.span.clone(),
            });
        }

        match header.name.as_str() {
            names::ELSEIF | names::ELSE => Err(misplaced(
                &header.name,
                token,
                "must appear inside prompty.if",
            )),
            names::CASE | names::CASE_DEFAULT | names::DEFAULT => Err(misplaced(
                &header.name,
                token,
                "must appear inside prompty.switch",
            )),
            names::IF | names::FOR | names::SWITCH if !is_block => Err(ParseError::InvalidTag {
                message: format!("'{}' must be a block with an end tag", header.name),
                position: token.position,
                span: token.span.clone(),
            }),
            names::IF => self.parse_conditional(token, header, depth),
            names::FOR => self.parse_for(token, header, depth),
            names::SWITCH => self.parse_switch(token, header, depth),
            _ if !is_block => Ok(Node::Tag(TagNode {
                name: header.name,
                attrs: header.attrs,
                children: Vec::new(),
                raw_source: token.raw.clone(),
                position: token.position,
                span: token.span.clone(),
            })),
            _ => {
                let (children, close) = self.parse_block_body(depth, token, &header.name)?;
                if header.name == names::CONFIG {
                    check_config(&children, token)?;
                }
                let span = token.span.start..close.span.end;
                Ok(Node::Tag(TagNode {
                    raw_source: self.source[span.clone()].to_string(),
                    name: header.name,
                    attrs: header.attrs,
                    children,
                    position: token.position,
                    span,
                }))
            }
        }
    }

    /// Parse children up to the end tag for `name`
    fn parse_block_body(
        &mut self,
        depth: usize,
        opener: &'t Token,
        name: &str,
    ) -> Result<(Vec<Node>, &'t Token), ParseError> {
        let frame = Frame {
            name,
            opener,
            branches: &[],
        };
        match self.parse_sequence(depth + 1, Some(&frame))? {
            (children, Terminator::Close(close)) => Ok((children, close)),
            _ => Err(unclosed(name, opener)),
        }
    }

    fn parse_conditional(&mut self, token: &'t Token, header: TagHeader, depth: usize) -> Result<Node, ParseError> {
        let frame = Frame {
            name: names::IF,
            opener: token,
            branches: &[names::ELSEIF, names::ELSE],
        };
        let mut branches = Vec::new();
        let mut condition = Some(eval_attr(&header, token)?);

        let close = loop {
            let (children, terminator) = self.parse_sequence(depth + 1, Some(&frame))?;
            let was_else = condition.is_none();
            branches.push(ConditionalBranch {
                condition: condition.take(),
                children,
            });
            match terminator {
                Terminator::Close(close) => break close,
                Terminator::Branch(branch, branch_header) => {
                    if was_else {
                        return Err(misplaced(
                            &branch_header.name,
                            branch,
                            "no branch may follow prompty.else",
                        ));
                    }
                    if branch_header.name == names::ELSEIF {
                        condition = Some(eval_attr(&branch_header, branch)?);
                    }
                }
                Terminator::Eof => return Err(unclosed(names::IF, token)),
            }
        };

        Ok(Node::Conditional(ConditionalNode {
            branches,
            recovery: self.recovery(&header, token, close)?,
            position: token.position,
        }))
    }

    fn parse_for(&mut self, token: &'t Token, header: TagHeader, depth: usize) -> Result<Node, ParseError> {
        let item_var = required(&header, token, names::ATTR_ITEM)?;
        let source = required(&header, token, names::ATTR_IN)?;
        let index_var = header.attrs.get(names::ATTR_INDEX).map(str::to_string);
        let limit = match header.attrs.get(names::ATTR_LIMIT) {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|_| {
                ParseError::InvalidAttribute {
                    tag: header.name.clone(),
                    attribute: names::ATTR_LIMIT.to_string(),
                    message: format!("'{}' is not a non-negative integer", raw),
                    position: token.position,
                    span: token.span.clone(),
                }
            })?),
            None => None,
        };

        let (children, close) = self.parse_block_body(depth, token, names::FOR)?;
        Ok(Node::For(ForNode {
            item_var,
            index_var,
            source,
            limit,
            children,
            recovery: self.recovery(&header, token, close)?,
            position: token.position,
        }))
    }

    fn parse_switch(&mut self, token: &'t Token, header: TagHeader, depth: usize) -> Result<Node, ParseError> {
        let expression = eval_attr(&header, token)?;
        let mut cases = Vec::new();
        let mut default: Option<Vec<Node>> = None;

        let close = loop {
            let Some(inner) = self.next() else {
                return Err(unclosed(names::SWITCH, token));
            };
            match inner.kind {
                TokenKind::Text if inner.content.trim().is_empty() => continue,
                TokenKind::Text => {
                    return Err(misplaced(
                        names::SWITCH,
                        inner,
                        "only case blocks may appear directly inside prompty.switch",
                    ))
                }
                TokenKind::Close => {
                    let close = parse_header(inner)?;
                    if close.name == names::SWITCH {
                        break inner;
                    }
                    return Err(ParseError::UnexpectedCloseTag {
                        found: close.name,
                        expected: Some(names::SWITCH.to_string()),
                        position: inner.position,
                        span: inner.span.clone(),
                    });
                }
                TokenKind::Open | TokenKind::SelfClose => {
                    let arm = parse_header(inner)?;
                    let arm_name = arm.name.as_str();
                    let is_case = arm_name == names::CASE;
                    let is_default = arm_name == names::CASE_DEFAULT || arm_name == names::DEFAULT;
                    if !is_case && !is_default {
                        return Err(misplaced(
                            arm_name,
                            inner,
                            "only case blocks may appear directly inside prompty.switch",
                        ));
                    }
                    if inner.kind == TokenKind::SelfClose {
                        return Err(ParseError::InvalidTag {
                            message: format!("'{}' must be a block with an end tag", arm_name),
                            position: inner.position,
                            span: inner.span.clone(),
                        });
                    }
                    if depth + 1 >= MAX_NESTING {
                        return Err(ParseError::NestingTooDeep {
                            limit: MAX_NESTING,
                            position: inner.position,
                            span: inner.span.clone(),
                        });
                    }

                    let (children, _) = self.parse_block_body(depth + 1, inner, arm_name)?;
                    if is_case {
                        let value = arm.attrs.get(names::ATTR_VALUE).map(str::to_string);
                        let eval = if arm.attrs.has(names::ATTR_EVAL) {
                            Some(eval_attr(&arm, inner)?)
                        } else {
                            None
                        };
                        if value.is_none() && eval.is_none() {
                            return Err(ParseError::MissingAttribute {
                                tag: arm.name,
                                attribute: names::ATTR_VALUE.to_string(),
                                position: inner.position,
                                span: inner.span.clone(),
                            });
                        }
                        cases.push(SwitchCase {
                            value,
                            eval,
                            children,
                        });
                    } else if default.is_some() {
                        return Err(misplaced(arm_name, inner, "switch already has a default case"));
                    } else {
                        default = Some(children);
                    }
                }
            }
        };

        Ok(Node::Switch(SwitchNode {
            expression,
            cases,
            default,
            recovery: self.recovery(&header, token, close)?,
            position: token.position,
        }))
    }

    /// Error handling attributes of a control-flow block spanning `opener..close`
    fn recovery(&self, header: &TagHeader, opener: &Token, close: &Token) -> Result<Recovery, ParseError> {
        let on_error = match header.attrs.get(names::ATTR_ON_ERROR) {
            Some(value) => Some(value.parse::<ErrorStrategy>().map_err(|message| {
                ParseError::InvalidAttribute {
                    tag: header.name.clone(),
                    attribute: names::ATTR_ON_ERROR.to_string(),
                    message,
                    position: opener.position,
                    span: opener.span.clone(),
                }
            })?),
            None => None,
        };
        Ok(Recovery {
            on_error,
            default: header.attrs.get(names::ATTR_DEFAULT).map(str::to_string),
            raw_source: self.source[opener.span.start..close.span.end].to_string(),
        })
    }
}

/// The tag's `eval` attribute, parsed as an expression
fn eval_attr(header: &TagHeader, token: &Token) -> Result<Eval, ParseError> {
    let source = required(header, token, names::ATTR_EVAL)?;
    let expr = parse_expression(&source).map_err(|err| ParseError::InvalidAttribute {
        tag: header.name.clone(),
        attribute: names::ATTR_EVAL.to_string(),
        message: format!("'{}': {}", source, err),
        position: token.position,
        span: token.span.clone(),
    })?;
    Ok(Eval { source, expr })
}

fn required(header: &TagHeader, token: &Token, attribute: &str) -> Result<String, ParseError> {
    header
        .attrs
        .get(attribute)
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingAttribute {
            tag: header.name.clone(),
            attribute: attribute.to_string(),
            position: token.position,
            span: token.span.clone(),
        })
}

fn unclosed(name: &str, opener: &Token) -> ParseError {
    ParseError::UnclosedTag {
        name: name.to_string(),
        position: opener.position,
        span: opener.span.clone(),
    }
}

fn misplaced(tag: &str, token: &Token, message: &str) -> ParseError {
    ParseError::Misplaced {
        tag: tag.to_string(),
        message: message.to_string(),
        position: token.position,
        span: token.span.clone(),
    }
}

fn check_config(children: &[Node], opener: &Token) -> Result<(), ParseError> {
    let body: String = children
        .iter()
        .filter_map(|n| match n {
            Node::Text(t) => Some(t.content.as_str()),
            _ => None,
        })
        .collect();
    if body.trim().is_empty() {
        return Ok(());
    }
    serde_json::from_str::<serde_json::Value>(&body)
        .map(|_| ())
        .map_err(|e| ParseError::InvalidConfig {
            message: e.to_string(),
            position: opener.position,
            span: opener.span.clone(),
        })
}
