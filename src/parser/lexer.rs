//! Lexer for prompty templates
//!
//! Splitting source into text runs and tags is done by hand because the
//! delimiters are configurable. The inside of a tag (`name key="value" ...`)
//! is tokenized with logos.

use logos::Logos;
use serde::Deserialize;

use crate::error::LexError;
use crate::parser::ast::{names, Position, Span};

/// Tag delimiters. The self-close marker is `/` + `close` and the block-close
/// marker is `open` + `/`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "{~".to_string(),
            close: "~}".to_string(),
        }
    }
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    pub fn self_close(&self) -> String {
        format!("/{}", self.close)
    }

    pub fn block_close(&self) -> String {
        format!("{}/", self.open)
    }

    pub fn escape(&self) -> String {
        format!("\\{}", self.open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Literal text (escapes already resolved)
    Text,
    /// Opening tag of a block: `{~ name ... ~}`
    Open,
    /// Self-closing tag: `{~ name ... /~}`
    SelfClose,
    /// End tag of a block: `{~/ name ~}`
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Exact source slice, delimiters included
    pub raw: String,
    /// Text for `Text` tokens; the trimmed tag interior without markers otherwise
    pub content: String,
    pub span: Span,
    pub position: Position,
}

impl Token {
    /// Tag name (first word of the interior); `None` for text tokens
    pub fn tag_name(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Text => None,
            _ => self.content.split_whitespace().next(),
        }
    }
}

/// Maps byte offsets to line/column positions
#[derive(Debug)]
pub struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { source, starts }
    }

    pub fn position(&self, offset: usize) -> Position {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.starts[line];
        let column = self.source[start..offset].chars().count() + 1;
        Position::new(line + 1, column, offset)
    }
}

/// Split template source into tokens
pub fn tokenize(source: &str, delimiters: &Delimiters) -> Result<Vec<Token>, LexError> {
    Lexer::new(source, delimiters).run()
}

struct Lexer<'a> {
    source: &'a str,
    delimiters: &'a Delimiters,
    lines: LineIndex<'a>,
    tokens: Vec<Token>,
    text: String,
    text_start: Option<usize>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, delimiters: &'a Delimiters) -> Self {
        Self {
            source,
            delimiters,
            lines: LineIndex::new(source),
            tokens: Vec::new(),
            text: String::new(),
            text_start: None,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let delimiters = self.delimiters;
        let open = delimiters.open.as_str();
        let len = self.source.len();
        let mut pos = 0;

        while pos < len {
            let Some(rel) = self.source[pos..].find(open) else {
                self.push_text(pos, len);
                break;
            };
            let at = pos + rel;

            if at > pos && self.source.as_bytes()[at - 1] == b'\\' {
                self.push_text(pos, at - 1);
                self.text.push_str(open);
                pos = at + open.len();
                continue;
            }

            self.push_text(pos, at);
            self.flush_text(at);

            let end = self.scan_tag(at)?;
            let token = self.tag_token(at, end)?;
            pos = end;

            let verbatim = match (token.kind, token.tag_name()) {
                (TokenKind::Open, Some(name)) if names::VERBATIM.contains(&name) => {
                    Some(name.to_string())
                }
                _ => None,
            };
            let opened_at = token.span.start;
            self.tokens.push(token);

            if let Some(name) = verbatim {
                pos = self.scan_verbatim(&name, opened_at, pos)?;
            }
        }

        self.flush_text(len);
        Ok(self.tokens)
    }

    fn push_text(&mut self, from: usize, to: usize) {
        if from >= to {
            return;
        }
        if self.text_start.is_none() {
            self.text_start = Some(from);
        }
        self.text.push_str(&self.source[from..to]);
    }

    fn flush_text(&mut self, end: usize) {
        let Some(start) = self.text_start.take() else {
            return;
        };
        let content = std::mem::take(&mut self.text);
        self.tokens.push(Token {
            kind: TokenKind::Text,
            raw: self.source[start..end].to_string(),
            content,
            span: start..end,
            position: self.lines.position(start),
        });
    }

    /// Find the end (exclusive) of the tag starting at `at`. Close delimiters
    /// inside quoted attribute values do not end the tag.
    fn scan_tag(&self, at: usize) -> Result<usize, LexError> {
        let close = self.delimiters.close.as_str();
        let body_start = at + self.delimiters.open.len();
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for (i, c) in self.source[body_start..].char_indices() {
            let abs = body_start + i;
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            if c == '"' || c == '\'' {
                quote = Some(c);
            } else if self.source[abs..].starts_with(close) {
                return Ok(abs + close.len());
            }
        }

        Err(LexError::UnterminatedTag {
            close: close.to_string(),
            position: self.lines.position(at),
            span: at..body_start,
        })
    }

    fn tag_token(&self, at: usize, end: usize) -> Result<Token, LexError> {
        let inner = &self.source[at + self.delimiters.open.len()..end - self.delimiters.close.len()];
        let (kind, content) = if let Some(rest) = inner.strip_prefix('/') {
            (TokenKind::Close, rest.trim())
        } else if let Some(rest) = inner.trim_end().strip_suffix('/') {
            (TokenKind::SelfClose, rest.trim())
        } else {
            (TokenKind::Open, inner.trim())
        };

        if content.is_empty() {
            return Err(LexError::EmptyTag {
                position: self.lines.position(at),
                span: at..end,
            });
        }

        Ok(Token {
            kind,
            raw: self.source[at..end].to_string(),
            content: content.to_string(),
            span: at..end,
            position: self.lines.position(at),
        })
    }

    /// Consume the body of a verbatim block up to its matching end tag
    fn scan_verbatim(&mut self, name: &str, opened_at: usize, from: usize) -> Result<usize, LexError> {
        let marker = self.delimiters.block_close();
        let position = self.lines.position(opened_at);
        let unterminated = move || LexError::UnterminatedBlock {
            name: name.to_string(),
            position,
            span: opened_at..from,
        };

        let mut search = from;
        while let Some(rel) = self.source[search..].find(&marker) {
            let at = search + rel;
            let end = self.scan_tag(at).map_err(|_| unterminated())?;
            let close = self.tag_token(at, end).map_err(|_| unterminated())?;
            if close.kind == TokenKind::Close && close.content == name {
                if at > from {
                    self.tokens.push(Token {
                        kind: TokenKind::Text,
                        raw: self.source[from..at].to_string(),
                        content: self.source[from..at].to_string(),
                        span: from..at,
                        position: self.lines.position(from),
                    });
                }
                self.tokens.push(close);
                return Ok(end);
            }
            search = end;
        }

        Err(unterminated())
    }
}

/// Tokens inside a tag: `prompty.var name="user" default='guest'`
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum TagToken {
    #[token("=")]
    Equals,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.\-]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),
}

/// Strip surrounding quotes and resolve `\"`, `\'`, `\\`, `\n` and `\t`
pub(crate) fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other @ ('"' | '\'' | '\\')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Lex a tag interior into tokens with spans; `Err(())` marks an unrecognised character
pub fn lex_tag(input: &str) -> impl Iterator<Item = (Result<TagToken, ()>, Span)> + '_ {
    TagToken::lexer(input).spanned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, &Delimiters::default())
            .expect("Should tokenize")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_text_and_self_closing_tag() {
        let tokens = tokenize("Hello {~prompty.var name=\"user\" /~}!", &Delimiters::default())
            .expect("Should tokenize");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].content, "Hello ");
        assert_eq!(tokens[1].kind, TokenKind::SelfClose);
        assert_eq!(tokens[1].content, "prompty.var name=\"user\"");
        assert_eq!(tokens[1].raw, "{~prompty.var name=\"user\" /~}");
        assert_eq!(tokens[1].tag_name(), Some("prompty.var"));
        assert_eq!(tokens[2].content, "!");
    }

    #[test]
    fn test_block_tokens() {
        assert_eq!(
            kinds("{~prompty.if eval=\"x\"~}yes{~/prompty.if~}"),
            vec![TokenKind::Open, TokenKind::Text, TokenKind::Close]
        );
    }

    #[test]
    fn test_escape_emits_literal_delimiter() {
        let tokens = tokenize(r"a \{~ b", &Delimiters::default()).expect("Should tokenize");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Text);
        assert_eq!(tokens[0].content, "a {~ b");
        assert_eq!(tokens[0].raw, r"a \{~ b");
    }

    #[test]
    fn test_close_delimiter_inside_quotes() {
        let tokens = tokenize(r#"{~prompty.var name="x" default="~}" /~}"#, &Delimiters::default())
            .expect("Should tokenize");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::SelfClose);
    }

    #[test]
    fn test_unterminated_tag_is_positioned() {
        let err = tokenize("line one\n  {~prompty.var name=\"x\"", &Delimiters::default())
            .expect_err("Should fail");
        match err {
            LexError::UnterminatedTag { position, .. } => {
                assert_eq!(position, Position::new(2, 3, 11));
            }
            other => panic!("Expected unterminated tag, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_tag() {
        let err = tokenize("{~ ~}", &Delimiters::default()).expect_err("Should fail");
        assert!(matches!(err, LexError::EmptyTag { .. }));
    }

    #[test]
    fn test_raw_body_is_verbatim() {
        let tokens = tokenize(
            "{~prompty.raw~}{~prompty.var name=\"x\" /~}{~/prompty.raw~}",
            &Delimiters::default(),
        )
        .expect("Should tokenize");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].kind, TokenKind::Text);
        assert_eq!(tokens[1].content, "{~prompty.var name=\"x\" /~}");
    }

    #[test]
    fn test_raw_body_skips_other_end_tags() {
        let tokens = tokenize(
            "{~prompty.comment~}{~/prompty.if~}{~/prompty.comment~}",
            &Delimiters::default(),
        )
        .expect("Should tokenize");
        assert_eq!(tokens[1].content, "{~/prompty.if~}");
        assert_eq!(tokens[2].kind, TokenKind::Close);
    }

    #[test]
    fn test_unterminated_raw_block() {
        let err = tokenize("{~prompty.raw~}never closed", &Delimiters::default())
            .expect_err("Should fail");
        assert!(matches!(err, LexError::UnterminatedBlock { name, .. } if name == "prompty.raw"));
    }

    #[test]
    fn test_custom_delimiters() {
        let delims = Delimiters::new("<<", ">>");
        let tokens = tokenize("a <<prompty.var name=\"x\" />> b <</x>>", &delims)
            .expect("Should tokenize");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Text,
                TokenKind::SelfClose,
                TokenKind::Text,
                TokenKind::Close
            ]
        );
        assert_eq!(delims.self_close(), "/>>");
        assert_eq!(delims.block_close(), "<</");
    }

    #[test]
    fn test_line_index_columns_count_chars() {
        let index = LineIndex::new("é{~\nab");
        assert_eq!(index.position(2), Position::new(1, 2, 2));
        assert_eq!(index.position(6), Position::new(2, 2, 6));
    }

    #[test]
    fn test_tag_interior_tokens() {
        let tokens: Vec<_> = lex_tag(r#"prompty.var name="user" default='a \'b\''"#)
            .map(|(t, _)| t.expect("Should lex"))
            .collect();
        assert_eq!(
            tokens,
            vec![
                TagToken::Ident("prompty.var".to_string()),
                TagToken::Ident("name".to_string()),
                TagToken::Equals,
                TagToken::String("user".to_string()),
                TagToken::Ident("default".to_string()),
                TagToken::Equals,
                TagToken::String("a 'b'".to_string()),
            ]
        );
    }

    #[test]
    fn test_tag_interior_rejects_stray_characters() {
        let has_error = lex_tag("prompty.var name=\"x\" @").any(|(t, _)| t.is_err());
        assert!(has_error);
    }
}
