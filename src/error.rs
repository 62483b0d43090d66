//! Error types for lexing and parsing

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::parser::ast::{Position, Span};

/// Errors raised while splitting source into tokens
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unterminated tag at {position}: missing '{close}'")]
    UnterminatedTag {
        close: String,
        position: Position,
        span: Span,
    },

    #[error("unterminated {name} block at {position}: missing end tag")]
    UnterminatedBlock {
        name: String,
        position: Position,
        span: Span,
    },

    #[error("empty tag at {position}")]
    EmptyTag { position: Position, span: Span },
}

impl LexError {
    pub fn span(&self) -> &Span {
        match self {
            Self::UnterminatedTag { span, .. }
            | Self::UnterminatedBlock { span, .. }
            | Self::EmptyTag { span, .. } => span,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Self::UnterminatedTag { position, .. }
            | Self::UnterminatedBlock { position, .. }
            | Self::EmptyTag { position, .. } => *position,
        }
    }
}

/// Structural errors in a template; a template with a parse error is never executable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("unclosed tag '{name}' opened at {position}")]
    UnclosedTag {
        name: String,
        position: Position,
        span: Span,
    },

    #[error("unexpected end tag '{found}' at {position}{}", expected_suffix(.expected))]
    UnexpectedCloseTag {
        found: String,
        expected: Option<String>,
        position: Position,
        span: Span,
    },

    #[error("invalid tag at {position}: {message}")]
    InvalidTag {
        message: String,
        position: Position,
        span: Span,
    },

    #[error("tag '{tag}' at {position} requires attribute '{attribute}'")]
    MissingAttribute {
        tag: String,
        attribute: String,
        position: Position,
        span: Span,
    },

    #[error("invalid value for '{attribute}' on '{tag}' at {position}: {message}")]
    InvalidAttribute {
        tag: String,
        attribute: String,
        message: String,
        position: Position,
        span: Span,
    },

    #[error("'{tag}' at {position} is not allowed here: {message}")]
    Misplaced {
        tag: String,
        message: String,
        position: Position,
        span: Span,
    },

    #[error("tags nested deeper than {limit} levels at {position}")]
    NestingTooDeep {
        limit: usize,
        position: Position,
        span: Span,
    },

    #[error("invalid config block at {position}: {message}")]
    InvalidConfig {
        message: String,
        position: Position,
        span: Span,
    },
}

fn expected_suffix(expected: &Option<String>) -> String {
    match expected {
        Some(name) => format!(" (expected end of '{}')", name),
        None => " (no open tag)".to_string(),
    }
}

impl ParseError {
    /// Byte range the error points at
    pub fn span(&self) -> &Span {
        match self {
            Self::Lex(e) => e.span(),
            Self::UnclosedTag { span, .. }
            | Self::UnexpectedCloseTag { span, .. }
            | Self::InvalidTag { span, .. }
            | Self::MissingAttribute { span, .. }
            | Self::InvalidAttribute { span, .. }
            | Self::Misplaced { span, .. }
            | Self::NestingTooDeep { span, .. }
            | Self::InvalidConfig { span, .. } => span,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Self::Lex(e) => e.position(),
            Self::UnclosedTag { position, .. }
            | Self::UnexpectedCloseTag { position, .. }
            | Self::InvalidTag { position, .. }
            | Self::MissingAttribute { position, .. }
            | Self::InvalidAttribute { position, .. }
            | Self::Misplaced { position, .. }
            | Self::NestingTooDeep { position, .. }
            | Self::InvalidConfig { position, .. } => *position,
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let span = self.span().clone();
        let message = self.to_string();
        let mut buf = Vec::new();
        let written = Report::build(ReportKind::Error, filename, span.start)
            .with_message(&message)
            .with_label(
                Label::new((filename, span))
                    .with_message(label_message(self))
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf);
        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => message,
        }
    }
}

fn label_message(err: &ParseError) -> String {
    match err {
        ParseError::Lex(LexError::UnterminatedTag { close, .. }) => {
            format!("this tag is never closed with '{}'", close)
        }
        ParseError::Lex(LexError::UnterminatedBlock { name, .. }) => {
            format!("'{}' has no end tag", name)
        }
        ParseError::Lex(LexError::EmptyTag { .. }) => "tag has no name".to_string(),
        ParseError::UnclosedTag { name, .. } => format!("'{}' opened here", name),
        ParseError::UnexpectedCloseTag { found, .. } => format!("'{}' closed here", found),
        ParseError::MissingAttribute { attribute, .. } => format!("add {}=\"...\"", attribute),
        ParseError::InvalidTag { message, .. }
        | ParseError::InvalidAttribute { message, .. }
        | ParseError::Misplaced { message, .. }
        | ParseError::InvalidConfig { message, .. } => message.clone(),
        ParseError::NestingTooDeep { .. } => "nesting limit reached here".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclosed_tag_display() {
        let err = ParseError::UnclosedTag {
            name: "prompty.if".to_string(),
            position: Position::new(2, 5, 10),
            span: 10..30,
        };
        assert_eq!(err.to_string(), "unclosed tag 'prompty.if' opened at 2:5");
        assert_eq!(err.span(), &(10..30));
    }

    #[test]
    fn test_unexpected_close_without_frame() {
        let err = ParseError::UnexpectedCloseTag {
            found: "prompty.for".to_string(),
            expected: None,
            position: Position::new(1, 1, 0),
            span: 0..16,
        };
        assert!(err.to_string().ends_with("(no open tag)"));
    }

    #[test]
    fn test_lex_error_passes_through() {
        let err: ParseError = LexError::UnterminatedTag {
            close: "~}".to_string(),
            position: Position::new(1, 7, 6),
            span: 6..8,
        }
        .into();
        assert_eq!(err.position(), Position::new(1, 7, 6));
        assert!(err.to_string().contains("missing '~}'"));
    }

    #[test]
    fn test_format_includes_filename_and_message() {
        let source = "Hello {~prompty.var name=\"x\"";
        let err = ParseError::Lex(LexError::UnterminatedTag {
            close: "~}".to_string(),
            position: Position::new(1, 7, 6),
            span: 6..8,
        });
        let report = err.format(source, "greeting.prompty");
        assert!(report.contains("greeting.prompty"));
        assert!(report.contains("unterminated tag"));
    }
}
