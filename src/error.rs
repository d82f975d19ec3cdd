pub type MoldResult<T> = std::result::Result<T, MoldError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    UnexpectedEOF {
        /// Describes what was expected, e.g., " (expected '{{end}}')"
        expected_what: String,
    },
    UnclosedAction,
    UnclosedComment,
    UnterminatedString,
    /// `{{end}}` or `{{else}}` with nothing open to close.
    UnexpectedKeyword {
        keyword: String,
    },
    UnknownKeyword {
        keyword: String,
    },
    MissingPipeline {
        keyword: String,
    },
    EmptyCommand,
    Expected {
        description: String,
    },
    NestingTooDeep {
        limit: usize,
    },
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEOF { expected_what } => {
                write!(f, "Unexpected EOF{}", expected_what)
            }
            Self::UnclosedAction => write!(f, "Unclosed action"),
            Self::UnclosedComment => write!(f, "Unclosed comment"),
            Self::UnterminatedString => write!(f, "Unterminated quoted string"),
            Self::UnexpectedKeyword { keyword } => {
                write!(f, "Unexpected {{{{{}}}}}", keyword)
            }
            Self::UnknownKeyword { keyword } => {
                write!(f, "Unsupported keyword '{}'", keyword)
            }
            Self::MissingPipeline { keyword } => {
                write!(f, "Missing value for {}", keyword)
            }
            Self::EmptyCommand => write!(f, "Empty command"),
            Self::Expected { description } => {
                write!(f, "Expected {}", description)
            }
            Self::NestingTooDeep { limit } => {
                write!(f, "Template nesting exceeds maximum depth of {}", limit)
            }
        }
    }
}

impl std::error::Error for ParseErrorKind {}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<&str>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.kind
        )
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Failure raised while walking a tree, before it is tied to a template name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RewriteError {
    /// An authoring mistake at a byte offset of the raw source.
    Positioned { pos: usize, message: String },
    /// The walker handed the rewriter a slot that cannot be rewritten.
    Internal { message: String },
}

impl RewriteError {
    pub(crate) fn positioned<M: Into<String>>(pos: usize, message: M) -> Self {
        Self::Positioned {
            pos,
            message: message.into(),
        }
    }

    pub(crate) fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attaches the template name and, for positioned errors, the line and
    /// column of the offending offset in `raw`.
    pub(crate) fn into_mold_error(self, template: &str, raw: &str) -> MoldError {
        match self {
            Self::Positioned { pos, message } => {
                let (line, column) = line_column(raw, pos);
                MoldError::Template {
                    template: template.to_string(),
                    line,
                    column,
                    message,
                }
            }
            Self::Internal { message } => MoldError::Internal { message },
        }
    }
}

/// Translates a byte offset into a 1-indexed `(line, column)` pair.
///
/// Columns count characters, not bytes. Offsets past the end of `raw` resolve
/// to the position just after the last character.
pub fn line_column(raw: &str, pos: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (i, ch) in raw.char_indices() {
        if i >= pos {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MoldError {
    /// The template source could not be parsed.
    Parse(ParseError),
    /// A directive in the template is malformed.
    Template {
        template: String,
        line: usize,
        column: usize,
        message: String,
    },
    /// The rewrite pass reached a state it should never be in.
    Internal { message: String },
}

impl std::fmt::Display for MoldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(parse_error) => {
                write!(f, "{}", parse_error)
            }
            Self::Template {
                template,
                line,
                column,
                message,
            } => {
                write!(f, "{}:{}:{}: {}", template, line, column, message)
            }
            Self::Internal { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for MoldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(parse_error) => Some(parse_error),
            Self::Template { .. } | Self::Internal { .. } => None,
        }
    }
}

impl From<ParseError> for MoldError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}
