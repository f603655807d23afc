// Error types shared by the read and write paths
//
// Configuration and format errors are values returned to the caller.
// Invariant violations (a precomputed count disagreeing with what a kernel
// actually finds) are bugs in this crate and panic via `invariant_violation`.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CsvError>;

#[derive(Debug, Error)]
pub enum CsvError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Format(#[from] FormatError),

    /// A caller-supplied formatter or sink broke its contract.
    #[error("resource error: {0}")]
    Resource(String),

    #[error("operation was canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CsvError {
    pub fn is_format(&self) -> bool {
        matches!(self, CsvError::Format(_))
    }

    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            CsvError::Format(e) => Some(e),
            _ => None,
        }
    }
}

/// Every violated configuration rule, plus a printable dump of the tokens involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {}. {tokens}", violations.join(" "))]
pub struct ConfigError {
    pub violations: Vec<String>,
    pub tokens: String,
}

impl ConfigError {
    pub fn new(violations: Vec<String>, tokens: impl Into<String>) -> Self {
        ConfigError {
            violations,
            tokens: tokens.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// RFC mode record or field with an odd number of quotes.
    UnevenQuotes { quote_count: u32 },
    /// Escape mode record with a quote count other than 0 or 2 around escapes.
    InvalidEscapeQuotes { quote_count: u32, escape_count: u32 },
    /// Record or field ends on an escape token that escapes nothing.
    TrailingEscape,
    /// Field has quotes that do not wrap it.
    UnwrappedQuotes,
    /// A single quote inside a quoted RFC field.
    LoneQuote { index: usize },
    /// Newline autodetection hit the lookahead limit.
    NewlineNotFound { limit: usize },
    /// A required delimiter detector found no candidate.
    DelimiterNotDetected,
    /// Special count too large to pack into field metadata.
    TooManySpecials { count: u64 },
}

impl fmt::Display for FormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatErrorKind::UnevenQuotes { quote_count } => {
                write!(f, "uneven quote count ({quote_count})")
            }
            FormatErrorKind::InvalidEscapeQuotes {
                quote_count,
                escape_count,
            } => write!(
                f,
                "invalid quotes around escaped content ({quote_count} quotes, {escape_count} escapes)"
            ),
            FormatErrorKind::TrailingEscape => write!(f, "data ends on an unconsumed escape token"),
            FormatErrorKind::UnwrappedQuotes => write!(f, "quoted field is not wrapped in quotes"),
            FormatErrorKind::LoneQuote { index } => {
                write!(f, "unescaped quote at index {index} inside a quoted field")
            }
            FormatErrorKind::NewlineNotFound { limit } => {
                write!(f, "could not detect a newline within the first {limit} tokens")
            }
            FormatErrorKind::DelimiterNotDetected => write!(f, "could not detect a delimiter"),
            FormatErrorKind::TooManySpecials { count } => {
                write!(f, "field has too many special tokens ({count})")
            }
        }
    }
}

/// Malformed input. `content` is already rendered and redacted as configured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct FormatError {
    pub kind: FormatErrorKind,
    /// 1-based record number, when known.
    pub record: Option<u64>,
    /// Absolute token offset of the record start, when known.
    pub position: Option<u64>,
    pub content: Option<String>,
}

impl FormatError {
    pub fn new(kind: FormatErrorKind) -> Self {
        FormatError {
            kind,
            record: None,
            position: None,
            content: None,
        }
    }

    pub fn at(mut self, record: u64, position: u64) -> Self {
        self.record = Some(record);
        self.position = Some(position);
        self
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid CSV: {}", self.kind)?;
        if let Some(record) = self.record {
            write!(f, " in record {record}")?;
        }
        if let Some(position) = self.position {
            write!(f, " at position {position}")?;
        }
        if let Some(content) = &self.content {
            write!(f, ": {content}")?;
        }
        Ok(())
    }
}

impl From<FormatErrorKind> for CsvError {
    fn from(kind: FormatErrorKind) -> Self {
        CsvError::Format(FormatError::new(kind))
    }
}

/// Abort on a broken internal invariant.
///
/// `structure` maps each token of the offending field to `"` (quote),
/// `E` (escape) or `x` (anything else).
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn invariant_violation(what: &str, structure: &str) -> ! {
    panic!("internal error: {what}. Field structure: [{structure}]")
}
