// Dialect: the token set a CSV stream is written in
//
// Construction validates every rule at once and reports all violations in a
// single ConfigError. A dialect is immutable; the `with_*` methods build a
// new validated copy.

use std::fmt::Write as _;

use crate::error::ConfigError;

pub use super::newlines::Newline;
use super::token::{render_token, render_tokens, Token};

/// How quotes inside a field are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No escape token; a quote inside a quoted field is doubled.
    Rfc4180,
    /// An escape token makes the following token literal.
    Escape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect<T: Token> {
    delimiter: T,
    quote: T,
    escape: Option<T>,
    /// `None` defers detection to the record splitter.
    newline: Option<Newline<T>>,
    /// Sorted and deduplicated.
    whitespace: Vec<T>,
}

impl<T: Token> Dialect<T> {
    pub fn new(
        delimiter: T,
        quote: T,
        escape: Option<T>,
        newline: Option<Newline<T>>,
        whitespace: &[T],
    ) -> Result<Self, ConfigError> {
        let mut whitespace = whitespace.to_vec();
        whitespace.sort_unstable();
        whitespace.dedup();

        let dialect = Dialect {
            delimiter,
            quote,
            escape,
            newline,
            whitespace,
        };
        dialect.validate()?;
        Ok(dialect)
    }

    /// `,` delimiter, `"` quote, CRLF newline, no escape, no trimming.
    pub fn rfc4180() -> Self {
        Dialect {
            delimiter: T::from_ascii(b','),
            quote: T::from_ascii(b'"'),
            escape: None,
            newline: Some(Newline::crlf()),
            whitespace: Vec::new(),
        }
    }

    /// Same as `rfc4180` with an LF newline.
    pub fn lf() -> Self {
        Dialect {
            newline: Some(Newline::lf()),
            ..Self::rfc4180()
        }
    }

    /// RFC 4180 tokens with the newline left to autodetection.
    pub fn autodetect() -> Self {
        Dialect {
            newline: None,
            ..Self::rfc4180()
        }
    }

    pub fn with_delimiter(&self, delimiter: T) -> Result<Self, ConfigError> {
        Self::new(
            delimiter,
            self.quote,
            self.escape,
            self.newline,
            &self.whitespace,
        )
    }

    pub fn with_escape(&self, escape: Option<T>) -> Result<Self, ConfigError> {
        Self::new(
            self.delimiter,
            self.quote,
            escape,
            self.newline,
            &self.whitespace,
        )
    }

    pub fn with_newline(&self, newline: Option<Newline<T>>) -> Result<Self, ConfigError> {
        Self::new(
            self.delimiter,
            self.quote,
            self.escape,
            newline,
            &self.whitespace,
        )
    }

    pub fn with_whitespace(&self, whitespace: &[T]) -> Result<Self, ConfigError> {
        Self::new(self.delimiter, self.quote, self.escape, self.newline, whitespace)
    }

    #[inline]
    pub fn delimiter(&self) -> T {
        self.delimiter
    }

    #[inline]
    pub fn quote(&self) -> T {
        self.quote
    }

    #[inline]
    pub fn escape(&self) -> Option<T> {
        self.escape
    }

    #[inline]
    pub fn newline(&self) -> Option<Newline<T>> {
        self.newline
    }

    /// The configured newline, CRLF when it is left to detection.
    #[inline]
    pub fn newline_or_default(&self) -> Newline<T> {
        self.newline.unwrap_or_else(Newline::crlf)
    }

    #[inline]
    pub fn whitespace(&self) -> &[T] {
        &self.whitespace
    }

    #[inline]
    pub fn is_whitespace(&self, token: T) -> bool {
        !self.whitespace.is_empty() && self.whitespace.binary_search(&token).is_ok()
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        if self.escape.is_some() {
            Mode::Escape
        } else {
            Mode::Rfc4180
        }
    }

    #[inline]
    pub fn is_escape_mode(&self) -> bool {
        self.escape.is_some()
    }

    /// Strip whitespace tokens from both ends.
    pub fn trim<'a>(&self, field: &'a [T]) -> &'a [T] {
        if self.whitespace.is_empty() {
            return field;
        }
        let start = field
            .iter()
            .position(|&t| !self.is_whitespace(t))
            .unwrap_or(field.len());
        let end = field
            .iter()
            .rposition(|&t| !self.is_whitespace(t))
            .map_or(start, |i| i + 1);
        &field[start..end]
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let mut check_token = |name: &str, t: T| {
            if let Some(reason) = t.dialect_violation() {
                errors.push(format!("{name} {reason}."));
            }
        };
        check_token("Delimiter", self.delimiter);
        check_token("Quote", self.quote);
        if let Some(e) = self.escape {
            check_token("Escape", e);
        }
        if let Some(nl) = &self.newline {
            for t in nl.tokens() {
                check_token("Newline", t);
            }
        }
        for &t in &self.whitespace {
            check_token("Whitespace", t);
        }

        if self.delimiter == self.quote {
            errors.push("Delimiter and Quote must not be equal.".to_string());
        }

        if let Some(escape) = self.escape {
            if escape == self.delimiter {
                errors.push("Escape must not be equal to Delimiter.".to_string());
            }
            if escape == self.quote {
                errors.push("Escape must not be equal to Quote.".to_string());
            }
        }

        if let Some(nl) = &self.newline {
            if nl.second() == Some(nl.first()) {
                errors.push("Newline must not contain duplicate tokens.".to_string());
            }
            if nl.contains(self.delimiter) {
                errors.push("Newline must not contain Delimiter.".to_string());
            }
            if nl.contains(self.quote) {
                errors.push("Newline must not contain Quote.".to_string());
            }
            if let Some(escape) = self.escape {
                if nl.contains(escape) {
                    errors.push("Newline must not contain Escape.".to_string());
                }
            }
        }

        if !self.whitespace.is_empty() {
            if self.is_whitespace(self.delimiter) {
                errors.push("Whitespace must not contain Delimiter.".to_string());
            }
            if self.is_whitespace(self.quote) {
                errors.push("Whitespace must not contain Quote.".to_string());
            }
            if self.escape.is_some_and(|e| self.is_whitespace(e)) {
                errors.push("Whitespace must not contain Escape.".to_string());
            }
            // unset newline is detected as \r\n or \n
            let newline_tokens: Vec<T> = match &self.newline {
                Some(nl) => nl.tokens().collect(),
                None => vec![T::from_ascii(b'\r'), T::from_ascii(b'\n')],
            };
            if newline_tokens.iter().any(|&t| self.is_whitespace(t)) {
                errors.push("Whitespace must not contain Newline tokens.".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::new(errors, self.render()))
        }
    }

    /// Printable token dump used in error messages.
    pub fn render(&self) -> String {
        let mut out = String::from("Tokens: ");
        let _ = write!(
            out,
            "Delimiter: '{}', Quote: '{}', Escape: {}, Newline: {}, Whitespace: \"{}\"",
            render_token(self.delimiter),
            render_token(self.quote),
            self.escape
                .map_or_else(|| "-".to_string(), |e| format!("'{}'", render_token(e))),
            self.newline.map_or_else(
                || "auto".to_string(),
                |nl| format!("\"{}\"", render_tokens(&nl.tokens().collect::<Vec<_>>()))
            ),
            render_tokens(&self.whitespace),
        );
        out
    }
}

impl<T: Token> Default for Dialect<T> {
    fn default() -> Self {
        Self::rfc4180()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let d = Dialect::<u8>::default();
        assert_eq!(d.delimiter(), b',');
        assert_eq!(d.quote(), b'"');
        assert_eq!(d.escape(), None);
        assert_eq!(d.newline(), Some(Newline::crlf()));
        assert_eq!(d.mode(), Mode::Rfc4180);
        assert_eq!(Dialect::<u8>::lf().newline(), Some(Newline::lf()));
    }

    #[test]
    fn test_escape_mode() {
        let d = Dialect::<u8>::lf().with_escape(Some(b'\\')).unwrap();
        assert_eq!(d.mode(), Mode::Escape);
        assert!(d.is_escape_mode());
    }

    #[test]
    fn test_reports_every_violation() {
        let err = Dialect::<u8>::new(
            b',',
            b',',
            Some(b','),
            Some(Newline::pair(b',', b',')),
            &[b','],
        )
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("Delimiter and Quote must not be equal."));
        assert!(msg.contains("Escape must not be equal to Delimiter."));
        assert!(msg.contains("Escape must not be equal to Quote."));
        assert!(msg.contains("Newline must not contain duplicate tokens."));
        assert!(msg.contains("Whitespace must not contain Delimiter."));
        assert!(err.violations.len() >= 8, "got {:?}", err.violations);
        assert!(msg.contains("Tokens: Delimiter: ','"));
    }

    #[test]
    fn test_rejects_non_ascii_and_zero_bytes() {
        let err = Dialect::<u8>::new(0xE9, 0, None, Some(Newline::lf()), &[]).unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn test_rejects_whitespace_overlapping_newline() {
        let err = Dialect::<u8>::lf().with_whitespace(&[b' ', b'\n']).unwrap_err();
        assert_eq!(
            err.violations,
            vec!["Whitespace must not contain Newline tokens.".to_string()]
        );
        // unset newline still reserves \r and \n
        assert!(Dialect::<u8>::autodetect().with_whitespace(&[b'\r']).is_err());
    }

    #[test]
    fn test_render_escapes_control_tokens() {
        let d = Dialect::<u8>::rfc4180().with_delimiter(b'\t').unwrap();
        assert_eq!(
            d.render(),
            "Tokens: Delimiter: '\\t', Quote: '\"', Escape: -, Newline: \"\\r\\n\", Whitespace: \"\""
        );
    }

    #[test]
    fn test_trim() {
        let d = Dialect::<u8>::lf().with_whitespace(&[b' ', b'\t']).unwrap();
        assert_eq!(d.trim(b"  a b\t"), b"a b");
        assert_eq!(d.trim(b"   "), b"");
        assert_eq!(Dialect::<u8>::lf().trim(b" a "), b" a ");
    }

    #[test]
    fn test_utf16_dialect() {
        let d = Dialect::<u16>::new(0x00A7, b'"' as u16, None, Some(Newline::lf()), &[]).unwrap();
        assert_eq!(d.delimiter(), 0x00A7);
        assert!(Dialect::<u16>::rfc4180().with_delimiter(0xDC00).is_err());
    }
}
