/// Record terminators: one or two tokens, matched exactly.
///
/// A bare first token of a two-token newline (e.g. `\r` without `\n`) is data.
/// `detect_newline` picks `\r\n` or `\n` from the data when the dialect leaves
/// the newline unset.
use crate::buffer::Sequence;
use crate::error::{FormatErrorKind, Result};

use super::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Newline<T> {
    first: T,
    second: Option<T>,
}

impl<T: Token> Newline<T> {
    pub fn single(token: T) -> Self {
        Newline {
            first: token,
            second: None,
        }
    }

    pub fn pair(first: T, second: T) -> Self {
        Newline {
            first,
            second: Some(second),
        }
    }

    pub fn lf() -> Self {
        Self::single(T::from_ascii(b'\n'))
    }

    pub fn crlf() -> Self {
        Self::pair(T::from_ascii(b'\r'), T::from_ascii(b'\n'))
    }

    #[inline]
    pub fn first(&self) -> T {
        self.first
    }

    #[inline]
    pub fn second(&self) -> Option<T> {
        self.second
    }

    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        1 + self.second.is_some() as usize
    }

    #[inline]
    pub fn contains(&self, token: T) -> bool {
        self.first == token || self.second == Some(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = T> {
        std::iter::once(self.first).chain(self.second)
    }

    /// Token `i` of the sequence (0 or 1).
    #[inline]
    pub fn token(&self, i: usize) -> T {
        if i == 0 {
            self.first
        } else {
            self.second.unwrap_or(self.first)
        }
    }
}

/// Length of the newline at `pos`, 0 if none.
///
/// Returns `None` when `pos` holds the first token of a two-token newline
/// and the second token is not buffered yet.
#[inline]
pub fn match_newline<T: Token>(input: &[T], pos: usize, newline: &Newline<T>) -> Option<usize> {
    if input[pos] != newline.first {
        return Some(0);
    }
    match newline.second {
        None => Some(1),
        Some(second) => match input.get(pos + 1) {
            Some(&t) if t == second => Some(2),
            Some(_) => Some(0),
            None => None,
        },
    }
}

/// Detect `\r\n` or `\n` outside quotes (and escapes).
///
/// Scans at most `limit` tokens. `Ok(None)` means more data is needed; once
/// `limit` tokens were scanned without a newline the input is rejected. A
/// final block without any newline falls back to `\r\n`.
pub fn detect_newline<T: Token>(
    buffer: &Sequence<'_, T>,
    quote: T,
    escape: Option<T>,
    limit: usize,
    is_final: bool,
) -> Result<Option<Newline<T>>> {
    let cr = T::from_ascii(b'\r');
    let lf = T::from_ascii(b'\n');

    let mut in_quotes = false;
    let mut skip = false;
    let mut prev_cr = false;
    let mut scanned = 0usize;

    for &t in buffer.iter().take(limit) {
        scanned += 1;
        if skip {
            skip = false;
            prev_cr = false;
            continue;
        }
        if Some(t) == escape {
            skip = true;
        } else if t == quote {
            in_quotes = !in_quotes;
        } else if !in_quotes && t == lf {
            let newline = if prev_cr {
                Newline::crlf()
            } else {
                Newline::lf()
            };
            tracing::debug!(len = newline.len(), "detected newline");
            return Ok(Some(newline));
        }
        prev_cr = !in_quotes && t == cr;
    }

    if scanned >= limit {
        return Err(FormatErrorKind::NewlineNotFound { limit }.into());
    }
    if is_final {
        return Ok(Some(Newline::crlf()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(input: &[u8], is_final: bool) -> Result<Option<Newline<u8>>> {
        detect_newline(&Sequence::single(input), b'"', None, 4096, is_final)
    }

    #[test]
    fn test_match_newline_crlf() {
        let nl = Newline::<u8>::crlf();
        assert_eq!(match_newline(b"abc\r\ndef", 3, &nl), Some(2));
        // bare \r is data
        assert_eq!(match_newline(b"abc\rdef", 3, &nl), Some(0));
        // \r at end of buffer: undecided
        assert_eq!(match_newline(b"abc\r", 3, &nl), None);
        assert_eq!(match_newline(b"abc\n", 3, &nl), Some(0));
    }

    #[test]
    fn test_match_newline_lf() {
        let nl = Newline::<u8>::lf();
        assert_eq!(match_newline(b"a\nb", 1, &nl), Some(1));
        assert_eq!(match_newline(b"a\nb", 0, &nl), Some(0));
    }

    #[test]
    fn test_detect_prefers_crlf_when_present() {
        assert_eq!(detect(b"a,b\r\nc,d\r\n", false).unwrap(), Some(Newline::crlf()));
        assert_eq!(detect(b"a,b\nc,d\n", false).unwrap(), Some(Newline::lf()));
    }

    #[test]
    fn test_detect_ignores_quoted_newlines() {
        // positions: "=0 a=1 \r=2 \n=3 "=4 ,=5 b=6 \n=7
        assert_eq!(detect(b"\"a\r\n\",b\n", false).unwrap(), Some(Newline::lf()));
    }

    #[test]
    fn test_detect_needs_more_data() {
        assert_eq!(detect(b"a,b,c", false).unwrap(), None);
        assert_eq!(detect(b"a,b,c", true).unwrap(), Some(Newline::crlf()));
    }

    #[test]
    fn test_detect_respects_escape() {
        let input = b"a^\nb\r\n";
        let found = detect_newline(&Sequence::single(&input[..]), b'"', Some(b'^'), 4096, false);
        assert_eq!(found.unwrap(), Some(Newline::crlf()));
    }

    #[test]
    fn test_detect_fails_past_limit() {
        let input = vec![b'x'; 10_000];
        let err = detect_newline(&Sequence::single(&input), b'"', None, 4096, false).unwrap_err();
        assert!(matches!(
            err.as_format().map(|e| e.kind),
            Some(FormatErrorKind::NewlineNotFound { limit: 4096 })
        ));
    }

    #[test]
    fn test_detect_across_segments() {
        let parts: [&[u8]; 3] = [b"a,b\r", b"", b"\nc"];
        let seq = Sequence::from_segments(parts.to_vec());
        assert_eq!(
            detect_newline(&seq, b'"', None, 4096, false).unwrap(),
            Some(Newline::crlf())
        );
    }
}
