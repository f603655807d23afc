// Unescape engine: strip wrapping quotes and collapse doubled quotes or
// escape sequences
//
// Both modes compact in place, front to back. The write cursor never passes
// the read cursor, so source and destination may share the same start.
//
//   Scalar: `position` search + `copy_within` per special token
//   Masked: per-chunk bitmasks (SSE2/AVX2) drive the same copy loop
//
// All backends produce identical output and identical errors. A special
// count that disagrees with what the pass finds is an internal bug and
// panics through `invariant_violation`.

use crate::error::{invariant_violation, FormatErrorKind, Result};

use super::simd::{chunk_bounds, chunk_masks, Backend};
use super::token::Token;

/// Unescape an RFC 4180 field given its total quote count.
///
/// `quote_count == 0` returns `field` untouched. Otherwise the wrapping quotes
/// are removed; with exactly 2 quotes the interior is returned as-is, and
/// with more the doubled quotes are collapsed into `scratch`.
pub fn unescape<'a, T: Token>(
    field: &'a [T],
    quote: T,
    quote_count: u32,
    scratch: &'a mut Vec<T>,
) -> Result<&'a [T]> {
    unescape_with(Backend::detect(), field, quote, quote_count, scratch)
}

/// `unescape` on an explicit backend.
pub fn unescape_with<'a, T: Token>(
    backend: Backend,
    field: &'a [T],
    quote: T,
    quote_count: u32,
    scratch: &'a mut Vec<T>,
) -> Result<&'a [T]> {
    if quote_count == 0 {
        return Ok(field);
    }
    if quote_count % 2 != 0 {
        return Err(FormatErrorKind::UnevenQuotes { quote_count }.into());
    }
    let inner = strip_quotes(field, quote)?;
    if quote_count == 2 {
        return Ok(inner);
    }
    scratch.clear();
    scratch.extend_from_slice(inner);
    let len = compact_rfc(backend, scratch, quote, quote_count - 2)?;
    scratch.truncate(len);
    Ok(&scratch[..])
}

/// Collapse doubled quotes of an already stripped field inside `buf`.
///
/// `inner_quotes` counts the quotes in `buf` (twice the number of pairs).
/// Returns the unescaped length; the result occupies `buf[..len]`.
pub fn unescape_in_place<T: Token>(
    backend: Backend,
    buf: &mut [T],
    quote: T,
    inner_quotes: u32,
) -> Result<usize> {
    compact_rfc(backend, buf, quote, inner_quotes)
}

/// Unescape an escape-mode field: optional wrapping quotes, then every
/// `escape + token` pair becomes `token`.
pub fn unescape_escaped<'a, T: Token>(
    field: &'a [T],
    quote: T,
    escape: T,
    quoted: bool,
    escape_count: u32,
    scratch: &'a mut Vec<T>,
) -> Result<&'a [T]> {
    unescape_escaped_with(
        Backend::detect(),
        field,
        quote,
        escape,
        quoted,
        escape_count,
        scratch,
    )
}

pub fn unescape_escaped_with<'a, T: Token>(
    backend: Backend,
    field: &'a [T],
    quote: T,
    escape: T,
    quoted: bool,
    escape_count: u32,
    scratch: &'a mut Vec<T>,
) -> Result<&'a [T]> {
    let inner = if quoted {
        strip_quotes(field, quote)?
    } else {
        field
    };
    if escape_count == 0 {
        return Ok(inner);
    }
    scratch.clear();
    scratch.extend_from_slice(inner);
    let len = compact_escaped(backend, scratch, escape, escape_count)?;
    scratch.truncate(len);
    Ok(&scratch[..])
}

/// Escape-mode counterpart of `unescape_in_place`.
pub fn unescape_escaped_in_place<T: Token>(
    backend: Backend,
    buf: &mut [T],
    escape: T,
    escape_count: u32,
) -> Result<usize> {
    compact_escaped(backend, buf, escape, escape_count)
}

/// Unescaped length of a stripped RFC field.
#[inline]
pub fn rfc_unescaped_len(inner_len: usize, inner_quotes: u32) -> usize {
    inner_len - (inner_quotes / 2) as usize
}

#[inline]
fn strip_quotes<T: Token>(field: &[T], quote: T) -> Result<&[T]> {
    match field {
        [first, inner @ .., last] if *first == quote && *last == quote => Ok(inner),
        _ => Err(FormatErrorKind::UnwrappedQuotes.into()),
    }
}

// ---------------------------------------------------------------------------
// RFC 4180: "" -> "
// ---------------------------------------------------------------------------

fn compact_rfc<T: Token>(backend: Backend, buf: &mut [T], quote: T, expected: u32) -> Result<usize> {
    let (len, found) = match backend.or_scalar() {
        Backend::Scalar => compact_rfc_scalar(buf, quote)?,
        vector => compact_rfc_masked(vector, buf, quote)?,
    };
    if found != expected {
        invariant_violation(
            &format!("expected {expected} quotes to unescape, found {found}"),
            &structure(buf, quote, None),
        );
    }
    Ok(len)
}

fn compact_rfc_scalar<T: Token>(buf: &mut [T], quote: T) -> Result<(usize, u32)> {
    let len = buf.len();
    let mut read = 0;
    let mut write = 0;
    let mut found = 0u32;

    while let Some(offset) = buf[read..].iter().position(|&t| t == quote) {
        let q = read + offset;
        if q + 1 >= len || buf[q + 1] != quote {
            return Err(FormatErrorKind::LoneQuote { index: q }.into());
        }
        // keep the first quote of the pair, drop the second
        buf.copy_within(read..q + 1, write);
        write += q + 1 - read;
        read = q + 2;
        found += 2;
    }

    buf.copy_within(read..len, write);
    write += len - read;
    Ok((write, found))
}

fn compact_rfc_masked<T: Token>(backend: Backend, buf: &mut [T], quote: T) -> Result<(usize, u32)> {
    let len = buf.len();
    let mut read = 0;
    let mut write = 0;
    let mut found = 0u32;
    let mut pending: Option<usize> = None;

    for (base, n) in chunk_bounds(len) {
        // writes so far stay below `read <= base`, so the chunk is intact
        let [mut mask] = chunk_masks(backend, &buf[base..base + n], [quote]);
        while mask != 0 {
            let q = base + mask.trailing_zeros() as usize;
            mask &= mask - 1;
            match pending.take() {
                None => pending = Some(q),
                Some(p) if q == p + 1 => {
                    buf.copy_within(read..q, write);
                    write += q - read;
                    read = q + 1;
                    found += 2;
                }
                Some(p) => return Err(FormatErrorKind::LoneQuote { index: p }.into()),
            }
        }
    }

    if let Some(p) = pending {
        return Err(FormatErrorKind::LoneQuote { index: p }.into());
    }

    buf.copy_within(read..len, write);
    write += len - read;
    Ok((write, found))
}

// ---------------------------------------------------------------------------
// Escape mode: ^x -> x
// ---------------------------------------------------------------------------

fn compact_escaped<T: Token>(
    backend: Backend,
    buf: &mut [T],
    escape: T,
    expected: u32,
) -> Result<usize> {
    let (len, found) = match backend.or_scalar() {
        Backend::Scalar => compact_escaped_scalar(buf, escape)?,
        vector => compact_escaped_masked(vector, buf, escape)?,
    };
    if found != expected {
        invariant_violation(
            &format!("expected {expected} escapes to unescape, found {found}"),
            &structure(buf, escape, Some(escape)),
        );
    }
    Ok(len)
}

fn compact_escaped_scalar<T: Token>(buf: &mut [T], escape: T) -> Result<(usize, u32)> {
    let len = buf.len();
    let mut read = 0;
    let mut write = 0;
    let mut found = 0u32;

    while let Some(offset) = buf[read..].iter().position(|&t| t == escape) {
        let e = read + offset;
        if e + 1 >= len {
            return Err(FormatErrorKind::TrailingEscape.into());
        }
        buf.copy_within(read..e, write);
        write += e - read;
        buf[write] = buf[e + 1];
        write += 1;
        read = e + 2;
        found += 1;
    }

    buf.copy_within(read..len, write);
    write += len - read;
    Ok((write, found))
}

fn compact_escaped_masked<T: Token>(
    backend: Backend,
    buf: &mut [T],
    escape: T,
) -> Result<(usize, u32)> {
    let len = buf.len();
    let mut read = 0;
    let mut write = 0;
    let mut found = 0u32;

    for (base, n) in chunk_bounds(len) {
        let [mut mask] = chunk_masks(backend, &buf[base..base + n], [escape]);
        while mask != 0 {
            let e = base + mask.trailing_zeros() as usize;
            mask &= mask - 1;
            if e < read {
                // escaped escape, already copied as a literal
                continue;
            }
            if e + 1 >= len {
                return Err(FormatErrorKind::TrailingEscape.into());
            }
            buf.copy_within(read..e, write);
            write += e - read;
            buf[write] = buf[e + 1];
            write += 1;
            read = e + 2;
            found += 1;
        }
    }

    buf.copy_within(read..len, write);
    write += len - read;
    Ok((write, found))
}

/// Field dump for invariant panics: `"` quote, `E` escape, `x` anything else.
pub(crate) fn structure<T: Token>(field: &[T], quote: T, escape: Option<T>) -> String {
    field
        .iter()
        .map(|&t| {
            if Some(t) == escape {
                'E'
            } else if t == quote {
                '"'
            } else {
                'x'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn all_backends() -> Vec<Backend> {
        Backend::available()
    }

    #[test]
    fn test_zero_quotes_is_noop() {
        let field = b"plain";
        let mut scratch = Vec::new();
        let out = unescape(&field[..], b'"', 0, &mut scratch).unwrap();
        assert_eq!(out.as_ptr(), field.as_ptr(), "must return the original span");
        assert!(scratch.capacity() == 0, "must not allocate");
    }

    #[test]
    fn test_two_quotes_returns_interior() {
        let field = b"\"b,c\"";
        let mut scratch = Vec::new();
        let out = unescape(&field[..], b'"', 2, &mut scratch).unwrap();
        assert_eq!(out, b"b,c");
        assert_eq!(out.as_ptr(), field[1..].as_ptr());
    }

    #[test]
    fn test_doubled_quotes_collapse_on_every_backend() {
        let field = b"\"he said \"\"hi\"\"\"";
        for backend in all_backends() {
            let mut scratch = Vec::new();
            let out = unescape_with(backend, &field[..], b'"', 6, &mut scratch).unwrap();
            assert_eq!(out, b"he said \"hi\"", "backend {backend:?}");
        }
    }

    #[test]
    fn test_long_field_spanning_chunks() {
        // pairs straddle the 32-token chunk boundaries
        let mut inner = Vec::new();
        let mut expected = Vec::new();
        for i in 0..40 {
            inner.extend_from_slice(b"abc\"\"");
            expected.extend_from_slice(b"abc\"");
            if i % 7 == 0 {
                inner.push(b'z');
                expected.push(b'z');
            }
        }
        for backend in all_backends() {
            let mut buf = inner.clone();
            let len = unescape_in_place(backend, &mut buf, b'"', 80).unwrap();
            assert_eq!(&buf[..len], &expected[..], "backend {backend:?}");
            assert_eq!(len, rfc_unescaped_len(inner.len(), 80));
        }
    }

    #[test]
    fn test_lone_quote_is_format_error() {
        for backend in all_backends() {
            let mut buf = b"a\"b\"\"c".to_vec();
            let err = unescape_in_place(backend, &mut buf, b'"', 3).unwrap_err();
            assert!(
                matches!(
                    err.as_format().map(|e| e.kind),
                    Some(FormatErrorKind::LoneQuote { index: 1 })
                ),
                "backend {backend:?}: {err}"
            );
        }
    }

    #[test]
    fn test_unwrapped_quotes_rejected() {
        let mut scratch = Vec::new();
        let err = unescape(&b"a\"\"b"[..], b'"', 2, &mut scratch).unwrap_err();
        assert!(matches!(
            err.as_format().map(|e| e.kind),
            Some(FormatErrorKind::UnwrappedQuotes)
        ));
    }

    #[test]
    #[should_panic(expected = "internal error")]
    fn test_count_mismatch_panics() {
        let mut buf = b"a\"\"b".to_vec();
        let _ = unescape_in_place(Backend::Scalar, &mut buf, b'"', 4);
    }

    #[test]
    fn test_escaped_unquoted() {
        // a,^,b,c -> field 2 is "^,b"
        for backend in all_backends() {
            let mut scratch = Vec::new();
            let out =
                unescape_escaped_with(backend, &b"^,b"[..], b'"', b'^', false, 1, &mut scratch)
                    .unwrap();
            assert_eq!(out, b",b");
        }
    }

    #[test]
    fn test_escaped_escape_and_quote() {
        // "a^"b^^c" -> a"b^c
        for backend in all_backends() {
            let mut scratch = Vec::new();
            let out = unescape_escaped_with(
                backend,
                &b"\"a^\"b^^c\""[..],
                b'"',
                b'^',
                true,
                2,
                &mut scratch,
            )
            .unwrap();
            assert_eq!(out, b"a\"b^c", "backend {backend:?}");
        }
    }

    #[test]
    fn test_trailing_escape_rejected() {
        for backend in all_backends() {
            let mut buf = b"abc^".to_vec();
            let err = unescape_escaped_in_place(backend, &mut buf, b'^', 1).unwrap_err();
            assert!(matches!(
                err.as_format().map(|e| e.kind),
                Some(FormatErrorKind::TrailingEscape)
            ));
        }
    }

    #[test]
    fn test_utf16_unescape() {
        let field: Vec<u16> = "\"x\"\"y\"".encode_utf16().collect();
        let expected: Vec<u16> = "x\"y".encode_utf16().collect();
        for backend in all_backends() {
            let mut scratch = Vec::new();
            let out = unescape_with(backend, &field, b'"' as u16, 4, &mut scratch).unwrap();
            assert_eq!(out, &expected[..]);
        }
    }

    #[test]
    fn test_structure_dump() {
        assert_eq!(structure(b"\"a^\"", b'"', Some(b'^')), "\"xE\"");
    }
}
