// Record splitter over a multi-segment buffer
//
// Token-level state machine used when a record may straddle segments or the
// input is in its final block. Quote parity, a pending escape and a pending
// first newline token carry across segment boundaries, so nothing is copied
// until a boundary is confirmed.

use crate::buffer::Sequence;
use crate::error::{FormatErrorKind, Result};

use super::dialect::{Dialect, Mode};
use super::field::tokenize_record;
use super::meta::RecordMeta;
use super::meta_buffer::MetaBuffer;
use super::simd::Backend;
use super::token::Token;

/// One record found by `try_get_line`.
#[derive(Debug, Clone)]
pub struct Line<'a, T> {
    /// Record content, newline excluded.
    pub record: Sequence<'a, T>,
    pub meta: RecordMeta,
    /// Tokens to advance past the record and its newline.
    pub consumed: usize,
}

/// Find the first complete record in `buffer`.
///
/// `Ok(None)` means more data is needed. With `final_block` the remaining
/// tokens form the last record even without a newline; an empty final
/// buffer yields nothing. The dialect newline must already be resolved;
/// an unset one is treated as `\r\n`.
pub fn try_get_line<'a, T: Token>(
    dialect: &Dialect<T>,
    buffer: &Sequence<'a, T>,
    final_block: bool,
) -> Result<Option<Line<'a, T>>> {
    let newline = dialect.newline_or_default();
    let quote = dialect.quote();
    let escape = dialect.escape();

    let mut quotes = 0u32;
    let mut escapes = 0u32;
    let mut skip = false;
    let mut pending_first: Option<usize> = None;

    for (pos, &t) in buffer.iter().enumerate() {
        if let Some(start) = pending_first.take() {
            if Some(t) == newline.second() {
                return Ok(Some(line(buffer, start, 2, quotes, escapes, dialect.mode())));
            }
            // not a newline after all; `t` is examined from a clean state
        }
        if skip {
            skip = false;
            continue;
        }
        if Some(t) == escape {
            escapes += 1;
            skip = true;
        } else if t == quote {
            quotes += 1;
        } else if quotes % 2 == 0 && t == newline.first() {
            if newline.len() == 1 {
                return Ok(Some(line(buffer, pos, 1, quotes, escapes, dialect.mode())));
            }
            pending_first = Some(pos);
        }
    }

    if !final_block || buffer.is_empty() {
        return Ok(None);
    }
    if skip {
        return Err(FormatErrorKind::TrailingEscape.into());
    }
    // field errors first, in the order the batch scan reports them
    let mut metas = MetaBuffer::new();
    match buffer.as_single() {
        Some(data) => tokenize_record(Backend::Scalar, data, dialect, &mut metas)?,
        None => tokenize_record(Backend::Scalar, &buffer.to_vec(), dialect, &mut metas)?,
    }

    let meta = RecordMeta {
        quote_count: quotes,
        escape_count: escapes,
        is_escape_mode: dialect.mode() == Mode::Escape,
        end_offset: buffer.len(),
        newline_len: 0,
    };
    meta.validate()?;
    Ok(Some(Line {
        record: buffer.clone(),
        meta,
        consumed: buffer.len(),
    }))
}

fn line<'a, T: Token>(
    buffer: &Sequence<'a, T>,
    end: usize,
    newline_len: u8,
    quotes: u32,
    escapes: u32,
    mode: Mode,
) -> Line<'a, T> {
    // a newline only counts at even parity, so the counts are well formed
    Line {
        record: buffer.slice(0..end),
        meta: RecordMeta {
            quote_count: quotes,
            escape_count: escapes,
            is_escape_mode: mode == Mode::Escape,
            end_offset: end,
            newline_len,
        },
        consumed: end + newline_len as usize,
    }
}

/// Quote and escape totals of one complete record, newline excluded.
pub fn get_record_meta<T: Token>(line: &[T], dialect: &Dialect<T>) -> Result<RecordMeta> {
    let quote = dialect.quote();
    let escape = dialect.escape();

    let mut quotes = 0u32;
    let mut escapes = 0u32;
    let mut i = 0;
    while i < line.len() {
        let t = line[i];
        if Some(t) == escape {
            if i + 1 >= line.len() {
                return Err(FormatErrorKind::TrailingEscape.into());
            }
            escapes += 1;
            i += 2;
            continue;
        }
        if t == quote {
            quotes += 1;
        }
        i += 1;
    }

    let meta = RecordMeta {
        quote_count: quotes,
        escape_count: escapes,
        is_escape_mode: dialect.mode() == Mode::Escape,
        end_offset: line.len(),
        newline_len: 0,
    };
    meta.validate()?;
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsvError;
    use pretty_assertions::assert_eq;

    fn split_all(dialect: &Dialect<u8>, segments: Vec<&[u8]>) -> Vec<Vec<u8>> {
        let seq = Sequence::from_segments(segments);
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let rest = seq.slice(offset..seq.len());
            match try_get_line(dialect, &rest, true).unwrap() {
                Some(line) => {
                    out.push(line.record.to_vec());
                    offset += line.consumed;
                }
                None => break,
            }
        }
        out
    }

    #[test]
    fn test_crlf_split_across_segments() {
        let d = Dialect::<u8>::rfc4180();
        let records = split_all(&d, vec![b"a,b\r", b"\nc,\"d\r", b"\n\"\r\nlast"]);
        assert_eq!(
            records,
            vec![b"a,b".to_vec(), b"c,\"d\r\n\"".to_vec(), b"last".to_vec()]
        );
    }

    #[test]
    fn test_needs_more_data() {
        let d = Dialect::<u8>::rfc4180();
        let seq = Sequence::single(b"a,\"b\r\n");
        assert!(try_get_line(&d, &seq, false).unwrap().is_none());
        let seq = Sequence::single(b"a,b\r");
        assert!(try_get_line(&d, &seq, false).unwrap().is_none());
    }

    #[test]
    fn test_lone_first_newline_token_is_data() {
        let d = Dialect::<u8>::rfc4180();
        // \r\r\n: the first \r is data, the second starts the newline
        let seq = Sequence::single(b"a\r\r\nb");
        let line = try_get_line(&d, &seq, false).unwrap().unwrap();
        assert_eq!(line.record.to_vec(), b"a\r".to_vec());
        assert_eq!(line.consumed, 4);
    }

    #[test]
    fn test_escaped_newline_is_not_a_boundary() {
        let d = Dialect::<u8>::lf().with_escape(Some(b'\\')).unwrap();
        let records = split_all(&d, vec![b"a\\", b"\nb\nc"]);
        assert_eq!(records, vec![b"a\\\nb".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_final_block_errors() {
        let d = Dialect::<u8>::lf();
        let err = try_get_line(&d, &Sequence::single(b"a,\"b"), true).unwrap_err();
        assert!(matches!(
            err,
            CsvError::Format(ref e) if e.kind == FormatErrorKind::UnevenQuotes { quote_count: 1 }
        ));

        let d = d.with_escape(Some(b'\\')).unwrap();
        let err = try_get_line(&d, &Sequence::single(b"ab\\"), true).unwrap_err();
        assert!(matches!(
            err,
            CsvError::Format(ref e) if e.kind == FormatErrorKind::TrailingEscape
        ));
    }

    #[test]
    fn test_final_block_reports_first_bad_field() {
        let d = Dialect::<u8>::lf().with_escape(Some(b'^')).unwrap();
        let input = b"\"\"\"^a\"^a,\"";
        let expected = FormatErrorKind::InvalidEscapeQuotes {
            quote_count: 4,
            escape_count: 2,
        };
        let whole = try_get_line(&d, &Sequence::single(input), true).unwrap_err();
        assert_eq!(whole.as_format().map(|e| e.kind), Some(expected));

        let split = Sequence::from_segments(vec![&input[..3], &input[3..7], &input[7..]]);
        let err = try_get_line(&d, &split, true).unwrap_err();
        assert_eq!(err.as_format().map(|e| e.kind), Some(expected));
    }

    #[test]
    fn test_empty_final_block_has_no_record() {
        let d = Dialect::<u8>::lf();
        assert!(try_get_line(&d, &Sequence::empty(), true).unwrap().is_none());
    }

    #[test]
    fn test_get_record_meta() {
        let d = Dialect::<u8>::lf();
        let meta = get_record_meta(b"\"a\"\"b\",c", &d).unwrap();
        assert_eq!(meta.quote_count, 4);
        assert_eq!(meta.end_offset, 8);
        assert!(get_record_meta(b"\"a", &d).is_err());

        let unix = d.with_escape(Some(b'\\')).unwrap();
        let meta = get_record_meta(b"a\\\"b,\\\\", &unix).unwrap();
        assert_eq!(meta.quote_count, 0);
        assert_eq!(meta.escape_count, 2);
        assert!(meta.is_escape_mode);
        assert!(get_record_meta(b"a\\", &unix).is_err());
        assert!(get_record_meta(b"\"a", &unix).is_err());
    }
}
