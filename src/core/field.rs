// Field boundaries inside buffered data
//
// Two entry points share one state machine:
//
//   scan_fields:     batch scan of a buffered segment into a MetaBuffer; stops
//                    at the first field that is not terminated in the data
//   tokenize_record: a complete record (newline stripped) into field metas
//
// FieldReader walks a single record field by field when the caller already
// holds its RecordMeta and wants raw spans.

use crate::error::{invariant_violation, FormatErrorKind, Result};

use super::dialect::{Dialect, Mode};
use super::meta::{Meta, RecordMeta};
use super::meta_buffer::MetaBuffer;
use super::newlines::{match_newline, Newline};
use super::simd::{chunk_bounds, chunk_masks, Backend};
use super::token::Token;
use super::unescape::structure;

// ============================================================================
// Scan state
// ============================================================================

struct FieldScan<T: Token> {
    delimiter: T,
    quote: T,
    escape: Option<T>,
    newline: Newline<T>,
    mode: Mode,
    quotes: u32,
    escapes: u32,
    /// First position not consumed by an escape pair or a newline.
    resume: usize,
    records: usize,
}

impl<T: Token> FieldScan<T> {
    fn new(dialect: &Dialect<T>, newline: Newline<T>, start: usize) -> Self {
        FieldScan {
            delimiter: dialect.delimiter(),
            quote: dialect.quote(),
            escape: dialect.escape(),
            newline,
            mode: dialect.mode(),
            quotes: 0,
            escapes: 0,
            resume: start,
            records: 0,
        }
    }

    /// Classify the token at `p`. Positions must arrive in increasing order.
    #[inline]
    fn visit(
        &mut self,
        data: &[T],
        p: usize,
        metas: &mut MetaBuffer,
    ) -> std::result::Result<(), FormatErrorKind> {
        if p < self.resume {
            return Ok(());
        }
        let t = data[p];
        if Some(t) == self.escape {
            // an escape as the last token leaves the field open
            self.escapes += 1;
            self.resume = p + 2;
        } else if t == self.quote {
            self.quotes += 1;
        } else if self.quotes % 2 == 0 {
            if t == self.delimiter {
                metas.push(Meta::for_mode(self.mode, p, self.quotes, self.escapes, false, 0)?);
                self.quotes = 0;
                self.escapes = 0;
            } else if t == self.newline.first() {
                // None: second newline token not buffered, field stays open
                let n = match_newline(data, p, &self.newline).unwrap_or(0);
                if n > 0 {
                    metas.push(Meta::for_mode(self.mode, p, self.quotes, self.escapes, true, n)?);
                    self.quotes = 0;
                    self.escapes = 0;
                    self.resume = p + n;
                    self.records += 1;
                }
            }
        }
        Ok(())
    }

    fn run(
        &mut self,
        backend: Backend,
        data: &[T],
        start: usize,
        metas: &mut MetaBuffer,
    ) -> std::result::Result<(), FormatErrorKind> {
        match backend.or_scalar() {
            Backend::Scalar => {
                for p in start..data.len() {
                    self.visit(data, p, metas)?;
                }
            }
            vector => {
                let escape_needle = self.escape.unwrap_or(self.quote);
                let needles = [self.delimiter, self.quote, escape_needle, self.newline.first()];
                let src = &data[start..];
                for (base, n) in chunk_bounds(src.len()) {
                    let [d, q, e, nl] = chunk_masks(vector, &src[base..base + n], needles);
                    let mut mask = d | q | e | nl;
                    while mask != 0 {
                        let p = start + base + mask.trailing_zeros() as usize;
                        mask &= mask - 1;
                        self.visit(data, p, metas)?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Batch scan
// ============================================================================

/// Scan `data[start..]` and push one meta per terminated field.
///
/// `start` must be a field start, normally `metas.unread_start()`. The
/// trailing field without a terminator is left for the next scan. Returns
/// the number of records completed.
///
/// On a malformed field the metas of the record it belongs to are discarded
/// so every complete record before it can still be popped.
pub fn scan_fields<T: Token>(
    backend: Backend,
    data: &[T],
    start: usize,
    dialect: &Dialect<T>,
    newline: Newline<T>,
    metas: &mut MetaBuffer,
) -> std::result::Result<usize, FormatErrorKind> {
    let mut scan = FieldScan::new(dialect, newline, start);
    match scan.run(backend, data, start, metas) {
        Ok(()) => Ok(scan.records),
        Err(kind) => {
            metas.discard_partial();
            Err(kind)
        }
    }
}

/// Field metas of one complete record whose newline was already removed.
///
/// Metas are appended to `metas`; the last one is flagged end-of-record.
pub fn tokenize_record<T: Token>(
    backend: Backend,
    line: &[T],
    dialect: &Dialect<T>,
    metas: &mut MetaBuffer,
) -> std::result::Result<(), FormatErrorKind> {
    let mut scan = FieldScan::new(dialect, dialect.newline_or_default(), 0);
    scan.run(backend, line, 0, metas)?;
    if scan.resume > line.len() {
        return Err(FormatErrorKind::TrailingEscape);
    }
    metas.push(Meta::for_mode(scan.mode, line.len(), scan.quotes, scan.escapes, true, 0)?);
    Ok(())
}

// ============================================================================
// Field-at-a-time reader
// ============================================================================

/// A field span before unescaping, with the special tokens it contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawField<'a, T> {
    pub span: &'a [T],
    pub quote_count: u32,
    pub escape_count: u32,
}

impl<'a, T: Token> RawField<'a, T> {
    /// Unescaped text of the field.
    pub fn value(&self, dialect: &Dialect<T>, scratch: &'a mut Vec<T>) -> Result<&'a [T]> {
        let meta = Meta::for_mode(
            dialect.mode(),
            self.span.len(),
            self.quote_count,
            self.escape_count,
            false,
            0,
        )?;
        meta.field(0, self.span, dialect, scratch)
    }
}

/// Successive fields of one record.
///
/// The record's quote and escape totals are consumed as fields are returned;
/// both reach zero exactly when the last field is read.
pub struct FieldReader<'a, T: Token> {
    line: &'a [T],
    dialect: &'a Dialect<T>,
    pos: usize,
    quotes_left: u32,
    escapes_left: u32,
    finished: bool,
}

impl<'a, T: Token> FieldReader<'a, T> {
    /// `line` is the record content without its newline.
    pub fn new(line: &'a [T], meta: &RecordMeta, dialect: &'a Dialect<T>) -> Self {
        FieldReader {
            line,
            dialect,
            pos: 0,
            quotes_left: meta.quote_count,
            escapes_left: meta.escape_count,
            finished: false,
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn read_next_field(&mut self) -> Result<Option<RawField<'a, T>>> {
        if self.finished {
            return Ok(None);
        }
        let start = self.pos;
        let rest = &self.line[start..];
        let delimiter = self.dialect.delimiter();

        // no specials left: the next delimiter ends the field
        if self.quotes_left == 0 && self.escapes_left == 0 {
            let len = rest.iter().position(|&t| t == delimiter).unwrap_or(rest.len());
            return Ok(Some(self.emit(start, len, 0, 0)));
        }

        let quote = self.dialect.quote();
        let escape = self.dialect.escape();
        let mut quotes = 0u32;
        let mut escapes = 0u32;
        let mut i = 0;
        while i < rest.len() {
            let t = rest[i];
            if Some(t) == escape {
                if i + 1 >= rest.len() {
                    return Err(FormatErrorKind::TrailingEscape.into());
                }
                escapes += 1;
                i += 2;
                continue;
            }
            if t == quote {
                quotes += 1;
            } else if t == delimiter && quotes % 2 == 0 {
                break;
            }
            i += 1;
        }
        Ok(Some(self.emit(start, i, quotes, escapes)))
    }

    fn emit(&mut self, start: usize, len: usize, quotes: u32, escapes: u32) -> RawField<'a, T> {
        let end = start + len;
        if quotes > self.quotes_left || escapes > self.escapes_left {
            invariant_violation(
                "field has more special tokens than its record",
                &structure(&self.line[start..end], self.dialect.quote(), self.dialect.escape()),
            );
        }
        self.quotes_left -= quotes;
        self.escapes_left -= escapes;
        if end >= self.line.len() {
            self.finished = true;
            if self.quotes_left != 0 || self.escapes_left != 0 {
                invariant_violation(
                    "record special counts not exhausted by its last field",
                    &structure(self.line, self.dialect.quote(), self.dialect.escape()),
                );
            }
        }
        self.pos = end + 1;
        RawField {
            span: &self.line[start..end],
            quote_count: quotes,
            escape_count: escapes,
        }
    }
}

impl<'a, T: Token> Iterator for FieldReader<'a, T> {
    type Item = Result<RawField<'a, T>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_field().transpose()
    }
}
