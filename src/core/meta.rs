// Per-field and per-record metadata produced by one scan
//
// A field Meta packs into 8 bytes:
//
//   end_and_eol: bit 31 = field ends a record, bits 0..31 = end offset
//   bits:        bits 0..2 = tokens after `end` (1 for a delimiter, newline
//                length for EOL), bit 2 = escape counts, bit 3 = escaped
//                field is wrapped in quotes, bits 4.. = special count
//
// Special count is the total quote count (wrapping quotes included), or the
// escape count when the escape bit is set. The zero value is the
// start-of-data sentinel: end 0, next start 0.

use std::borrow::Cow;
use std::fmt;

use crate::error::{FormatErrorKind, Result};

use super::dialect::{Dialect, Mode};
use super::token::Token;
use super::unescape::{unescape_escaped, unescape_with};

const EOL_MASK: u32 = 1 << 31;
const END_OFFSET_MASK: u32 = 0b11;
const IS_ESCAPE_MASK: u32 = 0b100;
const QUOTED_MASK: u32 = 0b1000;
const SPECIAL_SHIFT: u32 = 4;

pub const MAX_SPECIAL_COUNT: u32 = u32::MAX >> SPECIAL_SHIFT;
pub const MAX_END: usize = (EOL_MASK - 1) as usize;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Meta {
    end_and_eol: u32,
    bits: u32,
}

impl Meta {
    pub const START_OF_DATA: Meta = Meta {
        end_and_eol: 0,
        bits: 0,
    };

    #[inline]
    fn pack(end: usize, special: u32, is_escape: bool, quoted: bool, is_eol: bool, offset: usize) -> Meta {
        debug_assert!(end <= MAX_END);
        debug_assert!(offset <= 2);
        let mut end_and_eol = end as u32;
        if is_eol {
            end_and_eol |= EOL_MASK;
        }
        let mut bits = (special << SPECIAL_SHIFT) | offset as u32;
        if is_escape {
            bits |= IS_ESCAPE_MASK;
        }
        if quoted {
            bits |= QUOTED_MASK;
        }
        Meta { end_and_eol, bits }
    }

    /// Field ended by a delimiter with no special tokens.
    #[inline]
    pub fn plain(end: usize) -> Meta {
        Self::pack(end, 0, false, false, false, 1)
    }

    /// RFC 4180 field. `newline_len` is ignored unless `is_eol`.
    #[inline]
    pub fn rfc(end: usize, quote_count: u32, is_eol: bool, newline_len: usize) -> std::result::Result<Meta, FormatErrorKind> {
        if quote_count % 2 != 0 {
            return Err(FormatErrorKind::UnevenQuotes { quote_count });
        }
        if quote_count > MAX_SPECIAL_COUNT {
            return Err(FormatErrorKind::TooManySpecials {
                count: quote_count as u64,
            });
        }
        let offset = if is_eol { newline_len } else { 1 };
        Ok(Self::pack(end, quote_count, false, false, is_eol, offset))
    }

    /// Escape mode field. Escapes are only valid in unquoted fields or in
    /// fields wrapped in exactly one pair of quotes.
    #[inline]
    pub fn escaped(
        end: usize,
        quote_count: u32,
        escape_count: u32,
        is_eol: bool,
        newline_len: usize,
    ) -> std::result::Result<Meta, FormatErrorKind> {
        if quote_count % 2 != 0 {
            return Err(FormatErrorKind::UnevenQuotes { quote_count });
        }
        if escape_count > 0 && quote_count != 0 && quote_count != 2 {
            return Err(FormatErrorKind::InvalidEscapeQuotes {
                quote_count,
                escape_count,
            });
        }
        let special = if escape_count == 0 { quote_count } else { escape_count };
        if special > MAX_SPECIAL_COUNT {
            return Err(FormatErrorKind::TooManySpecials {
                count: special as u64,
            });
        }
        let offset = if is_eol { newline_len } else { 1 };
        // without escapes the field behaves exactly like an RFC field
        Ok(Self::pack(
            end,
            special,
            escape_count != 0,
            escape_count != 0 && quote_count == 2,
            is_eol,
            offset,
        ))
    }

    /// Mode-dispatching constructor.
    #[inline]
    pub fn for_mode(
        mode: Mode,
        end: usize,
        quote_count: u32,
        escape_count: u32,
        is_eol: bool,
        newline_len: usize,
    ) -> std::result::Result<Meta, FormatErrorKind> {
        match mode {
            Mode::Rfc4180 => Self::rfc(end, quote_count, is_eol, newline_len),
            Mode::Escape => Self::escaped(end, quote_count, escape_count, is_eol, newline_len),
        }
    }

    #[inline]
    pub fn end(&self) -> usize {
        (self.end_and_eol & !EOL_MASK) as usize
    }

    #[inline]
    pub fn is_eol(&self) -> bool {
        self.end_and_eol & EOL_MASK != 0
    }

    #[inline]
    pub fn special_count(&self) -> u32 {
        self.bits >> SPECIAL_SHIFT
    }

    #[inline]
    pub fn is_escape(&self) -> bool {
        self.bits & IS_ESCAPE_MASK != 0
    }

    #[inline]
    pub fn is_quoted(&self) -> bool {
        self.bits & QUOTED_MASK != 0
    }

    #[inline]
    pub fn end_offset(&self) -> usize {
        (self.bits & END_OFFSET_MASK) as usize
    }

    #[inline]
    pub fn next_start(&self) -> usize {
        self.end() + self.end_offset()
    }

    /// Same meta with `end` moved `offset` tokens toward the start.
    #[inline]
    pub(crate) fn shifted(self, offset: usize) -> Meta {
        let eol = self.end_and_eol & EOL_MASK;
        Meta {
            end_and_eol: (self.end() - offset) as u32 | eol,
            bits: self.bits,
        }
    }

    /// Plain field or a field wrapped in one pair of quotes: no copy needed.
    #[inline]
    fn fast_path<'a, T: Token>(&self, field: &'a [T], dialect: &Dialect<T>) -> Option<&'a [T]> {
        if !dialect.whitespace().is_empty() || self.is_escape() {
            return None;
        }
        match self.special_count() {
            0 => Some(field),
            2 => match field {
                [first, inner @ .., last] if *first == dialect.quote() && *last == dialect.quote() => {
                    Some(inner)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Unescaped field text, using `scratch` when the text must be rewritten.
    ///
    /// `start` is the previous meta's `next_start()`.
    pub fn field<'a, T: Token>(
        &self,
        start: usize,
        data: &'a [T],
        dialect: &Dialect<T>,
        scratch: &'a mut Vec<T>,
    ) -> Result<&'a [T]> {
        let field = &data[start..self.end()];
        if let Some(out) = self.fast_path(field, dialect) {
            return Ok(out);
        }
        self.field_slow(field, dialect, scratch)
    }

    /// Like `field`, allocating only when the text must be rewritten.
    pub fn field_cow<'a, T: Token>(
        &self,
        start: usize,
        data: &'a [T],
        dialect: &Dialect<T>,
    ) -> Result<Cow<'a, [T]>> {
        let field = &data[start..self.end()];
        if let Some(out) = self.fast_path(field, dialect) {
            return Ok(Cow::Borrowed(out));
        }
        let trimmed = dialect.trim(field);
        if self.special_count() == 0 && !self.is_escape() {
            return Ok(Cow::Borrowed(trimmed));
        }
        let mut scratch = Vec::new();
        let out = self.field_slow(trimmed, dialect, &mut scratch)?;
        Ok(Cow::Owned(out.to_vec()))
    }

    #[cold]
    fn field_slow<'a, T: Token>(
        &self,
        field: &'a [T],
        dialect: &Dialect<T>,
        scratch: &'a mut Vec<T>,
    ) -> Result<&'a [T]> {
        // trim before unquoting so spaces inside quotes survive
        let field = dialect.trim(field);
        let special = self.special_count();

        match (self.is_escape(), dialect.escape()) {
            (true, Some(escape)) => {
                unescape_escaped(field, dialect.quote(), escape, self.is_quoted(), special, scratch)
            }
            _ => unescape_with(
                super::simd::Backend::detect(),
                field,
                dialect.quote(),
                special,
                scratch,
            ),
        }
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Meta::START_OF_DATA {
            return write!(f, "{{ Start: 0 }}");
        }
        write!(
            f,
            "{{ End: {}, IsEOL: {}, SpecialCount: {}, IsEscape: {}, Offset: {}, Next: {} }}",
            self.end(),
            self.is_eol(),
            self.special_count(),
            self.is_escape(),
            self.end_offset(),
            self.next_start()
        )
    }
}

/// Quote and escape totals for a whole record, as counted by the splitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordMeta {
    pub quote_count: u32,
    pub escape_count: u32,
    pub is_escape_mode: bool,
    /// Length of the record content, newline excluded.
    pub end_offset: usize,
    /// Newline tokens after the content (0 for a final record without one).
    pub newline_len: u8,
}

impl RecordMeta {
    /// Offset of the next record's first token.
    #[inline]
    pub fn next_start_offset(&self) -> usize {
        self.end_offset + self.newline_len as usize
    }

    /// Reject counts that can't belong to a well-formed record.
    pub fn validate(&self) -> std::result::Result<(), FormatErrorKind> {
        if self.quote_count % 2 != 0 {
            return Err(FormatErrorKind::UnevenQuotes {
                quote_count: self.quote_count,
            });
        }
        Ok(())
    }
}
