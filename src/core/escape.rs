// Escape engine: decide whether a value needs quoting and write it escaped
//
// Escaping expands `value` into `quote + value' + quote`, where every special
// token (the quote in RFC mode; quote and escape in escape mode) is preceded
// by the quote or the escape token respectively.
//
// The expansion works from the END of the buffer toward the start. The value
// usually sits at the start of the very buffer it is expanded into, so every
// write must land at or after the read cursor: closing quote first, then
// runs copied right to left, opening quote last.
//
//   Scalar: `rposition` search per special token
//   Masked: one bitmask per 32-token chunk, popcount for the total, then
//           expansion driven by the highest set bit of each mask

use crate::error::invariant_violation;

use super::dialect::Dialect;
use super::simd::{chunk_bounds, chunk_masks, for_each_chunk, Backend};
use super::token::Token;
use super::unescape::structure;

bitflags::bitflags! {
    /// When the writer wraps a value in quotes.
    ///
    /// The empty set (`Quoting::NEVER`) writes values verbatim, even when that
    /// produces invalid CSV.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Quoting: u8 {
        /// Values containing a delimiter, quote, escape or newline token.
        const AUTO = 1;
        /// Empty values, so they differ from missing ones.
        const EMPTY = 1 << 1;
        const LEADING_SPACES = 1 << 2;
        const TRAILING_SPACES = 1 << 3;
        const LEADING_OR_TRAILING_SPACES = Self::LEADING_SPACES.bits() | Self::TRAILING_SPACES.bits();
        /// Every value.
        const ALWAYS = 1 << 4;
    }
}

impl Quoting {
    pub const NEVER: Quoting = Quoting::empty();
}

impl Default for Quoting {
    fn default() -> Self {
        Quoting::AUTO
    }
}

// ==========================================================================
// Scanning
// ==========================================================================

/// Whether `field` must be quoted under `policy`, and how many of its tokens
/// must be individually escaped when it is.
pub fn needs_quoting<T: Token>(field: &[T], dialect: &Dialect<T>, policy: Quoting) -> (bool, usize) {
    needs_quoting_with(Backend::detect(), field, dialect, policy)
}

pub fn needs_quoting_with<T: Token>(
    backend: Backend,
    field: &[T],
    dialect: &Dialect<T>,
    policy: Quoting,
) -> (bool, usize) {
    if policy.contains(Quoting::ALWAYS) {
        return (true, count_specials(backend, field, dialect));
    }
    if policy.is_empty() {
        return (false, 0);
    }

    let is_space = |t: T| t == T::from_ascii(b' ') || dialect.is_whitespace(t);
    let mut required = policy.contains(Quoting::EMPTY) && field.is_empty();
    if policy.contains(Quoting::LEADING_SPACES) {
        required |= field.first().is_some_and(|&t| is_space(t));
    }
    if policy.contains(Quoting::TRAILING_SPACES) {
        required |= field.last().is_some_and(|&t| is_space(t));
    }

    if policy.contains(Quoting::AUTO) {
        let (structural, specials) = scan_field(backend, field, dialect);
        if structural || required {
            return (true, specials);
        }
        return (false, 0);
    }

    if required {
        (true, count_specials(backend, field, dialect))
    } else {
        (false, 0)
    }
}

/// Tokens that must be escaped inside a quoted value.
pub fn count_specials<T: Token>(backend: Backend, field: &[T], dialect: &Dialect<T>) -> usize {
    let quote = dialect.quote();
    let escape = dialect.escape().unwrap_or(quote);
    match backend.or_scalar() {
        Backend::Scalar => field.iter().filter(|&&t| t == quote || t == escape).count(),
        vector => {
            let mut count = 0usize;
            for_each_chunk(vector, field, [quote, escape], |_, [q, e]| {
                count += (q | e).count_ones() as usize;
            });
            count
        }
    }
}

/// (contains any structural token, special count)
fn scan_field<T: Token>(backend: Backend, field: &[T], dialect: &Dialect<T>) -> (bool, usize) {
    let delimiter = dialect.delimiter();
    let quote = dialect.quote();
    let escape = dialect.escape().unwrap_or(quote);
    let newline = dialect.newline_or_default();
    let nl0 = newline.first();
    let nl1 = newline.second().unwrap_or(nl0);

    match backend.or_scalar() {
        Backend::Scalar => {
            let mut structural = false;
            let mut specials = 0usize;
            for &t in field {
                if t == quote || t == escape {
                    specials += 1;
                    structural = true;
                } else if t == delimiter || t == nl0 || t == nl1 {
                    structural = true;
                }
            }
            (structural, specials)
        }
        vector => {
            let mut any = 0u32;
            let mut specials = 0usize;
            for_each_chunk(
                vector,
                field,
                [delimiter, quote, escape, nl0, nl1],
                |_, [d, q, e, n0, n1]| {
                    let special = q | e;
                    specials += special.count_ones() as usize;
                    any |= d | special | n0 | n1;
                },
            );
            (any != 0, specials)
        }
    }
}

// ==========================================================================
// Writing
// ==========================================================================

/// Total length of `len` tokens once quoted and escaped.
#[inline]
pub fn escaped_len(len: usize, special_count: usize) -> usize {
    len + special_count + 2
}

/// Escape `src` into `dst`, returning the written length.
///
/// `dst` must hold `escaped_len(src.len(), special_count)` tokens.
pub fn escape_into<T: Token>(
    src: &[T],
    dst: &mut [T],
    special_count: usize,
    dialect: &Dialect<T>,
) -> usize {
    dst[..src.len()].copy_from_slice(src);
    escape_in_place(dst, src.len(), special_count, dialect)
}

/// Escape the value occupying `buf[..len]` within `buf`.
///
/// `buf` must hold `escaped_len(len, special_count)` tokens.
pub fn escape_in_place<T: Token>(
    buf: &mut [T],
    len: usize,
    special_count: usize,
    dialect: &Dialect<T>,
) -> usize {
    escape_in_place_with(Backend::detect(), buf, len, special_count, dialect)
}

pub fn escape_in_place_with<T: Token>(
    backend: Backend,
    buf: &mut [T],
    len: usize,
    special_count: usize,
    dialect: &Dialect<T>,
) -> usize {
    let required = escaped_len(len, special_count);
    assert!(
        buf.len() >= required,
        "escape buffer too small: {} < {required}",
        buf.len()
    );
    let quote = dialect.quote();
    let escape = dialect.escape();

    let end = match backend.or_scalar() {
        Backend::Scalar => expand_scalar(buf, len, special_count, required, quote, escape),
        vector => expand_masked(vector, buf, len, special_count, required, quote, escape),
    };

    // everything before `end` is special-free and shifts right by one
    buf.copy_within(0..end, 1);
    buf[0] = quote;
    required
}

/// Writes the closing quote and every special run; returns the length of the
/// untouched prefix.
fn expand_scalar<T: Token>(
    buf: &mut [T],
    len: usize,
    special_count: usize,
    required: usize,
    quote: T,
    escape: Option<T>,
) -> usize {
    let prefix_token = escape.unwrap_or(quote);
    let is_special = |t: T| t == quote || Some(t) == escape;

    let mut write = required - 1;
    buf[write] = quote;
    let mut end = len;
    let mut remaining = special_count;

    while let Some(p) = buf[..end].iter().rposition(|&t| is_special(t)) {
        if remaining == 0 {
            invariant_violation(
                &format!("more than {special_count} tokens to escape"),
                &structure(&buf[..len], quote, escape),
            );
        }
        let run = end - p;
        buf.copy_within(p..end, write - run);
        write -= run + 1;
        buf[write] = prefix_token;
        end = p;
        remaining -= 1;
    }

    if remaining != 0 {
        invariant_violation(
            &format!("expected {special_count} tokens to escape, found {}", special_count - remaining),
            &structure(&buf[..len], quote, escape),
        );
    }
    end
}

fn expand_masked<T: Token>(
    backend: Backend,
    buf: &mut [T],
    len: usize,
    special_count: usize,
    required: usize,
    quote: T,
    escape: Option<T>,
) -> usize {
    let prefix_token = escape.unwrap_or(quote);
    let escape_needle = escape.unwrap_or(quote);

    // masks are taken before any write
    let mut masks: Vec<(usize, u32)> = Vec::new();
    let mut found = 0usize;
    for (base, n) in chunk_bounds(len) {
        let [q, e] = chunk_masks(backend, &buf[base..base + n], [quote, escape_needle]);
        let mask = q | e;
        if mask != 0 {
            found += mask.count_ones() as usize;
            masks.push((base, mask));
        }
    }
    if found != special_count {
        invariant_violation(
            &format!("expected {special_count} tokens to escape, found {found}"),
            &structure(&buf[..len], quote, escape),
        );
    }

    let mut write = required - 1;
    buf[write] = quote;
    let mut end = len;

    for &(base, mut mask) in masks.iter().rev() {
        while mask != 0 {
            let bit = 31 - mask.leading_zeros() as usize;
            mask &= !(1u32 << bit);
            let p = base + bit;
            let run = end - p;
            buf.copy_within(p..end, write - run);
            write -= run + 1;
            buf[write] = prefix_token;
            end = p;
        }
    }
    end
}

/// Escape `buf[..len]` when `buf` is shorter than the escaped value.
///
/// The first `buf.len()` tokens of the result go to `buf`, the rest to
/// `overflow`, which must hold exactly `escaped_len(len, special_count) -
/// buf.len()` tokens.
pub fn escape_with_overflow<T: Token>(
    buf: &mut [T],
    len: usize,
    special_count: usize,
    overflow: &mut [T],
    dialect: &Dialect<T>,
) {
    let required = escaped_len(len, special_count);
    let split = buf.len();
    assert!(len <= split && split < required, "overflow escape needs a short buffer");
    assert_eq!(overflow.len(), required - split, "overflow buffer has wrong length");

    let quote = dialect.quote();
    let escape = dialect.escape();
    let prefix_token = escape.unwrap_or(quote);
    let is_special = |t: T| t == quote || Some(t) == escape;

    let found = buf[..len].iter().filter(|&&t| is_special(t)).count();
    if found != special_count {
        invariant_violation(
            &format!("expected {special_count} tokens to escape, found {found}"),
            &structure(&buf[..len], quote, escape),
        );
    }

    let mut put = |buf: &mut [T], i: usize, t: T| {
        if i >= split {
            overflow[i - split] = t;
        } else {
            buf[i] = t;
        }
    };

    let mut write = required - 1;
    put(buf, write, quote);
    for read in (0..len).rev() {
        // write > read holds throughout, so `buf[read]` is still unread source
        let t = buf[read];
        write -= 1;
        put(buf, write, t);
        if is_special(t) {
            write -= 1;
            put(buf, write, prefix_token);
        }
    }
    debug_assert_eq!(write, 1);
    put(buf, 0, quote);
}

// ==========================================================================
// Tests
// ==========================================================================
