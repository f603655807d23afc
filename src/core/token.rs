// Code unit abstraction: every engine is generic over bytes and UTF-16 units

use std::fmt::Debug;
use std::hash::Hash;

use super::simd::{masks_u16, masks_u8, Backend};

pub trait Token: Copy + Eq + Ord + Default + Hash + Debug + Send + Sync + 'static {
    /// Byte order mark as it appears at the start of a stream.
    const BOM: &'static [Self];

    fn from_ascii(byte: u8) -> Self;

    fn to_u32(self) -> u32;

    /// Why this value can't be used as a dialect token, if it can't.
    fn dialect_violation(self) -> Option<&'static str>;

    /// One bitmask per needle over a 32-token chunk (`chunk.len() >= 32`).
    fn masks<const N: usize>(backend: Backend, chunk: &[Self], needles: [Self; N]) -> [u32; N];
}

impl Token for u8 {
    const BOM: &'static [u8] = &[0xEF, 0xBB, 0xBF];

    #[inline]
    fn from_ascii(byte: u8) -> Self {
        byte
    }

    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }

    fn dialect_violation(self) -> Option<&'static str> {
        if self == 0 {
            Some("must not be zero")
        } else if !self.is_ascii() {
            Some("must be ASCII for byte dialects")
        } else {
            None
        }
    }

    #[inline]
    fn masks<const N: usize>(backend: Backend, chunk: &[u8], needles: [u8; N]) -> [u32; N] {
        masks_u8(backend, chunk, needles)
    }
}

impl Token for u16 {
    const BOM: &'static [u16] = &[0xFEFF];

    #[inline]
    fn from_ascii(byte: u8) -> Self {
        byte as u16
    }

    #[inline]
    fn to_u32(self) -> u32 {
        self as u32
    }

    fn dialect_violation(self) -> Option<&'static str> {
        if self == 0 {
            Some("must not be zero")
        } else if (0xD800..=0xDFFF).contains(&self) {
            Some("must not be a surrogate code unit")
        } else {
            None
        }
    }

    #[inline]
    fn masks<const N: usize>(backend: Backend, chunk: &[u16], needles: [u16; N]) -> [u32; N] {
        masks_u16(backend, chunk, needles)
    }
}

/// Printable form of a single token: control characters are escaped.
pub fn render_token<T: Token>(token: T) -> String {
    let mut out = String::new();
    push_rendered(&mut out, token);
    out
}

/// Printable form of a token run.
pub fn render_tokens<T: Token>(tokens: &[T]) -> String {
    let mut out = String::with_capacity(tokens.len());
    for &t in tokens {
        push_rendered(&mut out, t);
    }
    out
}

/// Record text for error messages: rendered when `expose`, otherwise only
/// its length.
pub(crate) fn render_content<T: Token>(tokens: &[T], expose: bool) -> String {
    const MAX_RENDERED: usize = 256;
    if !expose {
        return format!("<redacted, {} tokens>", tokens.len());
    }
    if tokens.len() > MAX_RENDERED {
        format!("{}...", render_tokens(&tokens[..MAX_RENDERED]))
    } else {
        render_tokens(tokens)
    }
}

fn push_rendered<T: Token>(out: &mut String, token: T) {
    match char::from_u32(token.to_u32()) {
        Some('\r') => out.push_str("\\r"),
        Some('\n') => out.push_str("\\n"),
        Some('\t') => out.push_str("\\t"),
        Some('\0') => out.push_str("\\0"),
        Some('\\') => out.push_str("\\\\"),
        Some(c) if !c.is_control() => out.push(c),
        _ => out.push_str(&format!("\\u{{{:x}}}", token.to_u32())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_escapes_control_tokens() {
        assert_eq!(render_tokens(b"a\r\n\t\\"), "a\\r\\n\\t\\\\");
        assert_eq!(render_token(0u8), "\\0");
        assert_eq!(render_token(b';' as u16), ";");
    }

    #[test]
    fn test_content_redacted_unless_exposed() {
        assert_eq!(render_content(b"a,b", false), "<redacted, 3 tokens>");
        assert_eq!(render_content(b"a\n", true), "a\\n");
        let long = vec![b'x'; 300];
        let shown = render_content(&long, true);
        assert_eq!(shown.len(), 259);
        assert!(shown.ends_with("x..."));
    }

    #[test]
    fn test_dialect_violations() {
        assert!(b','.dialect_violation().is_none());
        assert!(0u8.dialect_violation().is_some());
        assert!(0xC3u8.dialect_violation().is_some());
        assert!(0xD800u16.dialect_violation().is_some());
        assert!(0x00A7u16.dialect_violation().is_none());
    }
}
