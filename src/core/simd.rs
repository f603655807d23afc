// Vector backends for mask-driven scanning
//
// Every kernel in this crate works on 32-token chunks and a u32 bitmask per
// needle: bit i is set iff chunk[i] equals the needle. How the mask is
// produced depends on the backend:
//
//   Scalar: plain loop, always available
//   Sse2:   128-bit compares (x86_64 baseline)
//   Avx2:   256-bit compares, runtime detected
//
// u16 chunks compare 16-bit lanes and pack the results down to bytes before
// `movemask`, so both token types produce identical 32-bit masks.
//
// Partial chunks are copied into a zero-padded array first. Zero is never a
// valid dialect token, so padding lanes never match.

use std::sync::OnceLock;

use super::token::Token;

/// Tokens per mask.
pub const LANES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Scalar,
    Sse2,
    Avx2,
}

static DETECTED: OnceLock<Backend> = OnceLock::new();

impl Backend {
    /// Widest backend supported by the running CPU.
    pub fn detect() -> Backend {
        *DETECTED.get_or_init(|| {
            let backend = Backend::available()
                .into_iter()
                .last()
                .unwrap_or(Backend::Scalar);
            tracing::debug!(?backend, "selected vector backend");
            backend
        })
    }

    /// Every backend the running CPU can execute, narrowest first.
    pub fn available() -> Vec<Backend> {
        [Backend::Scalar, Backend::Sse2, Backend::Avx2]
            .into_iter()
            .filter(|b| b.is_supported())
            .collect()
    }

    pub fn is_supported(self) -> bool {
        match self {
            Backend::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            Backend::Sse2 => true,
            #[cfg(target_arch = "x86_64")]
            Backend::Avx2 => std::arch::is_x86_feature_detected!("avx2"),
            #[cfg(not(target_arch = "x86_64"))]
            _ => false,
        }
    }

    /// Register width in bits.
    pub fn vector_bits(self) -> usize {
        match self {
            Backend::Scalar => 0,
            Backend::Sse2 => 128,
            Backend::Avx2 => 256,
        }
    }

    /// Falls back to `Scalar` when the CPU can't run `self`.
    #[inline]
    pub(crate) fn or_scalar(self) -> Backend {
        if self.is_supported() {
            self
        } else {
            Backend::Scalar
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk layout
// ---------------------------------------------------------------------------

/// Length of the leading partial chunk for `len` tokens.
///
/// The remaining `len - first` tokens split evenly into full chunks, so the
/// trailing data stays aligned to the chunk boundary.
#[inline]
pub fn first_chunk_len(len: usize) -> usize {
    match len % LANES {
        0 => LANES.min(len),
        rem => rem,
    }
}

/// Copy a short chunk into a zero-padded array.
#[inline]
pub(crate) fn padded<T: Token>(src: &[T]) -> [T; LANES] {
    let mut out = [T::default(); LANES];
    out[..src.len()].copy_from_slice(src);
    out
}

/// `(start, len)` of every chunk over `len` tokens: the partial chunk first,
/// then full chunks.
#[inline]
pub(crate) fn chunk_bounds(len: usize) -> impl DoubleEndedIterator<Item = (usize, usize)> {
    let first = first_chunk_len(len);
    let full = (len - first) / LANES;
    let head = (first > 0).then_some((0, first));
    head.into_iter()
        .chain((0..full).map(move |i| (first + i * LANES, LANES)))
}

/// Masks for one chunk of at most 32 tokens.
#[inline]
pub(crate) fn chunk_masks<T: Token, const N: usize>(
    backend: Backend,
    chunk: &[T],
    needles: [T; N],
) -> [u32; N] {
    if chunk.len() < LANES {
        T::masks(backend, &padded(chunk), needles)
    } else {
        T::masks(backend, &chunk[..LANES], needles)
    }
}

/// Masks for every chunk of `src`, partial first chunk included.
///
/// `f` receives the chunk start and one mask per needle.
#[inline]
pub(crate) fn for_each_chunk<T: Token, const N: usize>(
    backend: Backend,
    src: &[T],
    needles: [T; N],
    mut f: impl FnMut(usize, [u32; N]),
) {
    for (start, len) in chunk_bounds(src.len()) {
        f(start, chunk_masks(backend, &src[start..start + len], needles));
    }
}

// ---------------------------------------------------------------------------
// Mask producers
// ---------------------------------------------------------------------------

#[inline]
fn masks_scalar<T: Token, const N: usize>(chunk: &[T], needles: [T; N]) -> [u32; N] {
    let mut out = [0u32; N];
    for (i, &t) in chunk.iter().take(LANES).enumerate() {
        for (slot, &needle) in out.iter_mut().zip(needles.iter()) {
            *slot |= ((t == needle) as u32) << i;
        }
    }
    out
}

#[inline]
pub(crate) fn masks_u8<const N: usize>(backend: Backend, chunk: &[u8], needles: [u8; N]) -> [u32; N] {
    assert!(chunk.len() >= LANES);
    match backend {
        #[cfg(target_arch = "x86_64")]
        Backend::Sse2 => unsafe { x86::masks_u8_sse2(chunk, needles) },
        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 if Backend::Avx2.is_supported() => unsafe { x86::masks_u8_avx2(chunk, needles) },
        _ => masks_scalar(chunk, needles),
    }
}

#[inline]
pub(crate) fn masks_u16<const N: usize>(
    backend: Backend,
    chunk: &[u16],
    needles: [u16; N],
) -> [u32; N] {
    assert!(chunk.len() >= LANES);
    match backend {
        #[cfg(target_arch = "x86_64")]
        Backend::Sse2 => unsafe { x86::masks_u16_sse2(chunk, needles) },
        #[cfg(target_arch = "x86_64")]
        Backend::Avx2 if Backend::Avx2.is_supported() => unsafe { x86::masks_u16_avx2(chunk, needles) },
        _ => masks_scalar(chunk, needles),
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::*;

    // Callers guarantee `chunk.len() >= 32`.

    #[target_feature(enable = "sse2")]
    pub unsafe fn masks_u8_sse2<const N: usize>(chunk: &[u8], needles: [u8; N]) -> [u32; N] {
        let p = chunk.as_ptr() as *const __m128i;
        let lo = _mm_loadu_si128(p);
        let hi = _mm_loadu_si128(p.add(1));
        let mut out = [0u32; N];
        for (slot, &needle) in out.iter_mut().zip(needles.iter()) {
            let splat = _mm_set1_epi8(needle as i8);
            let a = _mm_movemask_epi8(_mm_cmpeq_epi8(lo, splat)) as u32 & 0xFFFF;
            let b = _mm_movemask_epi8(_mm_cmpeq_epi8(hi, splat)) as u32 & 0xFFFF;
            *slot = a | (b << 16);
        }
        out
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn masks_u8_avx2<const N: usize>(chunk: &[u8], needles: [u8; N]) -> [u32; N] {
        let v = _mm256_loadu_si256(chunk.as_ptr() as *const __m256i);
        let mut out = [0u32; N];
        for (slot, &needle) in out.iter_mut().zip(needles.iter()) {
            let splat = _mm256_set1_epi8(needle as i8);
            *slot = _mm256_movemask_epi8(_mm256_cmpeq_epi8(v, splat)) as u32;
        }
        out
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn masks_u16_sse2<const N: usize>(chunk: &[u16], needles: [u16; N]) -> [u32; N] {
        let p = chunk.as_ptr() as *const __m128i;
        let v0 = _mm_loadu_si128(p);
        let v1 = _mm_loadu_si128(p.add(1));
        let v2 = _mm_loadu_si128(p.add(2));
        let v3 = _mm_loadu_si128(p.add(3));
        let mut out = [0u32; N];
        for (slot, &needle) in out.iter_mut().zip(needles.iter()) {
            let splat = _mm_set1_epi16(needle as i16);
            // 0xFFFF saturates to 0xFF, 0 stays 0
            let lo = _mm_packs_epi16(_mm_cmpeq_epi16(v0, splat), _mm_cmpeq_epi16(v1, splat));
            let hi = _mm_packs_epi16(_mm_cmpeq_epi16(v2, splat), _mm_cmpeq_epi16(v3, splat));
            let a = _mm_movemask_epi8(lo) as u32 & 0xFFFF;
            let b = _mm_movemask_epi8(hi) as u32 & 0xFFFF;
            *slot = a | (b << 16);
        }
        out
    }

    #[target_feature(enable = "avx2")]
    pub unsafe fn masks_u16_avx2<const N: usize>(chunk: &[u16], needles: [u16; N]) -> [u32; N] {
        let p = chunk.as_ptr() as *const __m256i;
        let v0 = _mm256_loadu_si256(p);
        let v1 = _mm256_loadu_si256(p.add(1));
        let mut out = [0u32; N];
        for (slot, &needle) in out.iter_mut().zip(needles.iter()) {
            let splat = _mm256_set1_epi16(needle as i16);
            let packed =
                _mm256_packs_epi16(_mm256_cmpeq_epi16(v0, splat), _mm256_cmpeq_epi16(v1, splat));
            // packs works per 128-bit lane: quads come out as [v0.lo, v1.lo, v0.hi, v1.hi]
            let ordered = _mm256_permute4x64_epi64::<0b11_01_10_00>(packed);
            *slot = _mm256_movemask_epi8(ordered) as u32;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reference<T: Token>(chunk: &[T], needle: T) -> u32 {
        chunk
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == needle)
            .fold(0, |m, (i, _)| m | (1 << i))
    }

    #[test]
    fn test_first_chunk_len() {
        assert_eq!(first_chunk_len(0), 0);
        assert_eq!(first_chunk_len(5), 5);
        assert_eq!(first_chunk_len(32), 32);
        assert_eq!(first_chunk_len(33), 1);
        assert_eq!(first_chunk_len(64), 32);
        assert_eq!(first_chunk_len(70), 6);
    }

    #[test]
    fn test_u8_masks_agree_across_backends() {
        // positions: ,=0 "=3 ,=16 "=17 ,=31
        let mut chunk = [b'a'; LANES];
        chunk[0] = b',';
        chunk[3] = b'"';
        chunk[16] = b',';
        chunk[17] = b'"';
        chunk[31] = b',';

        for backend in Backend::available() {
            let [comma, quote] = masks_u8(backend, &chunk, [b',', b'"']);
            assert_eq!(comma, reference(&chunk, b','), "comma mask on {backend:?}");
            assert_eq!(quote, reference(&chunk, b'"'), "quote mask on {backend:?}");
        }
    }

    #[test]
    fn test_u16_masks_agree_across_backends() {
        let mut chunk = [b'x' as u16; LANES];
        for i in [1, 7, 8, 15, 16, 23, 24, 31] {
            chunk[i] = b';' as u16;
        }
        // high byte set: must not alias a byte-sized needle
        chunk[2] = 0x013B;

        for backend in Backend::available() {
            let [semi] = masks_u16(backend, &chunk, [b';' as u16]);
            assert_eq!(semi, reference(&chunk, b';' as u16), "u16 mask on {backend:?}");
        }
    }

    #[test]
    fn test_chunk_bounds() {
        assert_eq!(chunk_bounds(0).count(), 0);
        assert_eq!(chunk_bounds(5).collect::<Vec<_>>(), vec![(0, 5)]);
        assert_eq!(chunk_bounds(32).collect::<Vec<_>>(), vec![(0, 32)]);
        assert_eq!(chunk_bounds(70).collect::<Vec<_>>(), vec![(0, 6), (6, 32), (38, 32)]);
        assert_eq!(chunk_bounds(70).rev().next(), Some((38, 32)));
    }

    #[test]
    fn test_for_each_chunk_covers_partial_first_chunk() {
        let src: Vec<u8> = (0..70).map(|i| if i % 10 == 0 { b',' } else { b'a' }).collect();
        let mut positions = Vec::new();
        for_each_chunk(Backend::detect(), &src, [b','], |base, [mut m]| {
            while m != 0 {
                positions.push(base + m.trailing_zeros() as usize);
                m &= m - 1;
            }
        });
        assert_eq!(positions, vec![0, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_detect_is_available() {
        assert!(Backend::available().contains(&Backend::detect()));
        assert!(Backend::Scalar.is_supported());
    }
}
