// Multi-segment read-only view over buffered data
//
// Positions are plain token offsets from the start of the view; the view
// resolves them to (segment, index) pairs on demand. Empty segments are kept
// so offsets behave identically no matter how the data was chunked.

use std::ops::Range;

#[derive(Debug, Clone)]
pub struct Sequence<'a, T> {
    segments: Vec<&'a [T]>,
    len: usize,
}

impl<'a, T: Copy> Sequence<'a, T> {
    pub fn empty() -> Self {
        Sequence {
            segments: Vec::new(),
            len: 0,
        }
    }

    pub fn single(data: &'a [T]) -> Self {
        Sequence {
            len: data.len(),
            segments: vec![data],
        }
    }

    pub fn from_segments(segments: Vec<&'a [T]>) -> Self {
        let len = segments.iter().map(|s| s.len()).sum();
        Sequence { segments, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Non-empty segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &'a [T]> + '_ {
        self.segments.iter().copied().filter(|s| !s.is_empty())
    }

    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }

    /// First non-empty segment, or an empty slice.
    pub fn first(&self) -> &'a [T] {
        self.segments().next().unwrap_or(&[])
    }

    /// The whole view as one slice, if it is contiguous.
    pub fn as_single(&self) -> Option<&'a [T]> {
        let mut iter = self.segments();
        match (iter.next(), iter.next()) {
            (None, _) => Some(&[]),
            (Some(first), None) => Some(first),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.segments.iter().flat_map(|s| s.iter())
    }

    pub fn get(&self, mut index: usize) -> Option<T> {
        for seg in &self.segments {
            if index < seg.len() {
                return Some(seg[index]);
            }
            index -= seg.len();
        }
        None
    }

    /// Sub-view over `range`, panicking when it is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Sequence<'a, T> {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "range {range:?} out of bounds for sequence of length {}",
            self.len
        );
        let mut out = Vec::new();
        let mut offset = 0;
        for &seg in &self.segments {
            let seg_start = offset;
            let seg_end = offset + seg.len();
            offset = seg_end;
            if seg_end <= range.start {
                continue;
            }
            if seg_start >= range.end {
                break;
            }
            let lo = range.start.saturating_sub(seg_start);
            let hi = (range.end - seg_start).min(seg.len());
            out.push(&seg[lo..hi]);
        }
        Sequence {
            segments: out,
            len: range.end - range.start,
        }
    }

    pub fn starts_with(&self, prefix: &[T]) -> bool
    where
        T: PartialEq,
    {
        self.len >= prefix.len() && self.iter().zip(prefix).all(|(a, b)| a == b)
    }

    /// Append every token to `out`.
    pub fn copy_to(&self, out: &mut Vec<T>) {
        out.reserve(self.len);
        for seg in &self.segments {
            out.extend_from_slice(seg);
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        self.copy_to(&mut out);
        out
    }
}
