// Segmented buffer reader
//
// Pull-based: `read()` hands out a view over every buffered token, the caller
// reports with `advance(consumed, examined)` how much it used and how far it
// looked. A new physical read only happens once everything buffered has been
// examined, so a growing partial record is never rescanned from scratch.
//
// Segments live in an index arena (Vec + free-index stack) linked through
// `next`. Fully consumed segments go back to the allocator on `advance`.

use std::sync::Arc;

use crate::core::Token;
use crate::error::{CsvError, Result};

use super::allocator::{Allocator, BufferPool};
use super::cancel::Cancellation;
use super::sequence::Sequence;
use super::source::{AsyncSource, Source, SourceControl};

/// Snapshot returned by `read`.
#[derive(Debug, Clone)]
pub struct ReadResult<'a, T> {
    /// Every buffered, unconsumed token.
    pub buffer: Sequence<'a, T>,
    /// The source reported end of input; `buffer` is all that is left.
    pub is_completed: bool,
}

impl<T: Copy> ReadResult<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[derive(Debug)]
struct Segment<T> {
    memory: Box<[T]>,
    start: usize,
    end: usize,
    next: Option<usize>,
}

impl<T> Segment<T> {
    #[inline]
    fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    fn writable(&self) -> usize {
        self.memory.len() - self.end
    }
}

/// Sizing and lifecycle knobs for `BufferReader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOptions {
    /// Size of each rented segment.
    pub buffer_size: usize,
    /// A tail segment with less free room than this is not read into.
    pub min_read_size: usize,
    /// Leave the source open when the reader is dropped.
    pub leave_open: bool,
    /// Strip a leading byte order mark.
    pub skip_bom: bool,
}

impl Default for BufferOptions {
    fn default() -> Self {
        BufferOptions {
            buffer_size: 4096,
            min_read_size: 1024,
            leave_open: false,
            skip_bom: true,
        }
    }
}

pub struct BufferReader<T: Token, S: SourceControl> {
    source: S,
    allocator: Arc<dyn Allocator<T>>,
    options: BufferOptions,

    segments: Vec<Segment<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,

    buffered: usize,
    examined_everything: bool,
    completed: bool,
    bom_pending: bool,
}

impl<T: Token, S: SourceControl> BufferReader<T, S> {
    pub fn new(source: S, options: BufferOptions) -> Self {
        Self::with_allocator(source, options, Arc::new(BufferPool::new()))
    }

    pub fn with_allocator(source: S, options: BufferOptions, allocator: Arc<dyn Allocator<T>>) -> Self {
        BufferReader {
            source,
            allocator,
            bom_pending: options.skip_bom,
            options,
            segments: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            buffered: 0,
            examined_everything: false,
            completed: false,
        }
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Current view without touching the source.
    pub fn view(&self) -> ReadResult<'_, T> {
        let mut parts = Vec::new();
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let seg = &self.segments[i];
            if seg.len() > 0 {
                parts.push(&seg.memory[seg.start..seg.end]);
            }
            cursor = seg.next;
        }
        ReadResult {
            buffer: Sequence::from_segments(parts),
            is_completed: self.completed,
        }
    }

    /// Consume `consumed` tokens and record that `examined` were looked at.
    ///
    /// Both are relative to the start of the last view and must satisfy
    /// `consumed <= examined <= buffered`.
    pub fn advance(&mut self, consumed: usize, examined: usize) {
        assert!(
            consumed <= examined && examined <= self.buffered,
            "advance({consumed}, {examined}) out of range for {} buffered tokens",
            self.buffered
        );
        self.examined_everything = examined == self.buffered;
        self.consume_front(consumed);
    }

    /// Rewind a seekable source and drop every buffered token.
    pub fn try_reset(&mut self) -> Result<bool> {
        if !self.source.seek_to_start()? {
            return Ok(false);
        }
        self.release_all();
        self.buffered = 0;
        self.examined_everything = false;
        self.completed = false;
        self.bom_pending = self.options.skip_bom;
        tracing::debug!("buffer reader rewound");
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Fill cycle
    // ------------------------------------------------------------------------

    /// Tail segment to fill, or `None` when the current view can be returned.
    fn begin_read(&mut self) -> Option<usize> {
        if self.completed || (self.buffered > 0 && !self.examined_everything) {
            return None;
        }
        Some(self.ensure_tail())
    }

    /// Account for `n` tokens written into segment `idx`. Returns true when
    /// the read is finished.
    fn end_fill(&mut self, idx: usize, n: usize) -> bool {
        if n == 0 {
            self.completed = true;
            self.bom_pending = false;
            self.examined_everything = false;
            return true;
        }
        let seg = &mut self.segments[idx];
        debug_assert!(n <= seg.writable());
        seg.end += n;
        self.buffered += n;

        if self.bom_pending && !self.strip_bom() {
            return false;
        }
        if self.buffered == 0 {
            // only a BOM arrived
            return false;
        }
        self.examined_everything = false;
        true
    }

    /// Returns false while the data seen so far is a strict BOM prefix.
    #[allow(clippy::let_and_return)]
    fn strip_bom(&mut self) -> bool {
        let bom = T::BOM;
        let view_len = self.buffered;
        let matched = {
            let view = self.view().buffer;
            let n = view_len.min(bom.len());
            // bound here so the iterator drops before `view`
            let matched = view.iter().take(n).zip(bom).all(|(a, b)| a == b);
            matched
        };
        if !matched {
            self.bom_pending = false;
            return true;
        }
        if view_len < bom.len() {
            return false;
        }
        self.bom_pending = false;
        self.consume_front(bom.len());
        tracing::trace!("skipped byte order mark");
        true
    }

    fn ensure_tail(&mut self) -> usize {
        if let Some(t) = self.tail {
            if self.segments[t].writable() >= self.options.min_read_size.max(1) {
                return t;
            }
        }
        let len = self.options.buffer_size.max(self.options.min_read_size).max(1);
        let memory = self.allocator.rent(len);
        let segment = Segment {
            memory,
            start: 0,
            end: 0,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(i) => {
                self.segments[i] = segment;
                i
            }
            None => {
                self.segments.push(segment);
                self.segments.len() - 1
            }
        };
        match self.tail {
            Some(t) => self.segments[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        idx
    }

    fn consume_front(&mut self, mut n: usize) {
        self.buffered -= n;
        while let Some(h) = self.head {
            let is_tail = self.tail == Some(h);
            let seg = &mut self.segments[h];
            let take = n.min(seg.len());
            seg.start += take;
            n -= take;
            if seg.len() > 0 {
                break;
            }
            if is_tail {
                // empty tail stays for the next read
                seg.start = 0;
                seg.end = 0;
                break;
            }
            let next = seg.next;
            self.release_segment(h);
            self.head = next;
        }
        debug_assert_eq!(n, 0);
    }

    fn release_segment(&mut self, idx: usize) {
        let memory = std::mem::take(&mut self.segments[idx].memory);
        self.segments[idx].next = None;
        self.allocator.release(memory);
        self.free.push(idx);
    }

    fn release_all(&mut self) {
        let mut cursor = self.head;
        while let Some(i) = cursor {
            cursor = self.segments[i].next;
            self.release_segment(i);
        }
        self.head = None;
        self.tail = None;
    }
}

impl<T: Token, S: Source<T>> BufferReader<T, S> {
    /// Blocks on the source only when every buffered token was examined.
    pub fn read(&mut self) -> Result<ReadResult<'_, T>> {
        if let Some(mut idx) = self.begin_read() {
            loop {
                let seg = &mut self.segments[idx];
                let n = self.source.fill(&mut seg.memory[seg.end..])?;
                if self.end_fill(idx, n) {
                    break;
                }
                idx = self.ensure_tail();
            }
        }
        Ok(self.view())
    }
}

impl<T: Token, S: AsyncSource<T>> BufferReader<T, S> {
    pub async fn read_async(&mut self) -> Result<ReadResult<'_, T>> {
        self.fill_async(None).await?;
        Ok(self.view())
    }

    /// `read_async` that gives up with `CsvError::Canceled` once `cancel`
    /// fires, including while the source is pending.
    pub async fn read_async_cancellable(&mut self, cancel: &Cancellation) -> Result<ReadResult<'_, T>> {
        self.fill_async(Some(cancel)).await?;
        Ok(self.view())
    }

    async fn fill_async(&mut self, cancel: Option<&Cancellation>) -> Result<()> {
        if cancel.is_some_and(Cancellation::is_canceled) {
            return Err(CsvError::Canceled);
        }
        let Some(mut idx) = self.begin_read() else {
            return Ok(());
        };
        loop {
            let seg = &mut self.segments[idx];
            let fill = self.source.fill_async(&mut seg.memory[seg.end..]);
            let n = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.canceled() => return Err(CsvError::Canceled),
                    n = fill => n?,
                },
                None => fill.await?,
            };
            if self.end_fill(idx, n) {
                return Ok(());
            }
            idx = self.ensure_tail();
        }
    }
}

impl<T: Token, S: SourceControl> Drop for BufferReader<T, S> {
    fn drop(&mut self) {
        self.release_all();
        if !self.options.leave_open {
            self.source.close();
        }
    }
}
