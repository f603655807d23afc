// Output sinks for the record writer
//
// The writer asks for a span with `get_buffer`, fills a prefix of it and
// commits that prefix with `advance`. Committed data reaches the destination
// on `flush`/`flush_async`; `complete` ends the session.

use std::future::Future;
use std::io::Write;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::core::Token;
use crate::error::{CsvError, Result};

/// Default pending size that makes `needs_flush` report true.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64 * 1024;

pub trait SinkBuffer<T> {
    /// A writable span of at least `size_hint` tokens.
    fn get_buffer(&mut self, size_hint: usize) -> &mut [T];

    /// Commit the first `len` tokens of the last span.
    fn advance(&mut self, len: usize);

    /// Committed data crossed the flush threshold.
    fn needs_flush(&self) -> bool;
}

pub trait Sink<T>: SinkBuffer<T> {
    fn flush(&mut self) -> Result<()>;

    /// Final flush, or discard pending data when the session failed.
    fn complete(&mut self, error: Option<&CsvError>) -> Result<()>;
}

pub trait AsyncSink<T>: SinkBuffer<T> {
    fn flush_async(&mut self) -> impl Future<Output = Result<()>>;

    fn complete_async(&mut self, error: Option<&CsvError>) -> impl Future<Output = Result<()>>;
}

// ============================================================================
// Pending buffer shared by the I/O sinks
// ============================================================================

#[derive(Debug)]
struct Pending<T> {
    buf: Vec<T>,
    len: usize,
    /// Length of the span handed out by the last `get_buffer`.
    lent: usize,
    flush_threshold: usize,
}

impl<T: Token> Pending<T> {
    fn new(flush_threshold: usize) -> Self {
        Pending {
            buf: Vec::new(),
            len: 0,
            lent: 0,
            flush_threshold,
        }
    }

    fn get_buffer(&mut self, size_hint: usize) -> &mut [T] {
        let want = self.len + size_hint.max(1);
        if self.buf.len() < want {
            let grown = want.max(self.buf.len() * 2);
            self.buf.resize(grown, T::default());
        }
        self.lent = self.buf.len() - self.len;
        &mut self.buf[self.len..]
    }

    fn advance(&mut self, len: usize) {
        assert!(
            len <= self.lent,
            "advanced {len} tokens past a buffer of {}",
            self.lent
        );
        self.len += len;
        self.lent -= len;
    }

    fn committed(&self) -> &[T] {
        &self.buf[..self.len]
    }

    fn clear(&mut self) {
        self.len = 0;
        self.lent = 0;
    }
}

// ============================================================================
// VecSink
// ============================================================================

/// Collects output in memory.
///
/// Spans are at least `min_chunk` tokens; a small `min_chunk` forces the
/// writer onto its overflow path.
#[derive(Debug)]
pub struct VecSink<T> {
    out: Vec<T>,
    min_chunk: usize,
    lent: usize,
    flushes: usize,
}

impl<T: Token> VecSink<T> {
    pub fn new() -> Self {
        Self::with_min_chunk(256)
    }

    pub fn with_min_chunk(min_chunk: usize) -> Self {
        VecSink {
            out: Vec::new(),
            min_chunk,
            lent: 0,
            flushes: 0,
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.out
    }

    pub fn into_inner(self) -> Vec<T> {
        self.out
    }

    /// Times `flush` was called.
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl<T: Token> Default for VecSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Token> SinkBuffer<T> for VecSink<T> {
    fn get_buffer(&mut self, size_hint: usize) -> &mut [T] {
        // drop the unused tail of the previous span
        let committed = self.out.len() - self.lent;
        self.out.truncate(committed);
        let n = size_hint.max(self.min_chunk).max(1);
        self.out.resize(committed + n, T::default());
        self.lent = n;
        &mut self.out[committed..]
    }

    fn advance(&mut self, len: usize) {
        assert!(len <= self.lent, "advanced {len} tokens past a buffer of {}", self.lent);
        let committed = self.out.len() - self.lent + len;
        self.out.truncate(committed);
        self.lent = 0;
    }

    fn needs_flush(&self) -> bool {
        false
    }
}

impl<T: Token> Sink<T> for VecSink<T> {
    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn complete(&mut self, error: Option<&CsvError>) -> Result<()> {
        if error.is_none() {
            self.flush()?;
        }
        Ok(())
    }
}

impl<T: Token> AsyncSink<T> for VecSink<T> {
    async fn flush_async(&mut self) -> Result<()> {
        Sink::flush(self)
    }

    async fn complete_async(&mut self, error: Option<&CsvError>) -> Result<()> {
        Sink::complete(self, error)
    }
}

// ============================================================================
// IoSink / AsyncIoSink (bytes)
// ============================================================================

/// Buffers output for any `Write`.
#[derive(Debug)]
pub struct IoSink<W> {
    inner: W,
    pending: Pending<u8>,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self::with_flush_threshold(inner, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_flush_threshold(inner: W, flush_threshold: usize) -> Self {
        IoSink {
            inner,
            pending: Pending::new(flush_threshold),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// The destination. Data not yet flushed is lost.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> SinkBuffer<u8> for IoSink<W> {
    fn get_buffer(&mut self, size_hint: usize) -> &mut [u8] {
        self.pending.get_buffer(size_hint)
    }

    fn advance(&mut self, len: usize) {
        self.pending.advance(len);
    }

    fn needs_flush(&self) -> bool {
        self.pending.len >= self.pending.flush_threshold
    }
}

impl<W: Write> Sink<u8> for IoSink<W> {
    fn flush(&mut self) -> Result<()> {
        tracing::trace!(len = self.pending.len, "flushing sink");
        self.inner.write_all(self.pending.committed())?;
        self.pending.clear();
        Ok(())
    }

    fn complete(&mut self, error: Option<&CsvError>) -> Result<()> {
        if error.is_some() {
            self.pending.clear();
            return Ok(());
        }
        Sink::flush(self)?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Buffers output for a tokio `AsyncWrite`.
#[derive(Debug)]
pub struct AsyncIoSink<W> {
    inner: W,
    pending: Pending<u8>,
}

impl<W: AsyncWrite + Unpin> AsyncIoSink<W> {
    pub fn new(inner: W) -> Self {
        Self::with_flush_threshold(inner, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_flush_threshold(inner: W, flush_threshold: usize) -> Self {
        AsyncIoSink {
            inner,
            pending: Pending::new(flush_threshold),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> SinkBuffer<u8> for AsyncIoSink<W> {
    fn get_buffer(&mut self, size_hint: usize) -> &mut [u8] {
        self.pending.get_buffer(size_hint)
    }

    fn advance(&mut self, len: usize) {
        self.pending.advance(len);
    }

    fn needs_flush(&self) -> bool {
        self.pending.len >= self.pending.flush_threshold
    }
}

impl<W: AsyncWrite + Unpin> AsyncSink<u8> for AsyncIoSink<W> {
    async fn flush_async(&mut self) -> Result<()> {
        tracing::trace!(len = self.pending.len, "flushing async sink");
        self.inner.write_all(self.pending.committed()).await?;
        self.pending.clear();
        Ok(())
    }

    async fn complete_async(&mut self, error: Option<&CsvError>) -> Result<()> {
        if error.is_some() {
            self.pending.clear();
            return Ok(());
        }
        self.flush_async().await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_commits_only_advanced_tokens() {
        let mut sink = VecSink::<u8>::with_min_chunk(8);
        let buf = sink.get_buffer(2);
        assert_eq!(buf.len(), 8);
        buf[..3].copy_from_slice(b"abc");
        sink.advance(3);
        let buf = sink.get_buffer(1);
        buf[0] = b'!';
        sink.advance(1);
        assert_eq!(sink.as_slice(), b"abc!");
    }

    #[test]
    fn test_vec_sink_unused_span_is_dropped() {
        let mut sink = VecSink::<u8>::new();
        sink.get_buffer(4);
        let buf = sink.get_buffer(4);
        buf[..2].copy_from_slice(b"ok");
        sink.advance(2);
        assert_eq!(sink.into_inner(), b"ok".to_vec());
    }

    #[test]
    #[should_panic(expected = "advanced")]
    fn test_advance_past_span_panics() {
        let mut sink = VecSink::<u8>::with_min_chunk(0);
        sink.get_buffer(2);
        sink.advance(3);
    }

    #[test]
    fn test_io_sink_flush_threshold() {
        let mut sink = IoSink::with_flush_threshold(Vec::<u8>::new(), 4);
        let buf = sink.get_buffer(3);
        buf[..3].copy_from_slice(b"abc");
        sink.advance(3);
        assert!(!sink.needs_flush());
        sink.get_buffer(2)[..2].copy_from_slice(b"de");
        sink.advance(2);
        assert!(sink.needs_flush());
        sink.flush().unwrap();
        assert!(!sink.needs_flush());
        assert_eq!(sink.get_ref(), b"abcde");
    }

    #[test]
    fn test_io_sink_complete_with_error_discards() {
        let mut sink = IoSink::new(Vec::<u8>::new());
        sink.get_buffer(1)[0] = b'x';
        sink.advance(1);
        let err = CsvError::Canceled;
        sink.complete(Some(&err)).unwrap();
        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_async_io_sink() {
        let mut sink = AsyncIoSink::new(Vec::<u8>::new());
        sink.get_buffer(5)[..5].copy_from_slice(b"hello");
        sink.advance(5);
        sink.complete_async(None).await.unwrap();
        assert_eq!(sink.into_inner(), b"hello".to_vec());
    }
}
