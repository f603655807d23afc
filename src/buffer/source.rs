// Chunk sources feeding the buffer reader
//
// `fill` returns the number of tokens written; 0 means end of input. Sources
// that can rewind override `SourceControl::seek_to_start`, shared by the
// sync and async flavors.

use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::Token;

pub trait SourceControl {
    /// Rewind to the first token. `Ok(false)` when the source can't seek.
    fn seek_to_start(&mut self) -> io::Result<bool> {
        Ok(false)
    }

    /// Release the underlying resource. Called once, when the reader that
    /// owns the source is dropped without `leave_open`.
    fn close(&mut self) {}
}

pub trait Source<T>: SourceControl {
    fn fill(&mut self, buf: &mut [T]) -> io::Result<usize>;
}

pub trait AsyncSource<T>: SourceControl {
    fn fill_async(&mut self, buf: &mut [T]) -> impl Future<Output = io::Result<usize>>;
}

// ============================================================================
// In-memory sources
// ============================================================================

/// Whole input already in memory.
#[derive(Debug, Clone)]
pub struct SliceSource<'a, T> {
    data: &'a [T],
    pos: usize,
}

impl<'a, T: Token> SliceSource<'a, T> {
    pub fn new(data: &'a [T]) -> Self {
        SliceSource { data, pos: 0 }
    }

    fn fill_from(&mut self, buf: &mut [T]) -> usize {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

impl<T> SourceControl for SliceSource<'_, T> {
    fn seek_to_start(&mut self) -> io::Result<bool> {
        self.pos = 0;
        Ok(true)
    }
}

impl<T: Token> Source<T> for SliceSource<'_, T> {
    fn fill(&mut self, buf: &mut [T]) -> io::Result<usize> {
        Ok(self.fill_from(buf))
    }
}

impl<T: Token> AsyncSource<T> for SliceSource<'_, T> {
    async fn fill_async(&mut self, buf: &mut [T]) -> io::Result<usize> {
        Ok(self.fill_from(buf))
    }
}

/// In-memory input delivered in a fixed pattern of chunk sizes.
///
/// The plan repeats until the input runs out. Zero-length entries are
/// skipped rather than reported as end of input. Useful for exercising
/// segment boundaries.
#[derive(Debug, Clone)]
pub struct ChunkedSource<'a, T> {
    data: &'a [T],
    pos: usize,
    plan: Vec<usize>,
    step: usize,
}

impl<'a, T: Token> ChunkedSource<'a, T> {
    pub fn new(data: &'a [T], plan: &[usize]) -> Self {
        ChunkedSource {
            data,
            pos: 0,
            plan: plan.to_vec(),
            step: 0,
        }
    }

    /// Every chunk `size` tokens long.
    pub fn uniform(data: &'a [T], size: usize) -> Self {
        Self::new(data, &[size])
    }

    fn next_chunk_len(&mut self) -> usize {
        let remaining = self.data.len() - self.pos;
        if self.plan.iter().all(|&n| n == 0) {
            return remaining;
        }
        loop {
            let n = self.plan[self.step % self.plan.len()];
            self.step += 1;
            if n > 0 {
                return n.min(remaining);
            }
        }
    }

    fn fill_from(&mut self, buf: &mut [T]) -> usize {
        if buf.is_empty() || self.pos == self.data.len() {
            return 0;
        }
        let n = self.next_chunk_len().min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

impl<T> SourceControl for ChunkedSource<'_, T> {
    fn seek_to_start(&mut self) -> io::Result<bool> {
        self.pos = 0;
        self.step = 0;
        Ok(true)
    }
}

impl<T: Token> Source<T> for ChunkedSource<'_, T> {
    fn fill(&mut self, buf: &mut [T]) -> io::Result<usize> {
        Ok(self.fill_from(buf))
    }
}

impl<T: Token> AsyncSource<T> for ChunkedSource<'_, T> {
    async fn fill_async(&mut self, buf: &mut [T]) -> io::Result<usize> {
        Ok(self.fill_from(buf))
    }
}

// ============================================================================
// I/O adapters (bytes)
// ============================================================================

/// Any `Read`. Cannot rewind.
#[derive(Debug)]
pub struct ReadSource<R> {
    inner: R,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        ReadSource { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn read_retrying<R: Read>(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match inner.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

impl<R> SourceControl for ReadSource<R> {}

impl<R: Read> Source<u8> for ReadSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_retrying(&mut self.inner, buf)
    }
}

/// A `Read + Seek`, rewound with `SeekFrom::Start(0)`.
#[derive(Debug)]
pub struct SeekSource<R> {
    inner: R,
}

impl<R: Read + Seek> SeekSource<R> {
    pub fn new(inner: R) -> Self {
        SeekSource { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Seek> SourceControl for SeekSource<R> {
    fn seek_to_start(&mut self) -> io::Result<bool> {
        self.inner.seek(SeekFrom::Start(0))?;
        Ok(true)
    }
}

impl<R: Read + Seek> Source<u8> for SeekSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_retrying(&mut self.inner, buf)
    }
}

/// Tokio `AsyncRead` adapter.
#[derive(Debug)]
pub struct AsyncReadSource<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> AsyncReadSource<R> {
    pub fn new(inner: R) -> Self {
        AsyncReadSource { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> SourceControl for AsyncReadSource<R> {}

impl<R: AsyncRead + Unpin> AsyncSource<u8> for AsyncReadSource<R> {
    async fn fill_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }
}
