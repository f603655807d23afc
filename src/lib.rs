// csvflux - Streaming CSV tokenizer and writer
//
// Layers:
// core:     dialect, record splitting, field metas, unescape/escape kernels
//           (scalar, SSE2 and AVX2 backends producing identical output)
// buffer:   chunk sources, pooled segment reader, output sinks
// strategy: CsvReader (streaming, sync and async), CsvWriter, and
//           parse_parallel for input already in memory (rayon)
//
// Every engine is generic over the code unit: u8 for bytes, u16 for UTF-16.

pub mod buffer;
pub mod core;
pub mod error;
pub mod options;
pub mod strategy;

pub use crate::buffer::{
    AsyncIoSink, AsyncReadSource, AsyncSink, AsyncSource, BufferPool, Cancellation, ChunkedSource, IoSink,
    ReadSource, SeekSource, Sink, SliceSource, Source, VecSink,
};
pub use crate::core::{Backend, DelimiterDetection, Dialect, Mode, Newline, Token};
pub use crate::error::{ConfigError, CsvError, FormatError, FormatErrorKind, Result};
pub use crate::options::{ReaderOptions, WriterOptions};
pub use crate::strategy::{parse_parallel, CsvReader, CsvWriter, Quoting, Record};
