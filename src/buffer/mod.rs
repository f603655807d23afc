// Buffering layer: sources in, segmented views out; sinks for the writer

pub mod allocator;
pub mod cancel;
pub mod reader;
pub mod sequence;
pub mod sink;
pub mod source;

pub use allocator::{Allocator, BufferPool};
pub use cancel::Cancellation;
pub use reader::{BufferOptions, BufferReader, ReadResult};
pub use sequence::Sequence;
pub use sink::{AsyncIoSink, AsyncSink, IoSink, Sink, SinkBuffer, VecSink};
pub use source::{AsyncReadSource, AsyncSource, ChunkedSource, ReadSource, SeekSource, SliceSource, Source, SourceControl};
