// Record writer: formatted values out to a sink, quoted and escaped in place
//
// Each value is written straight into the span the sink lends out, checked
// against the quoting policy, and expanded in place when it needs quotes.
// When the span is too short for the expanded value the escape is split:
// the span is filled completely and the remainder goes into a second span.
//
// Flushing only happens between records, once the pending output crosses
// the flush threshold (the writer's own or the sink's).

use crate::buffer::{AsyncSink, Sink, SinkBuffer};
use crate::core::escape::{escape_in_place_with, escape_with_overflow, escaped_len, needs_quoting_with};
use crate::core::simd::Backend;
use crate::core::token::render_content;
use crate::core::{Dialect, Newline, Token};
use crate::error::{CsvError, Result};
use crate::options::WriterOptions;

pub use crate::core::escape::Quoting;

/// Where an escaped value ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placed {
    /// `len` tokens of the span.
    Inline(usize),
    /// The whole span plus `tail` tokens left in the overflow buffer.
    Split { head: usize, tail: usize },
}

/// Quote and escape `buf[..len]` as `policy` requires.
fn place<T: Token>(
    backend: Backend,
    buf: &mut [T],
    len: usize,
    dialect: &Dialect<T>,
    policy: Quoting,
    overflow: &mut Vec<T>,
) -> Placed {
    let (quote, specials) = needs_quoting_with(backend, &buf[..len], dialect, policy);
    if !quote {
        return Placed::Inline(len);
    }
    let required = escaped_len(len, specials);
    if buf.len() >= required {
        return Placed::Inline(escape_in_place_with(backend, buf, len, specials, dialect));
    }
    let head = buf.len();
    let tail = required - head;
    overflow.clear();
    overflow.resize(tail, T::default());
    escape_with_overflow(buf, len, specials, overflow, dialect);
    tracing::trace!(len, head, tail, "escape overflowed sink buffer");
    Placed::Split { head, tail }
}

pub struct CsvWriter<T: Token, S: SinkBuffer<T>> {
    sink: S,
    dialect: Dialect<T>,
    newline: Newline<T>,
    options: WriterOptions,
    backend: Backend,
    overflow: Vec<T>,
    /// Fields written in the current record.
    fields: usize,
    /// A value was written since the last delimiter or newline.
    needs_delimiter: bool,
    records: u64,
    /// Tokens committed since the last flush.
    unflushed: usize,
}

impl<T: Token, S: SinkBuffer<T>> CsvWriter<T, S> {
    /// An unset dialect newline is written as `\r\n`.
    pub fn new(sink: S, dialect: Dialect<T>, options: WriterOptions) -> Result<Self> {
        options.validate()?;
        Ok(CsvWriter {
            sink,
            newline: dialect.newline_or_default(),
            dialect,
            options,
            backend: Backend::detect(),
            overflow: Vec::new(),
            fields: 0,
            needs_delimiter: false,
            records: 0,
            unflushed: 0,
        })
    }

    /// Writer pinned to one kernel backend (unsupported ones fall back to scalar).
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend.or_scalar();
        self
    }

    pub fn dialect(&self) -> &Dialect<T> {
        &self.dialect
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The sink. Output not yet flushed stays in it.
    pub fn into_inner(self) -> S {
        self.sink
    }

    /// Write one value, quoting it as the policy requires. The caller
    /// separates values with `write_delimiter`.
    pub fn write_field(&mut self, value: &[T]) -> Result<()> {
        let len = value.len();
        let buf = self.sink.get_buffer(len + 2);
        if buf.len() < len {
            return Err(short_span(buf.len(), len));
        }
        buf[..len].copy_from_slice(value);
        let placed = place(self.backend, buf, len, &self.dialect, self.options.quoting, &mut self.overflow);
        self.commit(placed)?;
        self.wrote_value();
        Ok(())
    }

    /// Write a value produced by `format` directly into the sink.
    ///
    /// `format` returns the number of tokens written, or `None` when the
    /// span is too small; it is then retried with a span twice as large.
    /// A count larger than the span is a contract violation.
    pub fn write_formatted<F>(&mut self, size_hint: usize, mut format: F) -> Result<()>
    where
        F: FnMut(&mut [T]) -> Option<usize>,
    {
        let mut hint = size_hint.max(1);
        loop {
            let buf = self.sink.get_buffer(hint);
            match format(&mut *buf) {
                Some(n) if n > buf.len() => {
                    let shown = render_content(buf, self.options.expose_content);
                    return Err(CsvError::Resource(format!(
                        "formatter reported {n} tokens written into a buffer of {} ({shown})",
                        buf.len()
                    )));
                }
                Some(n) => {
                    let placed = place(self.backend, buf, n, &self.dialect, self.options.quoting, &mut self.overflow);
                    self.commit(placed)?;
                    self.wrote_value();
                    return Ok(());
                }
                None => {
                    hint = buf.len().max(hint).checked_mul(2).ok_or_else(|| {
                        CsvError::Resource("formatter never fit its output".to_string())
                    })?;
                }
            }
        }
    }

    pub fn write_delimiter(&mut self) -> Result<()> {
        let delimiter = self.dialect.delimiter();
        self.write_raw(&[delimiter])?;
        self.needs_delimiter = false;
        Ok(())
    }

    /// End the current record.
    pub fn write_newline(&mut self) -> Result<()> {
        let newline = self.newline;
        match newline.second() {
            Some(second) => self.write_raw(&[newline.first(), second])?,
            None => self.write_raw(&[newline.first()])?,
        }
        self.fields = 0;
        self.needs_delimiter = false;
        self.records += 1;
        Ok(())
    }

    /// Values separated by the delimiter, without the newline.
    pub fn write_fields<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[T]>,
    {
        for value in values {
            if self.needs_delimiter {
                self.write_delimiter()?;
            }
            self.write_field(value.as_ref())?;
        }
        Ok(())
    }

    /// Values written in the current record so far.
    pub fn fields_in_record(&self) -> usize {
        self.fields
    }

    fn wrote_value(&mut self) {
        self.fields += 1;
        self.needs_delimiter = true;
    }

    fn write_raw(&mut self, tokens: &[T]) -> Result<()> {
        let buf = self.sink.get_buffer(tokens.len());
        if buf.len() < tokens.len() {
            return Err(short_span(buf.len(), tokens.len()));
        }
        buf[..tokens.len()].copy_from_slice(tokens);
        self.sink.advance(tokens.len());
        self.unflushed += tokens.len();
        Ok(())
    }

    fn commit(&mut self, placed: Placed) -> Result<()> {
        match placed {
            Placed::Inline(n) => {
                self.sink.advance(n);
                self.unflushed += n;
            }
            Placed::Split { head, tail } => {
                self.sink.advance(head);
                let buf = self.sink.get_buffer(tail);
                if buf.len() < tail {
                    return Err(short_span(buf.len(), tail));
                }
                buf[..tail].copy_from_slice(&self.overflow[..tail]);
                self.sink.advance(tail);
                self.unflushed += head + tail;
            }
        }
        Ok(())
    }

    fn should_flush(&self) -> bool {
        self.unflushed >= self.options.flush_threshold || self.sink.needs_flush()
    }
}

fn short_span(got: usize, wanted: usize) -> CsvError {
    CsvError::Resource(format!("sink lent {got} tokens, at least {wanted} required"))
}

impl<T: Token, S: Sink<T>> CsvWriter<T, S> {
    /// Write a full record and flush if the threshold was crossed.
    pub fn write_record<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[T]>,
    {
        self.write_fields(values)?;
        self.end_record()
    }

    /// Write the newline and flush if the threshold was crossed.
    pub fn end_record(&mut self) -> Result<()> {
        self.write_newline()?;
        if self.should_flush() {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        tracing::trace!(pending = self.unflushed, "flushing writer");
        self.sink.flush()?;
        self.unflushed = 0;
        Ok(())
    }

    /// Final flush. With `error`, pending output is handed to the sink to
    /// discard instead.
    pub fn complete(&mut self, error: Option<&CsvError>) -> Result<()> {
        self.sink.complete(error)?;
        self.unflushed = 0;
        Ok(())
    }
}

impl<T: Token, S: AsyncSink<T>> CsvWriter<T, S> {
    pub async fn write_record_async<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[T]>,
    {
        self.write_fields(values)?;
        self.end_record_async().await
    }

    pub async fn end_record_async(&mut self) -> Result<()> {
        self.write_newline()?;
        if self.should_flush() {
            self.flush_async().await?;
        }
        Ok(())
    }

    pub async fn flush_async(&mut self) -> Result<()> {
        tracing::trace!(pending = self.unflushed, "flushing writer");
        self.sink.flush_async().await?;
        self.unflushed = 0;
        Ok(())
    }

    pub async fn complete_async(&mut self, error: Option<&CsvError>) -> Result<()> {
        self.sink.complete_async(error).await?;
        self.unflushed = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AsyncIoSink, IoSink, VecSink};
    use pretty_assertions::assert_eq;

    fn writer(quoting: Quoting, min_chunk: usize) -> CsvWriter<u8, VecSink<u8>> {
        let options = WriterOptions {
            quoting,
            ..Default::default()
        };
        CsvWriter::new(VecSink::with_min_chunk(min_chunk), Dialect::rfc4180(), options).unwrap()
    }

    fn output(w: CsvWriter<u8, VecSink<u8>>) -> String {
        String::from_utf8(w.into_inner().into_inner()).unwrap()
    }

    #[test]
    fn test_plain_record() {
        let mut w = writer(Quoting::AUTO, 256);
        w.write_record(["1", "Alice", "true"]).unwrap();
        assert_eq!(w.records_written(), 1);
        assert_eq!(output(w), "1,Alice,true\r\n");
    }

    #[test]
    fn test_quotes_are_doubled() {
        let mut w = writer(Quoting::AUTO, 256);
        w.write_field(b"he said \"hi\"").unwrap();
        assert_eq!(output(w), "\"he said \"\"hi\"\"\"");
    }

    #[test]
    fn test_single_field_then_fields_are_delimited() {
        let mut w = writer(Quoting::AUTO, 256);
        w.write_field(b"id").unwrap();
        w.write_fields(["a", "b"]).unwrap();
        assert_eq!(w.fields_in_record(), 3);
        w.end_record().unwrap();

        // an explicit delimiter is not doubled
        w.write_field(b"x").unwrap();
        w.write_delimiter().unwrap();
        w.write_fields(["y"]).unwrap();
        w.end_record().unwrap();
        assert_eq!(w.fields_in_record(), 0);
        assert_eq!(output(w), "id,a,b\r\nx,y\r\n");
    }

    #[test]
    fn test_never_writes_verbatim() {
        let mut w = writer(Quoting::NEVER, 256);
        w.write_field(b",").unwrap();
        assert_eq!(output(w), ",");
    }

    #[test]
    fn test_empty_and_space_policies() {
        let mut w = writer(Quoting::AUTO | Quoting::EMPTY | Quoting::LEADING_OR_TRAILING_SPACES, 256);
        w.write_record(["", " a", "b ", "c"]).unwrap();
        assert_eq!(output(w), "\"\",\" a\",\"b \",c\r\n");
    }

    #[test]
    fn test_overflow_path_matches_inline() {
        let value = b"x\"y,\"z\"";
        let mut inline = writer(Quoting::AUTO, 256);
        inline.write_field(value).unwrap();
        // spans exactly value.len() + 2 long force the split escape
        let mut split = writer(Quoting::AUTO, 0);
        split.write_field(value).unwrap();
        assert_eq!(output(split), output(inline));
    }

    #[test]
    fn test_escape_mode_crlf_and_empty() {
        let dialect = Dialect::rfc4180().with_escape(Some(b'\\')).unwrap();
        let options = WriterOptions {
            quoting: Quoting::AUTO | Quoting::EMPTY,
            ..Default::default()
        };
        let mut w = CsvWriter::new(VecSink::new(), dialect, options).unwrap();
        w.write_record([&b"a\r\nb"[..], &b""[..], &b"q\"\\"[..]]).unwrap();
        assert_eq!(output(w), "\"a\r\nb\",\"\",\"q\\\"\\\\\"\r\n");
    }

    #[test]
    fn test_formatter_output_is_escaped() {
        let mut w = writer(Quoting::AUTO, 0);
        w.write_formatted(1, |buf| {
            let text = b"3,5";
            if buf.len() < text.len() {
                return None;
            }
            buf[..3].copy_from_slice(text);
            Some(3)
        })
        .unwrap();
        assert_eq!(output(w), "\"3,5\"");
    }

    #[test]
    fn test_formatter_overreporting_is_rejected() {
        let mut w = writer(Quoting::AUTO, 4);
        let err = w.write_formatted(4, |buf| Some(buf.len() + 1)).unwrap_err();
        assert!(matches!(err, CsvError::Resource(_)));
    }

    #[test]
    fn test_flush_threshold_between_records() {
        let options = WriterOptions {
            flush_threshold: 8,
            ..Default::default()
        };
        let mut w = CsvWriter::new(VecSink::new(), Dialect::lf(), options).unwrap();
        w.write_record(["abc"]).unwrap();
        assert_eq!(w.get_ref().flushes(), 0);
        w.write_record(["defgh"]).unwrap();
        assert_eq!(w.get_ref().flushes(), 1);
    }

    #[test]
    fn test_io_sink_complete() {
        let mut w = CsvWriter::new(IoSink::new(Vec::<u8>::new()), Dialect::lf(), Default::default()).unwrap();
        w.write_record(["a", "b"]).unwrap();
        assert!(w.get_ref().get_ref().is_empty());
        w.complete(None).unwrap();
        assert_eq!(w.into_inner().into_inner(), b"a,b\n".to_vec());
    }

    #[test]
    fn test_utf16_output() {
        let dialect = Dialect::<u16>::lf();
        let mut w = CsvWriter::new(VecSink::new(), dialect, Default::default()).unwrap();
        let value: Vec<u16> = "x\"y".encode_utf16().collect();
        w.write_record([value]).unwrap();
        let expected: Vec<u16> = "\"x\"\"y\"\n".encode_utf16().collect();
        assert_eq!(w.into_inner().into_inner(), expected);
    }

    #[tokio::test]
    async fn test_async_writer() {
        let mut w = CsvWriter::new(AsyncIoSink::new(Vec::<u8>::new()), Dialect::lf(), Default::default()).unwrap();
        w.write_record_async(["a,b", "c"]).await.unwrap();
        w.complete_async(None).await.unwrap();
        assert_eq!(w.into_inner().into_inner(), b"\"a,b\",c\n".to_vec());
    }
}
