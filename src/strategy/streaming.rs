// Streaming reader: records out of a chunked source with bounded memory
//
// Key design:
// - The source fills pooled segments through BufferReader; nothing is copied
//   while a record fits in the first segment
// - One scan of the first segment batches field metas for every record it
//   holds (MetaBuffer), so most records cost no extra boundary search
// - A record straddling segments, or the unterminated last record, goes
//   through the token-level splitter and is copied into a line buffer
// - A record's tokens are released on the next read, so a Record borrows
//   the reader
//
// Format errors are delivered in order: records completed before the bad
// one are returned first. The error then poisons the reader until
// `skip_failed_record` is called.

use std::borrow::Cow;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::buffer::{
    Allocator, AsyncSource, BufferReader, Cancellation, ReadResult, Sequence, Source, SourceControl,
};
use crate::core::detect::{detect_delimiter, DelimiterDetection};
use crate::core::field::{scan_fields, tokenize_record};
use crate::core::meta::Meta;
use crate::core::meta_buffer::MetaBuffer;
use crate::core::newlines::detect_newline;
use crate::core::simd::Backend;
use crate::core::splitter::try_get_line;
use crate::core::token::render_content;
use crate::core::{Dialect, Token};
use crate::error::{CsvError, FormatError, FormatErrorKind, Result};
use crate::options::ReaderOptions;

/// Where the next record's metas live.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    /// `metas[range]` over the first buffered segment.
    Batch(RangeInclusive<usize>),
    /// `line_metas` over the copied `line`.
    Line,
}

/// What the reader must do after a parse step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Ready(Location),
    /// Consume tokens; the remaining view can be parsed without I/O.
    Consume(usize),
    /// Consume tokens, then pull more data from the source.
    NeedData(usize),
    End,
}

// ============================================================================
// Parser state
// ============================================================================

struct Parser<T: Token> {
    dialect: Dialect<T>,
    detection: Option<DelimiterDetection<T>>,
    configured: (Dialect<T>, Option<DelimiterDetection<T>>),
    newline_limit: usize,
    max_buffer: usize,
    expose_content: bool,
    backend: Backend,

    metas: MetaBuffer,
    line: Vec<T>,
    line_metas: MetaBuffer,
    /// Tokens of the last copied record, released on the next read.
    pending: usize,

    /// Absolute offset of the current view.
    position: u64,
    /// Records returned or skipped.
    records: u64,
    /// Scan error waiting for the records before it to be read.
    deferred: Option<FormatErrorKind>,
    failed: Option<FormatError>,
    skipping: bool,
}

impl<T: Token> Parser<T> {
    fn new(dialect: Dialect<T>, options: &ReaderOptions<T>) -> Self {
        Parser {
            configured: (dialect.clone(), options.delimiter_detection.clone()),
            detection: options.delimiter_detection.clone(),
            dialect,
            newline_limit: options.newline_detection_limit,
            max_buffer: options.max_buffer_size,
            expose_content: options.expose_content,
            backend: Backend::detect(),
            metas: MetaBuffer::new(),
            line: Vec::new(),
            line_metas: MetaBuffer::new(),
            pending: 0,
            position: 0,
            records: 0,
            deferred: None,
            failed: None,
            skipping: false,
        }
    }

    fn restart(&mut self) {
        self.dialect = self.configured.0.clone();
        self.detection = self.configured.1.clone();
        self.metas.clear();
        self.line.clear();
        self.line_metas.clear();
        self.pending = 0;
        self.position = 0;
        self.records = 0;
        self.deferred = None;
        self.failed = None;
        self.skipping = false;
    }

    fn step(&mut self, view: &ReadResult<'_, T>) -> Result<Step> {
        let data = &view.buffer;
        let done = view.is_completed;

        if self.skipping {
            return Ok(self.skip_record(data, done));
        }

        if self.dialect.newline().is_none() {
            let found = detect_newline(
                data,
                self.dialect.quote(),
                self.dialect.escape(),
                self.newline_limit,
                done,
            );
            match found {
                Ok(Some(newline)) => self.dialect = self.dialect.with_newline(Some(newline))?,
                Ok(None) => return self.need_data(data.len(), 0),
                Err(e) => return Err(self.fail(e, 0, data)),
            }
        }

        if let Some(strategy) = &self.detection {
            match detect_delimiter(strategy, &self.dialect, data, done) {
                Ok(Some(found)) => {
                    self.dialect = found.dialect;
                    self.detection = None;
                    if found.consumed > 0 {
                        return Ok(Step::Consume(found.consumed));
                    }
                }
                Ok(None) => return self.need_data(data.len(), 0),
                Err(e) => return Err(self.fail(e, 0, data)),
            }
        }

        if let Some(step) = self.pop_ready(data)? {
            return Ok(step);
        }

        // batch scan while the data is contiguous
        if let Some(segment) = data.as_single() {
            let start = self.metas.unread_start();
            if start < segment.len() {
                let newline = self.dialect.newline_or_default();
                if let Err(kind) =
                    scan_fields(self.backend, segment, start, &self.dialect, newline, &mut self.metas)
                {
                    self.deferred = Some(kind);
                }
                if let Some(step) = self.pop_ready(data)? {
                    return Ok(step);
                }
            }
            if !done {
                let consumed = self.metas.reset();
                return self.need_data(data.len(), consumed);
            }
        }

        // token-level split over segments, or the final record
        let consumed = self.metas.reset();
        if consumed > 0 {
            return Ok(Step::Consume(consumed));
        }
        self.metas.clear();

        match try_get_line(&self.dialect, data, done) {
            Ok(Some(line)) => {
                self.line.clear();
                line.record.copy_to(&mut self.line);
                self.line_metas.clear();
                if let Err(kind) =
                    tokenize_record(self.backend, &self.line, &self.dialect, &mut self.line_metas)
                {
                    return Err(self.fail(kind.into(), 0, &line.record));
                }
                self.pending = line.consumed;
                self.records += 1;
                Ok(Step::Ready(Location::Line))
            }
            Ok(None) if done => Ok(Step::End),
            Ok(None) => self.need_data(data.len(), 0),
            Err(e) => Err(self.fail(e, 0, data)),
        }
    }

    /// A batched record, or the deferred error once none are left.
    fn pop_ready(&mut self, data: &Sequence<'_, T>) -> Result<Option<Step>> {
        if let Some(range) = self.metas.try_pop() {
            self.records += 1;
            return Ok(Some(Step::Ready(Location::Batch(range))));
        }
        match self.deferred.take() {
            Some(kind) => {
                let start = self.metas.unread_start();
                let rest = data.slice(start..data.len());
                Err(self.fail(kind.into(), start, &rest))
            }
            None => Ok(None),
        }
    }

    fn need_data(&self, buffered: usize, consumed: usize) -> Result<Step> {
        if buffered - consumed >= self.max_buffer {
            return Err(CsvError::Resource(format!(
                "no complete record within {} buffered tokens",
                self.max_buffer
            )));
        }
        Ok(Step::NeedData(consumed))
    }

    /// Attach record context to a format error and poison the reader.
    fn fail(&mut self, err: CsvError, offset: usize, record: &Sequence<'_, T>) -> CsvError {
        let err = match err {
            CsvError::Format(err) => err,
            other => return other,
        };
        let located = if err.record.is_some() {
            err
        } else {
            let content = render_content(&record.to_vec(), self.expose_content);
            err.at(self.records + 1, self.position + offset as u64)
                .with_content(content)
        };
        tracing::warn!(
            record = self.records + 1,
            position = self.position + offset as u64,
            error = %located.kind,
            "format error, reader poisoned"
        );
        self.failed = Some(located.clone());
        CsvError::Format(located)
    }

    /// Drop tokens up to and including the next raw newline.
    fn skip_record(&mut self, data: &Sequence<'_, T>, done: bool) -> Step {
        let consumed = self.metas.reset();
        self.metas.clear();
        self.deferred = None;
        if consumed > 0 {
            return Step::Consume(consumed);
        }

        let newline = self.dialect.newline_or_default();
        let mut prev_first = false;
        for (i, &t) in data.iter().enumerate() {
            let ends = match newline.second() {
                None => t == newline.first(),
                Some(second) => prev_first && t == second,
            };
            if ends {
                return self.skipped(i + 1);
            }
            prev_first = t == newline.first();
        }
        if done {
            return self.skipped(data.len());
        }
        // keep a trailing first newline token for the next look
        Step::NeedData(data.len() - usize::from(prev_first && newline.len() == 2))
    }

    fn skipped(&mut self, len: usize) -> Step {
        self.skipping = false;
        self.records += 1;
        tracing::debug!(record = self.records, len, "skipped failed record");
        Step::Consume(len)
    }
}

// ============================================================================
// CsvReader
// ============================================================================

pub struct CsvReader<T: Token, S: SourceControl> {
    buffer: BufferReader<T, S>,
    parser: Parser<T>,
}

impl<T: Token, S: SourceControl> CsvReader<T, S> {
    pub fn new(source: S, dialect: Dialect<T>, options: ReaderOptions<T>) -> Result<Self> {
        options.validate()?;
        Ok(CsvReader {
            buffer: BufferReader::new(source, options.buffer_options()),
            parser: Parser::new(dialect, &options),
        })
    }

    /// Reader renting its segments from `allocator`.
    pub fn with_allocator(
        source: S,
        dialect: Dialect<T>,
        options: ReaderOptions<T>,
        allocator: Arc<dyn Allocator<T>>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(CsvReader {
            buffer: BufferReader::with_allocator(source, options.buffer_options(), allocator),
            parser: Parser::new(dialect, &options),
        })
    }

    /// Dialect in effect, including a detected newline and delimiter.
    pub fn dialect(&self) -> &Dialect<T> {
        &self.parser.dialect
    }

    /// Records returned or skipped so far.
    pub fn records_read(&self) -> u64 {
        self.parser.records
    }

    pub fn is_poisoned(&self) -> bool {
        self.parser.failed.is_some()
    }

    /// Clear a format error so the next read resumes after the failed
    /// record. Returns false when the reader was not poisoned.
    pub fn skip_failed_record(&mut self) -> bool {
        if self.parser.failed.take().is_none() {
            return false;
        }
        self.parser.skipping = true;
        true
    }

    /// Rewind a seekable source and start over with the configured dialect.
    pub fn try_reset(&mut self) -> Result<bool> {
        if !self.buffer.try_reset()? {
            return Ok(false);
        }
        self.parser.restart();
        tracing::debug!("csv reader rewound");
        Ok(true)
    }

    pub fn get_ref(&self) -> &S {
        self.buffer.get_ref()
    }

    fn begin(&mut self) -> Result<()> {
        if let Some(err) = &self.parser.failed {
            return Err(CsvError::Format(err.clone()));
        }
        let pending = std::mem::take(&mut self.parser.pending);
        if pending > 0 {
            self.consume(pending, pending);
        }
        Ok(())
    }

    /// Apply a step to the buffer. `Some` ends the read.
    fn settle(&mut self, step: Step) -> Option<Option<Location>> {
        match step {
            Step::Ready(location) => Some(Some(location)),
            Step::End => Some(None),
            Step::Consume(n) => {
                self.consume(n, n);
                None
            }
            Step::NeedData(n) => {
                let examined = self.buffer.buffered();
                self.consume(n, examined);
                None
            }
        }
    }

    fn consume(&mut self, consumed: usize, examined: usize) {
        self.buffer.advance(consumed, examined);
        self.parser.position += consumed as u64;
    }

    fn record(&self, location: Location) -> Record<'_, T> {
        let parser = &self.parser;
        let (data, metas) = match location {
            Location::Batch(range) => (self.buffer.view().buffer.first(), &parser.metas.as_slice()[range]),
            Location::Line => (&parser.line[..], parser.line_metas.as_slice()),
        };
        Record {
            data,
            metas,
            dialect: &parser.dialect,
            number: parser.records,
            position: parser.position + metas[0].next_start() as u64,
            expose_content: parser.expose_content,
        }
    }
}

impl<T: Token, S: Source<T>> CsvReader<T, S> {
    /// Next record, `Ok(None)` at end of input.
    pub fn read_record(&mut self) -> Result<Option<Record<'_, T>>> {
        self.begin()?;
        let location = loop {
            self.buffer.read()?;
            let step = self.parser.step(&self.buffer.view())?;
            if let Some(found) = self.settle(step) {
                break found;
            }
        };
        match location {
            Some(location) => Ok(Some(self.record(location))),
            None => Ok(None),
        }
    }

    /// Every remaining record as owned, unescaped fields.
    pub fn read_all(&mut self) -> Result<Vec<Vec<Vec<T>>>> {
        let mut rows = Vec::new();
        while let Some(record) = self.read_record()? {
            rows.push(record.to_vec()?);
        }
        Ok(rows)
    }
}

impl<T: Token, S: AsyncSource<T>> CsvReader<T, S> {
    pub async fn read_record_async(&mut self) -> Result<Option<Record<'_, T>>> {
        let location = self.next_location_async(None).await?;
        match location {
            Some(location) => Ok(Some(self.record(location))),
            None => Ok(None),
        }
    }

    /// `read_record_async` that fails with `CsvError::Canceled` once `cancel`
    /// fires while waiting on the source.
    pub async fn read_record_async_cancellable(
        &mut self,
        cancel: &Cancellation,
    ) -> Result<Option<Record<'_, T>>> {
        let location = self.next_location_async(Some(cancel)).await?;
        match location {
            Some(location) => Ok(Some(self.record(location))),
            None => Ok(None),
        }
    }

    pub async fn read_all_async(&mut self) -> Result<Vec<Vec<Vec<T>>>> {
        let mut rows = Vec::new();
        while let Some(record) = self.read_record_async().await? {
            rows.push(record.to_vec()?);
        }
        Ok(rows)
    }

    async fn next_location_async(&mut self, cancel: Option<&Cancellation>) -> Result<Option<Location>> {
        self.begin()?;
        loop {
            match cancel {
                Some(token) => {
                    self.buffer.read_async_cancellable(token).await?;
                }
                None => {
                    self.buffer.read_async().await?;
                }
            }
            let step = self.parser.step(&self.buffer.view())?;
            if let Some(found) = self.settle(step) {
                return Ok(found);
            }
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// One record, valid until the next read.
///
/// `metas[0]` is the sentinel whose `next_start` is the record start; field
/// `i` ends at `metas[i + 1]`.
#[derive(Debug, Clone, Copy)]
pub struct Record<'r, T: Token> {
    data: &'r [T],
    metas: &'r [Meta],
    dialect: &'r Dialect<T>,
    number: u64,
    position: u64,
    expose_content: bool,
}

impl<'r, T: Token> Record<'r, T> {
    /// Field count; a record always has at least one field.
    #[inline]
    pub fn len(&self) -> usize {
        self.metas.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 1-based record number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Absolute token offset of the record start.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Record text without its newline.
    pub fn raw(&self) -> &'r [T] {
        &self.data[self.metas[0].next_start()..self.metas[self.len()].end()]
    }

    /// Field text before unescaping. Panics when `index >= len()`.
    pub fn raw_field(&self, index: usize) -> &'r [T] {
        &self.data[self.metas[index].next_start()..self.metas[index + 1].end()]
    }

    /// Unescaped field, borrowed unless it had to be rewritten.
    /// Panics when `index >= len()`.
    pub fn field(&self, index: usize) -> Result<Cow<'r, [T]>> {
        let start = self.metas[index].next_start();
        self.metas[index + 1]
            .field_cow(start, self.data, self.dialect)
            .map_err(|e| self.locate(e, index))
    }

    pub fn get(&self, index: usize) -> Option<Result<Cow<'r, [T]>>> {
        (index < self.len()).then(|| self.field(index))
    }

    /// Unescaped field, rewritten into `scratch` when needed.
    pub fn field_with<'s>(&'s self, index: usize, scratch: &'s mut Vec<T>) -> Result<&'s [T]> {
        let start = self.metas[index].next_start();
        self.metas[index + 1]
            .field(start, self.data, self.dialect, scratch)
            .map_err(|e| self.locate(e, index))
    }

    pub fn fields(&self) -> impl Iterator<Item = Result<Cow<'r, [T]>>> + '_ {
        (0..self.len()).map(|i| self.field(i))
    }

    pub fn to_vec(&self) -> Result<Vec<Vec<T>>> {
        self.fields().map(|f| f.map(Cow::into_owned)).collect()
    }

    fn locate(&self, err: CsvError, index: usize) -> CsvError {
        match err {
            CsvError::Format(e) if e.record.is_none() => {
                let content = render_content(self.raw_field(index), self.expose_content);
                CsvError::Format(e.at(self.number, self.position).with_content(content))
            }
            other => other,
        }
    }
}
