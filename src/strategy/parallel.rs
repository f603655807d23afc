// Parallel parser for input already in memory, using rayon
//
// Strategy:
// 1. Single-threaded: find every record boundary (quote-aware splitter)
// 2. Parallel: tokenize and unescape each record independently
//
// Records come back in input order. A bad record boundary fails the parse
// before any field is unescaped; otherwise the first bad field in input
// order is the error reported.

use rayon::prelude::*;

use crate::buffer::Sequence;
use crate::core::field::tokenize_record;
use crate::core::meta_buffer::MetaBuffer;
use crate::core::newlines::detect_newline;
use crate::core::simd::Backend;
use crate::core::splitter::try_get_line;
use crate::core::{Dialect, Token};
use crate::error::{CsvError, Result};
use crate::options::DEFAULT_NEWLINE_DETECTION_LIMIT;

/// Parse `input` into records of owned, unescaped fields.
///
/// An unset dialect newline is detected first. Format errors carry the
/// record number and position, never the record text.
pub fn parse_parallel<T: Token>(input: &[T], dialect: &Dialect<T>) -> Result<Vec<Vec<Vec<T>>>> {
    let dialect = match dialect.newline() {
        Some(_) => dialect.clone(),
        None => {
            let found = detect_newline(
                &Sequence::single(input),
                dialect.quote(),
                dialect.escape(),
                DEFAULT_NEWLINE_DETECTION_LIMIT,
                true,
            )?;
            // a final block always resolves
            dialect.with_newline(found)?
        }
    };

    // Phase 1: record boundaries
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < input.len() {
        let rest = Sequence::single(&input[offset..]);
        let line = try_get_line(&dialect, &rest, true)
            .map_err(|e| locate(e, records.len() as u64 + 1, offset))?;
        let Some(line) = line else {
            break;
        };
        records.push((offset, offset + line.meta.end_offset));
        offset += line.consumed;
    }
    tracing::debug!(records = records.len(), "split input for parallel parse");

    // Phase 2: fields, in parallel
    let backend = Backend::detect();
    let parsed: Vec<Result<Vec<Vec<T>>>> = records
        .into_par_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            parse_record(backend, &input[start..end], &dialect).map_err(|e| locate(e, i as u64 + 1, start))
        })
        .collect();
    parsed.into_iter().collect()
}

fn parse_record<T: Token>(backend: Backend, line: &[T], dialect: &Dialect<T>) -> Result<Vec<Vec<T>>> {
    let mut metas = MetaBuffer::with_capacity(16);
    tokenize_record(backend, line, dialect, &mut metas)?;
    let metas = metas.as_slice();
    metas
        .windows(2)
        .map(|pair| {
            pair[1]
                .field_cow(pair[0].next_start(), line, dialect)
                .map(|f| f.into_owned())
        })
        .collect()
}

fn locate(err: CsvError, record: u64, position: usize) -> CsvError {
    match err {
        CsvError::Format(e) if e.record.is_none() => CsvError::Format(e.at(record, position as u64)),
        other => other,
    }
}
