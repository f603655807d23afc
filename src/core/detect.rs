// Delimiter detection on the first buffered records
//
//   Prefix: "sep=;" style first line; the line is consumed
//   Values: score each candidate over a sample of records
//
// Detection runs once, after the newline is known and before any record is
// returned.

use std::fmt;

use crate::buffer::Sequence;
use crate::error::{ConfigError, FormatErrorKind, Result};

use super::dialect::Dialect;
use super::splitter::try_get_line;
use super::token::{render_tokens, Token};

/// Records sampled by the `Values` detector.
pub const SAMPLE_RECORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelimiterDetection<T> {
    /// The first record is `prefix` followed by exactly one delimiter token.
    Prefix { prefix: Vec<T>, optional: bool },
    /// Most consistent candidate over the sampled records.
    Values { candidates: Vec<T>, optional: bool },
}

impl<T: Token> DelimiterDetection<T> {
    /// `sep=` prefix, falling back to the configured delimiter.
    pub fn sep_prefix() -> Self {
        DelimiterDetection::Prefix {
            prefix: b"sep=".iter().map(|&b| T::from_ascii(b)).collect(),
            optional: true,
        }
    }

    /// `, ; \t |` candidates; detection failure is an error.
    pub fn values() -> Self {
        Self::values_of(&[b',', b';', b'\t', b'|'].map(T::from_ascii), false)
    }

    /// Custom candidates, deduplicated in order.
    pub fn values_of(candidates: &[T], optional: bool) -> Self {
        let mut unique: Vec<T> = Vec::with_capacity(candidates.len());
        for &c in candidates {
            if !unique.contains(&c) {
                unique.push(c);
            }
        }
        DelimiterDetection::Values {
            candidates: unique,
            optional,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            DelimiterDetection::Prefix { optional, .. } | DelimiterDetection::Values { optional, .. } => {
                *optional
            }
        }
    }

    /// Records needed before detection can run.
    pub fn record_count_hint(&self) -> usize {
        match self {
            DelimiterDetection::Prefix { .. } => 1,
            DelimiterDetection::Values { .. } => SAMPLE_RECORDS,
        }
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        match self {
            DelimiterDetection::Prefix { prefix, .. } => {
                if prefix.is_empty() {
                    errors.push("Delimiter detection prefix must not be empty.".to_string());
                }
            }
            DelimiterDetection::Values { candidates, .. } => {
                if candidates.len() < 2 {
                    errors.push("Delimiter detection needs at least two candidates.".to_string());
                }
                if candidates.iter().any(|c| c.dialect_violation().is_some()) {
                    errors.push("Delimiter detection candidates must be valid tokens.".to_string());
                }
            }
        }
    }

    fn try_detect(&self, records: &[Vec<T>]) -> Option<(T, usize)> {
        match self {
            DelimiterDetection::Prefix { prefix, .. } => {
                let first = records.first()?;
                if first.len() == prefix.len() + 1 && first.starts_with(prefix) {
                    first.last().map(|&d| (d, 1))
                } else {
                    None
                }
            }
            DelimiterDetection::Values { candidates, .. } => {
                best_candidate(candidates, records).map(|d| (d, 0))
            }
        }
    }
}

impl<T: Token> fmt::Display for DelimiterDetection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelimiterDetection::Prefix { prefix, .. } => write!(f, "Prefix: {}", render_tokens(prefix)),
            DelimiterDetection::Values { candidates, .. } => {
                write!(f, "Values: {}", render_tokens(candidates))
            }
        }
    }
}

/// Outcome of a completed detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection<T: Token> {
    pub dialect: Dialect<T>,
    /// Leading tokens to skip (the prefix record).
    pub consumed: usize,
}

/// Run `strategy` against the buffered data.
///
/// `Ok(None)` means more records are needed. Unless `is_final`, detection
/// waits until `record_count_hint` records are buffered. The dialect newline
/// must be resolved.
pub fn detect_delimiter<T: Token>(
    strategy: &DelimiterDetection<T>,
    dialect: &Dialect<T>,
    buffer: &Sequence<'_, T>,
    is_final: bool,
) -> Result<Option<Detection<T>>> {
    let wanted = strategy.record_count_hint();
    let mut records: Vec<Vec<T>> = Vec::with_capacity(wanted);
    let mut consumed_by: Vec<usize> = Vec::with_capacity(wanted);
    let mut offset = 0;

    while records.len() < wanted {
        let rest = buffer.slice(offset..buffer.len());
        match try_get_line(dialect, &rest, is_final)? {
            Some(line) => {
                records.push(line.record.to_vec());
                offset += line.consumed;
                consumed_by.push(offset);
            }
            None if is_final => break,
            None => return Ok(None),
        }
    }

    if records.is_empty() {
        // nothing to look at; keep the configured delimiter
        return Ok(Some(Detection {
            dialect: dialect.clone(),
            consumed: 0,
        }));
    }

    match strategy.try_detect(&records) {
        Some((delimiter, skip_records)) => {
            let detected = dialect.with_delimiter(delimiter).map_err(|e: ConfigError| {
                tracing::debug!(error = %e, "detected delimiter conflicts with dialect");
                FormatErrorKind::DelimiterNotDetected
            });
            let detected = match detected {
                Ok(d) => d,
                Err(_) if strategy.is_optional() => dialect.clone(),
                Err(kind) => return Err(kind.into()),
            };
            let consumed = match skip_records {
                0 => 0,
                n => consumed_by[n - 1],
            };
            tracing::debug!(%strategy, delimiter = ?delimiter, consumed, "detected delimiter");
            Ok(Some(Detection {
                dialect: detected,
                consumed,
            }))
        }
        None if strategy.is_optional() => {
            tracing::debug!(%strategy, "no delimiter detected, keeping configured one");
            Ok(Some(Detection {
                dialect: dialect.clone(),
                consumed: 0,
            }))
        }
        None => Err(FormatErrorKind::DelimiterNotDetected.into()),
    }
}

fn best_candidate<T: Token>(candidates: &[T], records: &[Vec<T>]) -> Option<T> {
    let n = records.len() as f64;
    let mut best: Option<(T, f64)> = None;

    for &candidate in candidates {
        let counts: Vec<f64> = records
            .iter()
            .map(|r| r.iter().filter(|&&t| t == candidate).count() as f64)
            .collect();
        let total: f64 = counts.iter().sum();
        if total == 0.0 {
            continue;
        }

        let average = total / n;
        let variance = counts.iter().map(|c| (c - average).powi(2)).sum::<f64>() / n;

        // field counts are delimiter counts + 1
        let field_average = counts.iter().map(|c| c + 1.0).sum::<f64>() / n;
        let field_variance = counts
            .iter()
            .map(|c| (c + 1.0 - field_average).powi(2))
            .sum::<f64>()
            / n;

        let score = average * 2.0 - variance - field_variance * 3.0;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsvError;

    fn detect(strategy: &DelimiterDetection<u8>, input: &[u8], is_final: bool) -> Option<Detection<u8>> {
        detect_delimiter(strategy, &Dialect::lf(), &Sequence::single(input), is_final).unwrap()
    }

    #[test]
    fn test_prefix_consumes_first_record() {
        let found = detect(&DelimiterDetection::sep_prefix(), b"sep=;\na;b\n", false).unwrap();
        assert_eq!(found.dialect.delimiter(), b';');
        assert_eq!(found.consumed, 6);
    }

    #[test]
    fn test_prefix_optional_falls_back() {
        let found = detect(&DelimiterDetection::sep_prefix(), b"a,b\n", false).unwrap();
        assert_eq!(found.dialect.delimiter(), b',');
        assert_eq!(found.consumed, 0);
    }

    #[test]
    fn test_prefix_required_fails() {
        let strategy = DelimiterDetection::Prefix {
            prefix: b"sep=".to_vec(),
            optional: false,
        };
        let err = detect_delimiter(&strategy, &Dialect::lf(), &Sequence::single(b"sep=ab\n"), false)
            .unwrap_err();
        assert!(matches!(
            err,
            CsvError::Format(ref e) if e.kind == FormatErrorKind::DelimiterNotDetected
        ));
    }

    #[test]
    fn test_values_picks_consistent_candidate() {
        let input = b"a;b;c,d\ne;f;g\nh;i;j,k,l\n";
        let found = detect(&DelimiterDetection::values(), input, true).unwrap();
        assert_eq!(found.dialect.delimiter(), b';');
        assert_eq!(found.consumed, 0);
    }

    #[test]
    fn test_values_waits_for_sample() {
        assert!(detect(&DelimiterDetection::values(), b"a|b\nc|d\n", false).is_none());
        let found = detect(&DelimiterDetection::values(), b"a|b\nc|d\n", true).unwrap();
        assert_eq!(found.dialect.delimiter(), b'|');
    }

    #[test]
    fn test_values_required_without_candidates_fails() {
        let err = detect_delimiter(
            &DelimiterDetection::values(),
            &Dialect::lf(),
            &Sequence::single(b"abc\ndef\n"),
            true,
        )
        .unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_display() {
        assert_eq!(DelimiterDetection::<u8>::sep_prefix().to_string(), "Prefix: sep=");
        assert_eq!(DelimiterDetection::<u8>::values().to_string(), "Values: ,;\\t|");
    }

    #[test]
    fn test_validate() {
        let mut errors = Vec::new();
        DelimiterDetection::values_of(&[b',', b','], false).validate(&mut errors);
        assert_eq!(errors.len(), 1);
    }
}
