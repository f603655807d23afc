// Reader and writer configuration
//
// Both option sets are plain structs with public fields and defaults; the
// reader and writer call `validate()` once at construction and report every
// bad value in a single ConfigError.

use crate::buffer::reader::BufferOptions;
use crate::buffer::sink::DEFAULT_FLUSH_THRESHOLD;
use crate::core::detect::DelimiterDetection;
use crate::core::escape::Quoting;
use crate::core::Token;
use crate::error::ConfigError;

/// Largest record the reader buffers before giving up (256 MB).
pub const DEFAULT_MAX_BUFFER: usize = 256 * 1024 * 1024;

/// Lookahead for newline autodetection, in tokens.
pub const DEFAULT_NEWLINE_DETECTION_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct ReaderOptions<T: Token> {
    /// Size of each pooled segment.
    pub buffer_size: usize,
    /// Smallest read the source is asked for.
    pub min_read_size: usize,
    /// Keep the source open when the reader is dropped.
    pub leave_open: bool,
    /// Tokens scanned for a newline when the dialect leaves it unset.
    pub newline_detection_limit: usize,
    pub delimiter_detection: Option<DelimiterDetection<T>>,
    /// Include record text in format errors.
    pub expose_content: bool,
    pub skip_bom: bool,
    /// Buffered tokens allowed without a complete record.
    pub max_buffer_size: usize,
}

impl<T: Token> Default for ReaderOptions<T> {
    fn default() -> Self {
        ReaderOptions {
            buffer_size: 4096,
            min_read_size: 1024,
            leave_open: false,
            newline_detection_limit: DEFAULT_NEWLINE_DETECTION_LIMIT,
            delimiter_detection: None,
            expose_content: false,
            skip_bom: true,
            max_buffer_size: DEFAULT_MAX_BUFFER,
        }
    }
}

impl<T: Token> ReaderOptions<T> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.buffer_size == 0 {
            errors.push("BufferSize must be positive.".to_string());
        }
        if self.min_read_size == 0 {
            errors.push("MinimumReadSize must be positive.".to_string());
        }
        if self.min_read_size > self.buffer_size {
            errors.push(format!(
                "MinimumReadSize ({}) must not exceed BufferSize ({}).",
                self.min_read_size, self.buffer_size
            ));
        }
        if self.newline_detection_limit == 0 {
            errors.push("NewlineDetectionLimit must be positive.".to_string());
        }
        if self.max_buffer_size < self.buffer_size {
            errors.push(format!(
                "MaxBufferSize ({}) must be at least BufferSize ({}).",
                self.max_buffer_size, self.buffer_size
            ));
        }
        if let Some(detection) = &self.delimiter_detection {
            detection.validate(&mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::new(errors, self.render()))
        }
    }

    pub(crate) fn buffer_options(&self) -> BufferOptions {
        BufferOptions {
            buffer_size: self.buffer_size,
            min_read_size: self.min_read_size,
            leave_open: self.leave_open,
            skip_bom: self.skip_bom,
        }
    }

    fn render(&self) -> String {
        let detection = self
            .delimiter_detection
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        format!(
            "Options: BufferSize: {}, MinimumReadSize: {}, NewlineDetectionLimit: {}, MaxBufferSize: {}, DelimiterDetection: {detection}",
            self.buffer_size, self.min_read_size, self.newline_detection_limit, self.max_buffer_size
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub quoting: Quoting,
    /// Pending output that triggers a flush at the end of a record.
    pub flush_threshold: usize,
    /// Include field text in writer errors.
    pub expose_content: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            quoting: Quoting::AUTO,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            expose_content: false,
        }
    }
}

impl WriterOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::new(
                vec!["FlushThreshold must be positive.".to_string()],
                format!("Options: Quoting: {:?}", self.quoting),
            ));
        }
        Ok(())
    }
}
