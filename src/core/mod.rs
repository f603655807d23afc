// Core primitives: dialect, tokenizing, unescaping and escaping

pub mod detect;
pub mod dialect;
pub mod escape;
pub mod field;
pub mod meta;
pub mod meta_buffer;
pub mod newlines;
pub mod simd;
pub mod splitter;
pub mod token;
pub mod unescape;

pub use detect::{detect_delimiter, DelimiterDetection};
pub use dialect::{Dialect, Mode};
pub use escape::{escape_in_place, escape_into, escape_with_overflow, needs_quoting, Quoting};
pub use field::{scan_fields, tokenize_record, FieldReader, RawField};
pub use meta::{Meta, RecordMeta};
pub use meta_buffer::{MetaBuffer, MetaState};
pub use newlines::{detect_newline, Newline};
pub use simd::Backend;
pub use splitter::{get_record_meta, try_get_line, Line};
pub use token::Token;
pub use unescape::{unescape, unescape_escaped, unescape_in_place, unescape_with};
