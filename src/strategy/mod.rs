// Read and write strategies built on the core and buffer layers

pub mod encode;
pub mod parallel;
pub mod streaming;

pub use encode::{CsvWriter, Quoting};
pub use parallel::parse_parallel;
pub use streaming::{CsvReader, Record};
