mod file_reader;
mod range_reader;

pub use file_reader::{LocalFileReader, MemoryReader};
pub use range_reader::RangeReader;
