mod connection;
mod pool;
pub mod reader;
mod tables;
pub mod types;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// File name of the contractor database inside the data directory.
pub const DATABASE_FILE_NAME: &str = "contractor.db";
