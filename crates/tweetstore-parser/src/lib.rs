pub mod errors;
pub mod model;
mod reader;

pub use errors::ParserError;
pub use model::{ColumnType, ReaderOptions, MISSING_MARKERS};
pub use reader::{infer_column_type, read_table, read_table_file};
