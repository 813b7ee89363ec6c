//! # Formats
//!
//! Byte-level encodings of the funnel table. File I/O is in the app layer.

mod csv_table;

pub use csv_table::{merge_tables, table_from_csv, table_to_csv};
