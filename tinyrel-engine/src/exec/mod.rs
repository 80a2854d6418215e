//! Operation drivers
//!
//! The engine receives already-parsed operations: LOAD streams a CSV file
//! into a table (and optionally its index), SELECT evaluates a predicate
//! conjunction over one table.

pub mod load;
pub mod predicate;
pub mod select;

pub use load::load;
pub use predicate::{Attr, CompOp, Predicate};
pub use select::{select, Projection};

use std::path::PathBuf;

/// Table and index file paths for a table name (which may carry a
/// directory prefix)
pub(crate) fn table_paths(table: &str) -> (PathBuf, PathBuf) {
    (
        PathBuf::from(format!("{}.tbl", table)),
        PathBuf::from(format!("{}.idx", table)),
    )
}
