//! Status codes and error handling
//!
//! Engine operations report failures as negative status codes, mirrored by
//! the variants of [`EngineError`]. Node-level `NodeFull` never escapes the
//! tree driver, and `NoSuchRecord` is a positioning signal rather than a
//! hard failure.

use std::io;

use thiserror::Error;

/// Main error type for the tinyrel engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The underlying file could not be opened or created
    #[error("cannot open file")]
    FileOpenFailed(#[source] io::Error),

    /// A page or record could not be read
    #[error("read failed")]
    FileReadFailed(#[source] io::Error),

    /// A page or record could not be written
    #[error("write failed")]
    FileWriteFailed(#[source] io::Error),

    /// A node-level insert hit page capacity; the tree converts this to a split
    #[error("node is full")]
    NodeFull,

    /// The exact key is absent; the cursor points at the next larger entry
    #[error("no such record")]
    NoSuchRecord,

    /// A load line does not follow the `key,value` format
    #[error("invalid file format: {0}")]
    InvalidFileFormat(String),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Get the status code reported by the operation surface
    pub fn code(&self) -> i32 {
        match self {
            EngineError::FileOpenFailed(_) => -1,
            EngineError::FileReadFailed(_) => -2,
            EngineError::FileWriteFailed(_) => -3,
            EngineError::NodeFull => -4,
            EngineError::NoSuchRecord => -5,
            EngineError::InvalidFileFormat(_) => -6,
            EngineError::Io(_) => -7,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
