// src/error.rs

//! Central error type for quadgen.
//!
//! Per-unit failures (parse errors, unknown keys, bad values) are carried
//! as values so the generator can log them and keep processing the rest of
//! the batch; only structural failures (missing output directory and the
//! like) abort the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while discovering, parsing, or converting units
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}:{line}: {msg}")]
    Parse {
        path: String,
        line: usize,
        msg: String,
    },

    #[error("invalid escape sequence: {0}")]
    Unescape(String),

    #[error("unbalanced quoting in: {0:?}")]
    UnbalancedQuotes(String),

    #[error("trailing backslash in: {0:?}")]
    TrailingBackslash(String),

    #[error("unsupported key '{key}' in group [{group}] of {unit}")]
    UnsupportedKey {
        unit: String,
        group: String,
        key: String,
    },

    #[error("{unit}: key '{key}': {msg}")]
    InvalidValue {
        unit: String,
        key: String,
        msg: String,
    },

    #[error("{unit}: missing required key '{key}'")]
    MissingKey { unit: String, key: String },

    #[error("unit directory path is not absolute: {0}")]
    RelativeUnitDir(String),

    #[error("no such user: {0}")]
    UnknownUser(String),

    #[error("no such group: {0}")]
    UnknownGroup(String),

    #[error("signature verification failed for {path}: {msg}")]
    Signature { path: PathBuf, msg: String },

    #[error("converting {unit}: {source}")]
    Convert {
        unit: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with the file name of the unit being converted
    pub fn in_unit(self, unit: &str) -> Error {
        Error::Convert {
            unit: unit.to_string(),
            source: Box::new(self),
        }
    }
}

/// Result type for quadgen operations
pub type Result<T> = std::result::Result<T, Error>;
