//! Single-row fetch outcome

use crate::error::{Result, StorageError};

/// Outcome of a lookup that expects exactly one row
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    One(T),
    NotFound,
    Multiple(usize),
}

impl<T> Fetched<T> {
    pub fn from_rows(mut rows: Vec<T>) -> Self {
        match rows.len() {
            0 => Fetched::NotFound,
            1 => match rows.pop() {
                Some(row) => Fetched::One(row),
                None => Fetched::NotFound,
            },
            n => Fetched::Multiple(n),
        }
    }

    /// `what` names the lookup in the error message
    pub fn into_result(self, what: impl Into<String>) -> Result<T> {
        match self {
            Fetched::One(row) => Ok(row),
            Fetched::NotFound => Err(StorageError::not_found(what)),
            Fetched::Multiple(n) => Err(StorageError::multiple_rows(what, n)),
        }
    }
}
