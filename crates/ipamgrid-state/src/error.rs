//! Mapping store errors.
//!
//! redb reports failures through several error types; the store flattens
//! them into one enum keyed by the stage that failed.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open mapping store: {0}")]
    Open(String),

    /// Begin, commit, or abort of a store transaction failed.
    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open mapping table: {0}")]
    Table(String),

    #[error("mapping row read failed: {0}")]
    Read(String),

    #[error("mapping row write failed: {0}")]
    Write(String),

    #[error("cannot encode mapping row: {0}")]
    Serialize(String),

    /// A stored row no longer matches its row type.
    #[error("corrupt mapping row: {0}")]
    Deserialize(String),

    /// A row the operation depends on does not exist.
    #[error("{0} not found in mapping store")]
    NotFound(String),
}
