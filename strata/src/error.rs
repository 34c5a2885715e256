use crate::buffer_pool::TransactionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the storage engine and the operators above it.
#[derive(Debug, Error)]
pub enum Error {
    /// A descriptor lookup failed, or a tuple slot was empty.
    #[error("not found: {0}")]
    NotFound(String),

    /// A field name resolved to more than one descriptor entry.
    #[error("ambiguous field name {0}")]
    Ambiguous(String),

    /// Wrong field kind at evaluation or CSV conversion.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Malformed input: CSV field count, serialization length, bad rid.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// An in-page insert found no free slot. Recovered by the file layer,
    /// which promotes the insert to a new page.
    #[error("page is full")]
    PageFull,

    /// Every cached page is dirty or locked and none can be evicted. The
    /// caller must commit or abort before retrying.
    #[error("buffer pool full")]
    BufferPoolFull,

    /// A wait-for cycle was detected; the victim transaction has already
    /// been aborted when this error surfaces.
    #[error("transaction {0} aborted by deadlock")]
    Deadlock(TransactionId),

    /// An operation was issued against a transaction in the wrong state:
    /// not active, or begun twice.
    #[error("invalid transaction {0}")]
    InvalidTransaction(TransactionId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
