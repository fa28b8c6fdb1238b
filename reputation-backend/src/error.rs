use thiserror::Error;

/// Failure of a write batch (resolver, aggregator, linker)
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("reputation arithmetic: {0}")]
    Arithmetic(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
