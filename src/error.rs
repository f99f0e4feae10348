use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SparseTableError {
    #[error("failed to allocate {size} bytes of bucket storage")]
    AllocationFailure { size: usize },
    #[error("growth policy has no capacity beyond {0} buckets")]
    MaxCapacityExceeded(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("snapshot restore mismatch: {0}")]
    DeserializationMismatch(String),
}

pub type Result<T> = std::result::Result<T, SparseTableError>;
