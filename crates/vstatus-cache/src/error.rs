use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the attribute store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("shard error: {0}")]
    Shard(#[from] vstatus_storage::ShardError),

    #[error("directory path {} is not valid UTF-8", path.display())]
    NonUtf8Path { path: PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
