use std::path::PathBuf;

/// Errors produced by shard persistence.
///
/// Transient I/O and corruption are kept apart: callers retry or propagate
/// [`ShardError::Io`], while [`ShardError::Corrupt`] is resolved by deleting
/// the shard and treating its records as unknown.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt shard {} at byte {offset}: {reason}", shard.display())]
    Corrupt {
        shard: PathBuf,
        offset: u64,
        reason: CorruptReason,
    },

    #[error("invalid shard store options: {0}")]
    InvalidOptions(&'static str),

    #[error("{what} too large to encode: {len} (limit {limit})")]
    TooLarge {
        what: &'static str,
        len: u64,
        limit: u64,
    },
}

impl ShardError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, ShardError::Corrupt { .. })
    }
}

/// Why a shard was judged corrupt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorruptReason {
    #[error("unexpected end of file ({needed} more bytes expected)")]
    UnexpectedEof { needed: u64 },

    #[error("negative length field {value}")]
    NegativeLength { value: i32 },

    #[error("text length of {units} UTF-16 units exceeds limit")]
    TextTooLong { units: u32 },

    #[error("payload length {bytes} exceeds limit")]
    PayloadTooLarge { bytes: u32 },

    #[error("child count {count} cannot fit in {remaining} payload bytes")]
    ChildCountTooLarge { count: u32, remaining: u64 },

    #[error("invalid UTF-16 text")]
    InvalidUtf16,

    #[error("payload declares {declared} bytes but its fields consume {consumed}")]
    PayloadLengthMismatch { declared: u64, consumed: u64 },
}
