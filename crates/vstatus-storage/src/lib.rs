//! Sharded on-disk storage for per-directory status records.
//!
//! ## Format
//! A cache root holds up to `buckets` shard files named `<id>.bin`, where
//! `id = hash(directory) mod buckets + bucket_offset`. Each shard is a plain
//! concatenation of self-delimiting records (all integers big-endian, text as
//! UTF-16 code units):
//!
//! ```text
//! record  := pathLen:i32 payloadLen:i32 path:[u16; pathLen] payload
//! payload := tagLen:i32 tag:[u16; tagLen] childCount:i32 child*
//! child   := nameLen:i32 name:[u16; nameLen] status:u32
//! ```
//!
//! Bit 30 of `status` carries the directory flag (see [`DIRECTORY_FLAG`]).
//!
//! ## Crash tolerance
//! Writes build the complete replacement shard in `<id>.bin.new` and install
//! it with one rename, so readers only ever see the old or the new shard.
//! A shard that fails to decode is copied aside for diagnostics and deleted;
//! the records it held read back as unknown.
//!
//! This crate knows nothing about what status bits mean.

mod codec;
mod diagnostics;
mod error;
mod record;
mod shard;
mod write;

pub use codec::{
    decode_payload, decode_shard, encode_payload, encode_record, write_record, RecordHeader,
    MAX_PAYLOAD_BYTES, MAX_TEXT_UNITS, RECORD_HEADER_LEN,
};
pub use diagnostics::SNAPSHOT_PREFIX;
pub use error::{CorruptReason, ShardError};
pub use record::{DirectoryEntry, FsTag, StatusMap, StatusRecord, DIRECTORY_FLAG};
pub use shard::{
    java_string_hash, shard_id, ScanOutcome, ShardStore, ShardStoreOptions, DEFAULT_BUCKETS,
    DEFAULT_BUCKET_OFFSET, DEFAULT_OPEN_ATTEMPTS, DEFAULT_OPEN_BACKOFF, MAX_OPEN_BACKOFF,
    SHARD_EXTENSION,
};
pub use write::TEMP_SUFFIX;
