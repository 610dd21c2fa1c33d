use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved bit of the serialized status integer that carries the directory flag.
///
/// Status bitmasks must never use this bit; [`StatusRecord::new`] masks it out.
pub const DIRECTORY_FLAG: u32 = 1 << 30;

/// Status of a single child entry of a cached directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusRecord {
    status: u32,
    is_directory: bool,
}

impl StatusRecord {
    pub const fn new(status: u32, is_directory: bool) -> Self {
        Self {
            status: status & !DIRECTORY_FLAG,
            is_directory,
        }
    }

    pub const fn file(status: u32) -> Self {
        Self::new(status, false)
    }

    pub const fn directory(status: u32) -> Self {
        Self::new(status, true)
    }

    pub const fn status(&self) -> u32 {
        self.status
    }

    pub const fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// The on-disk form: the status bitmask with [`DIRECTORY_FLAG`] folded in.
    pub const fn pack(self) -> u32 {
        if self.is_directory {
            self.status | DIRECTORY_FLAG
        } else {
            self.status
        }
    }

    pub const fn unpack(raw: u32) -> Self {
        Self {
            status: raw & !DIRECTORY_FLAG,
            is_directory: raw & DIRECTORY_FLAG != 0,
        }
    }
}

/// Child file name -> status. Ordered so encoding is deterministic.
pub type StatusMap = BTreeMap<String, StatusRecord>;

/// Identifies the filesystem a cached directory lives on, so callers can
/// resolve decoded names back into platform file handles.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FsTag(String);

impl FsTag {
    pub const LOCAL: &'static str = "file:///";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn local() -> Self {
        Self(Self::LOCAL.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }
}

impl Default for FsTag {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Display for FsTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted directory record, as decoded from a shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub directory: String,
    pub fs_tag: FsTag,
    pub children: StatusMap,
}
