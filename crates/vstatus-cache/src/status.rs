//! Status bits and the masks that sort children into index categories.
//!
//! The storage layer treats status as an opaque `u32`; everything that gives
//! the bits meaning lives here. Bit 30 is reserved for the directory flag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const UNKNOWN: u32 = 0;
pub const NOT_MANAGED: u32 = 1;
pub const UPTODATE: u32 = 1 << 1;
pub const MODIFIED_IN_REPOSITORY: u32 = 1 << 2;
pub const NEW_IN_REPOSITORY: u32 = 1 << 3;
pub const REMOVED_IN_REPOSITORY: u32 = 1 << 4;
pub const NEW_LOCALLY: u32 = 1 << 5;
pub const ADDED_LOCALLY: u32 = 1 << 6;
pub const MODIFIED_LOCALLY_CONTENT: u32 = 1 << 7;
pub const REMOVED_LOCALLY: u32 = 1 << 8;
pub const DELETED_LOCALLY: u32 = 1 << 9;
pub const EXCLUDED: u32 = 1 << 10;
pub const MERGE: u32 = 1 << 11;
pub const CONFLICT_CONTENT: u32 = 1 << 12;
pub const MODIFIED_LOCALLY_PROPERTY: u32 = 1 << 13;
pub const CONFLICT_TREE: u32 = 1 << 14;

/// Every status bit (0..=29). Bits 30 and 31 are never statuses.
pub const ALL: u32 = (1 << 30) - 1;
pub const MANAGED: u32 = ALL & !NOT_MANAGED;
pub const CONFLICT: u32 = CONFLICT_CONTENT | CONFLICT_TREE;
pub const LOCAL_MODIFICATION: u32 = NEW_LOCALLY
    | ADDED_LOCALLY
    | MODIFIED_LOCALLY_CONTENT
    | MODIFIED_LOCALLY_PROPERTY
    | REMOVED_LOCALLY
    | DELETED_LOCALLY
    | MERGE
    | CONFLICT;

/// The three derived indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Valuable,
    Conflicted,
    Ignored,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Valuable, Category::Conflicted, Category::Ignored];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Valuable => "valuable",
            Category::Conflicted => "conflicted",
            Category::Ignored => "ignored",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status category `{0}` (expected valuable, conflicted or ignored)")]
pub struct UnknownCategory(String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCategory(s.to_owned()))
    }
}

/// Bitmasks classifying a status value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusMasks {
    pub managed: u32,
    pub uptodate: u32,
    /// Exact value of an ignored file; also masked out of "valuable".
    pub excluded: u32,
    pub conflict: u32,
    pub local_modification: u32,
    pub new_locally: u32,
}

impl Default for StatusMasks {
    fn default() -> Self {
        Self {
            managed: MANAGED,
            uptodate: UPTODATE,
            excluded: EXCLUDED,
            conflict: CONFLICT,
            local_modification: LOCAL_MODIFICATION,
            new_locally: NEW_LOCALLY,
        }
    }
}

impl StatusMasks {
    /// Managed, but neither up to date nor excluded.
    pub fn valuable_mask(&self) -> u32 {
        self.managed & !self.uptodate & !self.excluded
    }

    pub fn is_valuable(&self, status: u32) -> bool {
        status & self.valuable_mask() != 0
    }

    pub fn is_conflicted(&self, status: u32) -> bool {
        status & self.conflict != 0
    }

    pub fn is_ignored(&self, status: u32) -> bool {
        status == self.excluded
    }

    pub fn is_modified(&self, status: u32) -> bool {
        status & self.local_modification != 0
    }

    pub fn is_new_locally(&self, status: u32) -> bool {
        status & self.new_locally != 0
    }

    pub fn matches(&self, category: Category, status: u32) -> bool {
        match category {
            Category::Valuable => self.is_valuable(status),
            Category::Conflicted => self.is_conflicted(status),
            Category::Ignored => self.is_ignored(status),
        }
    }
}
