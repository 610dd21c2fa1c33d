use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use vstatus_storage::{
    DirectoryEntry, FsTag, ScanOutcome, ShardStore, ShardStoreOptions, StatusMap,
};

use crate::bootstrap::{BootstrapReport, BootstrapThresholds};
use crate::error::{CacheError, Result};
use crate::index::{CacheIndex, ManagedPredicate};
use crate::status::{Category, StatusMasks};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub shards: ShardStoreOptions,
    pub masks: StatusMasks,
    pub thresholds: BootstrapThresholds,
    /// Also persist ignored children so a bootstrap can rebuild the ignored
    /// index. Off by default: only valuable children reach disk.
    pub persist_ignored: bool,
}

/// Persistent per-directory status cache with three in-memory indices.
///
/// Owns its [`ShardStore`] and indices; share it behind an `Arc`.
#[derive(Debug)]
pub struct DiskAttributeStore {
    shards: ShardStore,
    masks: StatusMasks,
    thresholds: BootstrapThresholds,
    persist_ignored: bool,
    managed: Arc<dyn ManagedPredicate>,
    valuable: CacheIndex,
    conflicted: CacheIndex,
    ignored: CacheIndex,
    /// Orders disk writes and their index updates.
    write_lock: Mutex<()>,
    ready: AtomicBool,
}

impl DiskAttributeStore {
    pub fn open(
        root: impl Into<PathBuf>,
        options: StoreOptions,
        managed: Arc<dyn ManagedPredicate>,
    ) -> Result<Self> {
        let shards = ShardStore::open(root, options.shards)?;
        Ok(Self {
            shards,
            masks: options.masks,
            thresholds: options.thresholds,
            persist_ignored: options.persist_ignored,
            valuable: CacheIndex::new("valuable", Arc::clone(&managed)),
            conflicted: CacheIndex::new("conflicted", Arc::clone(&managed)),
            ignored: CacheIndex::new("ignored", Arc::clone(&managed)),
            managed,
            write_lock: Mutex::new(()),
            ready: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        self.shards.root()
    }

    pub fn masks(&self) -> &StatusMasks {
        &self.masks
    }

    pub fn shard_store(&self) -> &ShardStore {
        &self.shards
    }

    pub fn shard_path(&self, directory: &Path) -> Result<PathBuf> {
        let (_, key) = directory_key(directory)?;
        Ok(self.shards.shard_path(&key))
    }

    /// True once a bootstrap has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn read(&self, directory: &Path) -> Result<Option<StatusMap>> {
        Ok(self.read_entry(directory)?.map(|entry| entry.children))
    }

    pub fn read_entry(&self, directory: &Path) -> Result<Option<DirectoryEntry>> {
        let (_, key) = directory_key(directory)?;
        self.shards.read(&key).map_err(|err| {
            tracing::warn!(
                target: "vstatus.cache",
                path = %directory.display(),
                error = %err,
                "failed to read cached statuses"
            );
            CacheError::from(err)
        })
    }

    /// Records the current statuses of `directory`'s children.
    ///
    /// Only persist-worthy children reach disk; the indices are updated from
    /// the full map. Nothing changes in memory when the disk write fails.
    pub fn write(&self, directory: &Path, fs_tag: &FsTag, children: &StatusMap) -> Result<()> {
        let (directory, key) = directory_key(directory)?;
        let persisted: StatusMap = children
            .iter()
            .filter(|(_, record)| self.is_persist_worthy(record.status()))
            .map(|(name, record)| (name.clone(), *record))
            .collect();

        let _guard = self.write_lock.lock();
        let entry = (!persisted.is_empty()).then_some((fs_tag, &persisted));
        if let Err(err) = self.shards.write(&key, entry) {
            tracing::warn!(
                target: "vstatus.cache",
                path = %directory.display(),
                error = %err,
                "failed to persist statuses"
            );
            return Err(err.into());
        }
        self.update_indices(&directory, children);
        Ok(())
    }

    pub fn remove(&self, directory: &Path) -> Result<()> {
        self.write(directory, &FsTag::local(), &StatusMap::new())
    }

    /// Rebuilds all three indices from every record on disk.
    ///
    /// A corrupt shard is discarded and the scan moves on; a shard that
    /// cannot be opened is skipped.
    pub fn bootstrap(&self) -> Result<BootstrapReport> {
        let started = Instant::now();
        self.ready.store(false, Ordering::Release);
        for index in self.indices() {
            index.clear();
        }

        let mut report = BootstrapReport::default();
        for shard in self.shards.shard_files()? {
            let outcome = self
                .shards
                .scan_shard(&shard, |entry| self.absorb(entry, &mut report));
            match outcome {
                Ok(ScanOutcome::Complete { .. }) => report.shards_scanned += 1,
                Ok(ScanOutcome::Corrupt { .. }) => {
                    report.shards_scanned += 1;
                    report.corrupt_shards += 1;
                }
                Ok(ScanOutcome::Missing) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "vstatus.cache",
                        shard = %shard.display(),
                        error = %err,
                        "skipping unreadable shard during bootstrap"
                    );
                    report.unreadable_shards += 1;
                }
            }
        }

        report.elapsed = started.elapsed();
        report.log(&self.thresholds);
        self.ready.store(true, Ordering::Release);
        Ok(report)
    }

    fn absorb(&self, entry: DirectoryEntry, report: &mut BootstrapReport) {
        let directory: PathBuf = Path::new(&entry.directory).components().collect();
        report.entries += 1;

        for record in entry.children.values() {
            let status = record.status();
            if self.masks.is_modified(status) {
                report.modified_files += 1;
                let root = self.topmost_managed(&directory);
                *report.modified_by_root.entry(root).or_default() += 1;
            }
            if self.masks.is_new_locally(status) {
                report.new_files += 1;
                *report.new_by_folder.entry(directory.clone()).or_default() += 1;
            }
        }

        self.update_indices(&directory, &entry.children);
    }

    /// Highest ancestor reachable through managed directories only, or the
    /// directory itself when it is not managed.
    fn topmost_managed(&self, directory: &Path) -> PathBuf {
        directory
            .ancestors()
            .take_while(|dir| self.managed.is_managed(dir))
            .last()
            .unwrap_or(directory)
            .to_path_buf()
    }

    /// Files in `category` directly in `scope` (plus linked subdirectories),
    /// or across everything tracked when `scope` is `None`.
    pub fn lookup(&self, scope: Option<&Path>, category: Category) -> BTreeSet<PathBuf> {
        let index = self.index(category);
        match scope {
            Some(directory) => index.lookup(directory),
            None => index.lookup_all(),
        }
    }

    pub fn lookup_recursive(&self, scope: &Path, category: Category) -> BTreeSet<PathBuf> {
        self.index(category).lookup_recursive(scope)
    }

    pub fn index(&self, category: Category) -> &CacheIndex {
        match category {
            Category::Valuable => &self.valuable,
            Category::Conflicted => &self.conflicted,
            Category::Ignored => &self.ignored,
        }
    }

    fn indices(&self) -> [&CacheIndex; 3] {
        [&self.valuable, &self.conflicted, &self.ignored]
    }

    fn is_persist_worthy(&self, status: u32) -> bool {
        self.masks.is_valuable(status) || (self.persist_ignored && self.masks.is_ignored(status))
    }

    fn update_indices(&self, directory: &Path, children: &StatusMap) {
        for category in Category::ALL {
            let members = children
                .iter()
                .filter(|(_, record)| self.masks.matches(category, record.status()))
                .map(|(name, _)| directory.join(name))
                .collect();
            self.index(category).replace_for(directory, members);
        }
    }
}

/// The spelling of `directory` used on disk and in the indices: trailing
/// separators and `.` components dropped, so `/a/b/` and `/a/./b` are `/a/b`.
fn directory_key(directory: &Path) -> Result<(PathBuf, String)> {
    let normalized: PathBuf = directory.components().collect();
    let key = normalized
        .to_str()
        .ok_or_else(|| CacheError::NonUtf8Path {
            path: directory.to_path_buf(),
        })?
        .to_owned();
    Ok((normalized, key))
}
