use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vstatus_cache::{
    DiskAttributeStore, ManagedRoots, ShardStoreOptions, StatusMap, StatusRecord, StoreOptions,
};

pub fn shard_options(tmp: &TempDir) -> ShardStoreOptions {
    ShardStoreOptions {
        open_backoff: Duration::from_millis(1),
        diagnostics_dir: Some(tmp.path().join("diagnostics")),
        ..ShardStoreOptions::default()
    }
}

pub fn store_options(tmp: &TempDir) -> StoreOptions {
    StoreOptions {
        shards: shard_options(tmp),
        ..StoreOptions::default()
    }
}

pub fn cache_root(tmp: &TempDir) -> PathBuf {
    tmp.path().join("cache")
}

pub fn open_store(tmp: &TempDir, roots: &[&str]) -> DiskAttributeStore {
    open_store_with(tmp, roots, store_options(tmp))
}

pub fn open_store_with(tmp: &TempDir, roots: &[&str], options: StoreOptions) -> DiskAttributeStore {
    let roots = ManagedRoots::new(roots.iter().map(PathBuf::from));
    DiskAttributeStore::open(cache_root(tmp), options, Arc::new(roots)).unwrap()
}

pub fn files(entries: &[(&str, u32)]) -> StatusMap {
    entries
        .iter()
        .map(|(name, status)| (name.to_string(), StatusRecord::file(*status)))
        .collect()
}

pub fn paths(entries: &[&str]) -> BTreeSet<PathBuf> {
    entries.iter().map(PathBuf::from).collect()
}

/// A directory different from `directory` that maps to the same shard.
pub fn bucket_mate(store: &DiskAttributeStore, directory: &Path) -> PathBuf {
    let shard = store.shard_path(directory).unwrap();
    (0..)
        .map(|i| directory.with_file_name(format!("mate{i}")))
        .find(|candidate| candidate != directory && store.shard_path(candidate).unwrap() == shard)
        .unwrap()
}
