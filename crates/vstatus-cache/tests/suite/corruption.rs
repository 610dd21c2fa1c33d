use std::fs;
use std::path::Path;

use vstatus_cache::status::{CONFLICT_CONTENT, MODIFIED_LOCALLY_CONTENT};
use vstatus_cache::{CacheError, Category, FsTag};

use super::support::{bucket_mate, files, open_store, paths};

#[test]
fn truncated_shard_reads_as_unknown_and_heals_on_next_write() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let first = Path::new("/repo/first");
    let second = bucket_mate(&store, first);
    let shard = store.shard_path(first).unwrap();

    store
        .write(first, &FsTag::local(), &files(&[("a", MODIFIED_LOCALLY_CONTENT)]))
        .unwrap();
    // Newest record goes first, so `first` now lies after `second`.
    store
        .write(&second, &FsTag::local(), &files(&[("b", CONFLICT_CONTENT)]))
        .unwrap();

    let bytes = fs::read(&shard).unwrap();
    fs::write(&shard, &bytes[..bytes.len() - 5]).unwrap();

    assert_eq!(store.read(first).unwrap(), None);
    assert!(!shard.exists());
    assert_eq!(store.read(&second).unwrap(), None);

    let third = bucket_mate(&store, &second);
    store
        .write(&third, &FsTag::local(), &files(&[("c", CONFLICT_CONTENT)]))
        .unwrap();
    assert_eq!(
        store.read(&third).unwrap(),
        Some(files(&[("c", CONFLICT_CONTENT)]))
    );
    assert!(shard.exists());
}

#[test]
fn corruption_leaves_a_diagnostic_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let dir = Path::new("/repo");
    let shard = store.shard_path(dir).unwrap();
    fs::write(&shard, [0, 0, 0, 4, 0x7f, 0xff, 0xff, 0xff, 0, b'/']).unwrap();

    assert_eq!(store.read(dir).unwrap(), None);

    let stem = shard.file_stem().unwrap().to_string_lossy().into_owned();
    let names: Vec<String> = fs::read_dir(tmp.path().join("diagnostics"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let prefix = format!("{}{stem}-", vstatus_storage::SNAPSHOT_PREFIX);
    assert!(
        names.iter().any(|name| name.starts_with(&prefix) && name.ends_with(".bin")),
        "missing raw snapshot in {names:?}"
    );
    assert!(
        names.iter().any(|name| name.starts_with(&prefix) && name.ends_with(".hex")),
        "missing hex snapshot in {names:?}"
    );
}

#[test]
fn write_over_corrupt_shard_succeeds_and_keeps_only_the_new_record() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let dir = Path::new("/repo/src");
    let shard = store.shard_path(dir).unwrap();
    fs::write(&shard, b"definitely not a shard").unwrap();

    store
        .write(dir, &FsTag::local(), &files(&[("a", CONFLICT_CONTENT)]))
        .unwrap();

    assert_eq!(
        store.read(dir).unwrap(),
        Some(files(&[("a", CONFLICT_CONTENT)]))
    );
    let decoded = vstatus_storage::decode_shard(&fs::read(&shard).unwrap(), &shard).unwrap();
    assert_eq!(decoded.len(), 1);
}

#[test]
fn stale_temp_files_are_never_read_as_shards() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Path::new("/repo/src");
    {
        let store = open_store(&tmp, &["/repo"]);
        store
            .write(dir, &FsTag::local(), &files(&[("a", CONFLICT_CONTENT)]))
            .unwrap();
        let shard = store.shard_path(dir).unwrap();
        let mut tmp_name = shard.clone().into_os_string();
        tmp_name.push(vstatus_storage::TEMP_SUFFIX);
        fs::write(&tmp_name, b"half-written").unwrap();
    }

    let store = open_store(&tmp, &["/repo"]);
    let report = store.bootstrap().unwrap();
    assert_eq!(report.shards_scanned, 1);
    assert_eq!(report.corrupt_shards, 0);
    assert_eq!(
        store.read(dir).unwrap(),
        Some(files(&[("a", CONFLICT_CONTENT)]))
    );
}

#[test]
fn failed_write_leaves_disk_and_indices_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let src = Path::new("/repo/src");
    store
        .write(src, &FsTag::local(), &files(&[("a", CONFLICT_CONTENT)]))
        .unwrap();
    let shard = store.shard_path(src).unwrap();
    let before = fs::read(&shard).unwrap();

    // A directory squatting on the temp path makes staging the new shard fail.
    let mut blocker = shard.clone().into_os_string();
    blocker.push(vstatus_storage::TEMP_SUFFIX);
    fs::create_dir(&blocker).unwrap();
    fs::write(Path::new(&blocker).join("keep"), b"").unwrap();

    let err = store
        .write(src, &FsTag::local(), &files(&[("b", CONFLICT_CONTENT)]))
        .unwrap_err();
    assert!(matches!(err, CacheError::Shard(_)), "{err:?}");
    assert_eq!(fs::read(&shard).unwrap(), before);
    assert_eq!(
        store.read(src).unwrap(),
        Some(files(&[("a", CONFLICT_CONTENT)]))
    );
    assert_eq!(
        store.lookup(Some(src), Category::Conflicted),
        paths(&["/repo/src/a"])
    );

    fs::remove_dir_all(&blocker).unwrap();
    store
        .write(src, &FsTag::local(), &files(&[("b", CONFLICT_CONTENT)]))
        .unwrap();
    assert_eq!(
        store.lookup(Some(src), Category::Conflicted),
        paths(&["/repo/src/b"])
    );
}
