use std::path::Path;

use proptest::prelude::*;
use vstatus_cache::status::{CONFLICT_TREE, EXCLUDED, NOT_MANAGED, UPTODATE};
use vstatus_cache::{FsTag, StatusMap, StatusMasks, StatusRecord};

use super::support::{bucket_mate, files, open_store};

fn status() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(UPTODATE),
        Just(EXCLUDED),
        Just(NOT_MANAGED),
        Just(CONFLICT_TREE),
        0u32..(1 << 30),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn write_then_read_returns_the_valuable_subset(
        directory in "/[a-z]{1,8}(/[a-zA-Z0-9 ._é€😀-]{1,10}){0,3}",
        children in prop::collection::btree_map(
            "[a-zA-Z0-9 ._é€😀-]{1,12}",
            (status(), any::<bool>()),
            0..24,
        ),
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp, &["/"]);
        let children: StatusMap = children
            .into_iter()
            .map(|(name, (status, is_dir))| (name, StatusRecord::new(status, is_dir)))
            .collect();

        store.write(Path::new(&directory), &FsTag::local(), &children).unwrap();

        let masks = StatusMasks::default();
        let expected: StatusMap = children
            .iter()
            .filter(|(_, record)| masks.is_valuable(record.status()))
            .map(|(name, record)| (name.clone(), *record))
            .collect();
        let read = store.read(Path::new(&directory)).unwrap();
        if expected.is_empty() {
            prop_assert_eq!(read, None);
        } else {
            prop_assert_eq!(read, Some(expected));
        }
    }
}

#[test]
fn empty_write_deletes_record_and_last_shard() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let dir = Path::new("/repo/src");
    let shard = store.shard_path(dir).unwrap();

    store
        .write(dir, &FsTag::local(), &files(&[("a.rs", CONFLICT_TREE)]))
        .unwrap();
    assert!(shard.exists());

    // Only non-valuable children left.
    store
        .write(dir, &FsTag::local(), &files(&[("a.rs", UPTODATE)]))
        .unwrap();
    assert_eq!(store.read(dir).unwrap(), None);
    assert!(!shard.exists());
}

#[test]
fn empty_write_shrinks_a_shared_shard() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let a = Path::new("/repo/a");
    let b = bucket_mate(&store, a);
    let shard = store.shard_path(a).unwrap();

    store
        .write(a, &FsTag::local(), &files(&[("x", CONFLICT_TREE)]))
        .unwrap();
    store
        .write(&b, &FsTag::local(), &files(&[("y", CONFLICT_TREE)]))
        .unwrap();
    let before = std::fs::metadata(&shard).unwrap().len();

    store.remove(a).unwrap();
    assert_eq!(store.read(a).unwrap(), None);
    assert!(std::fs::metadata(&shard).unwrap().len() < before);
    assert_eq!(
        store.read(&b).unwrap(),
        Some(files(&[("y", CONFLICT_TREE)]))
    );
}

#[test]
fn writes_to_a_bucket_mate_leave_other_records_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let a = Path::new("/repo/a");
    let b = bucket_mate(&store, a);
    let b_children = files(&[("one", CONFLICT_TREE), ("two", 1 << 7)]);

    store.write(&b, &FsTag::local(), &b_children).unwrap();
    let b_before = store.read_entry(&b).unwrap();

    store
        .write(a, &FsTag::local(), &files(&[("x", 1 << 7)]))
        .unwrap();
    store
        .write(a, &FsTag::new("rfs://other/"), &files(&[("z", 1 << 5)]))
        .unwrap();

    assert_eq!(store.read_entry(&b).unwrap(), b_before);
    assert_eq!(store.read(&b).unwrap(), Some(b_children));
}
