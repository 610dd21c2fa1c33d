use std::path::Path;

use vstatus_cache::status::{CONFLICT_CONTENT, MODIFIED_LOCALLY_CONTENT, UPTODATE};
use vstatus_cache::{Category, FsTag};

use super::support::{files, open_store, paths};

#[test]
fn repo_src_scenario() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let src = Path::new("/repo/src");

    store
        .write(
            src,
            &FsTag::local(),
            &files(&[
                ("a.txt", MODIFIED_LOCALLY_CONTENT),
                ("b.txt", CONFLICT_CONTENT),
                ("c.txt", UPTODATE),
            ]),
        )
        .unwrap();

    assert_eq!(
        store.read(src).unwrap(),
        Some(files(&[
            ("a.txt", MODIFIED_LOCALLY_CONTENT),
            ("b.txt", CONFLICT_CONTENT)
        ]))
    );
    assert_eq!(
        store.lookup(Some(src), Category::Conflicted),
        paths(&["/repo/src/b.txt"])
    );
    assert_eq!(
        store.lookup(Some(src), Category::Valuable),
        paths(&["/repo/src/a.txt", "/repo/src/b.txt"])
    );
    assert!(store.lookup(Some(src), Category::Ignored).is_empty());

    // The working-copy root links down to the directory with content.
    assert_eq!(
        store.lookup(Some(Path::new("/repo")), Category::Conflicted),
        paths(&["/repo/src"])
    );
    assert_eq!(
        store.lookup(None, Category::Valuable),
        paths(&["/repo/src/a.txt", "/repo/src/b.txt"])
    );
}

#[test]
fn directory_flag_survives_persistence() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let mut children = files(&[("file.rs", MODIFIED_LOCALLY_CONTENT)]);
    children.insert(
        "nested".to_owned(),
        vstatus_cache::StatusRecord::directory(MODIFIED_LOCALLY_CONTENT),
    );

    store
        .write(Path::new("/repo"), &FsTag::new("rfs://build-host/"), &children)
        .unwrap();

    let entry = store.read_entry(Path::new("/repo")).unwrap().unwrap();
    assert_eq!(entry.fs_tag, FsTag::new("rfs://build-host/"));
    assert!(entry.children["nested"].is_directory());
    assert!(!entry.children["file.rs"].is_directory());
    assert_eq!(entry.children, children);
}
