use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use vstatus_cache::status::{CONFLICT_CONTENT, MODIFIED_LOCALLY_CONTENT, UPTODATE};
use vstatus_cache::{Category, FsTag};

use super::support::{files, open_store};

const THREADS: usize = 8;
const DIRS_PER_THREAD: usize = 20;

fn directory(thread: usize, dir: usize) -> PathBuf {
    PathBuf::from(format!("/repo/t{thread}/d{dir}"))
}

#[test]
fn concurrent_writers_and_bootstraps_agree_with_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(&tmp, &["/repo"]));
    let done = Arc::new(AtomicBool::new(false));

    let bootstrapper = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                store.bootstrap().unwrap();
            }
        })
    };

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for d in 0..DIRS_PER_THREAD {
                    let dir = directory(t, d);
                    // First write something that gets replaced.
                    store
                        .write(&dir, &FsTag::local(), &files(&[("old.rs", CONFLICT_CONTENT)]))
                        .unwrap();
                    store
                        .write(
                            &dir,
                            &FsTag::local(),
                            &files(&[
                                ("a.rs", MODIFIED_LOCALLY_CONTENT),
                                ("b.rs", CONFLICT_CONTENT),
                                ("c.rs", UPTODATE),
                            ]),
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    bootstrapper.join().unwrap();

    let mut expected_valuable = BTreeSet::new();
    let mut expected_conflicted = BTreeSet::new();
    for t in 0..THREADS {
        for d in 0..DIRS_PER_THREAD {
            let dir = directory(t, d);
            assert_eq!(
                store.read(&dir).unwrap(),
                Some(files(&[
                    ("a.rs", MODIFIED_LOCALLY_CONTENT),
                    ("b.rs", CONFLICT_CONTENT)
                ])),
                "{}",
                dir.display()
            );
            expected_valuable.insert(dir.join("a.rs"));
            expected_valuable.insert(dir.join("b.rs"));
            expected_conflicted.insert(dir.join("b.rs"));
        }
    }

    let repo = Path::new("/repo");
    assert_eq!(store.lookup(None, Category::Valuable), expected_valuable);
    assert_eq!(store.lookup_recursive(repo, Category::Conflicted), expected_conflicted);

    store.bootstrap().unwrap();
    assert_eq!(store.lookup(None, Category::Valuable), expected_valuable);
    assert_eq!(store.lookup_recursive(repo, Category::Conflicted), expected_conflicted);
    assert_eq!(store.lookup(Some(repo), Category::Valuable).len(), THREADS);
}
