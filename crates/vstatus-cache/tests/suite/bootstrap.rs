use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use vstatus_cache::status::{
    CONFLICT_CONTENT, EXCLUDED, MODIFIED_LOCALLY_CONTENT, NEW_LOCALLY, UPTODATE,
};
use vstatus_cache::{BootstrapThresholds, Category, FsTag, StoreOptions};
use vstatus_storage::{ShardStore, DEFAULT_BUCKETS, DEFAULT_BUCKET_OFFSET};

use super::support::{cache_root, files, open_store, open_store_with, paths, shard_options, store_options};

#[derive(Clone, Default)]
struct SharedLogBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedLogBuffer {
    fn as_string(&self) -> String {
        let bytes = self.0.lock().expect("log buffer mutex poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedLogWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self.0.lock().expect("log buffer mutex poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedLogBuffer {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(self.0.clone())
    }
}

/// Writes records straight into the shard files, bypassing the facade's
/// filtering, and returns the set of shard files created.
fn populate(tmp: &tempfile::TempDir) -> BTreeSet<PathBuf> {
    let shards = ShardStore::open(cache_root(tmp), shard_options(tmp)).unwrap();
    let entries = [
        (
            "/repo/src",
            files(&[
                ("a.rs", MODIFIED_LOCALLY_CONTENT),
                ("b.rs", CONFLICT_CONTENT | MODIFIED_LOCALLY_CONTENT),
            ]),
        ),
        (
            "/repo/src/gen",
            files(&[("out.rs", EXCLUDED), ("keep.rs", UPTODATE)]),
        ),
        ("/repo/docs", files(&[("new.md", NEW_LOCALLY)])),
        ("/outside/tmp", files(&[("x.rs", MODIFIED_LOCALLY_CONTENT)])),
    ];

    let mut created = BTreeSet::new();
    for (directory, children) in &entries {
        shards
            .write(directory, Some((&FsTag::local(), children)))
            .unwrap();
        created.insert(shards.shard_path(directory));
    }
    created
}

fn unused_shard(tmp: &tempfile::TempDir, used: &BTreeSet<PathBuf>) -> PathBuf {
    (DEFAULT_BUCKET_OFFSET..DEFAULT_BUCKET_OFFSET + DEFAULT_BUCKETS)
        .map(|id| cache_root(tmp).join(format!("{id}.bin")))
        .find(|path| !used.contains(path))
        .unwrap()
}

#[test]
fn bootstrap_rebuilds_every_index() {
    let tmp = tempfile::tempdir().unwrap();
    let created = populate(&tmp);
    let store = open_store(&tmp, &["/repo"]);
    assert!(!store.is_ready());

    let report = store.bootstrap().unwrap();
    assert!(store.is_ready());
    assert_eq!(report.shards_scanned, created.len());
    assert_eq!(report.entries, 4);

    let repo = Path::new("/repo");
    let src = Path::new("/repo/src");
    let gen = Path::new("/repo/src/gen");

    assert_eq!(
        store.lookup(Some(src), Category::Valuable),
        paths(&["/repo/src/a.rs", "/repo/src/b.rs"])
    );
    assert_eq!(
        store.lookup(Some(repo), Category::Valuable),
        paths(&["/repo/docs", "/repo/src"])
    );
    assert_eq!(
        store.lookup_recursive(repo, Category::Valuable),
        paths(&["/repo/docs/new.md", "/repo/src/a.rs", "/repo/src/b.rs"])
    );
    assert_eq!(
        store.lookup(None, Category::Valuable),
        paths(&["/repo/docs/new.md", "/repo/src/a.rs", "/repo/src/b.rs"])
    );

    assert_eq!(
        store.lookup(Some(src), Category::Conflicted),
        paths(&["/repo/src/b.rs"])
    );
    assert_eq!(
        store.lookup(Some(repo), Category::Conflicted),
        paths(&["/repo/src"])
    );

    assert_eq!(
        store.lookup(Some(gen), Category::Ignored),
        paths(&["/repo/src/gen/out.rs"])
    );
    assert_eq!(
        store.lookup(Some(src), Category::Ignored),
        paths(&["/repo/src/gen"])
    );

    // On disk, but not managed.
    for category in Category::ALL {
        assert!(store
            .lookup(Some(Path::new("/outside/tmp")), category)
            .is_empty());
        assert!(!store
            .lookup(None, category)
            .contains(Path::new("/outside/tmp/x.rs")));
    }
}

#[test]
fn bootstrap_counts_modified_and_new_files() {
    let tmp = tempfile::tempdir().unwrap();
    populate(&tmp);
    let store = open_store(&tmp, &["/repo"]);

    let report = store.bootstrap().unwrap();
    // Locally new files are local modifications too.
    assert_eq!(report.modified_files, 4);
    assert_eq!(
        report.modified_by_root,
        BTreeMap::from([
            (PathBuf::from("/outside/tmp"), 1),
            (PathBuf::from("/repo"), 3),
        ])
    );
    assert_eq!(report.new_files, 1);
    assert_eq!(
        report.new_by_folder,
        BTreeMap::from([(PathBuf::from("/repo/docs"), 1)])
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["entries"], 4);
}

#[test]
fn bootstrap_discards_a_corrupt_shard_and_keeps_going() {
    let tmp = tempfile::tempdir().unwrap();
    let created = populate(&tmp);
    let corrupt = unused_shard(&tmp, &created);
    fs::write(&corrupt, [0, 0, 0, 5, 0, 0]).unwrap();

    let store = open_store(&tmp, &["/repo"]);
    let report = store.bootstrap().unwrap();

    assert_eq!(report.corrupt_shards, 1);
    assert_eq!(report.shards_scanned, created.len() + 1);
    assert_eq!(report.entries, 4);
    assert!(!corrupt.exists());
    assert_eq!(
        store.lookup(Some(Path::new("/repo/src")), Category::Conflicted),
        paths(&["/repo/src/b.rs"])
    );
}

#[test]
fn bootstrap_drops_memory_only_membership() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(&tmp, &["/repo"]);
    let build = Path::new("/repo/build");

    store
        .write(build, &FsTag::local(), &files(&[("out.o", EXCLUDED)]))
        .unwrap();
    assert_eq!(
        store.lookup(Some(build), Category::Ignored),
        paths(&["/repo/build/out.o"])
    );

    store.bootstrap().unwrap();
    assert!(store.lookup(None, Category::Ignored).is_empty());
}

#[test]
fn heavy_bootstrap_emits_one_warning_naming_the_heaviest_folders() {
    let tmp = tempfile::tempdir().unwrap();
    populate(&tmp);
    let options = StoreOptions {
        thresholds: BootstrapThresholds {
            new_files_warning_threshold: 0,
            modified_files_warning_threshold: 100,
            report_top_n: 1,
        },
        ..store_options(&tmp)
    };
    let store = open_store_with(&tmp, &["/repo"], options);

    let logs = SharedLogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::WARN)
        .with_writer(logs.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, || store.bootstrap().unwrap());

    let text = logs.as_string();
    assert_eq!(
        text.matches("unusually many changed files").count(),
        1,
        "expected a single threshold warning, got:\n{text}"
    );
    assert!(text.contains("/repo=3"), "{text}");
    assert!(text.contains("/repo/docs=1"), "{text}");
    assert!(!text.contains("/outside/tmp=1"), "{text}");
}
