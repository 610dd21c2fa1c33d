#![no_main]

use std::path::Path;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use vstatus_storage::{FsTag, ShardStore, ShardStoreOptions, StatusMap, StatusRecord};

const MAX_INPUT_SIZE: usize = 256 * 1024;
const DIRECTORIES: [&str; 4] = ["/repo", "/repo/src", "C:\\work\\tree", "/ünïcödé/𝄞"];

fn run_input(input: &[u8]) {
    let selector = input.first().copied().unwrap_or(0);
    let bytes = &input[..input.len().min(MAX_INPUT_SIZE)];

    // Pure decoding must never panic either.
    let _ = vstatus_storage::decode_shard(bytes, Path::new("fuzz.bin"));

    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let options = ShardStoreOptions {
        buckets: 1,
        open_attempts: 1,
        open_backoff: Duration::ZERO,
        diagnostics_dir: Some(dir.path().join("diagnostics")),
        ..ShardStoreOptions::default()
    };
    let store = ShardStore::open(dir.path().join("cache"), options).expect("failed to open store");

    let directory = DIRECTORIES[usize::from(selector) % DIRECTORIES.len()];
    let shard = store.shard_path(directory);
    std::fs::write(&shard, bytes).expect("failed to write shard bytes");

    let _ = store.read(directory);

    std::fs::write(&shard, bytes).expect("failed to write shard bytes");
    let children: StatusMap = [("a".to_owned(), StatusRecord::file(u32::from(selector)))]
        .into_iter()
        .collect();
    // Whatever was there before, the merged shard must hold the new record.
    if store.write(directory, Some((&FsTag::local(), &children))).is_ok() {
        if let Ok(entry) = store.read(directory) {
            assert_eq!(entry.map(|entry| entry.children), Some(children));
        }
    }

    std::fs::write(&shard, bytes).expect("failed to write shard bytes");
    let _ = store.write(directory, None);

    std::fs::write(&shard, bytes).expect("failed to write shard bytes");
    let _ = store.scan_shard(&shard, |_| {});
}

fuzz_target!(|data: &[u8]| {
    run_input(data);
});
