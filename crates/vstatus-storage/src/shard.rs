use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec::{decode_payload, encode_record, write_raw_units, RecordReader};
use crate::diagnostics::snapshot_corrupt_shard;
use crate::error::ShardError;
use crate::record::{DirectoryEntry, FsTag, StatusMap};
use crate::write::{
    open_temp_file, remove_file_best_effort, rename_overwrite, sync_dir_best_effort, TEMP_SUFFIX,
};

pub const SHARD_EXTENSION: &str = "bin";

pub const DEFAULT_BUCKETS: u32 = 173;
pub const DEFAULT_BUCKET_OFFSET: u32 = 172;
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 7;
pub const DEFAULT_OPEN_BACKOFF: Duration = Duration::from_millis(30);
/// Longest single pause between two open attempts.
pub const MAX_OPEN_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardStoreOptions {
    pub buckets: u32,
    pub bucket_offset: u32,
    /// How many times opening a shard is attempted before giving up.
    pub open_attempts: u32,
    /// Delay unit between open attempts; attempt `n` waits `open_backoff * n`,
    /// capped at [`MAX_OPEN_BACKOFF`].
    pub open_backoff: Duration,
    /// Where corrupt-shard snapshots go. `None` means the system temp dir.
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for ShardStoreOptions {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            bucket_offset: DEFAULT_BUCKET_OFFSET,
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            open_backoff: DEFAULT_OPEN_BACKOFF,
            diagnostics_dir: None,
        }
    }
}

/// 31-multiplier string hash over UTF-16 code units.
///
/// Shard placement has to be identical across processes, platforms and
/// releases, so this never goes through `std::hash`.
pub fn java_string_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

pub fn shard_id(directory: &str, buckets: u32, bucket_offset: u32) -> u64 {
    let bucket = i64::from(java_string_hash(directory)).rem_euclid(i64::from(buckets.max(1)));
    bucket as u64 + u64::from(bucket_offset)
}

/// Result of scanning one shard file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Complete { entries: usize },
    /// The shard was corrupt past its first `entries` records; it has been
    /// deleted and the visited records stay valid.
    Corrupt { entries: usize },
    /// The shard disappeared before it could be opened.
    Missing,
}

/// Directory-keyed records spread over a fixed set of shard files.
///
/// Every shard access is serialized through one store-wide lock. Corrupt
/// shards are snapshotted and deleted; their records read back as unknown.
#[derive(Debug)]
pub struct ShardStore {
    root: PathBuf,
    options: ShardStoreOptions,
    lock: Mutex<()>,
}

impl ShardStore {
    pub fn open(root: impl Into<PathBuf>, options: ShardStoreOptions) -> Result<Self, ShardError> {
        if options.buckets == 0 {
            return Err(ShardError::InvalidOptions("bucket count must be positive"));
        }
        if options.open_attempts == 0 {
            return Err(ShardError::InvalidOptions("open attempts must be positive"));
        }

        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self {
            root,
            options,
            lock: Mutex::new(()),
        };
        store.remove_stale_temp_files()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ShardStoreOptions {
        &self.options
    }

    pub fn shard_path(&self, directory: &str) -> PathBuf {
        let id = shard_id(directory, self.options.buckets, self.options.bucket_offset);
        self.root.join(format!("{id}.{SHARD_EXTENSION}"))
    }

    /// Whether `id` can be produced by [`shard_id`] under this store's options.
    pub fn owns_shard_id(&self, id: u64) -> bool {
        let first = u64::from(self.options.bucket_offset);
        (first..first + u64::from(self.options.buckets)).contains(&id)
    }

    /// Point lookup of the record for `directory`.
    ///
    /// Only records whose path length matches are decoded; every other
    /// payload is skipped unread. A corrupt shard yields `Ok(None)`.
    pub fn read(&self, directory: &str) -> Result<Option<DirectoryEntry>, ShardError> {
        let shard = self.shard_path(directory);
        let _guard = self.lock.lock();

        let Some(file) = self.open_with_retry(&shard)? else {
            return Ok(None);
        };
        match find_record(file, &shard, directory) {
            Ok(entry) => Ok(entry),
            Err(err) if err.is_corrupt() => {
                self.discard_corrupt(&shard, &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Replaces the record for `directory`, or removes it when `entry` is
    /// `None` or has no children.
    ///
    /// The new shard is assembled in `<id>.bin.new` (new record first, then
    /// every other record of the old shard copied byte for byte) and
    /// installed with a single rename. A shard left without records is
    /// deleted.
    pub fn write(
        &self,
        directory: &str,
        entry: Option<(&FsTag, &StatusMap)>,
    ) -> Result<(), ShardError> {
        let entry = entry.filter(|(_, children)| !children.is_empty());
        let record = match entry {
            Some((fs_tag, children)) => Some(encode_record(directory, fs_tag, children)?),
            None => None,
        };

        let shard = self.shard_path(directory);
        let _guard = self.lock.lock();

        let old = self.open_with_retry(&shard)?;
        if old.is_none() && record.is_none() {
            return Ok(());
        }

        let (tmp_path, tmp) = open_temp_file(&shard)?;
        let staged = self.stage(tmp, record.as_deref(), old, &shard, directory);
        let len = match staged {
            Ok(len) => len,
            Err(err) => {
                remove_file_best_effort(&tmp_path, "failed shard write");
                return Err(err);
            }
        };

        if len == 0 {
            remove_file_best_effort(&tmp_path, "empty shard");
            remove_file_best_effort(&shard, "empty shard");
            sync_dir_best_effort(&self.root, "remove empty shard");
            return Ok(());
        }

        if let Err(err) = rename_overwrite(&tmp_path, &shard) {
            tracing::warn!(
                target: "vstatus.storage",
                shard = %shard.display(),
                error = %err,
                "failed to install shard; keeping previous version"
            );
            remove_file_best_effort(&tmp_path, "failed shard rename");
            return Err(err.into());
        }
        sync_dir_best_effort(&self.root, "install shard");
        Ok(())
    }

    /// Writes the merged shard into `tmp` and returns its final length.
    fn stage(
        &self,
        tmp: File,
        record: Option<&[u8]>,
        old: Option<File>,
        shard: &Path,
        directory: &str,
    ) -> Result<u64, ShardError> {
        let mut out = BufWriter::new(tmp);
        let new_len = match record {
            Some(record) => {
                out.write_all(record)?;
                record.len() as u64
            }
            None => 0,
        };

        let mut corrupt = None;
        let mut len = new_len;
        if let Some(old) = old {
            match copy_other_records(old, shard, directory, &mut out) {
                Ok(copied) => len += copied,
                Err(err) if err.is_corrupt() => corrupt = Some(err),
                Err(err) => return Err(err),
            }
        }

        let tmp = out.into_inner().map_err(|err| err.into_error())?;
        if let Some(err) = corrupt {
            // Drop whatever made it across from the old shard.
            tmp.set_len(new_len)?;
            len = new_len;
            self.report_corrupt(shard, &err);
        }
        if len > 0 {
            tmp.sync_all()?;
        }
        Ok(len)
    }

    /// Shard files under the root, sorted by shard id. Temp files, anything
    /// else that is not `<digits>.bin`, and shards outside the configured id
    /// range (left behind by a different bucket layout) are ignored.
    pub fn shard_files(&self) -> Result<Vec<PathBuf>, ShardError> {
        let mut shards = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().and_then(parse_shard_id) else {
                continue;
            };
            if !self.owns_shard_id(id) {
                tracing::debug!(
                    target: "vstatus.storage",
                    path = %entry.path().display(),
                    "skipping shard outside the configured bucket range"
                );
                continue;
            }
            if entry.file_type()?.is_file() {
                shards.push((id, entry.path()));
            }
        }
        shards.sort();
        Ok(shards.into_iter().map(|(_, path)| path).collect())
    }

    /// Decodes every record of `shard` in file order, handing each to
    /// `visit`. The store lock is held for the whole shard.
    pub fn scan_shard<F>(&self, shard: &Path, mut visit: F) -> Result<ScanOutcome, ShardError>
    where
        F: FnMut(DirectoryEntry),
    {
        let _guard = self.lock.lock();

        let Some(file) = self.open_with_retry(shard)? else {
            return Ok(ScanOutcome::Missing);
        };
        let mut entries = 0usize;
        match visit_records(file, shard, &mut visit, &mut entries) {
            Ok(()) => Ok(ScanOutcome::Complete { entries }),
            Err(err) if err.is_corrupt() => {
                self.discard_corrupt(shard, &err);
                Ok(ScanOutcome::Corrupt { entries })
            }
            Err(err) => Err(err),
        }
    }

    /// Opens `path`, retrying transient failures with a linearly growing
    /// delay. A missing file is `Ok(None)`, never retried.
    fn open_with_retry(&self, path: &Path) -> Result<Option<File>, ShardError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match open_shard_file(path) {
                Ok(file) => return Ok(Some(file)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) if attempt < self.options.open_attempts => {
                    tracing::debug!(
                        target: "vstatus.storage",
                        shard = %path.display(),
                        attempt,
                        error = %err,
                        "failed to open shard; retrying"
                    );
                    thread::sleep(backoff_delay(self.options.open_backoff, attempt));
                }
                Err(err) => {
                    tracing::warn!(
                        target: "vstatus.storage",
                        shard = %path.display(),
                        attempts = attempt,
                        error = %err,
                        "giving up opening shard"
                    );
                    return Err(err.into());
                }
            }
        }
    }

    fn report_corrupt(&self, shard: &Path, err: &ShardError) {
        let dir = self
            .options
            .diagnostics_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let snapshot = snapshot_corrupt_shard(shard, &dir);
        let offset = match err {
            ShardError::Corrupt { offset, .. } => Some(*offset),
            _ => None,
        };
        tracing::warn!(
            target: "vstatus.storage",
            shard = %shard.display(),
            offset,
            error = %err,
            snapshot = snapshot.as_ref().map(|path| path.display().to_string()),
            "discarding corrupt shard"
        );
    }

    fn discard_corrupt(&self, shard: &Path, err: &ShardError) {
        self.report_corrupt(shard, err);
        remove_file_best_effort(shard, "corrupt shard");
        sync_dir_best_effort(&self.root, "remove corrupt shard");
    }

    fn remove_stale_temp_files(&self) -> Result<(), ShardError> {
        let stale_suffix = format!(".{SHARD_EXTENSION}{TEMP_SUFFIX}");
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if name
                .to_str()
                .is_some_and(|name| name.ends_with(&stale_suffix))
            {
                tracing::debug!(
                    target: "vstatus.storage",
                    path = %entry.path().display(),
                    "removing temp file left by an interrupted write"
                );
                remove_file_best_effort(&entry.path(), "stale temp file");
            }
        }
        Ok(())
    }
}

fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    unit.checked_mul(attempt)
        .map_or(MAX_OPEN_BACKOFF, |delay| delay.min(MAX_OPEN_BACKOFF))
}

#[cfg(not(test))]
fn open_shard_file(path: &Path) -> io::Result<File> {
    File::open(path)
}

#[cfg(test)]
thread_local! {
    /// Number of upcoming shard opens on this thread that fail with `Other`.
    static FAILING_OPENS: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
}

#[cfg(test)]
fn open_shard_file(path: &Path) -> io::Result<File> {
    let failing = FAILING_OPENS.with(|n| n.replace(n.get().saturating_sub(1)));
    if failing > 0 {
        return Err(io::Error::other("shard temporarily locked"));
    }
    File::open(path)
}

fn parse_shard_id(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(SHARD_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn shard_reader(file: File, shard: &Path) -> Result<RecordReader<BufReader<File>>, ShardError> {
    let len = file.metadata()?.len();
    Ok(RecordReader::new(BufReader::new(file), len, shard))
}

fn find_record(
    file: File,
    shard: &Path,
    directory: &str,
) -> Result<Option<DirectoryEntry>, ShardError> {
    let wanted: Vec<u16> = directory.encode_utf16().collect();
    let mut reader = shard_reader(file, shard)?;

    while let Some(header) = reader.next_header()? {
        if header.path_units as usize != wanted.len() {
            reader.skip(header.body_len())?;
            continue;
        }
        if reader.read_units(header.path_units)? != wanted {
            reader.skip(u64::from(header.payload_len))?;
            continue;
        }

        let payload_offset = reader.offset();
        let payload = reader.read_bytes(header.payload_len)?;
        let (fs_tag, children) = decode_payload(&payload, payload_offset, shard)?;
        return Ok(Some(DirectoryEntry {
            directory: directory.to_owned(),
            fs_tag,
            children,
        }));
    }
    Ok(None)
}

/// Copies every record except the one for `directory` to `out`, returning
/// the number of bytes copied. Payloads are never decoded.
fn copy_other_records<W: Write>(
    old: File,
    shard: &Path,
    directory: &str,
    out: &mut W,
) -> Result<u64, ShardError> {
    let skipped: Vec<u16> = directory.encode_utf16().collect();
    let mut reader = shard_reader(old, shard)?;
    let mut copied = 0u64;

    while let Some(header) = reader.next_header()? {
        if header.path_units as usize != skipped.len() {
            header.write_to(out)?;
            reader.copy_to(header.body_len(), out)?;
            copied += header.record_len();
            continue;
        }

        let path = reader.read_units(header.path_units)?;
        if path == skipped {
            reader.skip(u64::from(header.payload_len))?;
            continue;
        }
        header.write_to(out)?;
        write_raw_units(out, &path)?;
        reader.copy_to(u64::from(header.payload_len), out)?;
        copied += header.record_len();
    }
    Ok(copied)
}

fn visit_records<F>(
    file: File,
    shard: &Path,
    visit: &mut F,
    entries: &mut usize,
) -> Result<(), ShardError>
where
    F: FnMut(DirectoryEntry),
{
    let mut reader = shard_reader(file, shard)?;
    while let Some(header) = reader.next_header()? {
        visit(reader.read_entry(header)?);
        *entries += 1;
    }
    Ok(())
}
