use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// File name prefix of corrupt-shard snapshots.
pub const SNAPSHOT_PREFIX: &str = "vstatus-corrupt-shard-";

const MAX_SNAPSHOT_BYTES: u64 = 64 * 1024 * 1024;
const HEX_BYTES_PER_LINE: usize = 32;

/// Copies a corrupt shard into `dir` for postmortem analysis: the raw bytes
/// as `<prefix><shard>-XXXX.bin` and an offset-annotated hex dump next to it
/// as `.hex`.
///
/// Returns the path of the raw copy. Failures are logged and swallowed; a
/// missing snapshot never affects the caller.
pub(crate) fn snapshot_corrupt_shard(shard: &Path, dir: &Path) -> Option<PathBuf> {
    match write_snapshot(shard, dir) {
        Ok(path) => Some(path),
        Err(err) => {
            tracing::debug!(
                target: "vstatus.storage",
                shard = %shard.display(),
                dir = %dir.display(),
                error = %err,
                "failed to snapshot corrupt shard"
            );
            None
        }
    }
}

fn write_snapshot(shard: &Path, dir: &Path) -> io::Result<PathBuf> {
    let mut bytes = Vec::new();
    fs::File::open(shard)?
        .take(MAX_SNAPSHOT_BYTES)
        .read_to_end(&mut bytes)?;

    let stem = shard
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("shard");

    fs::create_dir_all(dir)?;
    let mut raw = tempfile::Builder::new()
        .prefix(&format!("{SNAPSHOT_PREFIX}{stem}-"))
        .suffix(".bin")
        .tempfile_in(dir)?;
    raw.write_all(&bytes)?;
    let (_, raw_path) = raw.keep().map_err(|err| err.error)?;

    fs::write(raw_path.with_extension("hex"), hex_dump(&bytes))?;
    Ok(raw_path)
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + bytes.len() / HEX_BYTES_PER_LINE * 11);
    for (line, chunk) in bytes.chunks(HEX_BYTES_PER_LINE).enumerate() {
        let _ = writeln!(
            out,
            "{:08x}: {}",
            line * HEX_BYTES_PER_LINE,
            hex::encode(chunk)
        );
    }
    out
}
