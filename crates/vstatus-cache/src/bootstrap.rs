use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_NEW_FILES_WARNING_THRESHOLD: usize = 1000;
pub const DEFAULT_MODIFIED_FILES_WARNING_THRESHOLD: usize = 5000;
pub const DEFAULT_REPORT_TOP_N: usize = 10;

/// When a bootstrap is noisy enough to deserve a warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootstrapThresholds {
    pub new_files_warning_threshold: usize,
    pub modified_files_warning_threshold: usize,
    pub report_top_n: usize,
}

impl Default for BootstrapThresholds {
    fn default() -> Self {
        Self {
            new_files_warning_threshold: DEFAULT_NEW_FILES_WARNING_THRESHOLD,
            modified_files_warning_threshold: DEFAULT_MODIFIED_FILES_WARNING_THRESHOLD,
            report_top_n: DEFAULT_REPORT_TOP_N,
        }
    }
}

/// Counters gathered while a bootstrap scans the cache. Purely diagnostic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub shards_scanned: usize,
    pub corrupt_shards: usize,
    pub unreadable_shards: usize,
    pub entries: usize,
    pub modified_files: usize,
    pub new_files: usize,
    /// Modified files grouped by their topmost managed ancestor.
    pub modified_by_root: BTreeMap<PathBuf, usize>,
    /// Locally-new files grouped by the folder containing them.
    pub new_by_folder: BTreeMap<PathBuf, usize>,
    pub elapsed: Duration,
}

impl BootstrapReport {
    pub fn exceeds(&self, thresholds: &BootstrapThresholds) -> bool {
        self.new_files > thresholds.new_files_warning_threshold
            || self.modified_files > thresholds.modified_files_warning_threshold
    }

    /// The `n` heaviest groups, largest first; ties by path.
    pub fn heaviest(groups: &BTreeMap<PathBuf, usize>, n: usize) -> Vec<(PathBuf, usize)> {
        let mut ranked: Vec<_> = groups
            .iter()
            .map(|(path, count)| (path.clone(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    pub(crate) fn log(&self, thresholds: &BootstrapThresholds) {
        tracing::info!(
            target: "vstatus.cache",
            shards = self.shards_scanned,
            corrupt = self.corrupt_shards,
            unreadable = self.unreadable_shards,
            entries = self.entries,
            modified = self.modified_files,
            new = self.new_files,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "status cache bootstrap finished"
        );

        if !self.exceeds(thresholds) {
            return;
        }
        let n = thresholds.report_top_n;
        tracing::warn!(
            target: "vstatus.cache",
            modified = self.modified_files,
            new = self.new_files,
            top_modified_roots = %format_groups(&Self::heaviest(&self.modified_by_root, n)),
            top_new_folders = %format_groups(&Self::heaviest(&self.new_by_folder, n)),
            "unusually many changed files in managed working copies"
        );
    }
}

fn format_groups(groups: &[(PathBuf, usize)]) -> String {
    groups
        .iter()
        .map(|(path, count)| format!("{}={count}", path.display()))
        .collect::<Vec<_>>()
        .join(", ")
}
