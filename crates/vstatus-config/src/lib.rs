//! `vstatus.toml` loading, validation and logging setup.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Library crates never read configuration
//! themselves; they take the option structs produced here.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;
use vstatus_cache::status::{CONFLICT, EXCLUDED, LOCAL_MODIFICATION, MANAGED, NEW_LOCALLY, UPTODATE};
use vstatus_cache::{
    BootstrapThresholds, StatusMasks, StoreOptions, DEFAULT_MODIFIED_FILES_WARNING_THRESHOLD,
    DEFAULT_NEW_FILES_WARNING_THRESHOLD, DEFAULT_REPORT_TOP_N,
};
use vstatus_storage::{
    ShardStoreOptions, DEFAULT_BUCKETS, DEFAULT_BUCKET_OFFSET, DEFAULT_OPEN_ATTEMPTS,
    DEFAULT_OPEN_BACKOFF,
};

mod diagnostics;
mod validation;

pub use diagnostics::{ConfigDiagnostics, ConfigValidationError, ConfigWarning, ValidationDiagnostics};

/// Overrides the default cache root when `store.root` is not set.
pub const CACHE_DIR_ENV: &str = "VSTATUS_CACHE_DIR";

/// File names probed by [`discover_config`], in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["vstatus.toml", ".vstatus.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VstatusConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub statuses: StatusMaskConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the shard files.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "StoreConfig::default_buckets")]
    pub buckets: u32,

    /// Added to the bucket index to form the shard file name.
    #[serde(default = "StoreConfig::default_bucket_offset")]
    pub bucket_offset: u32,

    #[serde(default = "StoreConfig::default_open_attempts")]
    pub open_attempts: u32,

    /// Attempt `n` sleeps `n * open_backoff_ms` before retrying.
    #[serde(default = "StoreConfig::default_open_backoff_ms")]
    pub open_backoff_ms: u64,

    /// Corrupt-shard snapshots; the system temp dir when unset.
    #[serde(default)]
    pub diagnostics_dir: Option<PathBuf>,

    #[serde(default)]
    pub persist_ignored: bool,
}

impl StoreConfig {
    fn default_buckets() -> u32 {
        DEFAULT_BUCKETS
    }

    fn default_bucket_offset() -> u32 {
        DEFAULT_BUCKET_OFFSET
    }

    fn default_open_attempts() -> u32 {
        DEFAULT_OPEN_ATTEMPTS
    }

    fn default_open_backoff_ms() -> u64 {
        DEFAULT_OPEN_BACKOFF.as_millis() as u64
    }

    pub fn open_backoff(&self) -> Duration {
        Duration::from_millis(self.open_backoff_ms)
    }

    pub fn shard_store_options(&self) -> ShardStoreOptions {
        ShardStoreOptions {
            buckets: self.buckets,
            bucket_offset: self.bucket_offset,
            open_attempts: self.open_attempts,
            open_backoff: self.open_backoff(),
            diagnostics_dir: self.diagnostics_dir.clone(),
        }
    }

    /// `store.root`, else `$VSTATUS_CACHE_DIR`, else `~/.vstatus/cache`.
    pub fn resolved_root(&self) -> Result<PathBuf, ConfigError> {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
        self.resolve_root_from(std::env::var_os(CACHE_DIR_ENV), home)
    }

    fn resolve_root_from(
        &self,
        env_root: Option<OsString>,
        home: Option<OsString>,
    ) -> Result<PathBuf, ConfigError> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        if let Some(root) = env_root.filter(|root| !root.is_empty()) {
            return Ok(PathBuf::from(root));
        }
        let home = home
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingHomeDir)?;
        Ok(home.join(".vstatus").join("cache"))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            buckets: Self::default_buckets(),
            bucket_offset: Self::default_bucket_offset(),
            open_attempts: Self::default_open_attempts(),
            open_backoff_ms: Self::default_open_backoff_ms(),
            diagnostics_dir: None,
            persist_ignored: false,
        }
    }
}

/// Status bitmasks, as plain integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMaskConfig {
    #[serde(default = "StatusMaskConfig::default_managed")]
    pub managed: u32,
    #[serde(default = "StatusMaskConfig::default_uptodate")]
    pub uptodate: u32,
    #[serde(default = "StatusMaskConfig::default_excluded")]
    pub excluded: u32,
    #[serde(default = "StatusMaskConfig::default_conflict")]
    pub conflict: u32,
    #[serde(default = "StatusMaskConfig::default_local_modification")]
    pub local_modification: u32,
    #[serde(default = "StatusMaskConfig::default_new_locally")]
    pub new_locally: u32,
}

impl StatusMaskConfig {
    fn default_managed() -> u32 {
        MANAGED
    }

    fn default_uptodate() -> u32 {
        UPTODATE
    }

    fn default_excluded() -> u32 {
        EXCLUDED
    }

    fn default_conflict() -> u32 {
        CONFLICT
    }

    fn default_local_modification() -> u32 {
        LOCAL_MODIFICATION
    }

    fn default_new_locally() -> u32 {
        NEW_LOCALLY
    }

    pub fn masks(&self) -> StatusMasks {
        StatusMasks {
            managed: self.managed,
            uptodate: self.uptodate,
            excluded: self.excluded,
            conflict: self.conflict,
            local_modification: self.local_modification,
            new_locally: self.new_locally,
        }
    }
}

impl Default for StatusMaskConfig {
    fn default() -> Self {
        Self {
            managed: Self::default_managed(),
            uptodate: Self::default_uptodate(),
            excluded: Self::default_excluded(),
            conflict: Self::default_conflict(),
            local_modification: Self::default_local_modification(),
            new_locally: Self::default_new_locally(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "BootstrapConfig::default_new_files_warning_threshold")]
    pub new_files_warning_threshold: usize,
    #[serde(default = "BootstrapConfig::default_modified_files_warning_threshold")]
    pub modified_files_warning_threshold: usize,
    /// How many folders the threshold warning names.
    #[serde(default = "BootstrapConfig::default_report_top_n")]
    pub report_top_n: usize,
}

impl BootstrapConfig {
    fn default_new_files_warning_threshold() -> usize {
        DEFAULT_NEW_FILES_WARNING_THRESHOLD
    }

    fn default_modified_files_warning_threshold() -> usize {
        DEFAULT_MODIFIED_FILES_WARNING_THRESHOLD
    }

    fn default_report_top_n() -> usize {
        DEFAULT_REPORT_TOP_N
    }

    pub fn thresholds(&self) -> BootstrapThresholds {
        BootstrapThresholds {
            new_files_warning_threshold: self.new_files_warning_threshold,
            modified_files_warning_threshold: self.modified_files_warning_threshold,
            report_top_n: self.report_top_n,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            new_files_warning_threshold: Self::default_new_files_warning_threshold(),
            modified_files_warning_threshold: Self::default_modified_files_warning_threshold(),
            report_top_n: Self::default_report_top_n(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or `EnvFilter` directives.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file as well. If it cannot be opened, file logging
    /// is skipped and the other sinks stay active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: `level`, with `RUST_LOG` directives appended
    /// when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let combined = format!(
                    "{},{env_directives}",
                    Self::normalize_level_directives(&self.level)
                );
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

impl VstatusConfig {
    /// Options for [`vstatus_cache::DiskAttributeStore::open`].
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            shards: self.store.shard_store_options(),
            masks: self.statuses.masks(),
            thresholds: self.bootstrap.thresholds(),
            persist_ignored: self.store.persist_ignored,
        }
    }

    /// Parse and validate; the first validation error is returned as
    /// [`ConfigError::Invalid`]. Unknown keys are ignored.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let (config, diagnostics) = Self::load_from_str_with_diagnostics(text)?;
        match diagnostics.errors.into_iter().next() {
            Some(err) => Err(ConfigError::Invalid {
                toml_path: err.toml_path().to_owned(),
                message: err.message().to_owned(),
            }),
            None => Ok(config),
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read_config(path)?;
        Self::load_from_str(&text)
    }

    /// Parse without failing on validation problems; they are reported in
    /// the returned diagnostics instead.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<VstatusConfig>(text)?;
        let mut out = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        out.extend_validation(config.validate());
        Ok((config, out))
    }

    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let text = read_config(path.as_ref())?;
        Self::load_from_str_with_diagnostics(&text)
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// First of [`CONFIG_FILE_NAMES`] that exists in `dir`.
pub fn discover_config(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config value for {toml_path}: {message}")]
    Invalid { toml_path: String, message: String },
    #[error("neither HOME nor USERPROFILE is set; configure store.root or VSTATUS_CACHE_DIR")]
    MissingHomeDir,
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` embeds a snippet of the offending source line.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

/// Redacts user-provided values from a toml/serde message, keeping schema
/// names intact.
fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    static BACKTICK_VALUE_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();

    let mut out = message.to_owned();
    if let Some(re) = QUOTED_RE
        .get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#).ok())
    {
        out = re.replace_all(&out, "\"<redacted>\"").into_owned();
    }

    // `unknown field `x``, `unknown variant `x`` and `invalid type: integer `1``
    // carry user input; `missing field `x`` and the `expected ...` tail do not.
    if let Some(re) = BACKTICK_VALUE_RE.get_or_init(|| {
        regex::Regex::new(r"(unknown field |unknown variant |invalid type: [a-z ]+|invalid value: [a-z ]+)`[^`]*`").ok()
    }) {
        out = re.replace_all(&out, "$1`<redacted>`").into_owned();
    }
    out
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self.file.lock(),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has any effect.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging
            .file
            .as_ref()
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if logging.stderr {
            // `TestWriter` keeps `cargo test` output capture working.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
