use vstatus_cache::status::ALL;
use vstatus_storage::MAX_OPEN_BACKOFF;

use crate::diagnostics::{ConfigValidationError, ConfigWarning, ValidationDiagnostics};
use crate::{LoggingConfig, VstatusConfig};

impl VstatusConfig {
    /// Validate semantic constraints that serde cannot express.
    #[must_use]
    pub fn validate(&self) -> ValidationDiagnostics {
        let mut out = ValidationDiagnostics::default();

        validate_store(self, &mut out);
        validate_statuses(self, &mut out);
        validate_bootstrap(self, &mut out);
        validate_logging(self, &mut out);

        out
    }
}

fn invalid(out: &mut ValidationDiagnostics, toml_path: &str, message: impl Into<String>) {
    out.errors.push(ConfigValidationError::InvalidValue {
        toml_path: toml_path.to_owned(),
        message: message.into(),
    });
}

fn validate_store(config: &VstatusConfig, out: &mut ValidationDiagnostics) {
    let store = &config.store;
    if store.buckets == 0 {
        invalid(out, "store.buckets", "must be at least 1");
    }
    if store.open_attempts == 0 {
        invalid(out, "store.open_attempts", "must be at least 1");
    }
    if u128::from(store.open_backoff_ms) > MAX_OPEN_BACKOFF.as_millis() {
        invalid(
            out,
            "store.open_backoff_ms",
            format!("must be at most {}", MAX_OPEN_BACKOFF.as_millis()),
        );
    }
    if store.bucket_offset.checked_add(store.buckets).is_none() {
        invalid(out, "store.bucket_offset", "bucket_offset + buckets overflows");
    }
    if matches!(&store.root, Some(root) if root.as_os_str().is_empty()) {
        invalid(out, "store.root", "must not be empty");
    }
}

fn validate_statuses(config: &VstatusConfig, out: &mut ValidationDiagnostics) {
    let statuses = &config.statuses;
    let masks = [
        ("statuses.managed", statuses.managed),
        ("statuses.uptodate", statuses.uptodate),
        ("statuses.excluded", statuses.excluded),
        ("statuses.conflict", statuses.conflict),
        ("statuses.local_modification", statuses.local_modification),
        ("statuses.new_locally", statuses.new_locally),
    ];
    for (toml_path, mask) in masks {
        if mask & !ALL != 0 {
            invalid(
                out,
                toml_path,
                format!("{mask:#x} uses bits 30-31, which are reserved"),
            );
        }
    }

    if statuses.managed == 0 {
        invalid(out, "statuses.managed", "must not be 0");
    }
    if statuses.excluded == 0 {
        invalid(
            out,
            "statuses.excluded",
            "must not be 0 (every unknown file would count as ignored)",
        );
    }
    if statuses.managed & !statuses.uptodate & !statuses.excluded == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "statuses.managed".to_owned(),
            message: "no status can be valuable with these masks; nothing will be persisted"
                .to_owned(),
        });
    }
    if statuses.conflict == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "statuses.conflict".to_owned(),
            message: "0 disables the conflicted index".to_owned(),
        });
    }
}

fn validate_bootstrap(config: &VstatusConfig, out: &mut ValidationDiagnostics) {
    if config.bootstrap.report_top_n == 0 {
        invalid(out, "bootstrap.report_top_n", "must be at least 1");
    }
}

fn validate_logging(config: &VstatusConfig, out: &mut ValidationDiagnostics) {
    let normalized = LoggingConfig::normalize_level_directives(&config.logging.level);
    if !config.logging.level.trim().is_empty()
        && tracing_subscriber::EnvFilter::try_new(normalized.clone()).is_err()
    {
        out.warnings.push(ConfigWarning::LoggingLevelInvalid {
            value: config.logging.level.clone(),
            normalized,
        });
    }
}
