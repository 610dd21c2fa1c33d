use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vstatus_cache::{BootstrapReport, Category, DiskAttributeStore, ManagedPredicate, ManagedRoots};
use vstatus_config::VstatusConfig;
use vstatus_storage::ScanOutcome;

#[derive(Parser)]
#[command(name = "vstatus", version, about = "Inspect the persistent file-status cache")]
struct Cli {
    /// Config file (defaults to `vstatus.toml` in the current directory, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cache directory, overriding `store.root` and `VSTATUS_CACHE_DIR`
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the persisted child statuses of one directory
    Read(ReadArgs),
    /// Scan every shard and print the bootstrap report
    Bootstrap(BootstrapArgs),
    /// List shard files with their record counts
    Shards(ShardsArgs),
    /// Bootstrap, then print the members of one index
    Lookup(LookupArgs),
}

#[derive(Args)]
struct ReadArgs {
    directory: PathBuf,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ManagedArgs {
    /// Working-copy root; may be repeated. Everything counts as managed when omitted.
    #[arg(long = "managed-root")]
    managed_roots: Vec<PathBuf>,
}

#[derive(Args)]
struct BootstrapArgs {
    #[command(flatten)]
    managed: ManagedArgs,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ShardsArgs {
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct LookupArgs {
    /// valuable, conflicted or ignored
    category: Category,
    /// Directory to look in; all members of the index when omitted
    #[arg(long)]
    scope: Option<PathBuf>,
    /// Include everything below `--scope`, not just its direct entries
    #[arg(long, requires = "scope")]
    recursive: bool,
    #[command(flatten)]
    managed: ManagedArgs,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    vstatus_config::init_tracing(&config.logging);

    let root = match cli.root {
        Some(root) => root,
        None => config.store.resolved_root()?,
    };

    match cli.command {
        Command::Read(args) => {
            let store = open_store(&root, &config, Arc::new(ManagedRoots::default()))?;
            let entry = store.read_entry(&args.directory)?;
            if args.json {
                print_json(&entry)?;
            } else if let Some(entry) = entry {
                println!("{} ({})", entry.directory, entry.fs_tag);
                for (name, record) in &entry.children {
                    let suffix = if record.is_directory() { "/" } else { "" };
                    println!("  {name}{suffix}\t{:#x}", record.status());
                }
            } else {
                println!("{}: not cached", args.directory.display());
            }
            Ok(0)
        }
        Command::Bootstrap(args) => {
            let store = open_store(&root, &config, args.managed.predicate())?;
            let report = store.bootstrap()?;
            if args.json {
                print_json(&report)?;
            } else {
                print_report(store.root(), &report);
            }
            Ok(0)
        }
        Command::Shards(args) => {
            let store = open_store(&root, &config, Arc::new(ManagedRoots::default()))?;
            let shards = list_shards(&store)?;
            if args.json {
                print_json(&shards)?;
            } else {
                for shard in &shards {
                    println!(
                        "{}\t{} bytes\t{} records\t{}",
                        shard.path.display(),
                        shard.bytes,
                        shard.records,
                        shard.state
                    );
                }
                let records: usize = shards.iter().map(|shard| shard.records).sum();
                println!("shards: {}, records: {records}", shards.len());
            }
            Ok(0)
        }
        Command::Lookup(args) => {
            let store = open_store(&root, &config, args.managed.predicate())?;
            store.bootstrap()?;
            let members = match (&args.scope, args.recursive) {
                (Some(scope), true) => store.lookup_recursive(scope, args.category),
                (scope, _) => store.lookup(scope.as_deref(), args.category),
            };
            if args.json {
                print_json(&members)?;
            } else {
                for path in &members {
                    println!("{}", path.display());
                }
            }
            Ok(0)
        }
    }
}

impl ManagedArgs {
    fn predicate(&self) -> Arc<dyn ManagedPredicate> {
        if self.managed_roots.is_empty() {
            Arc::new(|_: &Path| true)
        } else {
            Arc::new(ManagedRoots::new(self.managed_roots.iter().cloned()))
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<VstatusConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => vstatus_config::discover_config(&std::env::current_dir()?),
    };
    let Some(path) = path else {
        return Ok(VstatusConfig::default());
    };

    let (config, diagnostics) = VstatusConfig::load_from_path_with_diagnostics(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    for key in &diagnostics.unknown_keys {
        eprintln!("warning: {}: unknown key `{key}`", path.display());
    }
    for warning in &diagnostics.warnings {
        eprintln!("warning: {}: {warning}", path.display());
    }
    if let Some(err) = diagnostics.errors.first() {
        anyhow::bail!("invalid config {}: {err}", path.display());
    }
    Ok(config)
}

fn open_store(
    root: &Path,
    config: &VstatusConfig,
    managed: Arc<dyn ManagedPredicate>,
) -> Result<DiskAttributeStore> {
    DiskAttributeStore::open(root, config.store_options(), managed)
        .with_context(|| format!("opening cache at {}", root.display()))
}

#[derive(Serialize)]
struct ShardSummary {
    id: Option<u64>,
    path: PathBuf,
    bytes: u64,
    records: usize,
    state: &'static str,
}

/// Scans every shard; corrupt ones are reported and, like any corrupt
/// shard the store touches, deleted.
fn list_shards(store: &DiskAttributeStore) -> Result<Vec<ShardSummary>> {
    let shards = store.shard_store();
    let mut out = Vec::new();
    for path in shards.shard_files()? {
        let bytes = std::fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        let id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse().ok());
        let (records, state) = match shards.scan_shard(&path, |_| {})? {
            ScanOutcome::Complete { entries } => (entries, "ok"),
            ScanOutcome::Corrupt { entries } => (entries, "corrupt"),
            ScanOutcome::Missing => (0, "missing"),
        };
        out.push(ShardSummary {
            id,
            path,
            bytes,
            records,
            state,
        });
    }
    Ok(out)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn print_report(root: &Path, report: &BootstrapReport) {
    println!("bootstrap: {}", root.display());
    println!("  shards_scanned: {}", report.shards_scanned);
    println!("  corrupt_shards: {}", report.corrupt_shards);
    println!("  unreadable_shards: {}", report.unreadable_shards);
    println!("  entries: {}", report.entries);
    println!("  modified_files: {}", report.modified_files);
    println!("  new_files: {}", report.new_files);
    println!("  elapsed_ms: {}", report.elapsed.as_millis());
}
