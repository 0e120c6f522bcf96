// ============================================================================
// SECTION 12: CLI & COMMAND LINE INTERFACE
// ============================================================================
// Operator commands over the persisted cache directory: inspect, list,
// purge stale instances, and manage the configuration file.
// ============================================================================

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::IndomConfig;
use crate::constants::{FORMAT_VERSION, INDOM_FULL_NAME, INDOM_VERSION};
use crate::entry::EntryState;
use crate::indom::InDom;
use crate::registry::Registry;
use crate::table::DirtyFlags;

// ----------------------------------------------------------------------------
// 12.1 CLI Argument Parser
// ----------------------------------------------------------------------------

/// Cerebro instance-domain cache tool
#[derive(Parser, Debug)]
#[command(
    name = "cerebro-indom",
    author = "AIOps Team",
    version,
    about = "Inspect and maintain persisted instance-domain caches",
    long_about = "Reads the per-domain instance cache files written by Cerebro \
                  collectors, dumps their contents and index layout, and purges \
                  instances that have not been seen for a while."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "indom.toml", env = "INDOM_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "INDOM_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, env = "INDOM_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the cached instances of one domain
    Dump {
        /// Instance domain, e.g. 60.1
        indom: String,

        /// Also print both hash index chains
        #[arg(long)]
        hash: bool,
    },

    /// List persisted instance domains in the cache directory
    List,

    /// Cull instances not saved within the maximum age
    Purge {
        /// Instance domain, e.g. 60.1
        indom: String,

        /// Maximum age in seconds (default from configuration)
        #[arg(short, long)]
        max_age: Option<u64>,

        /// Report what would be purged without rewriting the file
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

// ----------------------------------------------------------------------------
// 12.2 Command Handlers
// ----------------------------------------------------------------------------

fn parse_indom(raw: &str) -> AnyhowResult<InDom> {
    raw.parse::<InDom>()
        .with_context(|| format!("'{}' is not an instance domain (expected DOMAIN.SERIAL)", raw))
}

/// Load one domain's file into a fresh registry
fn load_registry(config: &IndomConfig, indom: InDom) -> AnyhowResult<(Registry, usize)> {
    let mut registry = Registry::from_settings(&config.cache);
    let path = registry.path_for(indom);
    let count = registry
        .load(indom)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok((registry, count))
}

pub fn handle_dump(config: &IndomConfig, indom: &str, with_hash: bool) -> AnyhowResult<()> {
    let indom = parse_indom(indom)?;
    let (registry, _) = load_registry(config, indom)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    registry.dump_all(&mut out, with_hash)?;
    out.flush()?;
    Ok(())
}

/// Instance domains with a cache file in `dir`, in ascending order
fn cached_indoms(dir: &Path) -> AnyhowResult<Vec<InDom>> {
    let mut indoms: Vec<InDom> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read cache directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
        .collect();
    indoms.sort();
    Ok(indoms)
}

pub fn handle_list(config: &IndomConfig) -> AnyhowResult<()> {
    let dir = &config.cache.dir;
    let indoms = cached_indoms(dir)?;

    println!("📋 Instance caches in {}:", dir.display());
    if indoms.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for indom in indoms {
        match load_registry(config, indom) {
            Ok((registry, count)) => {
                let max = registry.get(indom).map(|t| t.max_instance()).unwrap_or_default();
                println!("  • {}: {} instances (max {})", indom, count, max);
            }
            Err(e) => println!("  ❌ {}: {:#}", indom, e),
        }
    }
    Ok(())
}

pub fn handle_purge(
    config: &IndomConfig,
    indom: &str,
    max_age: Option<u64>,
    dry_run: bool,
) -> AnyhowResult<()> {
    let indom = parse_indom(indom)?;
    let max_age = Duration::from_secs(max_age.unwrap_or(config.cache.purge_max_age_secs));
    let (mut registry, loaded) = load_registry(config, indom)?;

    let table = registry.resolve(indom)?;
    let purged = table.purge(max_age);
    for entry in table.iter().filter(|e| e.state == EntryState::Empty) {
        println!("  • {} {} (stamp {})", entry.inst, entry.name, entry.stamp);
    }

    if dry_run {
        println!(
            "🔍 {} of {} instances in {} are older than {}s (dry run, nothing written)",
            purged,
            loaded,
            indom,
            max_age.as_secs()
        );
        return Ok(());
    }

    table.reorganize(false);
    let written = registry.save(indom, DirtyFlags::INSTANCES)?;
    info!(
        target: "cerebro_indom::registry",
        indom = %indom,
        purged,
        kept = written,
        "Purge complete"
    );
    println!("✅ Purged {} of {} instances from {}", purged, loaded, indom);
    Ok(())
}

/// Check that the file parses and report where the caches would live
pub fn handle_validate(config_path: &Path, verbose: bool) -> AnyhowResult<()> {
    let config = IndomConfig::load(config_path)
        .with_context(|| format!("❌ {} is not a valid configuration", config_path.display()))?;
    println!("✅ {} is valid", config_path.display());

    let dir = &config.cache.dir;
    if dir.is_dir() {
        let count = cached_indoms(dir)?.len();
        println!("  • cache directory {} holds {} domains", dir.display(), count);
    } else {
        println!("  • cache directory {} does not exist yet", dir.display());
    }
    if verbose {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

pub fn handle_generate_config(output: Option<&Path>) -> AnyhowResult<()> {
    let text = IndomConfig::generate_default_config();
    let Some(path) = output else {
        print!("{}", text);
        return Ok(());
    };
    fs::write(path, &text).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✅ Default configuration written to {}", path.display());
    Ok(())
}

pub fn handle_version() {
    println!(
        "🧠 {} v{} (cache file format v{})",
        INDOM_FULL_NAME, INDOM_VERSION, FORMAT_VERSION
    );
}

// ----------------------------------------------------------------------------
// 12.3 Configuration Resolution
// ----------------------------------------------------------------------------

/// Configuration for a run: the file if present, otherwise defaults
pub fn resolve_config(cli: &Cli) -> AnyhowResult<IndomConfig> {
    let mut config = if cli.config.exists() {
        IndomConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        IndomConfig::from_env().context("Failed to build default configuration")?
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.debug {
        config.logging.level = "debug".into();
    }
    Ok(config)
}

/// Log the fallback once logging is up
pub fn note_missing_config(cli: &Cli) {
    if !cli.config.exists() {
        warn!(
            target: "cerebro_indom::init",
            path = %cli.config.display(),
            "Config file not found, using defaults"
        );
    }
}
