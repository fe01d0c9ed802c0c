use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use boothlist_core::avatar::AvatarDictionary;
use boothlist_core::cache::MetadataCache;
use boothlist_core::catalog::build_catalog;
use boothlist_core::config::Config;
use boothlist_core::decompose::DecomposeEngine;
use boothlist_core::export::{build_metrics, write_catalog, write_metrics};
use boothlist_core::fetch::{FetchContext, FetchOptions, HttpTransport};
use boothlist_core::input::{self, ChromeHistory};

#[derive(Debug, Parser)]
#[command(
    name = "boothlist",
    version,
    about = "BOOTH purchase catalog builder with avatar variant decomposition"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Metadata cache database")]
    cache: Option<PathBuf>,
    #[arg(long, global = true, value_name = "DIR")]
    input_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "MS", help = "Minimum delay between requests")]
    rate_limit_ms: Option<u64>,
    #[arg(short = 'v', long, global = true, help = "Verbose logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Load input, resolve metadata, decompose and export")]
    Run(RunArgs),
    #[command(about = "Resolve one item and print its metadata")]
    Fetch(FetchArgs),
    #[command(about = "Decompose one item into avatar variants")]
    Decompose(DecomposeArgs),
    #[command(name = "cache-stats", about = "Print cache entry counts")]
    CacheStats,
    #[command(name = "import-history", about = "Build a worklist from Chrome history")]
    ImportHistory(ImportHistoryArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Refetch every item, ignoring cached metadata")]
    force_refresh: bool,
}

#[derive(Debug, Args)]
struct FetchArgs {
    item_id: u64,
    #[arg(long, help = "Bypass the cache for this item")]
    force_refresh: bool,
}

#[derive(Debug, Args)]
struct DecomposeArgs {
    item_id: u64,
}

#[derive(Debug, Args)]
struct ImportHistoryArgs {
    #[arg(long, default_value_t = 90, value_name = "DAYS")]
    days_back: i64,
    #[arg(long, value_name = "PATH", help = "Explicit path to the History database")]
    history_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    cache: Option<PathBuf>,
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    rate_limit_ms: Option<u64>,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            cache: cli.cache.clone(),
            input_dir: cli.input_dir.clone(),
            output_dir: cli.output_dir.clone(),
            rate_limit_ms: cli.rate_limit_ms,
        }
    }

    fn cache_path(&self, config: &Config) -> PathBuf {
        self.cache.clone().unwrap_or_else(|| config.cache_path())
    }

    fn input_dir(&self, config: &Config) -> PathBuf {
        self.input_dir.clone().unwrap_or_else(|| config.input_dir())
    }

    fn output_dir(&self, config: &Config) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| config.output_dir())
    }

    fn fetch_options(&self, config: &Config, force_refresh: bool) -> FetchOptions {
        let mut options = FetchOptions::from_config(config, force_refresh);
        if let Some(ms) = self.rate_limit_ms {
            options.rate_limit = Duration::from_millis(ms);
        }
        options
    }

    fn fetch_context(&self, config: &Config, force_refresh: bool) -> Result<FetchContext> {
        let cache = MetadataCache::open(&self.cache_path(config))?;
        let transport = HttpTransport::new(config.timeout_ms(), &config.user_agent())?;
        Ok(FetchContext::new(
            cache,
            Box::new(transport),
            self.fetch_options(config, force_refresh),
        ))
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Run(args)) => run_pipeline(&runtime, &config, args.force_refresh),
        Some(Commands::Fetch(args)) => run_fetch(&runtime, &config, args),
        Some(Commands::Decompose(args)) => run_decompose(&runtime, &config, args),
        Some(Commands::CacheStats) => run_cache_stats(&runtime, &config),
        Some(Commands::ImportHistory(args)) => run_import_history(&runtime, &config, args),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "boothlist=debug,boothlist_core=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_pipeline(runtime: &RuntimeOptions, config: &Config, force_refresh: bool) -> Result<()> {
    let input_dir = runtime.input_dir(config);
    let raw_items = input::validate(input::load_directory(&input_dir)?);
    if raw_items.is_empty() {
        bail!("no usable input items under {}", input_dir.display());
    }
    tracing::info!(count = raw_items.len(), "loaded input worklist");

    let mut fetch = runtime.fetch_context(config, force_refresh)?;
    let dictionary = AvatarDictionary::new();
    let items = build_catalog(&raw_items, &mut fetch, &dictionary, config.max_depth())?;
    tracing::info!(items = items.len(), "catalog build complete");

    let output_dir = runtime.output_dir(config);
    let metrics = build_metrics(&items);
    write_catalog(&items, &output_dir.join("catalog.yml"))?;
    write_metrics(&metrics, &output_dir.join("metrics.yml"))?;

    println!("Catalog written to {}", output_dir.display());
    println!(
        "  items: {} ({} variants)",
        metrics.summary.items_total, metrics.summary.variants_total
    );
    println!("  by type:");
    for entry in &metrics.rankings.type_distribution {
        println!("    {:<10} {}", entry.item_type, entry.count);
    }
    if !metrics.rankings.popular_avatars.is_empty() {
        println!("  avatar targets:");
        for entry in &metrics.rankings.popular_avatars {
            println!("    {:<10} {}", entry.avatar_code, entry.count);
        }
    }
    let stats = fetch.cache().stats()?;
    println!(
        "  cache: {} entries ({} ok, {} errors)",
        stats.total_entries, stats.success_entries, stats.error_entries
    );
    Ok(())
}

fn run_fetch(runtime: &RuntimeOptions, config: &Config, args: FetchArgs) -> Result<()> {
    let mut fetch = runtime.fetch_context(config, args.force_refresh)?;
    let metadata = fetch.resolve(args.item_id)?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn run_decompose(runtime: &RuntimeOptions, config: &Config, args: DecomposeArgs) -> Result<()> {
    let mut fetch = runtime.fetch_context(config, false)?;
    let dictionary = AvatarDictionary::new();
    let mut visited = std::collections::HashSet::new();
    let variants = DecomposeEngine::new(&mut fetch, &dictionary)
        .with_max_depth(config.max_depth())
        .decompose(args.item_id, &[], &mut visited, 0)?;

    if variants.is_empty() {
        println!("no variants for item {}", args.item_id);
        return Ok(());
    }
    for variant in &variants {
        println!("{}", serde_json::to_string_pretty(variant)?);
    }
    Ok(())
}

fn run_cache_stats(runtime: &RuntimeOptions, config: &Config) -> Result<()> {
    let path = runtime.cache_path(config);
    let cache = MetadataCache::open(&path)
        .with_context(|| format!("opening cache at {}", path.display()))?;
    let stats = cache.stats()?;
    println!("cache {}", path.display());
    println!("  total:   {}", stats.total_entries);
    println!("  ok:      {}", stats.success_entries);
    println!("  errors:  {}", stats.error_entries);
    Ok(())
}

fn run_import_history(
    runtime: &RuntimeOptions,
    config: &Config,
    args: ImportHistoryArgs,
) -> Result<()> {
    let history = ChromeHistory::new(args.history_path)?;
    let entries = history.extract_ids(args.days_back)?;
    if entries.is_empty() {
        println!("no BOOTH items found in the last {} days", args.days_back);
        return Ok(());
    }
    let output_path = runtime.input_dir(config).join("extracted_booth_ids.csv");
    ChromeHistory::write_input_csv(&entries, &output_path)?;
    println!(
        "{} items from the last {} days written to {}",
        entries.len(),
        args.days_back,
        output_path.display()
    );
    Ok(())
}
