use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use audible_metadata_core::config::{config_path, load_config, load_config_from, save_config_to, set_config_key, AppConfig};
use audible_metadata_core::error::ConfigError;
use audible_metadata_core::identify::{AudibleSource, IdentifyReport};
use audible_metadata_core::ports::{CancellationToken, HttpFetcher, MemoryCache, VecSink};
use audible_metadata_core::query::{self, LookupQuery, QueryUrl};
use audible_metadata_core::record::{sort_results, Identifiers, MetadataRecord, ID_NAME};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "audible-metadata")]
#[command(about = "Audiobook metadata and cover lookup from the Audible catalog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long = "config", global = true)]
    config_file: Option<PathBuf>,

    /// Log lookup progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Title to search for
    #[arg(short, long)]
    title: Option<String>,

    /// Author (repeatable; only the first is searched)
    #[arg(short, long)]
    author: Vec<String>,

    /// Known ASIN; skips the search
    #[arg(long)]
    asin: Option<String>,
}

impl QueryArgs {
    fn to_query(&self) -> LookupQuery {
        LookupQuery {
            title: self.title.clone(),
            authors: self.author.clone(),
            identifiers: self
                .asin
                .iter()
                .map(|a| (ID_NAME.to_string(), a.clone()))
                .collect(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Find matching titles and print their metadata
    Identify {
        #[command(flatten)]
        query: QueryArgs,

        /// Print only the built request URL
        #[arg(long)]
        dry_run: bool,
    },

    /// Download the cover image for a title
    Cover {
        #[command(flatten)]
        query: QueryArgs,

        /// Output image path
        #[arg(short, long, default_value = "cover.jpg")]
        output: String,
    },

    /// Print the storefront URL for an ASIN
    Url {
        /// ASIN
        asin: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key (dot-separated path, e.g. lookup.stagger_ms or genres.Fantasy)
        key: String,
        /// Value
        value: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_directive = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .init();

    let result = match &cli.command {
        Commands::Identify { query, dry_run } => run_identify(&cli, query, *dry_run),
        Commands::Cover { query, output } => run_cover(&cli, query, output),
        Commands::Url { asin } => run_url(&cli, asin),
        Commands::Config { action } => run_config(&cli, action),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn app_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error + Send + Sync>> {
    match &cli.config_file {
        Some(path) if path.exists() => {
            tracing::debug!("Loading config from {}", path.display());
            Ok(load_config_from(path)?)
        }
        Some(path) => {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            Ok(AppConfig::default())
        }
        None => Ok(load_config()),
    }
}

fn build_source(cfg: &AppConfig) -> Result<AudibleSource, Box<dyn std::error::Error + Send + Sync>> {
    let fetcher = Arc::new(HttpFetcher::new()?);
    Ok(AudibleSource::from_config(cfg, fetcher).with_cache(Arc::new(MemoryCache::new())))
}

fn run_identify(cli: &Cli, args: &QueryArgs, dry_run: bool) -> CliResult {
    let cfg = app_config(cli)?;
    let source = build_source(&cfg)?;
    let query = args.to_query();

    if dry_run {
        let built = source.create_query(&query).ok_or("Insufficient metadata to construct query")?;
        match &built {
            QueryUrl::Detail { url, .. } | QueryUrl::Search { url } => println!("{}", url),
        }
        return Ok(());
    }

    let sink = Arc::new(VecSink::new());
    let report = source.identify(&query, sink.clone(), &CancellationToken::new())?;
    tracing::info!(
        candidates = report.candidates,
        finished = report.finished,
        "Identify complete"
    );
    let mut results = sink.take();
    sort_results(query.title.as_deref(), &mut results);

    if cli.json {
        let out = serde_json::json!({
            "report": report_json(&report),
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found");
        return Ok(());
    }
    for (i, mi) in results.iter().enumerate() {
        print_record(i + 1, mi, source.book_url(&mi.identifiers).map(|(_, _, url)| url));
    }
    Ok(())
}

fn report_json(report: &IdentifyReport) -> serde_json::Value {
    serde_json::json!({
        "candidates": report.candidates,
        "finished": report.finished,
        "aborted": report.aborted,
    })
}

fn print_record(n: usize, mi: &MetadataRecord, url: Option<String>) {
    println!("Result {}: {}", n, mi.title);
    println!("  Authors: {}", mi.authors.join(", "));
    if let Some(asin) = mi.identifier(ID_NAME) {
        println!("  ASIN: {}", asin);
    }
    if let Some(series) = &mi.series {
        match mi.series_index {
            Some(idx) => println!("  Series: {} #{}", series, idx),
            None => println!("  Series: {}", series),
        }
    }
    if let Some(rating) = mi.rating {
        println!("  Rating: {:.1}", rating);
    }
    if let Some(publisher) = &mi.publisher {
        println!("  Publisher: {}", publisher);
    }
    if let Some(date) = mi.pubdate {
        println!("  Published: {}", date);
    }
    if let Some(lang) = &mi.language {
        println!("  Language: {}", lang);
    }
    if !mi.tags.is_empty() {
        println!("  Tags: {}", mi.tags.join(", "));
    }
    if let Some(url) = url {
        println!("  URL: {}", url);
    }
}

fn run_cover(cli: &Cli, args: &QueryArgs, output: &str) -> CliResult {
    let cfg = app_config(cli)?;
    let source = build_source(&cfg)?;
    let data = source
        .download_cover(&args.to_query(), &CancellationToken::new())
        .ok_or("No cover found")?;
    let out_path = Path::new(output);
    std::fs::write(out_path, &data)?;
    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "path": out_path.display().to_string(), "bytes": data.len() })
        );
    } else {
        println!("Wrote cover to {} ({} bytes)", out_path.display(), data.len());
    }
    Ok(())
}

fn run_url(cli: &Cli, asin: &str) -> CliResult {
    let cfg = app_config(cli)?;
    let endpoints = audible_metadata_core::config::endpoints_from_config(&cfg.lookup);
    let mut ids = Identifiers::new();
    ids.insert(ID_NAME.to_string(), asin.to_string());
    let (_, _, url) = query::book_url(&endpoints, &ids).ok_or("Invalid ASIN or site host")?;
    println!("{}", url);
    Ok(())
}

fn run_config(cli: &Cli, action: &ConfigAction) -> CliResult {
    let path = match &cli.config_file {
        Some(p) => p.clone(),
        None => config_path().ok_or(ConfigError::NoConfigDir)?,
    };
    match action {
        ConfigAction::Init => {
            save_config_to(&AppConfig::default(), &path)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = app_config(cli)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let mut cfg = if path.exists() {
                load_config_from(&path)?
            } else {
                AppConfig::default()
            };
            set_config_key(&mut cfg, key, value)?;
            save_config_to(&cfg, &path)?;
            if !cli.json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}
