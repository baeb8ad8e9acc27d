//! libstudy command line
//!
//! Studies installed Node.js libraries: inspects their exports and asks an AI
//! provider for documentation, caching both.
//!
//! Cache directory precedence:
//!   1. --cache-dir flag
//!   2. LIBSTUDY_CACHE_DIR env var
//!   3. platform data dir via dirs crate
//!   4. Fallback: ./.libstudy-cache

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use libstudy::{
    config::resolve_cache_root,
    doc_engine::types::{LibraryReport, StudyOptions, StudyOutcome},
    StudyConfig, StudyEngine,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Command line interface for libstudy.
#[derive(Debug, Parser)]
#[command(
    name = "libstudy",
    version,
    about = "Inspect installed Node.js libraries and generate cached AI documentation"
)]
struct Cli {
    /// Explicit cache directory (overrides env + platform default)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory whose node_modules are searched (default: current directory)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Suppress info logs (only warnings+)
    #[arg(long, global = true)]
    quiet: bool,

    /// Force ANSI color output in logs
    #[arg(long, global = true)]
    color: bool,

    /// Disable ANSI color output
    #[arg(long, global = true)]
    no_color: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print the resolved cache directory and exit
    #[arg(long)]
    print_cache_dir: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate (or fetch cached) documentation for a library
    Study {
        name: String,
        /// Documentation entries per page
        #[arg(long)]
        items_per_page: Option<usize>,
        /// Ignore any cached documentation
        #[arg(long)]
        force_refresh: bool,
    },
    /// Show exports, descriptor, types and dependencies of a library
    Inspect { name: String },
    /// Manage the caches
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// Show disk usage of both stores
    Stats,
    /// Remove cached entries (both stores unless one is selected)
    Clear {
        #[arg(long)]
        docs: bool,
        #[arg(long)]
        libraries: bool,
    },
    /// Remove everything cached for one library
    Invalidate { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging / tracing setup
    let mut fmt = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(
            if cli.quiet { "warn" } else { "libstudy=info" }.parse()?,
        ))
        .with_writer(std::io::stderr)
        .with_target(false);

    // Color handling precedence: --no-color > --color > auto
    if cli.no_color {
        fmt = fmt.with_ansi(false);
    } else if cli.color {
        fmt = fmt.with_ansi(true);
    }
    fmt.init();

    let cache_root = resolve_cache_root(cli.cache_dir.clone());
    if cli.print_cache_dir {
        println!("{}", cache_root.display());
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = StudyConfig::from_env(Some(cache_root));
    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let engine = StudyEngine::new(config, &project_dir)
        .await
        .context("Failed to open caches")?;

    match command {
        Command::Study {
            name,
            items_per_page,
            force_refresh,
        } => {
            let options = StudyOptions {
                items_per_page: items_per_page.unwrap_or(engine.config().items_per_page),
                force_refresh,
            };
            let outcome = engine.study(&name, &options).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                print_outcome(&outcome, options.items_per_page);
            }
        }
        Command::Inspect { name } => {
            let report = engine.inspect(&name).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
        }
        Command::Cache { action } => match action {
            CacheAction::Stats => {
                let stats = engine.stats().await?;
                if cli.json {
                    print_json(&stats)?;
                } else {
                    for (label, store) in [("libraries", &stats.libraries), ("docs", &stats.docs)] {
                        println!(
                            "{label}: {} entries, {} / {} bytes, ttl {}s ({})",
                            store.entries,
                            store.total_size_bytes,
                            store.max_size_bytes,
                            store.ttl_secs,
                            store.cache_dir.display()
                        );
                    }
                    if !stats.documented_libraries.is_empty() {
                        println!("documented: {}", stats.documented_libraries.join(", "));
                    }
                }
            }
            CacheAction::Clear { docs, libraries } => {
                let both = !docs && !libraries;
                let summary = engine
                    .clear_caches(docs || both, libraries || both)
                    .await?;
                if cli.json {
                    print_json(&summary)?;
                } else {
                    println!(
                        "Removed {} documentation and {} library entries",
                        summary.docs_removed, summary.library_entries_removed
                    );
                }
            }
            CacheAction::Invalidate { name } => {
                let removed = engine.invalidate(&name).await?;
                if cli.json {
                    print_json(&serde_json::json!({ "name": name, "removed": removed }))?;
                } else {
                    println!("Removed {removed} documentation entries for {name}");
                }
            }
        },
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(outcome: &StudyOutcome, items_per_page: usize) {
    println!(
        "{}@{}{}",
        outcome.library_name,
        outcome.library_version,
        if outcome.from_cache { " (cached)" } else { "" }
    );
    let pages = outcome.pages(items_per_page);
    let total = pages.len();
    for (index, page) in pages.into_iter().enumerate() {
        println!("\n--- Page {}/{} ---", index + 1, total);
        for doc in page {
            let method = &doc.method_data;
            println!(
                "\n{}{}({}) -> {}",
                if method.is_async { "async " } else { "" },
                method.name,
                method.parameters.join(", "),
                if method.return_type.is_empty() {
                    "unknown"
                } else {
                    method.return_type.as_str()
                }
            );
            println!("{}", doc.documentation);
        }
    }
}

fn print_report(report: &LibraryReport) {
    match &report.package_info {
        Some(info) => println!("{}@{}", info.name, info.version),
        None => println!("{}", report.name),
    }
    if let Some(description) = report
        .package_info
        .as_ref()
        .and_then(|info| info.description.as_deref())
    {
        println!("{description}");
    }
    println!("default export: {}", report.has_default_export);
    println!("named exports: {}", report.named_exports.join(", "));
    if let Some(types) = &report.types {
        println!("types: {types}");
    }
    if !report.dependencies.is_empty() {
        println!("dependencies:");
        for (dependency, range) in &report.dependencies {
            println!("  {dependency} {range}");
        }
    }
}
