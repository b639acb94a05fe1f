//! Autosearch CLI - run and inspect orchestrated location searches

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};
use uuid::Uuid;

use autosearch_core::audit::JsonlAuditLog;
use autosearch_core::config::Config;
use autosearch_core::dispatch::{SearchDispatcher, SubmitOutcome};
use autosearch_core::events::SearchEvent;
use autosearch_core::history::{self, HistoryEntry, HistoryStore};
use autosearch_core::providers;
use autosearch_core::search::{
    Priority, ReportParams, SearchRequest, SearchResult, extract_location_queries,
};

#[derive(Parser)]
#[command(name = "autosearch")]
#[command(author, version, about = "Background location search orchestration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Search one or more queries and wait for the results
    Search {
        /// Queries to look up
        #[arg(required = true)]
        queries: Vec<String>,
        /// Context recorded with each trigger
        #[arg(long, default_value = "user_input")]
        context: String,
        /// Priority (critical, high, medium, low)
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },

    /// Run a proactive pass over report parameters
    Report {
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        region: Option<String>,
        /// Industry (repeatable)
        #[arg(long)]
        industry: Vec<String>,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },

    /// Inspect or clear remembered results
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show search statistics
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List remembered results, oldest first
    List,
    /// Forget every remembered result
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--format json` output stays parseable
    let directive = if cli.quiet { "autosearch=warn" } else { "autosearch=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };

    match cli.command {
        Commands::Search {
            queries,
            context,
            priority,
            wait_secs,
        } => {
            let config = Config::load_from(&config_path)?;
            cmd_search(&config, queries, &context, priority, wait_secs, cli.format, cli.quiet).await
        }

        Commands::Report {
            organization,
            country,
            region,
            industry,
            wait_secs,
        } => {
            let config = Config::load_from(&config_path)?;
            let params = ReportParams {
                organization_name: organization,
                country,
                region,
                industry,
            };
            cmd_report(&config, &params, wait_secs, cli.format, cli.quiet).await
        }

        Commands::History { action } => {
            let config = Config::load_from(&config_path)?;
            cmd_history(&config, action, cli.format, cli.quiet).await
        }

        Commands::Stats => {
            let config = Config::load_from(&config_path)?;
            cmd_stats(&config, cli.format).await
        }

        Commands::Config { action } => cmd_config(&config_path, action, cli.format, cli.quiet),
    }
}

// ============================================================================
// Engine setup
// ============================================================================

async fn build_dispatcher(config: &Config) -> anyhow::Result<SearchDispatcher> {
    let chain = providers::from_config(&config.providers).context("Failed to build provider chain")?;
    if chain.is_empty() {
        warn!("No providers configured; every search will fail");
    }

    let mut builder = SearchDispatcher::builder(config.search.clone()).providers(chain);

    // An unusable store leaves the run with in-memory history only
    match history::open_backend(&config.history).await {
        Ok(backend) => builder = builder.history_backend(backend),
        Err(e) => warn!(
            code = e.code(),
            error = %e,
            "Failed to open search history, results will not be persisted"
        ),
    }

    if config.audit.enabled {
        match config
            .audit
            .resolved_path()
            .and_then(|path| JsonlAuditLog::open(&path).map_err(Into::into))
        {
            Ok(log) => builder = builder.audit_sink(Arc::new(log)),
            Err(e) => warn!(error = %e, "Failed to open audit log, audit trail disabled"),
        }
    }

    Ok(builder.build().await?)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Final state of one query as reported to the user
#[derive(Debug, Serialize)]
struct QueryReport {
    query: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl QueryReport {
    fn new(query: &str, status: &str) -> Self {
        Self {
            query: query.to_string(),
            status: status.to_string(),
            result: None,
            error: None,
        }
    }
}

async fn cmd_search(
    config: &Config,
    queries: Vec<String>,
    context: &str,
    priority: Priority,
    wait_secs: u64,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config).await?;
    let (subscription, mut rx) = dispatcher.events(None);

    let submitted: Vec<(String, SubmitOutcome)> = queries
        .into_iter()
        .map(|query| {
            let outcome = dispatcher.submit(SearchRequest::new(query.clone(), context).with_priority(priority));
            (query, outcome)
        })
        .collect();

    let reports = collect_reports(&dispatcher, &mut rx, submitted, Duration::from_secs(wait_secs)).await;
    subscription.unsubscribe();
    print_reports(&reports, format, quiet)
}

async fn cmd_report(
    config: &Config,
    params: &ReportParams,
    wait_secs: u64,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let queries = extract_location_queries(params);
    if queries.is_empty() {
        if !quiet && format == OutputFormat::Text {
            println!("No location queries found in the report parameters.");
        } else if format == OutputFormat::Json {
            println!("[]");
        }
        return Ok(());
    }

    let dispatcher = build_dispatcher(config).await?;
    let (subscription, mut rx) = dispatcher.events(None);

    let outcomes = dispatcher.proactive_search_for_report(params);
    if outcomes.is_empty() && format == OutputFormat::Text && !quiet {
        println!("Proactive search is disabled (search.proactive_search_enabled = false).");
    }
    let submitted = queries.into_iter().zip(outcomes).collect();

    let reports = collect_reports(&dispatcher, &mut rx, submitted, Duration::from_secs(wait_secs)).await;
    subscription.unsubscribe();
    print_reports(&reports, format, quiet)
}

/// Wait for every admitted trigger to finish, then describe each query
async fn collect_reports(
    dispatcher: &SearchDispatcher,
    rx: &mut UnboundedReceiver<SearchEvent>,
    submitted: Vec<(String, SubmitOutcome)>,
    wait: Duration,
) -> Vec<QueryReport> {
    let mut pending: HashSet<Uuid> = submitted
        .iter()
        .filter_map(|(_, outcome)| outcome.trigger_id())
        .collect();
    let mut finished: Vec<(Uuid, Result<SearchResult, String>)> = Vec::new();

    let deadline = tokio::time::Instant::now() + wait;
    while !pending.is_empty() {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(SearchEvent::SearchCompleted { trigger, result })) => {
                if pending.remove(&trigger.id) {
                    finished.push((trigger.id, Ok(result)));
                }
            }
            Ok(Some(SearchEvent::SearchFailed { trigger, error })) => {
                if pending.remove(&trigger.id) {
                    finished.push((trigger.id, Err(error)));
                }
            }
            Ok(Some(event)) => debug!(kind = %event.kind(), "Ignoring event"),
            Ok(None) => break,
            Err(_) => {
                warn!(pending = pending.len(), "Timed out waiting for searches");
                break;
            }
        }
    }

    // Let history and audit writes for finished triggers land
    if pending.is_empty() {
        let _ = tokio::time::timeout_at(deadline, dispatcher.wait_idle()).await;
    } else {
        dispatcher.shutdown();
    }

    submitted
        .into_iter()
        .map(|(query, outcome)| match outcome {
            SubmitOutcome::Cached(result) => QueryReport {
                result: Some(result),
                ..QueryReport::new(&query, "cached")
            },
            SubmitOutcome::Queued { trigger_id } | SubmitOutcome::Coalesced { trigger_id } => {
                match finished.iter().find(|(id, _)| *id == trigger_id) {
                    Some((_, Ok(result))) => QueryReport {
                        result: Some(result.clone()),
                        ..QueryReport::new(&query, "completed")
                    },
                    Some((_, Err(error))) => QueryReport {
                        error: Some(error.clone()),
                        ..QueryReport::new(&query, "failed")
                    },
                    None => QueryReport::new(&query, "timed_out"),
                }
            }
            other => QueryReport::new(&query, other.label()),
        })
        .collect()
}

fn print_reports(reports: &[QueryReport], format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    for report in reports {
        match &report.result {
            Some(result) if !result.is_empty() => {
                println!(
                    "{} [{}] confidence {:.2} via {} ({} ms)",
                    report.query,
                    report.status,
                    result.confidence,
                    result.provider.as_deref().unwrap_or("unknown"),
                    result.latency_ms
                );
                if !quiet {
                    if let Some(summary) = result.payload.as_ref().and_then(|p| p.summary.as_deref()) {
                        println!("  {}", summary);
                    }
                    if !result.sources.is_empty() {
                        println!("  sources: {}", result.sources.join(", "));
                    }
                }
            }
            Some(_) => println!("{} [{}] no data found", report.query, report.status),
            None => match &report.error {
                Some(error) => println!("{} [{}] {}", report.query, report.status, error),
                None => println!("{} [{}]", report.query, report.status),
            },
        }
    }
    Ok(())
}

async fn load_history(config: &Config) -> anyhow::Result<Vec<HistoryEntry>> {
    let backend = history::open_backend(&config.history)
        .await
        .context("Failed to open search history")?;
    let entries = backend
        .load()
        .await
        .with_context(|| format!("Failed to read search history from {}", backend.describe()))?
        .unwrap_or_default();
    Ok(HistoryStore::from_entries(entries).entries())
}

async fn cmd_history(
    config: &Config,
    action: HistoryAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        HistoryAction::List => {
            let entries = load_history(config).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                if !quiet {
                    println!("No search history.");
                }
            } else {
                for entry in &entries {
                    println!(
                        "{}  {}  confidence {:.2}  {}",
                        entry.stored_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.result.query,
                        entry.result.confidence,
                        entry.result.provider.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        HistoryAction::Clear => {
            let backend = history::open_backend(&config.history)
                .await
                .context("Failed to open search history")?;
            backend.clear().await.context("Failed to clear search history")?;
            if !quiet {
                println!("Search history cleared.");
            }
        }
    }
    Ok(())
}

async fn cmd_stats(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config).await?;
    let stats = dispatcher.stats();

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Total searches:     {}", stats.total_searches);
        println!("Last 24 hours:      {}", stats.recent_searches);
        println!("Average confidence: {:.2}", stats.average_confidence);
        println!("Success rate:       {:.0}%", stats.success_rate * 100.0);
        println!("Active:             {}", stats.active_searches);
        println!("Queued:             {}", stats.queued_searches);
    }
    Ok(())
}

fn cmd_config(
    path: &Path,
    action: ConfigAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load_from(path)?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
            }
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Config::default().save_to(path)?;
            if !quiet {
                println!("Wrote default configuration to {}", path.display());
            }
        }
        ConfigAction::Get { key } => {
            let config = Config::load_from(path)?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load_from(path)?;
            config.set(&key, &value)?;
            config.save_to(path)?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load_from(path)?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}
