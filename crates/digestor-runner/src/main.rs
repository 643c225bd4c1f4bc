//! Digestor admin runner.
//!
//! A small CLI binary that drives `digestor-core` over one scheduler tick:
//! for every enabled topic it computes the due windows, runs the pipeline,
//! and prints a per-stage summary to stdout. No real connector/provider SDKs
//! are wired in — the runner ships with the deterministic `StaticConnector`/
//! `FlakyConnector` test doubles that the core crate provides, matching the
//! Non-goal against concrete external integrations.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use digestor_core::config::PipelineConfig;
use digestor_core::connector::{ConnectorRegistry, FlakyConnector, StaticConnector};
use digestor_core::llm::{HashEmbeddingClient, StaticLlmRouter};
use digestor_core::pipeline::{PipelineRunner, RunResult};
use digestor_core::scheduler::due_windows;
use digestor_core::storage::Storage;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Parse command-line arguments and return the optional data directory path.
/// Exits the process if `--help` or `--version` is requested.
fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("digestor-runner v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Admin runner that drives digestor-core over one scheduler tick.");
                println!();
                println!("USAGE:");
                println!("    digestor-runner [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Sqlite database file (default: in-memory)");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                Log level filter (e.g., debug, info, warn, error)");
                println!("    See digestor_core::config for the full set of pipeline tuning variables.");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("digestor-runner {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--data-dir=") => {
                let path = arg.strip_prefix("--data-dir=").unwrap_or("");
                if path.is_empty() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(path));
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Try 'digestor-runner --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    data_dir
}

fn default_registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register("rss", Arc::new(StaticConnector::new(Vec::new())));
    registry.register("reddit", Arc::new(StaticConnector::new(Vec::new())));
    registry.register("signal", Arc::new(FlakyConnector::new(7)));
    registry
}

fn log_run_summary(topic_id: &str, result: &RunResult) {
    let credits = &result.credits_status;
    info!(
        topic_id,
        tier = ?result.tier,
        monthly_used = credits.monthly_used,
        monthly_limit = credits.monthly_limit,
        warning_level = ?credits.warning_level,
        "budget status"
    );
    info!(
        topic_id,
        fetched = result.ingest.total_fetched(),
        errors = result.ingest.total_errors(),
        "ingest complete"
    );
    info!(
        topic_id,
        attempted = result.embed.attempted,
        embedded = result.embed.embedded,
        disabled = result.embed.disabled,
        "embed complete"
    );
    info!(
        topic_id,
        attempted = result.dedupe.attempted,
        deduped = result.dedupe.deduped,
        "dedupe complete"
    );
    info!(
        topic_id,
        created = result.cluster.created,
        attached = result.cluster.attached,
        "cluster complete"
    );

    if !credits.paid_calls_allowed {
        warn!(
            topic_id,
            "run was heuristic-only: no paid provider calls allowed this window, no digest persisted"
        );
        return;
    }

    if let Some(fair) = &result.fair_sampling {
        info!(topic_id, ?fair, "fair sampling complete");
    }
    if let Some(allocation) = &result.triage_allocation {
        info!(topic_id, ?allocation, "triage allocation complete");
    }
    if let Some(triage) = &result.triage {
        info!(topic_id, ?triage, "triage complete");
    }
    if let Some(diversity) = &result.diversity {
        info!(topic_id, ?diversity, "diversity selection complete");
    }
    if let Some(enrichment) = &result.enrichment {
        info!(topic_id, ?enrichment, "enrichment complete");
    }

    match &result.digest_id {
        Some(id) => info!(topic_id, digest_id = %id, "digest persisted"),
        None => info!(topic_id, "no candidates this window, digest not written"),
    }
}

#[tokio::main]
async fn main() {
    let data_dir = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(false)
        .init();

    info!("digestor-runner v{} starting...", env!("CARGO_PKG_VERSION"));

    let storage = match data_dir {
        Some(path) => match Storage::open(&path) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to open storage at {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => match Storage::open_in_memory() {
            Ok(s) => s,
            Err(e) => {
                error!("failed to initialize in-memory storage: {}", e);
                std::process::exit(1);
            }
        },
    };

    let registry = default_registry();
    let llm_router = StaticLlmRouter::default();
    let embedding_client = HashEmbeddingClient::new(256);
    let config = PipelineConfig::from_env();

    let topics = match storage.list_enabled_topics() {
        Ok(topics) => topics,
        Err(e) => {
            error!("failed to list enabled topics: {}", e);
            std::process::exit(1);
        }
    };

    info!(topic_count = topics.len(), "scheduler tick starting");

    let runner = PipelineRunner::new(&storage, &registry, &llm_router, &embedding_client, &config);
    let now = Utc::now();

    for topic in &topics {
        let windows = due_windows(topic, now, &config.scheduler);
        if windows.is_empty() {
            continue;
        }
        for window in windows {
            match runner.run_window(topic, window.window_start, window.window_end).await {
                Ok(result) => log_run_summary(&topic.id, &result),
                Err(e) => error!(topic_id = %topic.id, "pipeline run failed: {}", e),
            }
        }
    }

    info!("scheduler tick complete");
}
