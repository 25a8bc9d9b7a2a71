//! Command-line interface.
//!
//! `run` executes (or resumes) a research run; `checkpoint`, `cache` and
//! `history` inspect and maintain the SQLite state between runs.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cache::SourceCache;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::fetch::HttpFetcher;
use crate::providers::{build_generator, build_search};
use crate::research::{ResearchEngine, ResearchOutput};
use crate::storage::{SqliteStorage, Storage};

/// Evidence-gathering research pipeline.
#[derive(Parser, Debug)]
#[command(name = "research-orchestrator", version, about)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Research a question and print the report
    Run {
        /// The research question
        question: Option<String>,

        /// Continue from the stored checkpoint instead of starting over
        #[arg(long)]
        resume: bool,

        /// Bypass the source cache for this run
        #[arg(long)]
        no_cache: bool,

        /// Write the report to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Inspect or clear the stored checkpoint
    Checkpoint {
        /// Checkpoint action
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// Inspect or clear the source cache
    Cache {
        /// Cache action
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show recent runs
    History {
        /// Maximum number of runs to show
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

/// Checkpoint subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CheckpointCommands {
    /// Show a summary of the stored checkpoint
    Show,
    /// Delete the stored checkpoint
    Clear,
}

/// Cache subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommands {
    /// Show entry count and size
    Stats,
    /// Delete entries older than the TTL
    ClearExpired,
    /// Delete every entry
    Clear,
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(
    command: Commands,
    config: &Config,
    storage: &SqliteStorage,
) -> CliResult {
    match command {
        Commands::Run {
            question,
            resume,
            no_cache,
            output,
        } => execute_run(config, storage, question, resume, no_cache, output).await,
        Commands::Checkpoint { command } => execute_checkpoint(config, storage, command).await,
        Commands::Cache { command } => execute_cache(config, storage, command).await,
        Commands::History { limit } => execute_history(storage, limit).await,
    }
}

async fn execute_run(
    config: &Config,
    storage: &SqliteStorage,
    question: Option<String>,
    resume: bool,
    no_cache: bool,
    output: Option<PathBuf>,
) -> CliResult {
    let generator = match build_generator(config) {
        Ok(g) => g,
        Err(e) => return CliResult::error(format!("Failed to build generation providers: {}", e)),
    };
    let search = match build_search(config) {
        Ok(s) => s,
        Err(e) => return CliResult::error(format!("Failed to build search providers: {}", e)),
    };
    let fetcher = match HttpFetcher::new() {
        Ok(f) => f,
        Err(e) => return CliResult::error(format!("Failed to build page fetcher: {}", e)),
    };

    let mut research = config.research.clone();
    if no_cache {
        research.cache_enabled = false;
    }
    let engine = ResearchEngine::new(
        Arc::new(generator),
        Arc::new(search),
        Arc::new(fetcher),
        storage.clone(),
        research,
    );

    let result = if resume {
        match engine.resume().await {
            Ok(Some(output)) => Ok(output),
            Ok(None) => match question.as_deref() {
                Some(question) => engine.execute(question).await,
                None => return CliResult::error("No checkpoint to resume and no question given"),
            },
            Err(e) => Err(e),
        }
    } else {
        match question.as_deref() {
            Some(question) => engine.execute(question).await,
            None => return CliResult::error("A research question is required"),
        }
    };

    match result {
        Ok(research_output) => finish_run(research_output, output).await,
        Err(e) => CliResult::error(format!("Research failed: {}", e)),
    }
}

async fn finish_run(research_output: ResearchOutput, output: Option<PathBuf>) -> CliResult {
    eprintln!("\n{}", research_output.metrics.summary());

    match output {
        Some(path) => match tokio::fs::write(&path, &research_output.report).await {
            Ok(()) => {
                info!(path = %path.display(), "Report written");
                CliResult::success(format!("Report written to {}", path.display()))
            }
            Err(e) => CliResult::error(format!(
                "Failed to write report to {}: {}",
                path.display(),
                e
            )),
        },
        None => CliResult::success(research_output.report),
    }
}

async fn execute_checkpoint(
    config: &Config,
    storage: &SqliteStorage,
    command: CheckpointCommands,
) -> CliResult {
    let store = CheckpointStore::new(storage.clone(), config.research.checkpoint_name.clone());

    match command {
        CheckpointCommands::Show => match store.summary().await {
            Ok(Some(summary)) => CliResult::success(summary.to_string()),
            Ok(None) => CliResult::success("No checkpoint found"),
            Err(e) => CliResult::error(format!("Failed to read checkpoint: {}", e)),
        },
        CheckpointCommands::Clear => match store.clear().await {
            Ok(true) => CliResult::success("Checkpoint cleared"),
            Ok(false) => CliResult::success("No checkpoint found"),
            Err(e) => CliResult::error(format!("Failed to clear checkpoint: {}", e)),
        },
    }
}

async fn execute_cache(
    config: &Config,
    storage: &SqliteStorage,
    command: CacheCommands,
) -> CliResult {
    let cache = SourceCache::new(storage.clone(), config.research.cache_ttl_hours);

    match command {
        CacheCommands::Stats => match cache.stats().await {
            Ok(stats) => CliResult::success(format!(
                "Cache entries: {}\nTotal size: {:.2} MB\nTTL: {} hours",
                stats.entry_count,
                stats.total_size_mb(),
                stats.ttl_hours
            )),
            Err(e) => CliResult::error(format!("Failed to read cache: {}", e)),
        },
        CacheCommands::ClearExpired => match cache.clear_expired().await {
            Ok(removed) => CliResult::success(format!("Removed {} expired entries", removed)),
            Err(e) => CliResult::error(format!("Failed to clear expired entries: {}", e)),
        },
        CacheCommands::Clear => match cache.clear_all().await {
            Ok(removed) => CliResult::success(format!("Removed {} entries", removed)),
            Err(e) => CliResult::error(format!("Failed to clear cache: {}", e)),
        },
    }
}

async fn execute_history(storage: &SqliteStorage, limit: u32) -> CliResult {
    let runs = match storage.list_runs(limit).await {
        Ok(runs) => runs,
        Err(e) => return CliResult::error(format!("Failed to list runs: {}", e)),
    };
    if runs.is_empty() {
        return CliResult::success("No runs recorded");
    }

    let mut output = String::new();
    for run in runs {
        let facts = run
            .metrics
            .as_ref()
            .and_then(|m| m.get("facts_extracted"))
            .and_then(|v| v.as_u64())
            .map(|n| format!(", {} facts", n))
            .unwrap_or_default();
        output.push_str(&format!(
            "{}  {:<9}  {}{}\n    {}\n",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.status.as_str(),
            run.id,
            facts,
            crate::checkpoint::preview(&run.prompt, 80)
        ));
    }
    CliResult::success(output.trim_end().to_string())
}
