//! # Research Orchestrator
//!
//! Turns a natural-language question into a cited Markdown report by planning
//! research steps, running them against web search and page fetching, and
//! iterating on each step until its evidence is good enough.
//!
//! ## Features
//!
//! - **Dependency-aware scheduling**: independent steps run in parallel batches,
//!   synthesis steps wait for earlier work
//! - **Quality convergence**: each step is scored and re-queried for its gaps,
//!   bounded by an iteration cap and a diminishing-returns rule
//! - **Credential rotation**: rate-limited keys are retired and the next key or
//!   provider takes over
//! - **Source cache**: extracted page text from trusted domains is kept in SQLite
//!   with a TTL
//! - **Checkpoints**: runs can be resumed after a crash without refetching pages
//!
//! ## Architecture
//!
//! ```text
//! CLI → ResearchEngine → Planner → Scheduler → StepExecutor ─┬─ SearchChain (Google → Tavily)
//!                                                            ├─ HttpFetcher (HTML / PDF)
//!                                                            └─ GeneratorChain (primary → secondary)
//!                  ↓
//!            SQLite (checkpoints, source cache, run history)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use research_orchestrator::{Config, ResearchEngine};
//! use research_orchestrator::fetch::HttpFetcher;
//! use research_orchestrator::providers::{build_generator, build_search};
//! use research_orchestrator::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let engine = ResearchEngine::new(
//!         Arc::new(build_generator(&config)?),
//!         Arc::new(build_search(&config)?),
//!         Arc::new(HttpFetcher::new()?),
//!         storage,
//!         config.research.clone(),
//!     );
//!     let output = engine.execute("How does the Tokio scheduler work?").await?;
//!     println!("{}", output.report);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// SQLite-backed source cache for extracted page text.
pub mod cache;
/// Resumable run checkpoints.
pub mod checkpoint;
/// Command-line interface commands.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Page fetching and HTML/PDF text extraction.
pub mod fetch;
/// System prompts for every generation task.
pub mod prompts;
/// Text-generation and search providers.
pub mod providers;
/// Planning, scheduling, step execution and report assembly.
pub mod research;
/// Credential pools with rate-limit rotation.
pub mod rotation;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use research::{ResearchEngine, ResearchOutput};
