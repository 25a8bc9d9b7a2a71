//! Research pipeline.
//!
//! A run flows through these pieces in order:
//!
//! ```text
//! Planner ─► scheduler (batches) ─► StepExecutor (per step convergence loop)
//!        ─► SufficiencyChecker (one optional rescue query) ─► ReportWriter
//! ```
//!
//! [`ResearchEngine`] wires them together, checkpoints after planning, after
//! every step and before the report, and clears the checkpoint once the run
//! succeeds.

pub mod accumulator;
pub mod engine;
pub mod executor;
pub mod extractor;
pub mod generation;
pub mod metrics;
pub mod planner;
pub mod progress;
pub mod quality;
pub mod report;
pub mod scheduler;
pub mod sufficiency;
pub mod types;

pub use accumulator::ResearchAccumulator;
pub use engine::{ResearchEngine, ResearchOutput};
pub use executor::{NoopObserver, StepExecutor, StepObserver};
pub use extractor::FactExtractor;
pub use generation::MeteredGenerator;
pub use metrics::{MetricsSnapshot, RunMetrics, ScrapeOutcome};
pub use planner::{validate_plan, Planner};
pub use progress::RunProgress;
pub use quality::QualityEvaluator;
pub use report::{Citations, ReportWriter};
pub use scheduler::create_execution_batches;
pub use sufficiency::SufficiencyChecker;
pub use types::{
    Fact, LoopExit, Plan, QualityEvaluation, Step, StepReport, SufficiencyVerdict,
};
