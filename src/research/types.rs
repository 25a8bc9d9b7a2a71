use serde::{Deserialize, Serialize};

/// Weights of the four evaluation dimensions, in field order.
pub const COMPLETENESS_WEIGHT: f64 = 0.4;
pub const TECHNICAL_DEPTH_WEIGHT: f64 = 0.3;
pub const SOURCE_QUALITY_WEIGHT: f64 = 0.2;
pub const RECENCY_WEIGHT: f64 = 0.1;

/// Ordered research steps produced for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub main_objective: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Create a plan
    pub fn new(main_objective: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            main_objective: main_objective.into(),
            steps,
        }
    }

    /// Look up a step by its number
    pub fn step(&self, step_number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }
}

/// One unit of plan work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub step_number: u32,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Step {
    /// Create a step
    pub fn new(step_number: u32, action: impl Into<String>) -> Self {
        Self {
            step_number,
            action: action.into(),
            search_queries: Vec::new(),
            reasoning: String::new(),
        }
    }

    /// Set the predefined search queries
    pub fn with_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_queries = queries.into_iter().map(Into::into).collect();
        self
    }

    /// Set the reasoning text
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// An extracted finding and the URL it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    #[serde(alias = "fact")]
    pub text: String,
    pub source: String,
}

impl Fact {
    /// Create a fact
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// Score of the facts gathered for one step.
///
/// The four dimensions are required when parsing; a response missing any of
/// them is an evaluator failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvaluation {
    pub completeness: f64,
    pub technical_depth: f64,
    pub source_quality: f64,
    pub recency: f64,
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default)]
    pub threshold_met: bool,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
}

impl QualityEvaluation {
    /// Weighted average of the four dimensions.
    pub fn weighted_score(&self) -> f64 {
        self.completeness * COMPLETENESS_WEIGHT
            + self.technical_depth * TECHNICAL_DEPTH_WEIGHT
            + self.source_quality * SOURCE_QUALITY_WEIGHT
            + self.recency * RECENCY_WEIGHT
    }

    /// Clamp dimensions into [0, 1] and recompute the derived fields.
    ///
    /// Whatever `overall_score` and `threshold_met` the evaluator reported are
    /// replaced, so they always agree with the dimensions.
    pub fn normalize(mut self, threshold: f64) -> Self {
        self.completeness = clamp_unit(self.completeness);
        self.technical_depth = clamp_unit(self.technical_depth);
        self.source_quality = clamp_unit(self.source_quality);
        self.recency = clamp_unit(self.recency);
        self.overall_score = clamp_unit(self.weighted_score());
        self.threshold_met = self.overall_score >= threshold;
        self
    }

    /// Used when the evaluator fails: middling scores, never meets the threshold.
    pub fn conservative_default() -> Self {
        Self {
            completeness: 0.5,
            technical_depth: 0.5,
            source_quality: 0.5,
            recency: 0.5,
            overall_score: 0.5,
            threshold_met: false,
            missing_aspects: vec!["Evaluation failed - assuming incomplete".to_string()],
        }
    }

    /// Recorded for an iteration that produced no facts.
    pub fn no_data() -> Self {
        Self {
            completeness: 0.0,
            technical_depth: 0.0,
            source_quality: 0.0,
            recency: 0.0,
            overall_score: 0.0,
            threshold_met: false,
            missing_aspects: vec!["No data collected".to_string()],
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Verdict of the final sufficiency audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SufficiencyVerdict {
    #[serde(default = "default_pass")]
    pub pass: bool,
    #[serde(default)]
    pub rescue_query: Option<String>,
    #[serde(default)]
    pub reason: String,
}

fn default_pass() -> bool {
    true
}

impl SufficiencyVerdict {
    /// A passing verdict, used whenever the audit itself cannot run.
    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            pass: true,
            rescue_query: None,
            reason: reason.into(),
        }
    }

    /// The rescue query to run, if the verdict calls for one.
    pub fn rescue(&self) -> Option<&str> {
        if self.pass {
            return None;
        }
        self.rescue_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }
}

/// Why a step's quality-convergence loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
    ThresholdMet,
    DiminishingReturns,
    NoRefinementPossible,
    MaxIterationsReached,
}

impl LoopExit {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopExit::ThresholdMet => "threshold_met",
            LoopExit::DiminishingReturns => "diminishing_returns",
            LoopExit::NoRefinementPossible => "no_refinement_possible",
            LoopExit::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of running one step through the convergence loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step_number: u32,
    pub iterations: u32,
    pub exit: LoopExit,
    pub final_score: f64,
    pub facts_collected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_weighted_score() {
        let eval = QualityEvaluation {
            completeness: 1.0,
            technical_depth: 0.5,
            source_quality: 0.5,
            recency: 0.0,
            ..QualityEvaluation::no_data()
        };
        assert!((eval.weighted_score() - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_overrides_reported_fields() {
        let eval = QualityEvaluation {
            completeness: 1.4,
            technical_depth: 0.5,
            source_quality: 1.0,
            recency: -0.2,
            overall_score: 0.2,
            threshold_met: false,
            missing_aspects: vec![],
        }
        .normalize(0.7);

        assert_eq!(eval.completeness, 1.0);
        assert_eq!(eval.recency, 0.0);
        assert!((eval.overall_score - 0.75).abs() < 1e-9);
        assert!(eval.threshold_met);
    }

    #[test]
    fn test_normalize_below_threshold() {
        let eval = QualityEvaluation {
            completeness: 0.6,
            technical_depth: 0.6,
            source_quality: 0.6,
            recency: 0.6,
            overall_score: 0.9,
            threshold_met: true,
            missing_aspects: vec!["benchmarks".to_string()],
        }
        .normalize(0.7);
        assert!(!eval.threshold_met);
        assert!((eval.overall_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_conservative_default() {
        let eval = QualityEvaluation::conservative_default();
        assert!(!eval.threshold_met);
        assert_eq!(eval.overall_score, 0.5);
        assert_eq!(eval.missing_aspects.len(), 1);
    }

    #[test]
    fn test_fact_accepts_fact_alias() {
        let fact: Fact =
            serde_json::from_str(r#"{"fact": "Tokio uses work stealing", "source": "https://tokio.rs"}"#)
                .unwrap();
        assert_eq!(fact, Fact::new("Tokio uses work stealing", "https://tokio.rs"));
    }

    #[test]
    fn test_plan_parses_lenient_steps() {
        let plan: Plan = serde_json::from_str(
            r#"{"main_objective": "Learn", "steps": [{"step_number": 1, "action": "Search"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].search_queries.is_empty());
        assert_eq!(plan.step(1).map(|s| s.action.as_str()), Some("Search"));
    }

    #[test]
    fn test_verdict_rescue() {
        let verdict = SufficiencyVerdict {
            pass: false,
            rescue_query: Some("  tokio benchmarks ".to_string()),
            reason: "no numbers".to_string(),
        };
        assert_eq!(verdict.rescue(), Some("tokio benchmarks"));

        let verdict = SufficiencyVerdict {
            pass: false,
            rescue_query: Some("   ".to_string()),
            reason: String::new(),
        };
        assert_eq!(verdict.rescue(), None);

        assert_eq!(SufficiencyVerdict::fail_open("error").rescue(), None);
    }
}
