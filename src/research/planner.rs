use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::types::Plan;
use crate::error::{AppError, AppResult};
use crate::prompts::{PLANNER_PROMPT, PLAN_REFINER_PROMPT};
use crate::providers::{GenerationRequest, GenerationTask, TextGenerator};

/// Produces and revises research plans through the generation chain.
pub struct Planner {
    generator: Arc<dyn TextGenerator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Create a plan for `question`.
    ///
    /// Fails with [`AppError::PlanGenerationFailed`] when every provider fails,
    /// the response does not parse, or the plan has no steps.
    pub async fn create_plan(&self, question: &str) -> AppResult<Plan> {
        let prompt = format!(
            "Current date: {}\n\n--- RESEARCH QUESTION ---\n{}",
            Utc::now().format("%B %d, %Y"),
            question
        );
        let request = GenerationRequest::new(GenerationTask::Plan, PLANNER_PROMPT, prompt)
            .json()
            .with_temperature(0.5);

        let plan = self
            .generator
            .generate(request)
            .await
            .and_then(|g| g.parse_json::<Plan>())
            .map_err(|e| AppError::PlanGenerationFailed {
                message: e.to_string(),
            })?;

        let plan = validate_plan(plan)?;
        info!(
            objective = %plan.main_objective,
            steps = plan.steps.len(),
            "Research plan created"
        );
        Ok(plan)
    }

    /// Revise `plan` according to `feedback`.
    ///
    /// Returns the original plan unchanged when refinement fails.
    pub async fn refine_plan(&self, plan: &Plan, feedback: &str) -> Plan {
        let original = match serde_json::to_string_pretty(plan) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Could not serialize plan for refinement");
                return plan.clone();
            }
        };

        let prompt = format!(
            "Current date: {}\n\n--- ORIGINAL PLAN ---\n{}\n\n--- REVIEWER FEEDBACK ---\n{}\n\nRefine the plan and return valid JSON with all required fields.",
            Utc::now().format("%B %d, %Y"),
            original,
            feedback
        );
        let request =
            GenerationRequest::new(GenerationTask::RefinePlan, PLAN_REFINER_PROMPT, prompt)
                .json()
                .with_temperature(0.5);

        let refined = self
            .generator
            .generate(request)
            .await
            .and_then(|g| g.parse_json::<Plan>())
            .map_err(|e| AppError::PlanGenerationFailed {
                message: e.to_string(),
            })
            .and_then(validate_plan);

        match refined {
            Ok(refined) => {
                info!(steps = refined.steps.len(), "Research plan refined");
                refined
            }
            Err(e) => {
                warn!(error = %e, "Plan refinement failed, keeping original plan");
                plan.clone()
            }
        }
    }
}

/// Check that a plan can be run.
///
/// Progress, checkpoints and metrics are keyed on `step_number`, so every
/// step needs a distinct positive number.
pub fn validate_plan(plan: Plan) -> AppResult<Plan> {
    if plan.steps.is_empty() {
        return Err(AppError::PlanGenerationFailed {
            message: "Plan contains no steps".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for step in &plan.steps {
        if step.step_number == 0 {
            return Err(AppError::PlanGenerationFailed {
                message: format!("Step '{}' has step number 0", step.action),
            });
        }
        if !seen.insert(step.step_number) {
            return Err(AppError::PlanGenerationFailed {
                message: format!("Duplicate step number {}", step.step_number),
            });
        }
    }
    Ok(plan)
}
