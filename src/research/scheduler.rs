//! Dependency-aware batch scheduling.
//!
//! A keyword heuristic, not a dependency graph. Steps whose text suggests they
//! build on earlier results are pushed into later batches, and the final step
//! of a plan is always treated as a synthesis step that runs alone at the end.

use tracing::debug;

use super::types::Step;

/// Phrases that mark a step as relying on earlier steps' results.
pub const DEPENDENCY_MARKERS: &[&str] = &[
    "based on",
    "using",
    "compare",
    "synthesize",
    "combine",
    "previous",
    "earlier",
    "above",
    "from step",
    "after",
];

/// Whether the step's action or reasoning contains a dependency marker.
pub fn has_dependency_marker(step: &Step) -> bool {
    let text = format!("{} {}", step.action, step.reasoning).to_lowercase();
    DEPENDENCY_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Group steps into batches that can run concurrently.
///
/// Batch order must be respected: every step of batch `i` finishes before
/// batch `i + 1` starts.
pub fn create_execution_batches(steps: &[Step]) -> Vec<Vec<Step>> {
    let last_index = steps.len().saturating_sub(1);

    let mut remaining: Vec<(usize, &Step)> = steps.iter().enumerate().collect();
    let mut batches: Vec<Vec<Step>> = Vec::new();

    while !remaining.is_empty() {
        let mut batch: Vec<Step> = Vec::new();
        let mut deferred: Vec<(usize, &Step)> = Vec::new();

        for (index, step) in remaining.iter().copied() {
            let dependent = index == last_index || has_dependency_marker(step);
            if dependent && !batch.is_empty() {
                deferred.push((index, step));
            } else {
                batch.push(step.clone());
            }
        }

        if batch.is_empty() {
            // Unreachable with the rule above; kept so a rule change cannot loop forever
            batches.extend(remaining.iter().map(|(_, step)| vec![(*step).clone()]));
            break;
        }

        debug!(
            batch = batches.len() + 1,
            steps = ?batch.iter().map(|s| s.step_number).collect::<Vec<_>>(),
            "Scheduled batch"
        );
        batches.push(batch);
        remaining = deferred;
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numbers(batches: &[Vec<Step>]) -> Vec<Vec<u32>> {
        batches
            .iter()
            .map(|b| b.iter().map(|s| s.step_number).collect())
            .collect()
    }

    #[test]
    fn test_independent_steps_then_synthesis() {
        let steps = vec![
            Step::new(1, "Research tokio internals"),
            Step::new(2, "Research async-std internals"),
            Step::new(3, "Research smol internals"),
            Step::new(4, "Write the final report"),
        ];
        assert_eq!(
            numbers(&create_execution_batches(&steps)),
            vec![vec![1, 2, 3], vec![4]]
        );
    }

    #[test]
    fn test_dependent_middle_step_is_deferred() {
        let steps = vec![
            Step::new(1, "Find benchmark suites"),
            Step::new(2, "Compare the benchmark results"),
            Step::new(3, "Find memory profiles"),
            Step::new(4, "Summarize"),
        ];
        assert_eq!(
            numbers(&create_execution_batches(&steps)),
            vec![vec![1, 3], vec![2], vec![4]]
        );
    }

    #[test]
    fn test_reasoning_text_counts() {
        let steps = vec![
            Step::new(1, "Gather sources"),
            Step::new(2, "Dig deeper").with_reasoning("Builds on the EARLIER findings"),
            Step::new(3, "Gather more sources"),
        ];
        assert_eq!(
            numbers(&create_execution_batches(&steps)),
            vec![vec![1], vec![2], vec![3]]
        );
    }

    #[test]
    fn test_leading_dependent_step_runs_first() {
        let steps = vec![
            Step::new(1, "Compare approaches"),
            Step::new(2, "Look up docs"),
            Step::new(3, "Conclude"),
        ];
        assert_eq!(
            numbers(&create_execution_batches(&steps)),
            vec![vec![1, 2], vec![3]]
        );
    }

    #[test]
    fn test_single_step_plan() {
        let steps = vec![Step::new(1, "Synthesize everything")];
        assert_eq!(numbers(&create_execution_batches(&steps)), vec![vec![1]]);
    }

    #[test]
    fn test_empty_plan() {
        assert!(create_execution_batches(&[]).is_empty());
    }

    #[test]
    fn test_last_step_always_alone_in_final_batch() {
        let steps: Vec<Step> = (1..=6)
            .map(|n| Step::new(n, format!("Independent research {}", n)))
            .collect();
        let batches = create_execution_batches(&steps);
        let last = batches.last().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].step_number, 6);

        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, steps.len());
    }

    #[test]
    fn test_last_step_identified_by_position() {
        // Step numbers need not be contiguous
        let steps = vec![
            Step::new(10, "Find A"),
            Step::new(20, "Find B"),
            Step::new(30, "Find C"),
        ];
        assert_eq!(
            numbers(&create_execution_batches(&steps)),
            vec![vec![10, 20], vec![30]]
        );
    }
}
