//! Build-time dependency validation.
//!
//! Walks a pipeline's direct steps left to right while accumulating the keys
//! provided so far. A step whose expected keys are not all available fails the
//! build, unless nothing has been provided yet at this level: an empty running
//! set means no producer has appeared, so the check does not apply. This is
//! what lets a nested pipeline consume keys its parent provides.
//!
//! Nested pipelines validate their own steps when they are built; here they
//! only contribute their aggregate expected and provided keys.

use indexmap::IndexSet;

use super::stages::Step;
use crate::error::{StagelineError, StagelineResult};

pub fn validate_dependencies(pipeline_name: &str, steps: &[Step]) -> StagelineResult<()> {
    let mut available: IndexSet<String> = IndexSet::new();

    for step in steps {
        let expected = step.expected_keys();

        if !available.is_empty() && !expected.is_empty() {
            let unmet: Vec<String> = expected
                .into_iter()
                .filter(|key| !available.contains(key))
                .collect();

            if !unmet.is_empty() {
                return Err(StagelineError::Dependency {
                    pipeline: pipeline_name.to_string(),
                    step: step.name().to_string(),
                    unmet,
                    available: available.into_iter().collect(),
                });
            }
        }

        available.extend(step.provided_keys());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::{RawStep, StepOptions};
    use crate::pipeline::{PipelineContext, StepOutput};

    fn step(name: &str, expects: &[&str], provides: &[&str]) -> Step {
        let options = StepOptions::new()
            .name(name)
            .expects(expects.iter().copied())
            .provides(provides.iter().copied());
        let stage = |ctx: &PipelineContext| -> StagelineResult<StepOutput> {
            Ok(StepOutput::Context(ctx.fork()))
        };
        Step::Raw(RawStep::new(stage, options).unwrap())
    }

    #[test]
    fn test_empty_pipeline_is_valid() {
        assert!(validate_dependencies("p", &[]).is_ok());
    }

    #[test]
    fn test_consumer_after_producer_is_valid() {
        let steps = vec![step("make", &[], &["a"]), step("use", &["a"], &[])];
        assert!(validate_dependencies("p", &steps).is_ok());
    }

    #[test]
    fn test_consumer_before_any_producer_is_not_checked() {
        let steps = vec![step("use", &["a"], &[]), step("make", &[], &["b"])];
        assert!(validate_dependencies("p", &steps).is_ok());
    }

    #[test]
    fn test_unmet_key_after_other_producer_fails() {
        let steps = vec![
            step("make_b", &[], &["b"]),
            step("use_a", &["a", "b"], &[]),
            step("make_a", &[], &["a"]),
        ];

        match validate_dependencies("compare", &steps) {
            Err(StagelineError::Dependency {
                pipeline,
                step,
                unmet,
                available,
            }) => {
                assert_eq!(pipeline, "compare");
                assert_eq!(step, "use_a");
                assert_eq!(unmet, vec!["a"]);
                assert_eq!(available, vec!["b"]);
            }
            other => panic!("expected dependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_available_lists_each_key_once_in_order() {
        let steps = vec![
            step("make_b", &[], &["b"]),
            step("make_c", &[], &["c", "b"]),
            step("use_a", &["a"], &[]),
        ];

        match validate_dependencies("p", &steps) {
            Err(StagelineError::Dependency { available, .. }) => {
                assert_eq!(available, vec!["b", "c"]);
            }
            other => panic!("expected dependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_available_accumulates_in_order() {
        let steps = vec![
            step("make_a", &[], &["a"]),
            step("make_b", &["a"], &["b"]),
            step("use_both", &["a", "b"], &[]),
        ];
        assert!(validate_dependencies("p", &steps).is_ok());
    }
}
