use serde_json::Value;
use std::sync::Arc;

use super::{ItemPredicate, StepKeys, StepOptions};
use crate::error::StagelineResult;
use crate::pipeline::{PipelineContext, StepOutput};

/// Stable per-item filter
///
/// Items for which the predicate returns `true` are kept, in their original
/// relative order. Items are never modified.
#[derive(Clone)]
pub struct Filter {
    name: String,
    predicate: Arc<dyn ItemPredicate>,
    keys: StepKeys,
}

impl Filter {
    pub fn new<F>(predicate: F, options: StepOptions) -> StagelineResult<Self>
    where
        F: Fn(&Value, &PipelineContext) -> bool + Send + Sync + 'static,
    {
        Self::from_predicate(predicate, options)
    }

    /// Wrap a predicate object; `options` override its name and key metadata
    pub fn from_predicate<P>(predicate: P, options: StepOptions) -> StagelineResult<Self>
    where
        P: ItemPredicate + 'static,
    {
        Self::from_arc(Arc::new(predicate), options)
    }

    pub fn from_arc(
        predicate: Arc<dyn ItemPredicate>,
        options: StepOptions,
    ) -> StagelineResult<Self> {
        let keys =
            StepKeys::resolve(&options, predicate.expected_keys(), predicate.provided_keys())?;
        let name = options.name.unwrap_or_else(|| predicate.name().to_string());
        Ok(Self {
            name,
            predicate,
            keys,
        })
    }

    pub fn call(&self, context: &PipelineContext) -> StepOutput {
        let kept = context
            .dataset()
            .iter()
            .filter(|item| self.predicate.keep(item, context))
            .cloned()
            .collect();
        StepOutput::Dataset(kept)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &StepKeys {
        &self.keys
    }
}
