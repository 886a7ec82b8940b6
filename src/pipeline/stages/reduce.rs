use serde_json::Value;
use std::sync::Arc;

use super::{ItemTransform, StepKeys, StepOptions};
use crate::error::StagelineResult;
use crate::pipeline::{PipelineContext, StepOutput};

/// Transform-or-drop step
///
/// The resulting dataset holds, in order, every `Some` returned by the
/// transform. It is never longer than the input and its items may have a
/// different shape.
#[derive(Clone)]
pub struct Reducer {
    name: String,
    transform: Arc<dyn ItemTransform>,
    keys: StepKeys,
}

impl Reducer {
    pub fn new<F>(transform: F, options: StepOptions) -> StagelineResult<Self>
    where
        F: Fn(&Value, &PipelineContext) -> Option<Value> + Send + Sync + 'static,
    {
        Self::from_transform(transform, options)
    }

    /// Wrap a transform object; `options` override its name and key metadata
    pub fn from_transform<T>(transform: T, options: StepOptions) -> StagelineResult<Self>
    where
        T: ItemTransform + 'static,
    {
        Self::from_arc(Arc::new(transform), options)
    }

    pub fn from_arc(
        transform: Arc<dyn ItemTransform>,
        options: StepOptions,
    ) -> StagelineResult<Self> {
        let keys =
            StepKeys::resolve(&options, transform.expected_keys(), transform.provided_keys())?;
        let name = options.name.unwrap_or_else(|| transform.name().to_string());
        Ok(Self {
            name,
            transform,
            keys,
        })
    }

    pub fn call(&self, context: &PipelineContext) -> StepOutput {
        let reduced = context
            .dataset()
            .iter()
            .filter_map(|item| self.transform.apply(item, context))
            .collect();
        StepOutput::Dataset(reduced)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &StepKeys {
        &self.keys
    }
}
