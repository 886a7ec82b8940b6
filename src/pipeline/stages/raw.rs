use std::sync::Arc;

use super::{PipelineStage, StepKeys, StepOptions};
use crate::error::StagelineResult;
use crate::pipeline::{PipelineContext, StepOutput};

/// General transformation step wrapping a [`PipelineStage`]
///
/// The wrapped stage sees the whole context and returns either a replacement
/// context, a bare dataset, or a stop signal.
#[derive(Clone)]
pub struct RawStep {
    name: String,
    stage: Arc<dyn PipelineStage>,
    keys: StepKeys,
}

impl RawStep {
    /// Wrap `stage`; `options` override its name and key metadata
    pub fn new<S>(stage: S, options: StepOptions) -> StagelineResult<Self>
    where
        S: PipelineStage + 'static,
    {
        Self::from_arc(Arc::new(stage), options)
    }

    pub fn from_arc(stage: Arc<dyn PipelineStage>, options: StepOptions) -> StagelineResult<Self> {
        let keys = StepKeys::resolve(&options, stage.expected_keys(), stage.provided_keys())?;
        let name = options.name.unwrap_or_else(|| stage.name().to_string());
        Ok(Self { name, stage, keys })
    }

    pub fn call(&self, context: &PipelineContext) -> StagelineResult<StepOutput> {
        self.stage.execute(context)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &StepKeys {
        &self.keys
    }
}
