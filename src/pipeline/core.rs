use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use super::context::{Dataset, PipelineContext, SideChannel};
use crate::schema::ValidationErrors;

/// What a step hands back to the executor
///
/// A bare dataset is folded into a copy of the current context with only the
/// dataset replaced. `Stop` and `StopWith` end the current pipeline early;
/// they are not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// Full replacement context
    Context(PipelineContext),
    /// Replacement dataset, everything else unchanged
    Dataset(Dataset),
    /// Stop here, keeping the state accumulated before this step
    Stop,
    /// Stop here with the given state
    StopWith(PipelineContext),
}

impl From<PipelineContext> for StepOutput {
    fn from(context: PipelineContext) -> Self {
        StepOutput::Context(context)
    }
}

impl From<Dataset> for StepOutput {
    fn from(dataset: Dataset) -> Self {
        StepOutput::Dataset(dataset)
    }
}

/// Which adapter a step was registered through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Raw,
    Filter,
    Reduce,
    Pipeline,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Raw => "raw",
            StepKind::Filter => "filter",
            StepKind::Reduce => "reduce",
            StepKind::Pipeline => "pipeline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Completed,
    Stopped,
}

/// Execution record for one top-level step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step_name: String,
    pub kind: StepKind,
    pub outcome: StepOutcome,
    pub duration: Duration,
    pub items_in: usize,
    pub items_out: usize,
}

impl StepReport {
    pub fn completed(
        step_name: impl Into<String>,
        kind: StepKind,
        duration: Duration,
        items_in: usize,
        items_out: usize,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            kind,
            outcome: StepOutcome::Completed,
            duration,
            items_in,
            items_out,
        }
    }

    pub fn stopped(
        step_name: impl Into<String>,
        kind: StepKind,
        duration: Duration,
        items_in: usize,
        items_out: usize,
    ) -> Self {
        Self {
            outcome: StepOutcome::Stopped,
            ..Self::completed(step_name, kind, duration, items_in, items_out)
        }
    }
}

// Equality ignores `duration`
impl PartialEq for StepReport {
    fn eq(&self, other: &Self) -> bool {
        self.step_name == other.step_name
            && self.kind == other.kind
            && self.outcome == other.outcome
            && self.items_in == other.items_in
            && self.items_out == other.items_out
    }
}

/// Result of `Pipeline::run`
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub pipeline_name: String,
    pub dataset: Dataset,
    pub side_channel: SideChannel,
    pub input: Map<String, Value>,
    pub valid: bool,
    pub errors: ValidationErrors,
    pub stopped: bool,
    pub step_reports: Vec<StepReport>,
}

impl RunResult {
    /// Result for input that failed schema resolution; no step ran
    pub fn invalid(
        pipeline_name: impl Into<String>,
        dataset: Dataset,
        input: Map<String, Value>,
        errors: ValidationErrors,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            dataset,
            side_channel: SideChannel::new(),
            input,
            valid: false,
            errors,
            stopped: false,
            step_reports: Vec::new(),
        }
    }

    /// Result of a completed (or early-stopped) execution
    pub fn from_context(
        pipeline_name: impl Into<String>,
        context: PipelineContext,
        stopped: bool,
        step_reports: Vec<StepReport>,
    ) -> Self {
        let (dataset, side_channel, input, errors) = context.into_parts();
        Self {
            pipeline_name: pipeline_name.into(),
            dataset,
            side_channel,
            input,
            valid: true,
            errors,
            stopped,
            step_reports,
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn side_channel(&self) -> &SideChannel {
        &self.side_channel
    }

    /// Side-channel lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.side_channel.get(key)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Snapshot of the final state as a context, e.g. to feed another pipeline's `call`
    pub fn context(&self) -> PipelineContext {
        PipelineContext::with_input(self.dataset.clone(), self.input.clone())
            .with_side_channel(self.side_channel.clone())
            .with_errors(self.errors.clone())
    }

    pub fn into_context(self) -> PipelineContext {
        PipelineContext::with_input(self.dataset, self.input)
            .with_side_channel(self.side_channel)
            .with_errors(self.errors)
    }

    /// Number of steps that ran to completion
    pub fn executed_steps(&self) -> usize {
        self.step_reports
            .iter()
            .filter(|r| r.outcome == StepOutcome::Completed)
            .count()
    }

    /// The step that stopped execution early (if any)
    pub fn stopped_step(&self) -> Option<&StepReport> {
        self.step_reports
            .iter()
            .find(|r| r.outcome == StepOutcome::Stopped)
    }
}
