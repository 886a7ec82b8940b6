//! Step adapters
//!
//! Every step registered on a pipeline ends up as one variant of the closed
//! [`Step`] enum:
//! 1. RawStep - a general transformation over the whole context
//! 2. Filter - keeps the items a predicate accepts
//! 3. Reducer - maps each item to a new item or drops it
//! 4. Pipeline - a nested, already-built pipeline
//!
//! Key metadata is fixed when the step is registered, from the explicit
//! [`StepOptions`] or from the wrapped callable itself, and never re-read at
//! run time.

pub mod filter;
pub mod raw;
pub mod reduce;

use indexmap::IndexSet;
use serde_json::Value;
use std::sync::Arc;

use super::context::PipelineContext;
use super::core::{StepKind, StepOutput};
use super::executor::Pipeline;
use crate::error::{StagelineError, StagelineResult};

pub use filter::Filter;
pub use raw::RawStep;
pub use reduce::Reducer;

/// Name of a stage that does not choose its own
pub const DEFAULT_STEP_NAME: &str = "step";

/// Name of a predicate that does not choose its own
pub const DEFAULT_FILTER_NAME: &str = "filter";

/// Name of a transform that does not choose its own
pub const DEFAULT_REDUCE_NAME: &str = "reduce";

/// A user-defined transformation over the whole context
///
/// Closures of the shape `Fn(&PipelineContext) -> StagelineResult<StepOutput>`
/// implement this trait automatically, with no key metadata.
///
/// # Example
/// ```
/// use stageline::error::StagelineResult;
/// use stageline::pipeline::{PipelineContext, PipelineStage, StepOutput};
///
/// struct Total;
///
/// impl PipelineStage for Total {
///     fn execute(&self, context: &PipelineContext) -> StagelineResult<StepOutput> {
///         let total: f64 = context.dataset().iter().filter_map(|v| v.as_f64()).sum();
///         let mut next = context.fork();
///         next.set("total", serde_json::json!(total));
///         Ok(next.into())
///     }
///
///     fn name(&self) -> &str {
///         "total"
///     }
///
///     fn provided_keys(&self) -> Vec<String> {
///         vec!["total".to_string()]
///     }
/// }
/// ```
pub trait PipelineStage: Send + Sync {
    fn execute(&self, context: &PipelineContext) -> StagelineResult<StepOutput>;

    /// Name used in logs, reports and dependency errors
    fn name(&self) -> &str {
        DEFAULT_STEP_NAME
    }

    fn expected_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn provided_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> PipelineStage for F
where
    F: Fn(&PipelineContext) -> StagelineResult<StepOutput> + Send + Sync,
{
    fn execute(&self, context: &PipelineContext) -> StagelineResult<StepOutput> {
        self(context)
    }
}

/// Per-item predicate wrapped by a [`Filter`]
///
/// Closures of the shape `Fn(&Value, &PipelineContext) -> bool` implement this
/// trait with no key metadata. Implement it on a type to carry a name and
/// side-channel keys along with the predicate.
///
/// # Example
/// ```
/// use serde_json::Value;
/// use stageline::pipeline::{ItemPredicate, PipelineContext};
///
/// struct NotCurrent;
///
/// impl ItemPredicate for NotCurrent {
///     fn keep(&self, item: &Value, context: &PipelineContext) -> bool {
///         context
///             .get_first("current")
///             .map_or(true, |current| current.get("slug") != item.get("slug"))
///     }
///
///     fn expected_keys(&self) -> Vec<String> {
///         vec!["current".to_string()]
///     }
/// }
/// ```
pub trait ItemPredicate: Send + Sync {
    fn keep(&self, item: &Value, context: &PipelineContext) -> bool;

    fn name(&self) -> &str {
        DEFAULT_FILTER_NAME
    }

    fn expected_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn provided_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> ItemPredicate for F
where
    F: Fn(&Value, &PipelineContext) -> bool + Send + Sync,
{
    fn keep(&self, item: &Value, context: &PipelineContext) -> bool {
        self(item, context)
    }
}

/// Per-item transform wrapped by a [`Reducer`]; `None` drops the item
///
/// Closures of the shape `Fn(&Value, &PipelineContext) -> Option<Value>`
/// implement this trait with no key metadata.
pub trait ItemTransform: Send + Sync {
    fn apply(&self, item: &Value, context: &PipelineContext) -> Option<Value>;

    fn name(&self) -> &str {
        DEFAULT_REDUCE_NAME
    }

    fn expected_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn provided_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> ItemTransform for F
where
    F: Fn(&Value, &PipelineContext) -> Option<Value> + Send + Sync,
{
    fn apply(&self, item: &Value, context: &PipelineContext) -> Option<Value> {
        self(item, context)
    }
}

/// Registration-time options shared by every adapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOptions {
    pub name: Option<String>,
    pub expects: Option<Vec<String>>,
    pub provides: Option<Vec<String>>,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn expects<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expects = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn provides<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

/// Resolved expected/provided keys of a single step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepKeys {
    pub expects: Vec<String>,
    pub provides: Vec<String>,
}

impl StepKeys {
    /// Explicit options win over the wrapped callable's own metadata
    pub fn resolve(
        options: &StepOptions,
        own_expects: Vec<String>,
        own_provides: Vec<String>,
    ) -> StagelineResult<Self> {
        let expects = options.expects.clone().unwrap_or(own_expects);
        let provides = options.provides.clone().unwrap_or(own_provides);
        Ok(Self {
            expects: checked_keys(expects)?,
            provides: checked_keys(provides)?,
        })
    }
}

/// Order-preserving de-duplication, keeping the first occurrence
pub fn unique_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    keys.into_iter()
        .collect::<IndexSet<String>>()
        .into_iter()
        .collect()
}

fn checked_keys(keys: Vec<String>) -> StagelineResult<Vec<String>> {
    if keys.iter().any(|k| k.trim().is_empty()) {
        return Err(StagelineError::Construction(
            "side-channel key names must not be empty".to_string(),
        ));
    }
    Ok(unique_keys(keys))
}

/// One composable unit inside a pipeline
#[derive(Clone)]
pub enum Step {
    Raw(RawStep),
    Filter(Filter),
    Reduce(Reducer),
    Pipeline(Arc<Pipeline>),
}

impl Step {
    pub fn call(&self, context: &PipelineContext) -> StagelineResult<StepOutput> {
        match self {
            Step::Raw(step) => step.call(context),
            Step::Filter(filter) => Ok(filter.call(context)),
            Step::Reduce(reducer) => Ok(reducer.call(context)),
            Step::Pipeline(pipeline) => Ok(StepOutput::Context(pipeline.call(context)?)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Raw(step) => step.name(),
            Step::Filter(filter) => filter.name(),
            Step::Reduce(reducer) => reducer.name(),
            Step::Pipeline(pipeline) => pipeline.name(),
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Raw(_) => StepKind::Raw,
            Step::Filter(_) => StepKind::Filter,
            Step::Reduce(_) => StepKind::Reduce,
            Step::Pipeline(_) => StepKind::Pipeline,
        }
    }

    pub fn expected_keys(&self) -> Vec<String> {
        match self {
            Step::Raw(step) => step.keys().expects.clone(),
            Step::Filter(filter) => filter.keys().expects.clone(),
            Step::Reduce(reducer) => reducer.keys().expects.clone(),
            Step::Pipeline(pipeline) => pipeline.expected_keys(),
        }
    }

    pub fn provided_keys(&self) -> Vec<String> {
        match self {
            Step::Raw(step) => step.keys().provides.clone(),
            Step::Filter(filter) => filter.keys().provides.clone(),
            Step::Reduce(reducer) => reducer.keys().provides.clone(),
            Step::Pipeline(pipeline) => pipeline.provided_keys(),
        }
    }

    pub fn as_pipeline(&self) -> Option<&Arc<Pipeline>> {
        match self {
            Step::Pipeline(pipeline) => Some(pipeline),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("expects", &self.expected_keys())
            .field("provides", &self.provided_keys())
            .finish()
    }
}
