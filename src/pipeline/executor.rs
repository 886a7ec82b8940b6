use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use super::context::{Dataset, PipelineContext};
use super::core::{RunResult, StepOutput, StepReport};
use super::stages::{
    unique_keys, Filter, ItemPredicate, ItemTransform, PipelineStage, RawStep, Reducer, Step,
    StepOptions, DEFAULT_FILTER_NAME, DEFAULT_REDUCE_NAME, DEFAULT_STEP_NAME,
};
use super::validate::validate_dependencies;
use crate::config::EngineConfig;
use crate::error::{StagelineError, StagelineResult};
use crate::logger::LogLevel;
use crate::schema::{Schema, SchemaBuilder};

const LOG_SOURCE: &str = "pipeline";

/// A built, immutable tree of steps
///
/// A pipeline is assembled once through [`Pipeline::new`] (or a
/// [`PipelineBuilder`]). Its dependencies are validated and its merged input
/// schema computed at that point. Afterwards it can be run any number of
/// times, from any number of threads.
///
/// # Example
/// ```
/// use stageline::pipeline::Pipeline;
/// use serde_json::{json, Map};
///
/// let pipeline = Pipeline::new("evens", |p| {
///     p.filter(|item, _ctx| item.as_i64().is_some_and(|n| n % 2 == 0));
///     p.reduce(|item, _ctx| Some(json!(item.as_i64()? * 10)));
/// })
/// .unwrap();
///
/// let result = pipeline
///     .run(vec![json!(1), json!(2), json!(3), json!(4)], Map::new())
///     .unwrap();
/// assert_eq!(result.dataset(), &vec![json!(20), json!(40)]);
/// ```
pub struct Pipeline {
    name: String,
    steps: Vec<Step>,
    provided_key: Option<String>,
    local_schema: Option<Schema>,
    merged_schema: OnceLock<Schema>,
    config: EngineConfig,
}

/// Final state of one pass over a pipeline's own steps
struct Execution {
    context: PipelineContext,
    stopped: bool,
    reports: Vec<StepReport>,
}

impl Pipeline {
    /// Build a pipeline from a single configuration callback
    ///
    /// The callback runs exactly once; the pipeline is validated and frozen as
    /// soon as it returns.
    pub fn new<F>(name: impl Into<String>, configure: F) -> StagelineResult<Self>
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut builder = PipelineBuilder::new(name);
        configure(&mut builder);
        builder.build()
    }

    /// Create a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Key under which this pipeline's result lands in its caller's side-channel
    pub fn provided_key(&self) -> Option<&str> {
        self.provided_key.as_deref()
    }

    pub fn local_schema(&self) -> Option<&Schema> {
        self.local_schema.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Union, in step order, of every direct step's expected keys
    pub fn expected_keys(&self) -> Vec<String> {
        unique_keys(self.steps.iter().flat_map(Step::expected_keys))
    }

    /// Own provided key, then those of each direct nested pipeline
    pub fn provided_keys(&self) -> Vec<String> {
        let nested = self
            .steps
            .iter()
            .filter_map(Step::as_pipeline)
            .flat_map(|pipeline| pipeline.provided_keys());
        unique_keys(self.provided_key.iter().cloned().chain(nested))
    }

    /// Merged input schema: the local schema, then every nested pipeline's
    /// merged schema in declaration order. Computed once and cached.
    pub fn input_schema(&self) -> &Schema {
        self.merged_schema.get_or_init(|| {
            self.steps
                .iter()
                .filter_map(Step::as_pipeline)
                .fold(self.local_schema.clone().unwrap_or_default(), |merged, nested| {
                    merged.merge(nested.input_schema())
                })
        })
    }

    /// Validate `input`, then execute against `dataset`
    ///
    /// Invalid input yields `valid == false` with the dataset untouched and no
    /// step executed. `Err` is returned only when a step itself fails.
    pub fn run(&self, dataset: Dataset, input: Map<String, Value>) -> StagelineResult<RunResult> {
        let resolution = self.input_schema().resolve(&input);
        if !resolution.is_valid() {
            self.log(
                LogLevel::Warn,
                format_args!(
                    "Pipeline '{}' rejected input: {} invalid field(s)",
                    self.name,
                    resolution.errors.len()
                ),
            );
            return Ok(RunResult::invalid(
                &self.name,
                dataset,
                input,
                resolution.errors,
            ));
        }

        self.log(
            LogLevel::Info,
            format_args!(
                "Starting pipeline '{}' with {} steps ({} items)",
                self.name,
                self.steps.len(),
                dataset.len()
            ),
        );

        let started = Instant::now();
        let seed = PipelineContext::with_input(dataset, resolution.output);
        let execution = self.execute(&seed, self.config.record_step_reports)?;

        self.log(
            LogLevel::Info,
            format_args!(
                "Pipeline '{}' completed in {:.3}s ({} items)",
                self.name,
                started.elapsed().as_secs_f64(),
                execution.context.dataset().len()
            ),
        );

        Ok(RunResult::from_context(
            &self.name,
            execution.context,
            execution.stopped,
            execution.reports,
        ))
    }

    /// Execute against an already-validated context
    ///
    /// Works on a fork of `context`. With a provided key, the returned context
    /// keeps the caller's dataset and gains `provided_key -> result dataset`;
    /// otherwise the result dataset replaces the caller's. Side-channel entries
    /// written by the steps are merged upward in both cases.
    pub fn call(&self, context: &PipelineContext) -> StagelineResult<PipelineContext> {
        Ok(self.execute(context, false)?.context)
    }

    fn execute(&self, caller: &PipelineContext, record: bool) -> StagelineResult<Execution> {
        let total = self.steps.len();
        let mut current = caller.fork();
        let mut stopped = false;
        let mut reports = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let items_in = current.dataset().len();
            self.log(
                LogLevel::Debug,
                format_args!(
                    "Executing step {}/{}: {} (pipeline: {})",
                    index + 1,
                    total,
                    step.name(),
                    self.name
                ),
            );

            let step_start = Instant::now();
            let output = step.call(&current).inspect_err(|e| {
                self.log(
                    LogLevel::Error,
                    format_args!(
                        "Step '{}' failed: {} (pipeline: {})",
                        step.name(),
                        e,
                        self.name
                    ),
                );
            })?;
            let duration = step_start.elapsed();

            match output {
                StepOutput::Context(next) => current = next,
                StepOutput::Dataset(dataset) => current.replace_dataset(dataset),
                StepOutput::Stop => stopped = true,
                StepOutput::StopWith(next) => {
                    current = next;
                    stopped = true;
                }
            }

            let items_out = current.dataset().len();
            if record {
                let report = if stopped {
                    StepReport::stopped(step.name(), step.kind(), duration, items_in, items_out)
                } else {
                    StepReport::completed(step.name(), step.kind(), duration, items_in, items_out)
                };
                reports.push(report);
            }

            if stopped {
                self.log(
                    LogLevel::Info,
                    format_args!(
                        "Step '{}' stopped pipeline '{}' after {}/{} steps",
                        step.name(),
                        self.name,
                        index + 1,
                        total
                    ),
                );
                break;
            }

            self.log_step_completed(step, duration, items_in, items_out);
        }

        Ok(Execution {
            context: self.merge_into(caller, current),
            stopped,
            reports,
        })
    }

    /// Fold a finished fork back into the caller's context
    fn merge_into(&self, caller: &PipelineContext, finished: PipelineContext) -> PipelineContext {
        let (dataset, nested_side_channel, _, _) = finished.into_parts();

        let mut side_channel = caller.side_channel().clone();
        side_channel.extend(nested_side_channel);

        let main_dataset = match &self.provided_key {
            Some(key) => {
                side_channel.insert(key.clone(), Value::Array(dataset));
                caller.dataset().clone()
            }
            None => dataset,
        };

        PipelineContext::from_parts(
            main_dataset,
            side_channel,
            caller.input().clone(),
            caller.errors().clone(),
        )
    }

    fn log(&self, level: LogLevel, message: fmt::Arguments<'_>) {
        if self.config.allows(level) {
            crate::pipeline_log!(level, LOG_SOURCE, "{}", message);
        }
    }

    fn log_step_completed(
        &self,
        step: &Step,
        duration: Duration,
        items_in: usize,
        items_out: usize,
    ) {
        if !self.config.allows(LogLevel::Debug) {
            return;
        }

        let mut fields = HashMap::new();
        fields.insert("pipeline".to_string(), json!(self.name));
        fields.insert("step".to_string(), json!(step.name()));
        fields.insert("kind".to_string(), json!(step.kind().as_str()));
        fields.insert("duration_ms".to_string(), json!(duration.as_millis() as u64));

        if self.config.log_item_counts {
            fields.insert("items_in".to_string(), json!(items_in));
            fields.insert("items_out".to_string(), json!(items_out));
            crate::pipeline_log!(
                LogLevel::Debug,
                LOG_SOURCE,
                context: fields,
                "Step '{}' completed in {:.3}s, {} -> {} items (pipeline: {})",
                step.name(),
                duration.as_secs_f64(),
                items_in,
                items_out,
                self.name
            );
        } else {
            crate::pipeline_log!(
                LogLevel::Debug,
                LOG_SOURCE,
                context: fields,
                "Step '{}' completed in {:.3}s (pipeline: {})",
                step.name(),
                duration.as_secs_f64(),
                self.name
            );
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("provided_key", &self.provided_key)
            .finish()
    }
}

/// A registered step; nested builders stay open until the parent is built
enum PendingStep {
    Ready(Step),
    Nested(PipelineBuilder),
}

/// Builder for constructing pipelines
///
/// Every composition method records construction errors instead of failing
/// immediately; [`build`](Self::build) reports the first one. `build` consumes
/// the builder, so a built pipeline can no longer be composed.
pub struct PipelineBuilder {
    name: String,
    steps: Vec<PendingStep>,
    provided_key: Option<String>,
    local_schema: Option<Schema>,
    config: Option<EngineConfig>,
    errors: Vec<StagelineError>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            provided_key: None,
            local_schema: None,
            config: None,
            errors: Vec::new(),
        }
    }

    /// Append a general transformation step
    pub fn step<F>(&mut self, step: F) -> &mut Self
    where
        F: Fn(&PipelineContext) -> StagelineResult<StepOutput> + Send + Sync + 'static,
    {
        self.step_with(step, StepOptions::new())
    }

    pub fn step_with<F>(&mut self, step: F, options: StepOptions) -> &mut Self
    where
        F: Fn(&PipelineContext) -> StagelineResult<StepOutput> + Send + Sync + 'static,
    {
        self.stage_with(step, options)
    }

    /// Append a stage object; its own name and key metadata are used
    pub fn stage<S>(&mut self, stage: S) -> &mut Self
    where
        S: PipelineStage + 'static,
    {
        self.stage_with(stage, StepOptions::new())
    }

    pub fn stage_with<S>(&mut self, stage: S, options: StepOptions) -> &mut Self
    where
        S: PipelineStage + 'static,
    {
        let options = self.default_name(options, stage.name(), DEFAULT_STEP_NAME);
        let step = RawStep::new(stage, options).map(Step::Raw);
        self.push(step)
    }

    /// Append a per-item predicate step
    pub fn filter<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&Value, &PipelineContext) -> bool + Send + Sync + 'static,
    {
        self.filter_with(predicate, StepOptions::new())
    }

    pub fn filter_with<F>(&mut self, predicate: F, options: StepOptions) -> &mut Self
    where
        F: Fn(&Value, &PipelineContext) -> bool + Send + Sync + 'static,
    {
        self.filter_by_with(predicate, options)
    }

    /// Append a filter around a predicate object; its own name and key
    /// metadata are used
    pub fn filter_by<P>(&mut self, predicate: P) -> &mut Self
    where
        P: ItemPredicate + 'static,
    {
        self.filter_by_with(predicate, StepOptions::new())
    }

    pub fn filter_by_with<P>(&mut self, predicate: P, options: StepOptions) -> &mut Self
    where
        P: ItemPredicate + 'static,
    {
        let options = self.default_name(options, predicate.name(), DEFAULT_FILTER_NAME);
        let step = Filter::from_predicate(predicate, options).map(Step::Filter);
        self.push(step)
    }

    /// Append a per-item transform-or-drop step
    pub fn reduce<F>(&mut self, transform: F) -> &mut Self
    where
        F: Fn(&Value, &PipelineContext) -> Option<Value> + Send + Sync + 'static,
    {
        self.reduce_with(transform, StepOptions::new())
    }

    pub fn reduce_with<F>(&mut self, transform: F, options: StepOptions) -> &mut Self
    where
        F: Fn(&Value, &PipelineContext) -> Option<Value> + Send + Sync + 'static,
    {
        self.reduce_by_with(transform, options)
    }

    /// Append a reducer around a transform object; its own name and key
    /// metadata are used
    pub fn reduce_by<T>(&mut self, transform: T) -> &mut Self
    where
        T: ItemTransform + 'static,
    {
        self.reduce_by_with(transform, StepOptions::new())
    }

    pub fn reduce_by_with<T>(&mut self, transform: T, options: StepOptions) -> &mut Self
    where
        T: ItemTransform + 'static,
    {
        let options = self.default_name(options, transform.name(), DEFAULT_REDUCE_NAME);
        let step = Reducer::from_transform(transform, options).map(Step::Reduce);
        self.push(step)
    }

    /// Append an existing pipeline as a nested step
    ///
    /// An already-built pipeline keeps its own configuration.
    pub fn pipeline(&mut self, pipeline: impl Into<Arc<Pipeline>>) -> &mut Self {
        self.steps.push(PendingStep::Ready(Step::Pipeline(pipeline.into())));
        self
    }

    /// Describe a nested pipeline with `block` and append it
    ///
    /// The nested pipeline is built together with this one. Unless `block`
    /// sets its own configuration, it uses the configuration this builder
    /// ends up with.
    pub fn nested<F>(&mut self, name: impl Into<String>, block: F) -> &mut Self
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut nested = PipelineBuilder::new(name);
        block(&mut nested);
        self.steps.push(PendingStep::Nested(nested));
        self
    }

    /// Write this pipeline's result into the caller's side-channel under `key`
    /// instead of replacing the caller's dataset
    pub fn provides(&mut self, key: impl Into<String>) -> &mut Self {
        let key = key.into();
        if key.trim().is_empty() {
            return self.fail("provided key must not be empty".to_string());
        }
        if let Some(existing) = &self.provided_key {
            let message = format!(
                "pipeline '{}' already provides '{}', cannot also provide '{}'",
                self.name, existing, key
            );
            return self.fail(message);
        }
        self.provided_key = Some(key);
        self
    }

    /// Set this pipeline's local input schema
    pub fn input_schema(&mut self, schema: Schema) -> &mut Self {
        if self.local_schema.is_some() {
            let message = format!("pipeline '{}' already declares an input schema", self.name);
            return self.fail(message);
        }
        self.local_schema = Some(schema);
        self
    }

    /// Describe the local input schema with a block
    pub fn input_schema_with<F>(&mut self, block: F) -> &mut Self
    where
        F: FnOnce(&mut SchemaBuilder),
    {
        let mut builder = Schema::builder();
        block(&mut builder);
        self.input_schema(builder.build())
    }

    /// Configuration for this pipeline and the nested pipelines it describes
    pub fn config(&mut self, config: EngineConfig) -> &mut Self {
        self.config = Some(config);
        self
    }

    /// Build nested pipelines, validate dependencies, merge schemas and freeze
    pub fn build(self) -> StagelineResult<Pipeline> {
        self.build_within(None)
    }

    fn build_within(self, inherited: Option<&EngineConfig>) -> StagelineResult<Pipeline> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let config = self
            .config
            .or_else(|| inherited.cloned())
            .unwrap_or_default();

        let steps = self
            .steps
            .into_iter()
            .map(|pending| match pending {
                PendingStep::Ready(step) => Ok(step),
                PendingStep::Nested(builder) => builder
                    .build_within(Some(&config))
                    .map(|nested| Step::Pipeline(Arc::new(nested))),
            })
            .collect::<StagelineResult<Vec<Step>>>()?;

        validate_dependencies(&self.name, &steps)?;

        let pipeline = Pipeline {
            name: self.name,
            steps,
            provided_key: self.provided_key,
            local_schema: self.local_schema,
            merged_schema: OnceLock::new(),
            config,
        };
        let field_count = pipeline.input_schema().len();

        pipeline.log(
            LogLevel::Debug,
            format_args!(
                "Built pipeline '{}' with {} steps and {} input fields",
                pipeline.name,
                pipeline.steps.len(),
                field_count
            ),
        );
        Ok(pipeline)
    }

    /// Number unnamed steps by position; a callable's own name is kept
    fn default_name(
        &self,
        mut options: StepOptions,
        own_name: &str,
        fallback: &str,
    ) -> StepOptions {
        if options.name.is_none() && own_name == fallback {
            options.name = Some(format!("{}#{}", fallback, self.steps.len() + 1));
        }
        options
    }

    fn push(&mut self, step: StagelineResult<Step>) -> &mut Self {
        match step {
            Ok(step) => self.steps.push(PendingStep::Ready(step)),
            Err(err) => self.errors.push(err),
        }
        self
    }

    fn fail(&mut self, message: String) -> &mut Self {
        self.errors.push(StagelineError::Construction(message));
        self
    }
}
