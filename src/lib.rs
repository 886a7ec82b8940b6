//! Synchronous, in-memory pipeline engine.
//!
//! Datasets flow through a declaratively built tree of filters, per-item
//! reducers and nested pipelines, producing a transformed dataset plus a
//! side-channel of named auxiliary values. Side-channel dependencies between
//! steps are validated once, when a pipeline is built.

pub mod config;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod schema;

#[doc(hidden)]
pub use tracing;

pub use config::EngineConfig;
pub use error::{StagelineError, StagelineResult};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineContext, RunResult, StepOptions, StepOutput};
pub use schema::{FieldType, Schema};
