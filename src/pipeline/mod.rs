//! Composable pipelines over in-memory datasets
//!
//! A pipeline is an ordered tree of steps (raw steps, filters, reducers and
//! nested pipelines) that turns a dataset into a new dataset plus a
//! side-channel of named values. Steps declare which side-channel keys they
//! expect and provide; the pipeline checks those declarations once, when it
//! is built, before any data flows.
//!
//! # Example
//! ```
//! use stageline::pipeline::{Pipeline, StepOptions};
//! use serde_json::{json, Map};
//!
//! let pipeline = Pipeline::new("above-average", |p| {
//!     p.nested("average", |avg| {
//!         avg.provides("average");
//!         avg.step(|ctx| {
//!             let values: Vec<f64> = ctx.dataset().iter().filter_map(|v| v.as_f64()).collect();
//!             let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
//!             Ok(vec![json!(mean)].into())
//!         });
//!     });
//!     p.filter_with(
//!         |item, ctx| {
//!             let mean = ctx.get_first("average").ok().and_then(|v| v.as_f64());
//!             matches!((item.as_f64(), mean), (Some(v), Some(m)) if v > m)
//!         },
//!         StepOptions::new().expects(["average"]),
//!     );
//! })
//! .unwrap();
//!
//! let result = pipeline.run(vec![json!(1), json!(5), json!(9)], Map::new()).unwrap();
//! assert_eq!(result.dataset(), &vec![json!(9)]);
//! assert_eq!(result.get("average"), Some(&json!([5.0])));
//! ```

pub mod context;
pub mod core;
pub mod executor;
pub mod stages;
pub mod validate;

// Re-export main types
pub use self::context::{Dataset, PipelineContext, SideChannel};
pub use self::core::{RunResult, StepKind, StepOutcome, StepOutput, StepReport};
pub use self::executor::{Pipeline, PipelineBuilder};
pub use self::stages::{
    Filter, ItemPredicate, ItemTransform, PipelineStage, RawStep, Reducer, Step, StepOptions,
};
pub use self::validate::validate_dependencies;
