use crate::error::{StagelineError, StagelineResult};
use crate::schema::ValidationErrors;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Ordered collection of items flowing through a pipeline
pub type Dataset = Vec<Value>;

/// Named auxiliary values produced alongside the main dataset
pub type SideChannel = HashMap<String, Value>;

/// Per-invocation state handed from step to step
///
/// The context bundles the current dataset, the side-channel store, the
/// resolved input and any validation errors. Steps never mutate the context
/// they are given; they return a replacement (or a bare dataset) and the
/// executor folds it in. Nested pipelines work on a [`fork`](Self::fork), so
/// their intermediate writes are invisible to siblings.
///
/// # Example
/// ```
/// use stageline::pipeline::PipelineContext;
/// use serde_json::json;
///
/// let mut context = PipelineContext::new(vec![json!({ "slug": "p1" })]);
/// context.set("threshold", json!(10));
///
/// assert_eq!(context.get_number("threshold").unwrap(), 10.0);
/// assert_eq!(context.dataset().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineContext {
    dataset: Dataset,
    side_channel: SideChannel,
    input: Map<String, Value>,
    errors: ValidationErrors,
}

impl PipelineContext {
    /// Create a context over `dataset` with no input
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            ..Self::default()
        }
    }

    /// Create a context over `dataset` seeded with an already-resolved input
    pub fn with_input(dataset: Dataset, input: Map<String, Value>) -> Self {
        Self {
            dataset,
            input,
            ..Self::default()
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    pub fn side_channel(&self) -> &SideChannel {
        &self.side_channel
    }

    pub fn input(&self) -> &Map<String, Value> {
        &self.input
    }

    pub fn input_value(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    // ------------------------------------------------------------------
    // Forking
    // ------------------------------------------------------------------

    /// Independent copy: same dataset, side-channel copied rather than shared
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Fork with the dataset replaced
    pub fn with_dataset(&self, dataset: Dataset) -> Self {
        Self {
            dataset,
            side_channel: self.side_channel.clone(),
            input: self.input.clone(),
            errors: self.errors.clone(),
        }
    }

    /// Fork with the side-channel replaced
    pub fn with_side_channel(&self, side_channel: SideChannel) -> Self {
        Self {
            dataset: self.dataset.clone(),
            side_channel,
            input: self.input.clone(),
            errors: self.errors.clone(),
        }
    }

    /// Fork with the errors mapping replaced
    pub fn with_errors(&self, errors: ValidationErrors) -> Self {
        Self {
            dataset: self.dataset.clone(),
            side_channel: self.side_channel.clone(),
            input: self.input.clone(),
            errors,
        }
    }

    pub(crate) fn replace_dataset(&mut self, dataset: Dataset) {
        self.dataset = dataset;
    }

    pub(crate) fn from_parts(
        dataset: Dataset,
        side_channel: SideChannel,
        input: Map<String, Value>,
        errors: ValidationErrors,
    ) -> Self {
        Self {
            dataset,
            side_channel,
            input,
            errors,
        }
    }

    pub(crate) fn into_parts(self) -> (Dataset, SideChannel, Map<String, Value>, ValidationErrors) {
        (self.dataset, self.side_channel, self.input, self.errors)
    }

    // ------------------------------------------------------------------
    // Side-channel access
    // ------------------------------------------------------------------

    /// Set a side-channel value; a later write to the same key overwrites
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.side_channel.insert(key.into(), value);
    }

    /// Store a dataset under `key` as a JSON array
    pub fn set_dataset(&mut self, key: impl Into<String>, dataset: Dataset) {
        self.side_channel.insert(key.into(), Value::Array(dataset));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.side_channel.get(key)
    }

    /// Get a side-channel value or return an error if not found
    pub fn get_required(&self, key: &str) -> StagelineResult<&Value> {
        self.side_channel
            .get(key)
            .ok_or_else(|| StagelineError::MissingKey(key.to_string()))
    }

    /// Get a side-channel value that holds a dataset
    pub fn get_dataset(&self, key: &str) -> StagelineResult<&Dataset> {
        match self.get_required(key)? {
            Value::Array(items) => Ok(items),
            _ => Err(wrong_type(key, "dataset")),
        }
    }

    /// First item of a dataset stored under `key`
    pub fn get_first(&self, key: &str) -> StagelineResult<&Value> {
        self.get_dataset(key)?
            .first()
            .ok_or_else(|| StagelineError::MissingKey(format!("{}[0]", key)))
    }

    pub fn get_string(&self, key: &str) -> StagelineResult<String> {
        match self.get_required(key)? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(wrong_type(key, "string")),
        }
    }

    pub fn get_number(&self, key: &str) -> StagelineResult<f64> {
        match self.get_required(key)? {
            Value::Number(n) => n.as_f64().ok_or_else(|| wrong_type(key, "number")),
            _ => Err(wrong_type(key, "number")),
        }
    }

    pub fn get_bool(&self, key: &str) -> StagelineResult<bool> {
        match self.get_required(key)? {
            Value::Bool(b) => Ok(*b),
            _ => Err(wrong_type(key, "boolean")),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.side_channel.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.side_channel.remove(key)
    }

    /// Side-channel keys, sorted
    pub fn keys(&self) -> Vec<&String> {
        let mut keys: Vec<_> = self.side_channel.keys().collect();
        keys.sort();
        keys
    }

    // ------------------------------------------------------------------
    // Input access
    // ------------------------------------------------------------------

    pub fn input_string(&self, key: &str) -> StagelineResult<String> {
        match self.input.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(wrong_type(key, "string")),
            None => Err(StagelineError::MissingKey(key.to_string())),
        }
    }

    pub fn input_number(&self, key: &str) -> StagelineResult<f64> {
        match self.input.get(key) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| wrong_type(key, "number")),
            Some(_) => Err(wrong_type(key, "number")),
            None => Err(StagelineError::MissingKey(key.to_string())),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StagelineError {
    StagelineError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_creation() {
        let context = PipelineContext::new(vec![json!(1), json!(2)]);
        assert_eq!(context.dataset(), &vec![json!(1), json!(2)]);
        assert!(context.keys().is_empty());
        assert!(context.input().is_empty());
        assert!(context.errors().is_empty());
    }

    #[test]
    fn test_typed_side_channel_access() {
        let mut context = PipelineContext::default();
        context.set("name", json!("p1"));
        context.set("cost", json!(12.5));
        context.set("active", json!(true));

        assert_eq!(context.get_string("name").unwrap(), "p1");
        assert_eq!(context.get_number("cost").unwrap(), 12.5);
        assert!(context.get_bool("active").unwrap());
        assert_eq!(context.keys(), vec!["active", "cost", "name"]);
    }

    #[test]
    fn test_missing_key_and_wrong_type() {
        let mut context = PipelineContext::default();
        context.set("name", json!("p1"));

        assert!(matches!(
            context.get_number("missing"),
            Err(StagelineError::MissingKey(_))
        ));
        assert!(matches!(
            context.get_bool("name"),
            Err(StagelineError::WrongType { expected: "boolean", .. })
        ));
    }

    #[test]
    fn test_dataset_values() {
        let mut context = PipelineContext::default();
        context.set_dataset("current", vec![json!({ "slug": "p2" })]);

        assert_eq!(context.get_dataset("current").unwrap().len(), 1);
        assert_eq!(context.get_first("current").unwrap()["slug"], json!("p2"));

        context.set_dataset("empty", Vec::new());
        assert!(context.get_first("empty").is_err());
    }

    #[test]
    fn test_fork_is_independent() {
        let mut parent = PipelineContext::new(vec![json!(1)]);
        parent.set("shared", json!("before"));

        let mut child = parent.fork();
        child.set("shared", json!("after"));
        child.set("child_only", json!(true));
        child.replace_dataset(vec![]);

        assert_eq!(parent.get_string("shared").unwrap(), "before");
        assert!(!parent.has("child_only"));
        assert_eq!(parent.dataset().len(), 1);
    }

    #[test]
    fn test_with_overrides() {
        let mut input = Map::new();
        input.insert("months".to_string(), json!(2));
        let context = PipelineContext::with_input(vec![json!(1)], input);

        let replaced = context.with_dataset(vec![json!(9)]);
        assert_eq!(replaced.dataset(), &vec![json!(9)]);
        assert_eq!(replaced.input_number("months").unwrap(), 2.0);

        let mut side = SideChannel::new();
        side.insert("k".to_string(), json!("v"));
        assert!(context.with_side_channel(side).has("k"));

        let mut errors = ValidationErrors::new();
        errors.insert("$.x".to_string(), vec!["is required".to_string()]);
        assert_eq!(context.with_errors(errors).errors().len(), 1);
    }

    #[test]
    fn test_input_access() {
        let mut input = Map::new();
        input.insert("slug".to_string(), json!("p2"));
        let context = PipelineContext::with_input(Vec::new(), input);

        assert_eq!(context.input_string("slug").unwrap(), "p2");
        assert!(context.input_number("slug").is_err());
        assert!(context.input_string("missing").is_err());
        assert_eq!(context.input_value("slug"), Some(&json!("p2")));
    }

    #[test]
    fn test_remove() {
        let mut context = PipelineContext::default();
        context.set("key1", json!("value1"));
        assert!(context.has("key1"));
        context.remove("key1");
        assert!(!context.has("key1"));
    }
}
