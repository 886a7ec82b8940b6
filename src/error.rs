use thiserror::Error;

/// Central error type for the stageline engine
#[derive(Error, Debug)]
pub enum StagelineError {
    // ============================================================================
    // Construction Errors
    // ============================================================================
    /// Raised while the builder callback runs; the pipeline is never built
    #[error("Construction error: {0}")]
    Construction(String),

    /// A step expects side-channel keys that no preceding sibling provides
    #[error(
        "Unmet dependencies {unmet:?} for step '{step}' in pipeline '{pipeline}' (available: {available:?})"
    )]
    Dependency {
        pipeline: String,
        step: String,
        unmet: Vec<String>,
        available: Vec<String>,
    },

    // ============================================================================
    // Context Errors
    // ============================================================================
    #[error("Required context key not found: {0}")]
    MissingKey(String),

    #[error("Context key '{key}' is not a {expected}")]
    WrongType { key: String, expected: &'static str },

    // ============================================================================
    // Execution Errors
    // ============================================================================
    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StagelineError {
    /// Convenience constructor for failures raised from user step code
    pub fn step_failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        StagelineError::StepFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Whether this error aborts pipeline assembly rather than a single run
    pub fn is_construction_time(&self) -> bool {
        matches!(
            self,
            StagelineError::Construction(_) | StagelineError::Dependency { .. }
        )
    }
}

// Helper type alias for Results
pub type StagelineResult<T> = Result<T, StagelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StagelineError::Construction("provides declared twice".to_string());
        assert_eq!(err.to_string(), "Construction error: provides declared twice");
    }

    #[test]
    fn test_dependency_error_names_keys() {
        let err = StagelineError::Dependency {
            pipeline: "compare".to_string(),
            step: "savings".to_string(),
            unmet: vec!["current".to_string()],
            available: vec!["totals".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("current"));
        assert!(message.contains("totals"));
        assert!(message.contains("savings"));
        assert!(err.is_construction_time());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StagelineError = json_err.into();
        assert!(matches!(err, StagelineError::Json(_)));
        assert!(!err.is_construction_time());
    }

    #[test]
    fn test_step_failed() {
        let err = StagelineError::step_failed("load", "boom");
        assert_eq!(err.to_string(), "Step 'load' failed: boom");
    }
}
