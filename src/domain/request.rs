//! Loop request types.
//!
//! A `LoopRequest` is the wire contract for starting a refinement loop. It is
//! immutable once admitted; the service validates it before admission.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CrucibleError, Result};
use crate::id::generate_loop_id;

/// Priority of a loop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Get a human-readable name for the priority.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// Option flags controlling optional loop behaviors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRequestOptions {
    /// Re-validate only revised nodes instead of the whole content.
    pub incremental_validation: bool,
    /// Record disagreements and feed learning events.
    pub learning_enabled: bool,
    /// Allow escalation to human review.
    pub escalation_enabled: bool,
}

impl Default for LoopRequestOptions {
    fn default() -> Self {
        Self {
            incremental_validation: true,
            learning_enabled: true,
            escalation_enabled: true,
        }
    }
}

/// A request to run a refinement loop. Immutable once admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRequest {
    /// Unique request identifier
    pub id: String,
    /// Kind of content being refined (e.g. "article", "email")
    pub content_type: String,
    /// Per-node confidence every node must reach
    pub confidence_threshold: f64,
    /// Maximum revision iterations
    pub max_iterations: u32,
    /// Wall-clock budget measured from loop start
    pub timeout_ms: u64,
    /// Scheduling priority
    pub priority: Priority,
    /// Free-form generation context
    pub context: Value,
    /// Option flags
    pub options: LoopRequestOptions,
}

impl LoopRequest {
    /// Create a request with sensible defaults.
    pub fn new(content_type: impl Into<String>, confidence_threshold: f64) -> Self {
        Self {
            id: generate_loop_id(),
            content_type: content_type.into(),
            confidence_threshold,
            max_iterations: 5,
            timeout_ms: 120_000,
            priority: Priority::Normal,
            context: Value::Null,
            options: LoopRequestOptions::default(),
        }
    }

    /// Set the maximum iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the wall-clock timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the generation context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Set the option flags.
    pub fn with_options(mut self, options: LoopRequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Check structural validity of the request.
    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(CrucibleError::InvalidRequest(format!(
                "confidence_threshold must be in (0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(CrucibleError::InvalidRequest(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(CrucibleError::InvalidRequest(
                "timeout_ms must be nonzero".to_string(),
            ));
        }
        if self.content_type.is_empty() {
            return Err(CrucibleError::InvalidRequest(
                "content_type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_request_defaults() {
        let request = LoopRequest::new("article", 0.8);
        assert!(request.id.starts_with("loop-"));
        assert_eq!(request.content_type, "article");
        assert_eq!(request.confidence_threshold, 0.8);
        assert_eq!(request.max_iterations, 5);
        assert_eq!(request.priority, Priority::Normal);
        assert!(request.options.incremental_validation);
        assert!(request.options.learning_enabled);
    }

    #[test]
    fn test_request_builders() {
        let request = LoopRequest::new("email", 0.9)
            .with_max_iterations(10)
            .with_timeout_ms(5_000)
            .with_priority(Priority::High)
            .with_context(json!({"audience": "developers"}));

        assert_eq!(request.max_iterations, 10);
        assert_eq!(request.timeout_ms, 5_000);
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.context["audience"], "developers");
    }

    #[test]
    fn test_validate_accepts_good_request() {
        assert!(LoopRequest::new("article", 0.8).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        assert!(LoopRequest::new("article", 0.0).validate().is_err());
        assert!(LoopRequest::new("article", 1.5).validate().is_err());
        assert!(LoopRequest::new("article", -0.1).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let request = LoopRequest::new("article", 0.8).with_max_iterations(0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let request = LoopRequest::new("article", 0.8).with_timeout_ms(0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_content_type() {
        let request = LoopRequest::new("", 0.8);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_request_serialization_roundtrip() {
        let request = LoopRequest::new("summary", 0.75).with_priority(Priority::Critical);
        let json = serde_json::to_string(&request).unwrap();
        let back: LoopRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, request.id);
        assert_eq!(back.priority, Priority::Critical);
    }
}
