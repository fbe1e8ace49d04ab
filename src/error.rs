//! Unified error model for the care core.
//! Every component returns `CoreResult<T>`; API layers map the enum to status codes
//! with `http_status()` instead of special-casing error types.

use serde::{Deserialize, Serialize};

/// One endpoint's failure during a blob store call, kept for the aggregated error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub reason: String,
}

impl std::fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.reason)
    }
}

fn join_failures(failures: &[EndpointFailure]) -> String {
    if failures.is_empty() {
        return "no endpoint attempted".to_string();
    }
    failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreError {
    #[error("{code}: {reason}")]
    PolicyDenied { code: String, reason: String },
    #[error("{code}: {message}")]
    WorkflowConflict { code: String, message: String },
    #[error("storage_unavailable: {operation} {id} failed on every endpoint [{}]", join_failures(.failures))]
    StorageUnavailable { operation: String, id: String, failures: Vec<EndpointFailure> },
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    #[error("{code}: {reason}")]
    IntegrityViolation { code: String, reason: String },
    #[error("{code}: {message}")]
    InvalidInput { code: String, message: String },
    #[error("config: {message}")]
    Config { message: String },
    #[error("event_log: {message}")]
    EventLog { message: String },
    #[error("internal: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn code_str(&self) -> &str {
        match self {
            CoreError::PolicyDenied { code, .. }
            | CoreError::WorkflowConflict { code, .. }
            | CoreError::NotFound { code, .. }
            | CoreError::IntegrityViolation { code, .. }
            | CoreError::InvalidInput { code, .. } => code.as_str(),
            CoreError::StorageUnavailable { .. } => "storage_unavailable",
            CoreError::Config { .. } => "config",
            CoreError::EventLog { .. } => "event_log",
            CoreError::Internal { .. } => "internal",
        }
    }

    /// Human-readable reason, without the code prefix.
    pub fn message(&self) -> String {
        match self {
            CoreError::PolicyDenied { reason, .. } | CoreError::IntegrityViolation { reason, .. } => reason.clone(),
            CoreError::WorkflowConflict { message, .. }
            | CoreError::NotFound { message, .. }
            | CoreError::InvalidInput { message, .. }
            | CoreError::Config { message }
            | CoreError::EventLog { message }
            | CoreError::Internal { message } => message.clone(),
            CoreError::StorageUnavailable { failures, .. } => join_failures(failures),
        }
    }

    pub fn denied<S: Into<String>>(code: S, reason: S) -> Self { CoreError::PolicyDenied { code: code.into(), reason: reason.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { CoreError::WorkflowConflict { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { CoreError::NotFound { code: code.into(), message: msg.into() } }
    pub fn integrity<S: Into<String>>(code: S, reason: S) -> Self { CoreError::IntegrityViolation { code: code.into(), reason: reason.into() } }
    pub fn invalid<S: Into<String>>(code: S, msg: S) -> Self { CoreError::InvalidInput { code: code.into(), message: msg.into() } }
    pub fn config<S: Into<String>>(msg: S) -> Self { CoreError::Config { message: msg.into() } }
    pub fn event_log<S: Into<String>>(msg: S) -> Self { CoreError::EventLog { message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { CoreError::Internal { message: msg.into() } }

    pub fn storage_unavailable(operation: &str, id: &str, failures: Vec<EndpointFailure>) -> Self {
        CoreError::StorageUnavailable { operation: operation.to_string(), id: id.to_string(), failures }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::PolicyDenied { .. } => 403,
            CoreError::WorkflowConflict { .. } => 409,
            CoreError::StorageUnavailable { .. } => 503,
            CoreError::NotFound { .. } => 404,
            CoreError::IntegrityViolation { .. } => 422,
            CoreError::InvalidInput { .. } => 400,
            CoreError::Config { .. } | CoreError::EventLog { .. } | CoreError::Internal { .. } => 500,
        }
    }

    /// True for failures a caller may retry later without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StorageUnavailable { .. } | CoreError::EventLog { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal { message: format!("io: {}", err) }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidInput { code: "bad_json".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Internal unless converted explicitly elsewhere
        CoreError::Internal { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(CoreError::denied("policy_denied", "no").http_status(), 403);
        assert_eq!(CoreError::conflict("expired", "expired").http_status(), 409);
        assert_eq!(CoreError::storage_unavailable("put", "b1", vec![]).http_status(), 503);
        assert_eq!(CoreError::not_found("not_found", "missing").http_status(), 404);
        assert_eq!(CoreError::integrity("immutable", "no").http_status(), 422);
        assert_eq!(CoreError::invalid("bad_input", "oops").http_status(), 400);
        assert_eq!(CoreError::internal("boom").http_status(), 500);
    }

    #[test]
    fn storage_unavailable_lists_every_endpoint() {
        let err = CoreError::storage_unavailable(
            "put",
            "blob-1",
            vec![
                EndpointFailure { endpoint: "a".into(), reason: "HTTP 500".into() },
                EndpointFailure { endpoint: "b".into(), reason: "timeout".into() },
            ],
        );
        let text = err.to_string();
        assert!(text.contains("a: HTTP 500"), "{}", text);
        assert!(text.contains("b: timeout"), "{}", text);
        assert_eq!(err.code_str(), "storage_unavailable");
        assert!(err.is_retryable());
    }

    #[test]
    fn serializes_with_type_tag() {
        let v = serde_json::to_value(CoreError::conflict("already_finalized", "request already finalized")).unwrap();
        assert_eq!(v["type"], "workflow_conflict");
        assert_eq!(v["code"], "already_finalized");
    }
}
