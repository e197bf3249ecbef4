use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::batch::Manifest;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Result of a single tool implementation.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Why a single remote target could not be fetched.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum NetworkError {
    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Non-success status: {0}")]
    NonSuccessStatus(u16),
}

impl NetworkError {
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkError::Unreachable(_) => "unreachable",
            NetworkError::Timeout => "timeout",
            NetworkError::NonSuccessStatus(_) => "non_success_status",
        }
    }
}

/// Failure of one tool call inside a turn. Recorded in history, never aborts siblings.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Network error: {0}")]
    Network(NetworkError),

    #[error("All {} targets failed", .0.entries.len())]
    AllTargetsFailed(Manifest),

    #[error("No table found in document")]
    NoTableFound,

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Cancelled before completion")]
    Cancelled,
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::ToolNotFound(_) => "tool_not_found",
            ToolError::Network(e) => e.kind(),
            ToolError::AllTargetsFailed(_) => "all_targets_failed",
            ToolError::NoTableFound => "no_table_found",
            ToolError::Translation(_) => "translation",
            ToolError::Storage(_) => "storage",
            ToolError::Browser(_) => "browser",
            ToolError::Cancelled => "cancelled",
        }
    }
}

impl From<NetworkError> for ToolError {
    fn from(err: NetworkError) -> Self {
        ToolError::Network(err)
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Storage(err.to_string())
    }
}

impl From<zip::result::ZipError> for ToolError {
    fn from(err: zip::result::ZipError) -> Self {
        ToolError::Storage(format!("archive: {}", err))
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::Storage(format!("serialization: {}", err))
    }
}

/// A tool failure tagged with the call that produced it.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Tool '{tool_id}' (call {call_id}) failed: {error}")]
pub struct ToolExecutionError {
    pub tool_id: String,
    pub call_id: String,
    pub error: ToolError,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Turn {turn_id} failed: all {} tool calls failed and no reply was produced", .failures.len())]
    TurnFailed {
        turn_id: String,
        failures: Vec<ToolExecutionError>,
    },

    #[error("Decision procedure error: {0}")]
    DecisionProcedure(String),

    #[error("Turn {turn_id} timed out after {after:?}")]
    Timeout { turn_id: String, after: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Browser error: {0}")]
    Browser(String),
}

impl DispatchError {
    /// Stable identifier used by callers to render or branch on the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::AgentNotFound(_) => "agent_not_found",
            DispatchError::ToolNotFound(_) => "tool_not_found",
            DispatchError::AlreadyExists(_) => "already_exists",
            DispatchError::InvalidArguments(_) => "invalid_arguments",
            DispatchError::TurnFailed { .. } => "turn_failed",
            DispatchError::DecisionProcedure(_) => "decision_procedure",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Config(_) => "config",
            DispatchError::Storage(_) => "storage",
            DispatchError::Browser(_) => "browser",
        }
    }

    /// The same request may succeed later: the model was unavailable or the turn ran out of time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::DecisionProcedure(_) | DispatchError::Timeout { .. })
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Storage(format!("serialization: {}", err))
    }
}

impl From<toml::de::Error> for DispatchError {
    fn from(err: toml::de::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DispatchError {
    fn from(err: toml::ser::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

impl From<config::ConfigError> for DispatchError {
    fn from(err: config::ConfigError) -> Self {
        DispatchError::Config(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for DispatchError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        DispatchError::Browser(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let timeout = DispatchError::Timeout {
            turn_id: "t1".to_string(),
            after: Duration::from_secs(1),
        };
        assert!(timeout.is_retryable());
        assert!(DispatchError::DecisionProcedure("down".to_string()).is_retryable());
        assert!(!DispatchError::AgentNotFound("a".to_string()).is_retryable());
        assert!(!DispatchError::AlreadyExists("x".to_string()).is_retryable());
    }

    #[test]
    fn test_turn_failed_lists_failures() {
        let err = DispatchError::TurnFailed {
            turn_id: "t1".to_string(),
            failures: vec![ToolExecutionError {
                tool_id: "scrape_web_page".to_string(),
                call_id: "call_1".to_string(),
                error: ToolError::Network(NetworkError::NonSuccessStatus(404)),
            }],
        };
        assert_eq!(err.kind(), "turn_failed");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("all 1 tool calls failed"));
    }

    #[test]
    fn test_tool_error_serializes_with_kind() {
        let err = ToolError::Network(NetworkError::Unreachable("dns".to_string()));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "network");
        assert_eq!(value["detail"]["kind"], "unreachable");
        assert_eq!(value["detail"]["reason"], "dns");

        let back: ToolError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }
}
